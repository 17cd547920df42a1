use std::path::Path;

use serde::{Deserialize, Serialize};

/// A scripted session, read from a `.toml` file:
///
/// ```toml
/// engine_load_delay_ms = 20
///
/// [[step]]
/// frames = 3
///
/// [[step]]
/// down = { at = [20.0, 0.0] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// How long the simulated engine download takes.
    #[serde(default)]
    pub engine_load_delay_ms: u64,
    /// When set, the engine load fails with this message.
    #[serde(default)]
    pub fail_engine_load: Option<String>,
    #[serde(default = "default_viewport")]
    pub viewport: [f32; 2],
    /// Stripped from file names in symbolicated stacks.
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

fn default_viewport() -> [f32; 2] {
    [1024.0, 768.0]
}

/// One replayed host event. Pointer steps take ground-plane coordinates and
/// are projected to the screen with the camera of the moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Run this many animation frames.
    Frames(u32),
    WaitMs(u64),
    Wheel {
        #[serde(default)]
        dx: f32,
        #[serde(default)]
        dy: f32,
        #[serde(default)]
        shift: bool,
    },
    /// Raw mouse move in screen pixels; drives the camera.
    MouseMove {
        x: f32,
        y: f32,
        #[serde(default)]
        dx: f32,
        #[serde(default)]
        dy: f32,
        #[serde(default)]
        buttons: u16,
    },
    Down { at: [f32; 2] },
    Drag { at: [f32; 2] },
    Up { at: [f32; 2] },
    Resize([f32; 2]),
    Rendering(bool),
    /// Panic inside the host; the capture hook should record it.
    Panic(String),
    /// An unhandled promise rejection without a stack.
    Reject(String),
}

impl Scenario {
    pub fn parse(text: &str) -> anyhow::Result<Scenario> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Scenario> {
        if !path.exists() {
            anyhow::bail!("Scenario file not found: {}", path.display());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let scenario = Scenario::parse("").unwrap();
        assert_eq!(scenario.engine_load_delay_ms, 0);
        assert_eq!(scenario.fail_engine_load, None);
        assert_eq!(scenario.viewport, [1024.0, 768.0]);
        assert!(scenario.steps.is_empty());
    }

    #[test]
    fn test_parse_steps_in_order() {
        let text = r#"
            engine_load_delay_ms = 15
            origin = "http://localhost:1234"

            [[step]]
            frames = 2

            [[step]]
            wheel = { dy = -120.0 }

            [[step]]
            down = { at = [20.0, 0.0] }

            [[step]]
            rendering = false

            [[step]]
            reject = "boom"
        "#;
        let scenario = Scenario::parse(text).unwrap();
        assert_eq!(scenario.engine_load_delay_ms, 15);
        assert_eq!(scenario.origin.as_deref(), Some("http://localhost:1234"));
        assert_eq!(
            scenario.steps,
            vec![
                Step::Frames(2),
                Step::Wheel {
                    dx: 0.0,
                    dy: -120.0,
                    shift: false
                },
                Step::Down { at: [20.0, 0.0] },
                Step::Rendering(false),
                Step::Reject("boom".into()),
            ]
        );
    }

    #[test]
    fn test_unknown_step_rejected() {
        assert!(Scenario::parse("[[step]]\nteleport = 1\n").is_err());
    }

    // ── files ──

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "fail_engine_load = \"404\"\n\n[[step]]\nframes = 1\n").unwrap();

        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(scenario.fail_engine_load.as_deref(), Some("404"));
        assert_eq!(scenario.steps, vec![Step::Frames(1)]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Scenario::load(&dir.path().join("nope.toml"));
        assert!(result.is_err());
    }
}
