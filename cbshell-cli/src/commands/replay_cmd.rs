use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use cbshell_web::camera::{MouseButtons, MouseMoveInput, WheelInput};
use cbshell_web::diagnostics::{CapturedError, ErrorCapture, ErrorCategory, StackTraceSymbolicator};
use cbshell_web::engine::EngineError;
use cbshell_web::input::{PointerInput, PointerKind};
use cbshell_web::scheduler::{FrameStats, SchedulerState};
use cbshell_web::settings::{SettingsSource, TomlSettings};
use cbshell_web::Shell;
use glam::{Vec2, Vec3};

use crate::cli::default_settings_path;
use crate::host::{self, CallLog, RecordingEngine, TraceRenderer};
use crate::scenario::{Scenario, Step};

type ReplayShell = Shell<RecordingEngine, TraceRenderer>;
type Capture = ErrorCapture<StackTraceSymbolicator>;

pub async fn run(scenario_path: PathBuf, settings: Option<PathBuf>) -> anyhow::Result<()> {
    let scenario = Scenario::load(&scenario_path)?;
    let settings_path = settings.unwrap_or_else(default_settings_path);
    let source = TomlSettings::from_file(&settings_path)?;

    println!(
        "Replaying {} ({} steps)...",
        scenario_path.display(),
        scenario.steps.len()
    );
    let report = replay(&scenario, &source).await?;
    print!("{report}");
    Ok(())
}

/// What a replayed session left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub engine_calls: Vec<String>,
    pub panel: Vec<String>,
    pub errors_happened: bool,
    pub stats: FrameStats,
    pub scheduler: SchedulerState,
    pub draws: u64,
    pub last_layers: Vec<String>,
    pub device_size: (u32, u32),
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scheduler: {:?}", self.scheduler)?;
        writeln!(
            f,
            "Frames: {} run, {} dropped, {} paused, {} idle ({} draws)",
            self.stats.ticks_run,
            self.stats.ticks_dropped,
            self.stats.ticks_paused,
            self.stats.ticks_idle,
            self.draws
        )?;
        writeln!(f, "Canvas: {}x{} device px", self.device_size.0, self.device_size.1)?;
        writeln!(f, "Layers: {}", self.last_layers.join(", "))?;
        writeln!(f, "\nEngine calls:")?;
        for call in &self.engine_calls {
            writeln!(f, "  {call}")?;
        }
        if self.errors_happened {
            writeln!(f, "\nErrors:")?;
            for line in &self.panel {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}

/// Boot a shell against a delayed [`RecordingEngine`] and run `scenario`
/// through it on a single-threaded local task set.
pub async fn replay(
    scenario: &Scenario,
    settings: &dyn SettingsSource,
) -> anyhow::Result<ReplayReport> {
    let local = tokio::task::LocalSet::new();
    local.run_until(replay_local(scenario, settings)).await
}

async fn replay_local(
    scenario: &Scenario,
    settings: &dyn SettingsSource,
) -> anyhow::Result<ReplayReport> {
    let calls = CallLog::default();
    let mut shell = Shell::new(host::modules(), TraceRenderer::default(), settings)?;
    shell.resize(Vec2::from(scenario.viewport));
    shell.mount()?;
    let shell = Rc::new(RefCell::new(shell));

    let capture = ErrorCapture::new(StackTraceSymbolicator::new(scenario.origin.clone()));
    capture.install();

    let delay = Duration::from_millis(scenario.engine_load_delay_ms);
    let failure = scenario.fail_engine_load.clone();
    let engine = RecordingEngine::new(calls.clone());
    let load = async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(EngineError::Load(message)),
            None => Ok(engine),
        }
    };
    let boot = tokio::task::spawn_local(Shell::boot(Rc::clone(&shell), load));

    for step in &scenario.steps {
        apply(&shell, step).await;
        pump(&shell, &capture).await;
    }

    boot.await??;
    pump(&shell, &capture).await;
    capture.teardown();

    let shell = shell.borrow();
    let log = capture.log();
    Ok(ReplayReport {
        engine_calls: calls.lines(),
        panel: log.panel_lines(),
        errors_happened: log.errors_happened(),
        stats: shell.frame_stats(),
        scheduler: shell.scheduler_state(),
        draws: shell.renderer().draws,
        last_layers: shell.renderer().last_layers.clone(),
        device_size: shell.renderer().last_device_size,
    })
}

async fn apply(shell: &Rc<RefCell<ReplayShell>>, step: &Step) {
    match step {
        Step::Frames(n) => {
            for _ in 0..*n {
                let decision = shell.borrow_mut().on_frame();
                log::debug!("tick: {decision:?}");
                tokio::task::yield_now().await;
            }
        }
        Step::WaitMs(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
        Step::Wheel { dx, dy, shift } => shell.borrow_mut().on_wheel(WheelInput {
            delta: Vec2::new(*dx, *dy),
            shift: *shift,
        }),
        Step::MouseMove {
            x,
            y,
            dx,
            dy,
            buttons,
        } => {
            shell.borrow_mut().on_mouse_move(MouseMoveInput {
                position: Vec2::new(*x, *y),
                movement: Vec2::new(*dx, *dy),
                buttons: MouseButtons(*buttons),
            });
        }
        Step::Down { at } => pointer(shell, PointerKind::Down, *at, MouseButtons::PRIMARY),
        Step::Drag { at } => pointer(shell, PointerKind::Move, *at, MouseButtons::PRIMARY),
        Step::Up { at } => pointer(shell, PointerKind::Up, *at, MouseButtons::NONE),
        Step::Resize(size) => shell.borrow_mut().resize(Vec2::from(*size)),
        Step::Rendering(enabled) => shell.borrow_mut().set_rendering_enabled(*enabled),
        Step::Panic(message) => {
            let _ = std::panic::catch_unwind(|| panic!("{message}"));
        }
        Step::Reject(message) => shell
            .borrow_mut()
            .report(ErrorCategory::UnhandledRejection, CapturedError::new(message.clone())),
    }
}

/// Send a pointer event at the screen position of ground point `at`.
fn pointer(
    shell: &Rc<RefCell<ReplayShell>>,
    kind: PointerKind,
    at: [f32; 2],
    buttons: MouseButtons,
) {
    let ground = Vec3::new(at[0], at[1], 0.0);
    let screen = shell.borrow().state().camera.projection().project_3d_to_2d(ground);
    let Some(position) = screen else {
        log::warn!("Ground point {ground} is not on screen, skipping {kind:?}");
        return;
    };
    let routed = shell.borrow_mut().on_pointer(PointerInput {
        kind,
        position,
        buttons,
    });
    log::debug!("{kind:?} at {position} -> {routed:?}");
}

/// Hand reported errors and caught panics to the capture pipeline.
async fn pump(shell: &Rc<RefCell<ReplayShell>>, capture: &Rc<Capture>) {
    let reported = shell.borrow_mut().take_reported_errors();
    for (category, error) in reported {
        capture.capture(category, error).await;
    }
    for error in capture.drain_panics() {
        capture.capture(ErrorCategory::Uncaught, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Replays install a process-wide panic hook.
    static HOOK: Mutex<()> = Mutex::new(());

    fn scenario(text: &str) -> Scenario {
        Scenario::parse(text).unwrap()
    }

    // ── engine load ──

    #[tokio::test]
    async fn test_frames_idle_until_engine_loads() {
        let _guard = HOOK.lock().unwrap_or_else(|e| e.into_inner());
        let s = scenario(
            "engine_load_delay_ms = 5\n\
             [[step]]\nframes = 2\n\
             [[step]]\nwait_ms = 40\n\
             [[step]]\nframes = 3\n",
        );
        let report = replay(&s, &()).await.unwrap();
        assert_eq!(report.engine_calls, vec!["start()"]);
        assert_eq!(report.stats.ticks_idle, 2);
        assert_eq!(report.stats.ticks_run, 3);
        assert_eq!(report.draws, 3);
        assert_eq!(report.scheduler, SchedulerState::Running);
        assert!(!report.errors_happened);
    }

    #[tokio::test]
    async fn test_failed_engine_load_lands_in_panel() {
        let _guard = HOOK.lock().unwrap_or_else(|e| e.into_inner());
        let s = scenario(
            "fail_engine_load = \"404 engine.wasm\"\n\
             [[step]]\nwait_ms = 10\n\
             [[step]]\nframes = 2\n",
        );
        let report = replay(&s, &()).await.unwrap();
        assert!(report.engine_calls.is_empty());
        assert_eq!(report.scheduler, SchedulerState::WaitingForEngine);
        assert_eq!(report.stats.ticks_idle, 2);
        assert_eq!(report.draws, 0);
        assert_eq!(report.panel[0], "Engine Failed To Load: 404 engine.wasm");
    }

    // ── input ──

    #[tokio::test]
    async fn test_drag_control_point() {
        let _guard = HOOK.lock().unwrap_or_else(|e| e.into_inner());
        let s = scenario(
            "engine_load_delay_ms = 5\n\
             [[step]]\nwait_ms = 40\n\
             [[step]]\nframes = 1\n\
             [[step]]\ndown = { at = [20.0, 0.0] }\n\
             [[step]]\ndrag = { at = [25.0, 5.0] }\n\
             [[step]]\nup = { at = [25.0, 5.0] }\n",
        );
        let report = replay(&s, &()).await.unwrap();
        assert_eq!(
            report.engine_calls,
            vec![
                "start()",
                "move_gesture_point(project-1, gesture-1, 1, (25.0, 5.0), done=false)",
                "move_gesture_point(project-1, gesture-1, 1, (25.0, 5.0), done=true)",
            ]
        );
    }

    #[tokio::test]
    async fn test_press_road_previews_then_commits_lane() {
        let _guard = HOOK.lock().unwrap_or_else(|e| e.into_inner());
        let s = scenario(
            "engine_load_delay_ms = 5\n\
             [[step]]\nwait_ms = 40\n\
             [[step]]\nframes = 1\n\
             [[step]]\ndown = { at = [0.0, 60.0] }\n\
             [[step]]\nup = { at = [0.0, 60.0] }\n",
        );
        let report = replay(&s, &()).await.unwrap();
        assert_eq!(
            report.engine_calls[1..],
            [
                "set_n_lanes(project-1, road-1, 2, 1, done=false)",
                "set_n_lanes(project-1, road-1, 2, 1, done=true)",
            ]
        );
    }

    #[tokio::test]
    async fn test_pointer_before_first_frame_hits_nothing() {
        let _guard = HOOK.lock().unwrap_or_else(|e| e.into_inner());
        let s = scenario(
            "engine_load_delay_ms = 50\n\
             [[step]]\ndown = { at = [20.0, 0.0] }\n\
             [[step]]\nup = { at = [20.0, 0.0] }\n",
        );
        let report = replay(&s, &()).await.unwrap();
        assert_eq!(report.engine_calls, vec!["start()"]);
    }

    // ── rendering ──

    #[tokio::test]
    async fn test_rendering_toggle_pauses_draws() {
        let _guard = HOOK.lock().unwrap_or_else(|e| e.into_inner());
        let s = scenario(
            "engine_load_delay_ms = 5\n\
             [[step]]\nwait_ms = 40\n\
             [[step]]\nframes = 1\n\
             [[step]]\nrendering = false\n\
             [[step]]\nframes = 3\n\
             [[step]]\nrendering = true\n\
             [[step]]\nframes = 1\n",
        );
        let report = replay(&s, &()).await.unwrap();
        assert_eq!(report.stats.ticks_paused, 3);
        assert_eq!(report.draws, 2);
        assert_eq!(report.device_size, (2048, 1536));
        assert_eq!(
            report.last_layers,
            vec![
                "planning/controlPoints",
                "landuse/ground",
                "vegetation/ground",
                "transport/lanes",
            ]
        );
    }

    // ── error capture ──

    #[tokio::test]
    async fn test_panic_and_rejection_are_captured() {
        let _guard = HOOK.lock().unwrap_or_else(|e| e.into_inner());
        let s = scenario(
            "[[step]]\npanic = \"kaboom\"\n\
             [[step]]\nreject = \"lost promise\"\n",
        );
        let report = replay(&s, &()).await.unwrap();
        assert!(report.errors_happened);
        assert_eq!(report.panel[0], "Error: kaboom");
        let rejection = report
            .panel
            .iter()
            .position(|line| line == "Unhandled Rejection: lost promise")
            .unwrap();
        assert_eq!(report.panel[rejection + 1], cbshell_web::diagnostics::FALLBACK_NOTE);
    }
}
