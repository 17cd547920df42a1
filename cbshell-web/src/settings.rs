use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Module name of the shell's own rendering options.
pub const RENDERING: &str = "rendering";
pub const RETINA_FACTOR: &str = "retinaFactor";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("settings for module `{0}` are declared twice")]
    DuplicateModule(String),
    #[error("invalid setting `{module}.{option}`: {reason}")]
    InvalidSpec {
        module: String,
        option: String,
        reason: String,
    },
    #[error("failed to read settings: {0}")]
    Read(String),
    #[error("failed to parse settings: {0}")]
    Parse(String),
}

/// One option's declaration: `{default, description, min, max, step}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingSpec {
    pub default: f64,
    pub description: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl SettingSpec {
    pub fn new(
        default: f64,
        description: impl Into<String>,
        min: f64,
        max: f64,
        step: f64,
    ) -> Self {
        Self {
            default,
            description: description.into(),
            min,
            max,
            step,
        }
    }

    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    fn validate(&self, module: &str, option: &str) -> Result<(), SettingsError> {
        let reason = if !(self.min.is_finite() && self.max.is_finite()) || self.min > self.max {
            Some("min/max do not form a range")
        } else if !(self.step > 0.0) {
            Some("step must be positive")
        } else if !self.accepts(self.default) {
            Some("default lies outside min..max")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(SettingsError::InvalidSpec {
                module: module.to_string(),
                option: option.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Spec of the shell's own `rendering` settings.
pub fn rendering_spec() -> Vec<(&'static str, SettingSpec)> {
    vec![(
        RETINA_FACTOR,
        SettingSpec::new(2.0, "Oversampling/Retina Factor", 0.5, 4.0, 0.1),
    )]
}

/// Raw persisted values as they come out of storage.
pub type PersistedSettings = BTreeMap<String, BTreeMap<String, f64>>;

/// Effective setting values, one table per module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, BTreeMap<String, f64>>);

impl Settings {
    pub fn get(&self, module: &str, option: &str) -> Option<f64> {
        self.0.get(module)?.get(option).copied()
    }

    pub fn with_value(&self, module: &str, option: &str, value: f64) -> Settings {
        let mut next = self.clone();
        next.0
            .entry(module.to_string())
            .or_default()
            .insert(option.to_string(), value);
        next
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, f64>)> {
        self.0.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string(&self.0).map_err(|e| SettingsError::Parse(e.to_string()))
    }
}

/// Where persisted setting values come from.
pub trait SettingsSource {
    fn load(&self) -> Result<PersistedSettings, SettingsError>;
}

/// No persisted values at all.
impl SettingsSource for () {
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        Ok(PersistedSettings::new())
    }
}

/// Persisted values as TOML tables, e.g. `[camera] zoomSpeed = 1.5`.
#[derive(Debug, Clone, Default)]
pub struct TomlSettings {
    text: String,
}

impl TomlSettings {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// A missing file counts as "nothing persisted yet".
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self { text }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SettingsError::Read(format!("{}: {e}", path.display()))),
        }
    }
}

impl SettingsSource for TomlSettings {
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        let table: toml::Table =
            toml::from_str(&self.text).map_err(|e| SettingsError::Parse(e.to_string()))?;
        Ok(numeric_values(&table))
    }
}

/// Numeric options of every module table. Anything else is skipped one
/// value at a time so the rest still loads.
fn numeric_values(table: &toml::Table) -> PersistedSettings {
    let mut persisted = PersistedSettings::new();
    for (module, options) in table {
        let Some(options) = options.as_table() else {
            log::debug!("Ignoring persisted setting {module}: not a table");
            continue;
        };
        let values = options
            .iter()
            .filter_map(|(option, value)| match value {
                toml::Value::Float(v) => Some((option.clone(), *v)),
                toml::Value::Integer(v) => Some((option.clone(), *v as f64)),
                other => {
                    log::debug!("Ignoring non-numeric setting {module}.{option} = {other}");
                    None
                }
            })
            .collect();
        persisted.insert(module.clone(), values);
    }
    persisted
}

// ─── Registry ────────────────────────────────────────────────────────

/// Static settings schema, assembled once at startup from every module's
/// declaration.
#[derive(Debug, Clone, Default)]
pub struct SettingsRegistry {
    specs: BTreeMap<String, BTreeMap<String, SettingSpec>>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        module: &str,
        options: Vec<(&str, SettingSpec)>,
    ) -> Result<(), SettingsError> {
        if self.specs.contains_key(module) {
            return Err(SettingsError::DuplicateModule(module.to_string()));
        }
        let mut table = BTreeMap::new();
        for (option, spec) in options {
            spec.validate(module, option)?;
            if table.insert(option.to_string(), spec).is_some() {
                return Err(SettingsError::InvalidSpec {
                    module: module.to_string(),
                    option: option.to_string(),
                    reason: "declared twice".to_string(),
                });
            }
        }
        self.specs.insert(module.to_string(), table);
        Ok(())
    }

    pub fn spec(&self, module: &str, option: &str) -> Option<&SettingSpec> {
        self.specs.get(module)?.get(option)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, SettingSpec>)> {
        self.specs.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn defaults(&self) -> Settings {
        self.resolve(&PersistedSettings::new())
    }

    /// Merge persisted values over the defaults. Unknown options and values
    /// outside `min..max` are ignored.
    pub fn resolve(&self, persisted: &PersistedSettings) -> Settings {
        let mut values = BTreeMap::new();
        for (module, table) in &self.specs {
            let stored = persisted.get(module);
            let resolved = table
                .iter()
                .map(|(option, spec)| {
                    let value = match stored.and_then(|s| s.get(option)) {
                        Some(&v) if spec.accepts(v) => v,
                        Some(&v) => {
                            log::warn!(
                                "Setting {module}.{option} = {v} outside {}..{}, using default {}",
                                spec.min,
                                spec.max,
                                spec.default
                            );
                            spec.default
                        }
                        None => spec.default,
                    };
                    (option.clone(), value)
                })
                .collect();
            values.insert(module.clone(), resolved);
        }
        for (module, table) in persisted {
            for option in table.keys() {
                if self.spec(module, option).is_none() {
                    log::debug!("Ignoring unknown persisted setting {module}.{option}");
                }
            }
        }
        Settings(values)
    }

    /// Load persisted values from `source`. Never fails: an unreadable
    /// source falls back to the defaults.
    pub fn load(&self, source: &dyn SettingsSource) -> Settings {
        match source.load() {
            Ok(persisted) => self.resolve(&persisted),
            Err(e) => {
                log::warn!("Using default settings: {e}");
                self.defaults()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_registry() -> SettingsRegistry {
        let mut registry = SettingsRegistry::new();
        registry
            .register(
                "camera",
                vec![("zoomSpeed", SettingSpec::new(1.0, "Zoom Speed", 0.1, 5.0, 0.1))],
            )
            .unwrap();
        registry.register(RENDERING, rendering_spec()).unwrap();
        registry
    }

    // ── register ──

    #[test]
    fn test_duplicate_module_rejected() {
        let mut registry = camera_registry();
        let err = registry.register("camera", vec![]).unwrap_err();
        assert_eq!(err, SettingsError::DuplicateModule("camera".into()));
    }

    #[test]
    fn test_default_outside_range_rejected() {
        let mut registry = SettingsRegistry::new();
        let err = registry
            .register("debug", vec![("x", SettingSpec::new(9.0, "X", 0.0, 1.0, 0.1))])
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidSpec { .. }));
    }

    #[test]
    fn test_zero_step_rejected() {
        let mut registry = SettingsRegistry::new();
        let spec = SettingSpec::new(0.5, "X", 0.0, 1.0, 0.0);
        let result = registry.register("debug", vec![("x", spec)]);
        assert!(result.is_err());
    }

    // ── resolve / load ──

    #[test]
    fn test_defaults() {
        let settings = camera_registry().defaults();
        assert_eq!(settings.get("camera", "zoomSpeed"), Some(1.0));
        assert_eq!(settings.get(RENDERING, RETINA_FACTOR), Some(2.0));
    }

    #[test]
    fn test_persisted_value_overrides_default() {
        let source = TomlSettings::new("[camera]\nzoomSpeed = 2.5\n");
        let settings = camera_registry().load(&source);
        assert_eq!(settings.get("camera", "zoomSpeed"), Some(2.5));
        assert_eq!(settings.get(RENDERING, RETINA_FACTOR), Some(2.0));
    }

    #[test]
    fn test_out_of_range_value_falls_back() {
        let source = TomlSettings::new("[rendering]\nretinaFactor = 12.0\n");
        let settings = camera_registry().load(&source);
        assert_eq!(settings.get(RENDERING, RETINA_FACTOR), Some(2.0));
    }

    #[test]
    fn test_unknown_options_ignored() {
        let source = TomlSettings::new("[planning]\nsnap = 1.0\n");
        let settings = camera_registry().load(&source);
        assert_eq!(settings.get("planning", "snap"), None);
    }

    #[test]
    fn test_non_numeric_values_skipped_individually() {
        let source = TomlSettings::new(
            r#"
theme = "dark"

[camera]
zoomSpeed = 2.5
label = "fast"

[menu]
open = true

[rendering]
retinaFactor = 1
"#,
        );
        let persisted = source.load().unwrap();
        assert_eq!(persisted["camera"].len(), 1);
        assert!(!persisted.contains_key("theme"));

        let settings = camera_registry().load(&source);
        assert_eq!(settings.get("camera", "zoomSpeed"), Some(2.5));
        assert_eq!(settings.get(RENDERING, RETINA_FACTOR), Some(1.0));
    }

    #[test]
    fn test_malformed_source_uses_defaults() {
        let source = TomlSettings::new("[camera\nzoomSpeed = ");
        assert_eq!(camera_registry().load(&source), camera_registry().defaults());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let source = TomlSettings::from_file(Path::new("/definitely/not/here.toml")).unwrap();
        assert!(source.load().unwrap().is_empty());
    }

    #[test]
    fn test_settings_toml_output() {
        let text = camera_registry().defaults().to_toml().unwrap();
        assert!(text.contains("[camera]"));
        assert!(text.contains("zoomSpeed = 1.0"));
    }
}
