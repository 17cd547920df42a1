use std::fmt::Write as _;
use std::path::PathBuf;

use cbshell_web::settings::{Settings, SettingsRegistry, TomlSettings};
use cbshell_web::Shell;

use crate::cli::default_settings_path;
use crate::host::{self, TraceRenderer};

pub fn run(file: Option<PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(default_settings_path);
    let source = TomlSettings::from_file(&path)?;
    let shell = Shell::new(host::modules(), TraceRenderer::default(), &source)?;

    println!("# Settings file: {}", path.display());
    if !path.exists() {
        println!("# (not found, showing defaults)");
    }
    println!();
    print!("{}", describe(shell.settings_registry(), &shell.state().settings));
    Ok(())
}

/// Effective values as TOML, each option annotated with its declaration.
pub fn describe(registry: &SettingsRegistry, settings: &Settings) -> String {
    let mut out = String::new();
    for (module, options) in registry.modules() {
        let _ = writeln!(out, "[{module}]");
        for (option, spec) in options {
            let value = settings.get(module, option).unwrap_or(spec.default);
            let _ = writeln!(
                out,
                "{option} = {value}  # {} (default {}, range {}..{}, step {})",
                spec.description, spec.default, spec.min, spec.max, spec.step
            );
        }
        out.push('\n');
    }
    out
}
