use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cbshell",
    about = "Headless host for the Citybound browser shell",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the settings schema and the effective values
    Settings {
        /// Persisted settings file (defaults to the user config dir)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Replay a scripted session against a recording engine
    Replay {
        /// Path to the scenario .toml file
        scenario: PathBuf,
        /// Persisted settings file (defaults to the user config dir)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

/// `<config dir>/cbshell/settings.toml`, falling back to the working directory.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cbshell")
        .join("settings.toml")
}
