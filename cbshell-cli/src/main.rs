mod cli;
mod host;
mod scenario;

mod commands {
    pub mod replay_cmd;
    pub mod settings_cmd;
}

use clap::Parser;

use cli::{Cli, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Settings { file } => commands::settings_cmd::run(file),
        Command::Replay { scenario, settings } => {
            commands::replay_cmd::run(scenario, settings).await
        }
    }
}
