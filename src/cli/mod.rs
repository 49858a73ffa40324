pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "mentiby")]
#[command(about = "MentiBY admin CLI - XP sync, attendance reports and table data")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Student XP synchronisation")]
    Sync {
        #[command(subcommand)]
        cmd: commands::sync::SyncCommands,
    },

    #[command(about = "Meeting attendance reports")]
    Attendance {
        #[command(subcommand)]
        cmd: commands::attendance::AttendanceCommands,
    },

    #[command(about = "Row operations on the admin collections")]
    Data {
        #[command(subcommand)]
        cmd: commands::data::DataCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Application state from the environment, the same way the server builds it
pub fn load_state() -> anyhow::Result<AppState> {
    Ok(AppState::from_config(AppConfig::from_env())?)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Sync { cmd } => commands::sync::handle(cmd, output_format).await,
        Commands::Attendance { cmd } => commands::attendance::handle(cmd, output_format).await,
        Commands::Data { cmd } => commands::data::handle(cmd, output_format).await,
    }
}
