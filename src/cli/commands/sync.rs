use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{output_error, output_success};
use crate::cli::{load_state, OutputFormat};

#[derive(Subcommand)]
pub enum SyncCommands {
    #[command(about = "Fetch XP for every onboarded student once and store it")]
    Run,
}

pub async fn handle(cmd: SyncCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SyncCommands::Run => {
            let state = load_state()?;
            let Some(sync) = state.sync else {
                output_error(&output_format, "XP sync is disabled: XP_API_KEY is not set", Some("XP_DISABLED"))?;
                anyhow::bail!("XP sync is disabled");
            };

            let summary = sync.run().await?;
            output_success(&output_format, &summary.message, Some(json!(summary)))?;
            if let OutputFormat::Text = output_format {
                for error in &summary.errors {
                    eprintln!("  {}", error);
                }
            }
            Ok(())
        }
    }
}
