use clap::Subcommand;
use serde_json::{json, Value};

use crate::cli::utils::{output_rows, output_success};
use crate::cli::{load_state, OutputFormat};
use crate::database::Collection;

#[derive(Subcommand)]
pub enum DataCommands {
    #[command(about = "List every row of a collection")]
    List {
        #[arg(help = "Collection name (onboarding, student_xp, feedback, attendance_logs, stu)")]
        collection: Collection,
    },

    #[command(about = "Show one row by key")]
    Get {
        #[arg(help = "Collection name")]
        collection: Collection,
        #[arg(help = "Row key")]
        key: String,
    },

    #[command(about = "Set one field of a row (update, verify, upsert)")]
    Set {
        #[arg(help = "Collection name")]
        collection: Collection,
        #[arg(help = "Row key")]
        key: String,
        #[arg(help = "Column name")]
        field: String,
        #[arg(help = "New value; parsed as JSON when possible, else taken as text")]
        value: String,
    },

    #[command(about = "Delete rows by key")]
    Delete {
        #[arg(help = "Collection name")]
        collection: Collection,
        #[arg(required = true, help = "Row keys")]
        keys: Vec<String>,
    },
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn handle(cmd: DataCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let state = load_state()?;

    match cmd {
        DataCommands::List { collection } => {
            let rows = state.records.list(collection).await?;
            output_rows(&output_format, &rows)
        }
        DataCommands::Get { collection, key } => {
            let row = state.records.get(collection, &key).await?;
            output_rows(&output_format, &[row])
        }
        DataCommands::Set {
            collection,
            key,
            field,
            value,
        } => {
            let outcome = state
                .records
                .set_field(collection, &key, &field, parse_value(&value))
                .await?;
            output_success(
                &output_format,
                &format!("{}/{}: {} {:?}", collection, key, field, outcome),
                Some(json!({ "outcome": outcome })),
            )
        }
        DataCommands::Delete { collection, keys } => {
            let deleted = state.records.delete(collection, &keys).await?;
            output_success(
                &output_format,
                &format!("Deleted {} of {} {} rows", deleted, keys.len(), collection),
                Some(json!({ "deleted": deleted })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_parse_as_json_first() {
        assert_eq!(parse_value("3"), json!(3));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("\"3\""), json!("3"));
        assert_eq!(parse_value("Full Stack"), json!("Full Stack"));
    }
}
