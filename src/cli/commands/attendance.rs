use anyhow::Context;
use clap::{Args, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::cli::utils::{output_rows, output_success};
use crate::cli::{load_state, OutputFormat};
use crate::config::AppConfig;
use crate::services::attendance::{decode_text, parse_report, AttendanceUpload, UploadForm};

#[derive(Args)]
pub struct ClassArgs {
    #[arg(help = "Meeting attendance export (.csv)")]
    pub csv: PathBuf,
    #[arg(help = "Cohort type, e.g. Basic")]
    pub cohort_type: String,
    #[arg(help = "Cohort number")]
    pub cohort_number: String,
    #[arg(help = "Subject taught")]
    pub subject: String,
    #[arg(help = "Class date (YYYY-MM-DD)")]
    pub date: String,
    #[arg(help = "Teacher name")]
    pub teacher: String,
}

#[derive(Subcommand)]
pub enum AttendanceCommands {
    #[command(about = "Show the participants a report resolves to, without storing anything")]
    Parse {
        #[arg(help = "Meeting attendance export (.csv)")]
        csv: PathBuf,
    },

    #[command(about = "Record attendance from a report into the configured store")]
    Process(ClassArgs),

    #[command(about = "Send a report to the attendance processor service")]
    Upload(ClassArgs),
}

fn read_upload(args: ClassArgs) -> anyhow::Result<AttendanceUpload> {
    let bytes = std::fs::read(&args.csv).with_context(|| format!("failed to read {}", args.csv.display()))?;
    let file_name = args
        .csv
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let mut form = UploadForm::new();
    form.set_file(file_name, bytes);
    form.set_text("cohort_type", args.cohort_type);
    form.set_text("cohort_number", args.cohort_number);
    form.set_text("subject", args.subject);
    form.set_text("class_date", args.date);
    form.set_text("teacher_name", args.teacher);
    Ok(form.validate()?)
}

fn parse_file(path: &Path, output_format: &OutputFormat) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let config = AppConfig::from_env();
    let report = parse_report(&decode_text(&bytes), config.attendance.default_meeting_minutes)?;
    let required = report.meeting_minutes * config.attendance.present_threshold;

    let rows: Vec<_> = report
        .participants
        .iter()
        .map(|p| {
            json!({
                "enrollment_id": p.enrollment_id,
                "name": p.name,
                "minutes": p.minutes,
                "present": p.minutes >= required,
            })
        })
        .collect();
    output_rows(output_format, &rows)?;
    output_success(
        output_format,
        &format!(
            "{} participants, meeting {:.2} min, {:.2} min required, {} rows skipped",
            rows.len(),
            report.meeting_minutes,
            required,
            report.skipped.len()
        ),
        None,
    )
}

pub async fn handle(cmd: AttendanceCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AttendanceCommands::Parse { csv } => parse_file(&csv, &output_format),
        AttendanceCommands::Process(args) => {
            let upload = read_upload(args)?;
            let state = load_state()?;
            let report = state.processor.process(&upload).await?;
            output_success(&output_format, &report.message, Some(json!(report)))
        }
        AttendanceCommands::Upload(args) => {
            let upload = read_upload(args)?;
            let state = load_state()?;
            let (status, body) = state.proxy.forward(&upload).await?;
            if !(200..300).contains(&status) {
                anyhow::bail!("processor answered {}: {}", status, body);
            }
            output_success(
                &output_format,
                &format!("Forwarded to {}", state.proxy.endpoint()),
                Some(body),
            )
        }
    }
}
