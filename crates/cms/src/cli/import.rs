//! `cms import`: load a CSV export into the complaint table.

use std::fs::File;
use std::path::{Path, PathBuf};

use cms_import::ImportSummary;
use tracing::info;

use super::config::AppConfig;
use super::error::{from_import_error, HelpfulError};
use super::{block_on, open_service};

#[derive(Debug, clap::Args)]
pub struct ImportArgs {
    /// CSV file with a header row
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ImportArgs, config: &AppConfig) -> anyhow::Result<()> {
    let summary = import_file(&args.file, config)?;

    if args.json {
        let value = serde_json::json!({
            "message": "CSV data inserted successfully",
            "file": args.file.to_string_lossy(),
            "inserted": summary.inserted,
            "skipped_rows": summary.skipped_rows,
            "total_rows": summary.total_rows,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "Inserted {} of {} rows from {}",
            summary.inserted,
            summary.total_rows,
            args.file.display()
        );
        if summary.skipped_rows > 0 {
            println!("Skipped {} rows with no known field values", summary.skipped_rows);
        }
    }
    Ok(())
}

/// Import one file through the configured database.
pub fn import_file(path: &Path, config: &AppConfig) -> anyhow::Result<ImportSummary> {
    if !path.is_file() {
        return Err(HelpfulError::file_not_found(path).into());
    }
    let file = File::open(path).map_err(|e| {
        HelpfulError::new(format!("Cannot read file: {}", path.display()))
            .with_context(e.to_string())
    })?;

    info!(file = %path.display(), "Importing CSV");
    block_on(async {
        let service = open_service(config).await?;
        service
            .import_batch(std::io::BufReader::new(file))
            .await
            .map_err(|e| from_import_error(e, Some(path)))
    })?
}
