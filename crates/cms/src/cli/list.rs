//! `cms list`: show stored complaint records.

use cms_import::StoredRecord;

use super::config::AppConfig;
use super::output::{display_opt, print_table, truncate};
use super::{block_on, open_service};

const STATUS_COLUMN: &str = "cr1f8_complaintstatus";
const NAME_COLUMN: &str = "cr1f8_name";

#[derive(Debug, clap::Args)]
pub struct ListArgs {
    /// Show at most N records
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ListArgs, config: &AppConfig) -> anyhow::Result<()> {
    let (key_column, records) = block_on(async {
        let service = open_service(config).await?;
        let key = service.registry().key_field().name().to_string();
        anyhow::Ok((key, service.list_all().await?))
    })??;

    let total = records.len();
    let shown: Vec<StoredRecord> = match args.limit {
        Some(limit) => records.into_iter().take(limit).collect(),
        None => records,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    if shown.is_empty() {
        println!("No records stored.");
        return Ok(());
    }

    let rows = shown
        .iter()
        .enumerate()
        .map(|(i, record)| {
            vec![
                (i + 1).to_string(),
                display_opt(record.get(&key_column)),
                truncate(&display_opt(record.get(NAME_COLUMN)), 32),
                display_opt(record.get(STATUS_COLUMN)),
                record.non_null_count().to_string(),
            ]
        })
        .collect();
    print_table(&["#", "Key", "Name", "Status", "Fields"], rows);

    if shown.len() < total {
        println!("Showing {} of {} records", shown.len(), total);
    }
    Ok(())
}
