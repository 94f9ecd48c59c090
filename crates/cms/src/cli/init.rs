//! `cms init`: create the complaint table if it does not exist.

use super::config::AppConfig;
use super::{block_on, open_service};

#[derive(Debug, clap::Args)]
pub struct InitArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: InitArgs, config: &AppConfig) -> anyhow::Result<()> {
    let (table, columns) = block_on(async {
        let service = open_service(config).await?;
        let registry = service.registry();
        anyhow::Ok((registry.table().to_string(), registry.len()))
    })??;

    if args.json {
        let value = serde_json::json!({
            "table": table,
            "columns": columns,
            "database": config.database_url,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "Table {} ready ({} columns) in {}",
            table, columns, config.database_url
        );
    }
    Ok(())
}
