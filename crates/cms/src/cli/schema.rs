//! `cms schema`: show the canonical field set.

use cms_import::SchemaRegistry;

use super::output::print_table;

#[derive(Debug, clap::Args)]
pub struct SchemaArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: SchemaArgs) -> anyhow::Result<()> {
    let registry = SchemaRegistry::cms_data()?;

    if args.json {
        let value = serde_json::json!({
            "table": registry.table(),
            "key": registry.key_field().name(),
            "fields": registry.fields(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Table: {}", registry.table());
    let rows = registry
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let class = field.storage_class();
            vec![
                (i + 1).to_string(),
                field.name().to_string(),
                class.to_string(),
                class.sql_type(),
                if field.is_key() { "yes" } else { "" }.to_string(),
            ]
        })
        .collect();
    print_table(&["#", "Column", "Storage", "SQL Type", "Key"], rows);
    Ok(())
}
