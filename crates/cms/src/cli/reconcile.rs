//! `cms reconcile`: correct stored records by complaint reference.

use cms_import::{ReconcileOutcome, ReconcileRequest};

use super::config::AppConfig;
use super::error::{from_import_error, HelpfulError};
use super::output::print_table;
use super::{block_on, open_service};

#[derive(Debug, clap::Args)]
pub struct ReconcileArgs {
    /// Complaint reference number of the record(s) to update
    pub key: String,

    /// Set a field: FIELD=VALUE (repeatable)
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub set: Vec<String>,

    /// Set a field to null (repeatable)
    #[arg(long = "clear", value_name = "FIELD")]
    pub clear: Vec<String>,

    /// JSON object of field updates, applied before --set and --clear
    #[arg(long = "fields-json", value_name = "JSON")]
    pub fields_json: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Split `FIELD=VALUE` at the first `=`.
pub fn parse_assignment(raw: &str) -> Result<(String, String), HelpfulError> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(HelpfulError::invalid_assignment(raw)),
    }
}

/// Combine `--fields-json`, `--set` and `--clear` into one request.
pub fn build_request(args: &ReconcileArgs) -> anyhow::Result<ReconcileRequest> {
    let mut request = match &args.fields_json {
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
                HelpfulError::new("--fields-json is not valid JSON")
                    .with_context(e.to_string())
                    .with_suggestion(r#"TRY: --fields-json '{"cr1f8_complaintstatus": "closed"}'"#)
            })?;
            ReconcileRequest::from_json(&args.key, &value)
                .map_err(|e| from_import_error(e, None))?
        }
        None => ReconcileRequest::new(&args.key, Vec::new()),
    };

    for raw in &args.set {
        let (field, value) = parse_assignment(raw)?;
        request = request.set(field, Some(value.as_str()));
    }
    for field in &args.clear {
        request = request.set(field.as_str(), None);
    }
    Ok(request)
}

pub fn run(args: ReconcileArgs, config: &AppConfig) -> anyhow::Result<()> {
    let request = build_request(&args)?;
    let outcome = block_on(async {
        let service = open_service(config).await?;
        service
            .reconcile(&request)
            .await
            .map_err(|e| from_import_error(e, None))
    })??;

    if args.json {
        let value = serde_json::json!({
            "key": args.key,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_outcome(&args.key, &outcome);
    }
    Ok(())
}

fn print_outcome(key: &str, outcome: &ReconcileOutcome) {
    if outcome.applied_fields.is_empty() {
        println!("No applicable fields for {}; nothing updated.", key);
    } else {
        let rows = vec![
            vec!["Rows updated".to_string(), outcome.rows_affected.to_string()],
            vec!["Fields".to_string(), outcome.applied_fields.join(", ")],
            vec![
                "Key storage".to_string(),
                outcome
                    .storage_class
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            ],
            vec![
                "Match".to_string(),
                outcome
                    .predicate
                    .map(|p| format!("{:?}", p))
                    .unwrap_or_default(),
            ],
        ];
        print_table(&["Reconcile", key], rows);
    }
    if !outcome.ignored_fields.is_empty() {
        println!("Ignored: {}", outcome.ignored_fields.join(", "));
    }
}
