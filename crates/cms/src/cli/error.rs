//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

use cms_import::ImportError;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// File does not exist
    pub fn file_not_found(path: &Path) -> Self {
        Self::new(format!("File not found: {}", path.display()))
            .with_context("The specified file does not exist")
            .with_suggestions([
                format!("TRY: Check if the file exists: ls -la {}", path.display()),
                format!(
                    "TRY: Look for similar files: ls {}",
                    path.parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| ".".to_string())
                ),
            ])
    }

    /// Malformed CSV input
    pub fn csv_decode_error(path: &Path, details: &str) -> Self {
        Self::new(format!("CSV decode error: {}", details))
            .with_context(format!(
                "Nothing was imported from {}",
                path.display()
            ))
            .with_suggestions([
                "TRY: Every row must have as many fields as the header row".to_string(),
                "TRY: Close every quoted field with a matching \"".to_string(),
                "TRY: Re-export the file as UTF-8 CSV".to_string(),
                format!("TRY: Inspect the raw file: head -n 5 {}", path.display()),
            ])
    }

    /// Malformed `--set` argument
    pub fn invalid_assignment(raw: &str) -> Self {
        Self::new(format!("Invalid field assignment: '{}'", raw))
            .with_context("Assignments must have the form FIELD=VALUE")
            .with_suggestions([
                "TRY: cms reconcile REF-123 --set cr1f8_complaintstatus=closed".to_string(),
                "TRY: Use --clear FIELD to set a field to null".to_string(),
            ])
    }

    /// Reconciliation request was rejected before touching the store
    pub fn invalid_request(details: &str) -> Self {
        Self::new(format!("Invalid reconciliation request: {}", details)).with_suggestions([
            "TRY: Pass a non-empty key as the first argument".to_string(),
            "TRY: --fields-json must be a JSON object of scalar values".to_string(),
        ])
    }

    /// Database could not be opened
    pub fn database_unavailable(url: &str, details: &str) -> Self {
        Self::new(format!("Cannot open database: {}", url))
            .with_context(details.to_string())
            .with_suggestions([
                "TRY: Check the resolved settings: cms config".to_string(),
                format!(
                    "TRY: Override the location: {}=sqlite:/path/to/cms.sqlite3?mode=rwc",
                    super::config::DATABASE_URL_ENV
                ),
            ])
    }
}

/// Map an import failure to a CLI error for the given input.
pub fn from_import_error(err: ImportError, path: Option<&Path>) -> anyhow::Error {
    match (err, path) {
        (ImportError::Decode(details), Some(path)) => {
            HelpfulError::csv_decode_error(path, &details).into()
        }
        (ImportError::InvalidArgument(details), _) => {
            HelpfulError::invalid_request(&details).into()
        }
        (err, _) => err.into(),
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Print an error as a JSON object on stdout.
pub fn print_json_error(err: &anyhow::Error) {
    let value = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": helpful.message,
            "context": helpful.context,
            "suggestions": helpful.suggestions,
        }),
        None => serde_json::json!({
            "error": err.to_string(),
            "chain": err.chain().skip(1).map(|c| c.to_string()).collect::<Vec<_>>(),
        }),
    };
    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{{\"error\": {:?}}}", err.to_string()),
    }
}
