//! Schema registry: the canonical field set of the complaint table.
//!
//! The registry is the single source of truth for which incoming fields are
//! accepted. It is built once from a static declaration, never mutated, and
//! shared by reference (`Arc`) between the import pipeline and the
//! reconciliation updater.
//!
//! Field names match case-insensitively through [`normalize_field_name`]:
//! strip a leading BOM, trim, lowercase, collapse whitespace runs to `_`, and
//! turn `.` into `_`.

use std::collections::HashMap;
use std::fmt;

use cms_db::quote_ident;
use serde::Serialize;
use thiserror::Error;

/// Default length of bounded text columns.
pub const BOUNDED_TEXT_LEN: u32 = 4000;

/// Length of the reconciliation key column.
pub const KEY_TEXT_LEN: u32 = 255;

/// Table holding imported complaint records.
pub const CMS_DATA_TABLE: &str = "CMS_DATA";

const BOUNDED: StorageClass = StorageClass::BoundedText {
    max_len: BOUNDED_TEXT_LEN,
};
const LARGE: StorageClass = StorageClass::LargeText;
const KEY: StorageClass = StorageClass::KeyText {
    max_len: KEY_TEXT_LEN,
};

/// Canonical `CMS_DATA` columns, in storage order.
const CMS_DATA_FIELDS: &[(&str, StorageClass)] = &[
    ("cr1f8_acceptedby", BOUNDED),
    ("cr1f9_acceptedby", BOUNDED),
    ("cr1f8_activestatus", BOUNDED),
    ("cr1f8_attachments", LARGE),
    ("cr1f8_claimingstatus", BOUNDED),
    ("cr1f8_closingattachment", LARGE),
    ("cr1f8_closingcomment", LARGE),
    ("cr1f8_communication_method", BOUNDED),
    ("cr1f8_complainrefno", KEY),
    ("cr1f8_complaintstatus", BOUNDED),
    ("cr1f8_complaint_description", LARGE),
    ("cr1f8_complaintsid", BOUNDED),
    ("cr1f8_mobile_no", BOUNDED),
    ("cr1f8_name", BOUNDED),
    ("cr1f8_email", BOUNDED),
    ("cr1f8_expireon", BOUNDED),
    ("cr1f8_id", BOUNDED),
    ("importsequencenumber", BOUNDED),
    ("cr1f8_new_customer", BOUNDED),
    ("cr1f8_nic", BOUNDED),
    ("cr1f8_pinnacle", BOUNDED),
    ("cr1f8_reopenedby", BOUNDED),
    ("cr1f8_reopenedon", BOUNDED),
    ("cr1f8_reopenedstatus", BOUNDED),
    ("cr1f8_reopenedto", BOUNDED),
    ("cr1f8_reopeningcomment", LARGE),
    ("cr1f8_slaexpiredate", BOUNDED),
    ("cr1f8_sla_breached_noofworkingdays", BOUNDED),
    ("cr1f8_sla_expireon", BOUNDED),
    ("cr1f8_sla", BOUNDED),
    ("cr1f8_slabreachednoofworkingdays", BOUNDED),
    ("statuscode", BOUNDED),
    ("statecode", BOUNDED),
    ("cr1f8_sysemail", BOUNDED),
    ("cr1f8_ticketclosedby", BOUNDED),
    ("cr1f8_ticketclosedon", BOUNDED),
    ("cr1f8_channel", BOUNDED),
    ("cr1f8_complain_title", BOUNDED),
    ("timezoneruleversionnumber", BOUNDED),
    ("utcconversiontimezonecode", BOUNDED),
    ("versionnumber", BOUNDED),
    ("cr1f8_branch", BOUNDED),
    ("cr1f8_category", BOUNDED),
    ("cr1f8_complaint_titles", BOUNDED),
    ("cr1f8_departmentemail", BOUNDED),
    ("cr1f8_departments", BOUNDED),
    ("owningbusinessunit", BOUNDED),
    ("cr1f8_product", BOUNDED),
    ("cr1f8_sla_days", BOUNDED),
    // Exported by the source system as `cr1f8_closedby.azureactivedirectoryobjectid`.
    ("cr1f8_closedby_azureactivedirectoryobjectid", BOUNDED),
];

/// Declared representation policy of a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageClass {
    /// Length-limited text (`VARCHAR2(n)`)
    BoundedText { max_len: u32 },
    /// Large object text (`CLOB`); ordinary equality is not reliable on it
    LargeText,
    /// Length-limited text carrying the reconciliation key
    KeyText { max_len: u32 },
}

impl StorageClass {
    /// Column type used when creating the table.
    pub fn sql_type(&self) -> String {
        match self {
            StorageClass::BoundedText { max_len } | StorageClass::KeyText { max_len } => {
                format!("VARCHAR2({})", max_len)
            }
            StorageClass::LargeText => "CLOB".to_string(),
        }
    }

    pub fn is_large(&self) -> bool {
        matches!(self, StorageClass::LargeText)
    }

    pub fn is_key(&self) -> bool {
        matches!(self, StorageClass::KeyText { .. })
    }

    /// Map a declared column type read back from the store.
    ///
    /// Tables created by older schema versions may carry the key as `CLOB` or
    /// plain `VARCHAR2(4000)`; the live declaration wins over the registry.
    /// Large-object and unbounded types (`CLOB`, `NCLOB`, `LONG`, `TEXT`, no
    /// type at all) are large text; length-bounded character types are bounded
    /// text, or key text when `is_key` is set.
    pub fn from_declared_type(declared: &str, is_key: bool) -> StorageClass {
        let upper = declared.trim().to_ascii_uppercase();
        let (base, len) = match upper.find('(') {
            Some(open) => {
                let digits: String = upper[open + 1..]
                    .chars()
                    .skip_while(|c| c.is_whitespace())
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                (upper[..open].trim(), digits.parse::<u32>().ok())
            }
            None => (upper.as_str(), None),
        };

        if base.contains("LOB") || base.starts_with("LONG") {
            return StorageClass::LargeText;
        }

        let max_len = match len {
            Some(n) if n > 0 => n,
            _ if base.contains("CHAR") => BOUNDED_TEXT_LEN,
            _ => return StorageClass::LargeText,
        };

        if is_key {
            StorageClass::KeyText { max_len }
        } else {
            StorageClass::BoundedText { max_len }
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageClass::BoundedText { max_len } => write!(f, "bounded_text({})", max_len),
            StorageClass::LargeText => write!(f, "large_text"),
            StorageClass::KeyText { max_len } => write!(f, "key_text({})", max_len),
        }
    }
}

/// One canonical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    name: String,
    storage_class: StorageClass,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, storage_class: StorageClass) -> Self {
        Self {
            name: name.into(),
            storage_class,
        }
    }

    pub fn bounded(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, StorageClass::BoundedText { max_len })
    }

    pub fn large(name: impl Into<String>) -> Self {
        Self::new(name, StorageClass::LargeText)
    }

    pub fn key(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(name, StorageClass::KeyText { max_len })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage_class(&self) -> StorageClass {
        self.storage_class
    }

    pub fn is_key(&self) -> bool {
        self.storage_class.is_key()
    }
}

/// Errors raised while building a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry for table '{0}' declares no fields")]
    Empty(String),

    #[error("fields '{first}' and '{second}' both normalize to '{normalized}'")]
    DuplicateField {
        first: String,
        second: String,
        normalized: String,
    },

    #[error("no field is declared as the reconciliation key")]
    MissingKey,

    #[error("more than one reconciliation key declared: {0:?}")]
    MultipleKeys(Vec<String>),

    #[error("'{0}' is not a valid SQL identifier")]
    InvalidIdentifier(String),

    #[error("field '{0}' declares a zero length")]
    ZeroLength(String),
}

/// Immutable canonical field set with a precomputed lookup index.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    table: String,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
    key: usize,
}

impl SchemaRegistry {
    /// Build a registry, validating the declaration.
    pub fn new(
        table: impl Into<String>,
        fields: Vec<FieldDescriptor>,
    ) -> Result<Self, RegistryError> {
        let table = table.into();
        if !is_sql_identifier(&table) {
            return Err(RegistryError::InvalidIdentifier(table));
        }
        if fields.is_empty() {
            return Err(RegistryError::Empty(table));
        }

        let mut index = HashMap::with_capacity(fields.len());
        let mut keys = Vec::new();
        for (position, field) in fields.iter().enumerate() {
            if !is_sql_identifier(field.name()) {
                return Err(RegistryError::InvalidIdentifier(field.name().to_string()));
            }
            match field.storage_class() {
                StorageClass::BoundedText { max_len: 0 } | StorageClass::KeyText { max_len: 0 } => {
                    return Err(RegistryError::ZeroLength(field.name().to_string()));
                }
                _ => {}
            }

            let normalized = normalize_field_name(field.name());
            if let Some(&existing) = index.get(&normalized) {
                let first: &FieldDescriptor = &fields[existing];
                return Err(RegistryError::DuplicateField {
                    first: first.name().to_string(),
                    second: field.name().to_string(),
                    normalized,
                });
            }
            index.insert(normalized, position);

            if field.is_key() {
                keys.push(position);
            }
        }

        let key = match keys.as_slice() {
            [] => return Err(RegistryError::MissingKey),
            [key] => *key,
            many => {
                return Err(RegistryError::MultipleKeys(
                    many.iter().map(|&i| fields[i].name().to_string()).collect(),
                ))
            }
        };

        Ok(Self {
            table,
            fields,
            index,
            key,
        })
    }

    /// The complaint table declaration.
    pub fn cms_data() -> Result<Self, RegistryError> {
        let fields = CMS_DATA_FIELDS
            .iter()
            .map(|(name, class)| FieldDescriptor::new(*name, *class))
            .collect();
        Self::new(CMS_DATA_TABLE, fields)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical column names in storage order.
    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    /// Resolve an arbitrary field label to its canonical descriptor.
    pub fn resolve(&self, raw_name: &str) -> Option<&FieldDescriptor> {
        self.position(raw_name).map(|i| &self.fields[i])
    }

    /// Storage-order position of the field a label resolves to.
    pub fn position(&self, raw_name: &str) -> Option<usize> {
        self.index.get(&normalize_field_name(raw_name)).copied()
    }

    pub fn storage_class_of(&self, field: &FieldDescriptor) -> StorageClass {
        field.storage_class()
    }

    /// The single designated reconciliation key.
    pub fn key_field(&self) -> &FieldDescriptor {
        &self.fields[self.key]
    }

    pub fn key_position(&self) -> usize {
        self.key
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for the registry's table.
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .fields
            .iter()
            .map(|f| format!("    {} {}", quote_ident(f.name()), f.storage_class().sql_type()))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            quote_ident(&self.table),
            columns
        )
    }
}

/// Normalize a field label for case-insensitive matching.
pub fn normalize_field_name(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('\u{feff}').trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut in_whitespace = false;
    for ch in trimmed.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('_');
                in_whitespace = true;
            }
            continue;
        }
        in_whitespace = false;
        if ch == '.' {
            out.push('_');
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn people() -> SchemaRegistry {
        SchemaRegistry::new(
            "PEOPLE",
            vec![
                FieldDescriptor::key("ref_no", 64),
                FieldDescriptor::bounded("name", 100),
                FieldDescriptor::bounded("age", 10),
                FieldDescriptor::large("notes"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn cms_data_declaration_is_valid() {
        let registry = SchemaRegistry::cms_data().unwrap();
        assert_eq!(registry.table(), "CMS_DATA");
        assert_eq!(registry.len(), 50);
        assert_eq!(registry.key_field().name(), "cr1f8_complainrefno");
        assert_eq!(
            registry.key_field().storage_class(),
            StorageClass::KeyText { max_len: 255 }
        );
    }

    #[test]
    fn normalize_collapses_whitespace_and_dots() {
        assert_eq!(normalize_field_name("  Complain   RefNo "), "complain_refno");
        assert_eq!(normalize_field_name("a.b.c"), "a_b_c");
        assert_eq!(normalize_field_name("Tab\tSeparated"), "tab_separated");
        assert_eq!(normalize_field_name("\u{feff}Name"), "name");
        assert_eq!(normalize_field_name(""), "");
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let registry = SchemaRegistry::cms_data().unwrap();
        let field = registry.resolve(" CR1F8_ComplainRefNo ").unwrap();
        assert_eq!(field.name(), "cr1f8_complainrefno");
        assert!(registry.resolve("unknown_column").is_none());
    }

    #[test]
    fn dotted_export_header_resolves() {
        let registry = SchemaRegistry::cms_data().unwrap();
        let field = registry
            .resolve("cr1f8_closedby.azureactivedirectoryobjectid")
            .unwrap();
        assert_eq!(field.name(), "cr1f8_closedby_azureactivedirectoryobjectid");
    }

    #[test]
    fn spaced_header_matches_only_its_exact_normalized_name() {
        // "Complain RefNo" normalizes to "complain_refno", which is not the
        // canonical key name of CMS_DATA.
        assert!(SchemaRegistry::cms_data().unwrap().resolve("Complain RefNo").is_none());

        let registry = SchemaRegistry::new(
            "T",
            vec![FieldDescriptor::key("complain_refno", 50)],
        )
        .unwrap();
        assert_eq!(
            registry.resolve("Complain RefNo").map(|f| f.name()),
            Some("complain_refno")
        );
    }

    #[test]
    fn storage_class_lookup() {
        let registry = people();
        let notes = registry.resolve("Notes").unwrap();
        assert_eq!(registry.storage_class_of(notes), StorageClass::LargeText);
        assert_eq!(registry.key_position(), 0);
        assert_eq!(registry.position("AGE"), Some(2));
    }

    #[test]
    fn rejects_fields_that_normalize_alike() {
        let err = SchemaRegistry::new(
            "T",
            vec![
                FieldDescriptor::key("id", 10),
                FieldDescriptor::bounded("Name", 10),
                FieldDescriptor::bounded("name", 10),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateField { .. }));
    }

    #[test]
    fn requires_exactly_one_key() {
        let err = SchemaRegistry::new("T", vec![FieldDescriptor::bounded("a", 10)]).unwrap_err();
        assert_eq!(err, RegistryError::MissingKey);

        let err = SchemaRegistry::new(
            "T",
            vec![FieldDescriptor::key("a", 10), FieldDescriptor::key("b", 10)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            RegistryError::MultipleKeys(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn rejects_bad_identifiers_and_lengths() {
        let err = SchemaRegistry::new("T", vec![FieldDescriptor::key("bad name", 10)]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidIdentifier(_)));

        let err = SchemaRegistry::new("T;", vec![FieldDescriptor::key("k", 10)]).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidIdentifier(_)));

        let err = SchemaRegistry::new("T", vec![FieldDescriptor::key("k", 0)]).unwrap_err();
        assert_eq!(err, RegistryError::ZeroLength("k".to_string()));

        let err = SchemaRegistry::new("T", vec![]).unwrap_err();
        assert_eq!(err, RegistryError::Empty("T".to_string()));
    }

    #[test]
    fn declared_types_map_to_storage_classes() {
        assert_eq!(
            StorageClass::from_declared_type("CLOB", true),
            StorageClass::LargeText
        );
        assert_eq!(
            StorageClass::from_declared_type("nclob", false),
            StorageClass::LargeText
        );
        assert_eq!(
            StorageClass::from_declared_type("TEXT", true),
            StorageClass::LargeText
        );
        assert_eq!(
            StorageClass::from_declared_type("", false),
            StorageClass::LargeText
        );
        assert_eq!(
            StorageClass::from_declared_type("VARCHAR2(255)", true),
            StorageClass::KeyText { max_len: 255 }
        );
        assert_eq!(
            StorageClass::from_declared_type("varchar2( 4000 byte)", false),
            StorageClass::BoundedText { max_len: 4000 }
        );
        assert_eq!(
            StorageClass::from_declared_type("NVARCHAR2", false),
            StorageClass::BoundedText { max_len: 4000 }
        );
    }

    #[test]
    fn create_table_sql_uses_declared_types() {
        let sql = people().create_table_sql();
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "PEOPLE" ("#));
        assert!(sql.contains(r#""ref_no" VARCHAR2(64)"#));
        assert!(sql.contains(r#""notes" CLOB"#));
    }

    proptest! {
        #[test]
        fn resolve_agrees_with_normalized_comparison(raw in "[ a-zA-Z_.\t]{0,24}") {
            let registry = people();
            let expected = registry
                .fields()
                .iter()
                .find(|f| normalize_field_name(f.name()) == normalize_field_name(&raw))
                .map(|f| f.name().to_string());
            let actual = registry.resolve(&raw).map(|f| f.name().to_string());
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn decorated_canonical_names_resolve(
            index in 0usize..50,
            upper_mask in any::<u64>(),
            left in "[ \t]{0,3}",
            right in "[ \t]{0,3}",
        ) {
            let registry = SchemaRegistry::cms_data().unwrap();
            let name = registry.fields()[index].name().to_string();
            let recased: String = name
                .chars()
                .enumerate()
                .map(|(i, c)| if upper_mask >> (i % 64) & 1 == 1 { c.to_ascii_uppercase() } else { c })
                .collect();
            let raw = format!("{left}{recased}{right}");
            prop_assert_eq!(registry.resolve(&raw).map(|f| f.name()), Some(name.as_str()));
        }
    }
}
