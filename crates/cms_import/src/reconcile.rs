//! Keyed reconciliation of stored complaint records.
//!
//! A request names a key value and a set of field updates. Planning filters
//! the updates against the registry (the key field itself is never
//! rewritten, unknown names are ignored); applying picks the key predicate
//! from the key column's live storage class and issues one `UPDATE`.

use cms_db::{quote_ident, DbValue};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ImportError, Result};
use crate::registry::{SchemaRegistry, StorageClass};
use crate::store::ComplaintStore;

/// Key value plus requested field updates, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    key: String,
    fields: Vec<(String, Option<String>)>,
}

impl ReconcileRequest {
    pub fn new(key: impl Into<String>, fields: Vec<(String, Option<String>)>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }

    /// Append one requested update. `None` clears the field.
    pub fn set(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.fields.push((name.into(), value.map(str::to_string)));
        self
    }

    /// Build a request from a JSON object of field updates.
    ///
    /// Strings are taken verbatim, numbers and booleans as their JSON text,
    /// `null` clears the field. Nested arrays and objects are rejected.
    pub fn from_json(key: impl Into<String>, fields: &Value) -> Result<Self> {
        let object = fields.as_object().ok_or_else(|| {
            ImportError::invalid_argument("reconciliation fields must be a JSON object")
        })?;

        let mut converted = Vec::with_capacity(object.len());
        for (name, value) in object {
            let text = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                Value::Bool(b) => Some(b.to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ImportError::invalid_argument(format!(
                        "field '{}' must be a scalar value",
                        name
                    )))
                }
            };
            converted.push((name.clone(), text));
        }
        Ok(Self::new(key, converted))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &[(String, Option<String>)] {
        &self.fields
    }
}

/// One canonical column assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub column: String,
    pub value: Option<String>,
}

/// A filtered request, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    key: String,
    assignments: Vec<Assignment>,
    ignored: Vec<String>,
}

impl UpdatePlan {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Requested names that were dropped: the key field and unknown fields.
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn is_noop(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// How the key column is matched in the `WHERE` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPredicate {
    /// `"col" = ?`
    OrdinaryEquality,
    /// Compare textual content; used when the key is stored as a large object.
    ContentCompare,
}

impl KeyPredicate {
    pub fn for_storage_class(class: StorageClass) -> Self {
        if class.is_large() {
            KeyPredicate::ContentCompare
        } else {
            KeyPredicate::OrdinaryEquality
        }
    }

    /// Render the predicate for a column with one bound parameter.
    pub fn to_sql(&self, column: &str) -> String {
        let column = quote_ident(column);
        match self {
            KeyPredicate::OrdinaryEquality => format!("{} = ?", column),
            KeyPredicate::ContentCompare => {
                format!("CAST({} AS TEXT) = CAST(? AS TEXT)", column)
            }
        }
    }
}

/// Result of applying a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub rows_affected: u64,
    /// Key storage class read from the store; `None` when nothing was written.
    pub storage_class: Option<StorageClass>,
    pub predicate: Option<KeyPredicate>,
    pub applied_fields: Vec<String>,
    pub ignored_fields: Vec<String>,
}

/// Filter a request against the registry.
pub fn plan_update(registry: &SchemaRegistry, request: &ReconcileRequest) -> Result<UpdatePlan> {
    if request.key().trim().is_empty() {
        return Err(ImportError::invalid_argument(
            "reconciliation key must not be empty",
        ));
    }

    let mut assignments: Vec<Assignment> = Vec::new();
    let mut ignored = Vec::new();
    for (name, value) in request.fields() {
        let field = match registry.resolve(name) {
            Some(field) if !field.is_key() => field,
            _ => {
                ignored.push(name.clone());
                continue;
            }
        };
        match assignments.iter_mut().find(|a| a.column == field.name()) {
            Some(existing) => existing.value = value.clone(),
            None => assignments.push(Assignment {
                column: field.name().to_string(),
                value: value.clone(),
            }),
        }
    }

    if !ignored.is_empty() {
        debug!(ignored = ?ignored, "Dropped reconciliation fields");
    }

    Ok(UpdatePlan {
        key: request.key().to_string(),
        assignments,
        ignored,
    })
}

/// `UPDATE` statement for a non-empty plan. Parameters are the assignment
/// values in order, followed by the key.
pub fn update_sql(registry: &SchemaRegistry, plan: &UpdatePlan, predicate: KeyPredicate) -> String {
    let set_clause = plan
        .assignments()
        .iter()
        .map(|a| format!("{} = ?", quote_ident(&a.column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(registry.table()),
        set_clause,
        predicate.to_sql(registry.key_field().name())
    )
}

/// Apply a plan. An empty plan touches neither metadata nor data.
pub async fn apply(store: &ComplaintStore, plan: &UpdatePlan) -> Result<ReconcileOutcome> {
    if plan.is_noop() {
        debug!(key = plan.key(), "No applicable fields; skipping update");
        return Ok(ReconcileOutcome {
            rows_affected: 0,
            storage_class: None,
            predicate: None,
            applied_fields: Vec::new(),
            ignored_fields: plan.ignored().to_vec(),
        });
    }

    let storage_class = store.key_storage_class().await?;
    let predicate = KeyPredicate::for_storage_class(storage_class);
    let sql = update_sql(store.registry(), plan, predicate);

    let mut params: Vec<DbValue> = plan
        .assignments()
        .iter()
        .map(|a| DbValue::from(a.value.clone()))
        .collect();
    params.push(DbValue::from(plan.key()));

    let rows_affected = store.execute(&sql, &params).await?;
    info!(
        key = plan.key(),
        rows_affected,
        storage_class = %storage_class,
        predicate = ?predicate,
        "Reconciled record"
    );

    Ok(ReconcileOutcome {
        rows_affected,
        storage_class: Some(storage_class),
        predicate: Some(predicate),
        applied_fields: plan.assignments().iter().map(|a| a.column.clone()).collect(),
        ignored_fields: plan.ignored().to_vec(),
    })
}
