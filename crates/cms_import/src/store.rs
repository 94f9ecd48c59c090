//! Complaint table persistence.

use std::sync::Arc;

use cms_db::{quote_ident, DbConnection, DbValue};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{info, warn};

use crate::error::{ImportError, Result};
use crate::pipeline::ImportBatch;
use crate::registry::{SchemaRegistry, StorageClass};

/// A row read back from the complaint table, in canonical column order.
///
/// Serializes as a JSON object keyed by column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    fields: Vec<(String, Option<String>)>,
}

impl StoredRecord {
    pub fn fields(&self) -> &[(String, Option<String>)] {
        &self.fields
    }

    /// Value of a column, matched case-insensitively.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn non_null_count(&self) -> usize {
        self.fields.iter().filter(|(_, v)| v.is_some()).count()
    }
}

impl Serialize for StoredRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Reads and writes the registry's table through a pooled connection.
#[derive(Debug, Clone)]
pub struct ComplaintStore {
    conn: DbConnection,
    registry: Arc<SchemaRegistry>,
}

impl ComplaintStore {
    pub fn new(conn: DbConnection, registry: Arc<SchemaRegistry>) -> Self {
        Self { conn, registry }
    }

    pub fn connection(&self) -> &DbConnection {
        &self.conn
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Create the table when missing. An existing table is left untouched,
    /// whatever column types it was created with.
    pub async fn ensure_table(&self) -> Result<()> {
        self.conn
            .execute_batch(&self.registry.create_table_sql())
            .await?;
        info!(table = self.registry.table(), "Table ready");
        Ok(())
    }

    /// Insert every record of the batch as one all-or-nothing write.
    pub async fn insert_batch(&self, batch: &ImportBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let expected = self.registry.column_names();
        if batch.columns().len() != expected.len()
            || batch.columns().iter().zip(&expected).any(|(a, b)| a != b)
        {
            return Err(ImportError::invalid_argument(format!(
                "batch columns do not match table {}",
                self.registry.table()
            )));
        }

        let inserted = self
            .conn
            .bulk_insert_rows(self.registry.table(), &expected, &batch.to_db_rows())
            .await?;
        info!(table = self.registry.table(), inserted, "Inserted import batch");
        Ok(inserted)
    }

    /// Every stored row in storage order.
    pub async fn list_all(&self) -> Result<Vec<StoredRecord>> {
        let columns = self.registry.column_names();
        let select_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            select_list,
            quote_ident(self.registry.table())
        );

        let rows = self.conn.query_all(&sql, &[]).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut fields = Vec::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value: Option<String> = row.get(i)?;
                fields.push((name.to_string(), value));
            }
            records.push(StoredRecord { fields });
        }
        Ok(records)
    }

    /// Storage class of the key column as currently declared in the store.
    ///
    /// Falls back to the registry declaration when the store has no metadata
    /// for the column.
    pub async fn key_storage_class(&self) -> Result<StorageClass> {
        let key = self.registry.key_field();
        match self
            .conn
            .column_declared_type(self.registry.table(), key.name())
            .await?
        {
            Some(declared) => Ok(StorageClass::from_declared_type(&declared, true)),
            None => {
                warn!(
                    table = self.registry.table(),
                    column = key.name(),
                    "No column metadata for key; using declared storage class"
                );
                Ok(key.storage_class())
            }
        }
    }

    /// Run a single parameterized write.
    pub(crate) async fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        Ok(self.conn.execute(sql, params).await?.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::batch_from_reader;
    use crate::registry::FieldDescriptor;

    fn people() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::new(
                "PEOPLE",
                vec![
                    FieldDescriptor::key("ref_no", 64),
                    FieldDescriptor::bounded("name", 100),
                    FieldDescriptor::large("notes"),
                ],
            )
            .unwrap(),
        )
    }

    async fn store() -> ComplaintStore {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        let store = ComplaintStore::new(conn, people());
        store.ensure_table().await.unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_table_is_idempotent() {
        let store = store().await;
        store.ensure_table().await.unwrap();
        assert!(store.connection().table_exists("PEOPLE").await.unwrap());
    }

    #[tokio::test]
    async fn insert_and_list_preserve_order_and_nulls() {
        let store = store().await;
        let batch = batch_from_reader(
            store.registry(),
            "ref_no,name\nR-1,Alice\nR-2,\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(store.insert_batch(&batch).await.unwrap(), 2);

        let rows = store.list_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("ref_no"), Some("R-1"));
        assert_eq!(rows[0].get("NAME"), Some("Alice"));
        assert_eq!(rows[1].get("name"), None);
        assert_eq!(rows[1].fields().len(), 3);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let store = store().await;
        let batch = batch_from_reader(store.registry(), "name\n\n".as_bytes()).unwrap();
        assert_eq!(store.insert_batch(&batch).await.unwrap(), 0);
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn key_storage_class_reads_live_declaration() {
        let store = store().await;
        assert_eq!(
            store.key_storage_class().await.unwrap(),
            StorageClass::KeyText { max_len: 64 }
        );
    }

    #[tokio::test]
    async fn key_storage_class_falls_back_without_metadata() {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        let store = ComplaintStore::new(conn, people());
        assert_eq!(
            store.key_storage_class().await.unwrap(),
            StorageClass::KeyText { max_len: 64 }
        );
    }

    #[test]
    fn stored_record_serializes_as_object() {
        let record = StoredRecord {
            fields: vec![
                ("ref_no".to_string(), Some("R-1".to_string())),
                ("name".to_string(), None),
            ],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"ref_no": "R-1", "name": null}));
        assert_eq!(record.non_null_count(), 1);
    }
}
