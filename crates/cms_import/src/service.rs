//! Upward-facing operations: import, list, reconcile.

use std::io::Read;
use std::sync::Arc;

use cms_db::DbConnection;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::pipeline::batch_from_reader;
use crate::reconcile::{self, ReconcileOutcome, ReconcileRequest};
use crate::registry::SchemaRegistry;
use crate::store::{ComplaintStore, StoredRecord};

/// Counts reported back after an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: u64,
    pub skipped_rows: usize,
    pub total_rows: usize,
}

/// Complaint import and reconciliation over a shared pool and registry.
#[derive(Debug, Clone)]
pub struct ComplaintService {
    store: ComplaintStore,
}

impl ComplaintService {
    pub fn new(conn: DbConnection, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            store: ComplaintStore::new(conn, registry),
        }
    }

    /// Service over the `CMS_DATA` table, creating it when missing.
    pub async fn open_cms_data(conn: DbConnection) -> Result<Self> {
        let service = Self::new(conn, Arc::new(SchemaRegistry::cms_data()?));
        service.ensure_table().await?;
        Ok(service)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.store.registry()
    }

    pub fn store(&self) -> &ComplaintStore {
        &self.store
    }

    pub async fn ensure_table(&self) -> Result<()> {
        self.store.ensure_table().await
    }

    /// Decode, normalize and insert one CSV document.
    ///
    /// Nothing is written if decoding fails or the insert is rejected.
    pub async fn import_batch<R: Read>(&self, reader: R) -> Result<ImportSummary> {
        let batch = batch_from_reader(self.store.registry(), reader)?;
        let inserted = self.store.insert_batch(&batch).await?;

        let summary = ImportSummary {
            inserted,
            skipped_rows: batch.skipped_rows(),
            total_rows: batch.total_rows(),
        };
        info!(
            inserted = summary.inserted,
            skipped_rows = summary.skipped_rows,
            total_rows = summary.total_rows,
            "Import complete"
        );
        Ok(summary)
    }

    pub async fn list_all(&self) -> Result<Vec<StoredRecord>> {
        self.store.list_all().await
    }

    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileOutcome> {
        let plan = reconcile::plan_update(self.store.registry(), request)?;
        reconcile::apply(&self.store, &plan).await
    }
}
