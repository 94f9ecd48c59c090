//! Complaint CSV import and keyed reconciliation.
//!
//! Records arrive as CSV with loosely spelled headers, are projected onto the
//! canonical field set held by [`SchemaRegistry`], and are written to the
//! complaint table in one bulk insert. Stored records are later corrected by
//! key through [`ComplaintService::reconcile`].
//!
//! ```rust,ignore
//! use cms_import::{ComplaintService, ReconcileRequest};
//!
//! let service = ComplaintService::open_cms_data(conn).await?;
//! let summary = service.import_batch(std::fs::File::open("export.csv")?).await?;
//! let request = ReconcileRequest::new("REF-123", vec![])
//!     .set("cr1f8_closingcomment", Some("done"));
//! let outcome = service.reconcile(&request).await?;
//! ```

pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod store;

pub use error::{ImportError, Result};
pub use pipeline::{
    batch_from_reader, build_batch, decode_csv, normalize_record, ImportBatch, NormalizedRecord,
    RawRecord,
};
pub use reconcile::{
    plan_update, KeyPredicate, ReconcileOutcome, ReconcileRequest, UpdatePlan,
};
pub use registry::{
    normalize_field_name, FieldDescriptor, RegistryError, SchemaRegistry, StorageClass,
    CMS_DATA_TABLE,
};
pub use service::{ComplaintService, ImportSummary};
pub use store::{ComplaintStore, StoredRecord};
