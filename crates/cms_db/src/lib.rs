//! Database layer for the complaint management backend.
//!
//! This crate is the storage client every other crate goes through. It wraps a
//! `sqlx` SQLite pool with dynamically typed parameters ([`DbValue`]), rows
//! ([`DbRow`]), a bulk multi-row insert, and column metadata lookups.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cms_db::{DbConnection, DbValue};
//!
//! let conn = DbConnection::open_sqlite("~/.cms_admin/cms.sqlite3".as_ref()).await?;
//! conn.execute("UPDATE t SET a = ? WHERE k = ?", &["x".into(), "k1".into()]).await?;
//! let decl = conn.column_declared_type("t", "k").await?;
//! ```

#[cfg(not(feature = "sqlite"))]
compile_error!("cms_db currently requires the `sqlite` feature");

mod backend;
mod error;
mod types;

pub use backend::{quote_ident, DbConfig, DbConnection, ExecOutcome};
pub use error::{BackendError, Result};
pub use types::{DbRow, DbValue, FromDbValue};
