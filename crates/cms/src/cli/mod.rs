//! CLI module for the complaint management admin tool.
//!
//! Each command opens the configured database, runs one service call on a
//! current-thread runtime, and prints either a table or JSON.

pub mod config;
pub mod error;
pub mod import;
pub mod init;
pub mod list;
pub mod output;
pub mod reconcile;
pub mod schema;

use std::future::Future;

use cms_db::DbConnection;
use cms_import::ComplaintService;

use config::AppConfig;
use error::HelpfulError;

/// Run a future to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(rt.block_on(future))
}

/// Connect to the configured database and ensure `CMS_DATA` exists.
pub async fn open_service(config: &AppConfig) -> anyhow::Result<ComplaintService> {
    config.ensure_dirs()?;
    let db_config = config.db_config()?;
    let conn = DbConnection::connect(&db_config)
        .await
        .map_err(|e| HelpfulError::database_unavailable(&config.database_url, &e.to_string()))?;
    Ok(ComplaintService::open_cms_data(conn).await?)
}
