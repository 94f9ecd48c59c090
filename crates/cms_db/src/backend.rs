//! SQLite backend over a `sqlx` connection pool.
//!
//! Every statement borrows one pooled connection for its duration; the
//! connection goes back to the pool on success and failure alike. Bulk inserts
//! run inside a single transaction so a batch is stored completely or not at all.

use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};
use tracing::{debug_span, info, Instrument};

use crate::error::{BackendError, Result};
use crate::types::{DbRow, DbValue, FromDbValue};

/// Upper bound on bound parameters per statement (SQLITE_MAX_VARIABLE_NUMBER).
const SQLITE_MAX_PARAMS: usize = 32_766;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum connections in the pool
    pub max_connections: u32,
}

impl DbConfig {
    /// File-backed SQLite configuration (created if missing).
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref().display()),
            max_connections: 5,
        }
    }

    /// In-memory SQLite configuration (for testing).
    ///
    /// Every pooled connection to `:memory:` is a separate database, so the
    /// pool is pinned to one connection.
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    /// Configuration from a `sqlite:` URL.
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !url.starts_with("sqlite:") {
            return Err(BackendError::invalid_input(format!(
                "Unsupported database URL: {}",
                url
            )));
        }
        let max_connections = if is_memory_url(&url) { 1 } else { 5 };
        Ok(Self {
            url,
            max_connections,
        })
    }

    /// Set maximum connections.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        if !is_memory_url(&self.url) {
            self.max_connections = max.max(1);
        }
        self
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

/// Unified database connection.
#[derive(Clone)]
pub struct DbConnection {
    pool: SqlitePool,
    url: String,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("backend", &"SQLite")
            .field("url", &self.url)
            .finish()
    }
}

impl DbConnection {
    /// Open a pool for the given configuration.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let memory = is_memory_url(&config.url);
        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
        if memory {
            // Closing the only connection would drop the whole database.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        info!(url = %config.url, max_connections = config.max_connections, "Database opened");

        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }

    /// Open or create a database file, creating its parent directory.
    pub async fn open_sqlite(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::connect(&DbConfig::sqlite(path)).await
    }

    /// Open an in-memory database (for testing).
    pub async fn open_sqlite_memory() -> Result<Self> {
        Self::connect(&DbConfig::sqlite_memory()).await
    }

    /// Get the backend name.
    pub fn backend_name(&self) -> &'static str {
        "SQLite"
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Execute a single SQL statement.
    pub async fn execute(&self, sql: &str, params: &[DbValue]) -> Result<ExecOutcome> {
        let span = debug_span!(
            "db.exec",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let start = Instant::now();

        let result = bind_values(sqlx::query(sql), params)
            .execute(&self.pool)
            .instrument(span.clone())
            .await?;

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        })
    }

    /// Execute a batch of SQL statements without parameters.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let span = debug_span!(
            "db.exec_batch",
            op = "BATCH",
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let start = Instant::now();

        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .instrument(span.clone())
            .await?;

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(())
    }

    /// Query and return all rows.
    pub async fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
        let span = debug_span!(
            "db.query",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let start = Instant::now();

        let rows = bind_values(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .instrument(span.clone())
            .await?;
        let result = rows.iter().map(sqlite_row_to_db_row).collect::<Result<Vec<_>>>()?;

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(result)
    }

    /// Query and return the first row, if any.
    pub async fn query_optional(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>> {
        let rows = self.query_all(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[DbValue]) -> Result<DbRow> {
        self.query_optional(sql, params)
            .await?
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))
    }

    /// Query and return a single scalar value.
    pub async fn query_scalar<T: FromDbValue>(&self, sql: &str, params: &[DbValue]) -> Result<T> {
        let row = self.query_one(sql, params).await?;
        row.get(0)
    }

    /// Declared type of a column as written in its table definition.
    ///
    /// Column names match case-insensitively, like SQL identifiers do.
    /// Returns `None` when the table or the column does not exist.
    pub async fn column_declared_type(&self, table: &str, column: &str) -> Result<Option<String>> {
        let row = self
            .query_optional(
                "SELECT type FROM pragma_table_info(?) WHERE lower(name) = lower(?)",
                &[DbValue::from(table), DbValue::from(column)],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    /// True when the table exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self
            .query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?)",
                &[DbValue::from(table)],
            )
            .await?;
        Ok(count > 0)
    }

    /// Bulk insert rows into a table.
    ///
    /// Column order must match the row value order. Rows are written with
    /// multi-row `INSERT ... VALUES (...), (...)` statements, chunked only when
    /// the parameter count exceeds the driver limit, all in one transaction.
    pub async fn bulk_insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        validate_bulk_shape(columns, rows)?;

        let statements = plan_bulk_insert(table, columns, rows.len(), SQLITE_MAX_PARAMS)?;
        let span = debug_span!(
            "db.bulk_insert",
            table = table,
            rows = rows.len(),
            statements = statements.len(),
            duration_ms = tracing::field::Empty
        );
        let start = Instant::now();

        let total = async {
            let mut tx = self.pool.begin().await?;
            let mut total = 0u64;
            let mut offset = 0usize;
            for statement in &statements {
                let chunk = &rows[offset..offset + statement.rows];
                let mut query = sqlx::query(&statement.sql);
                for row in chunk {
                    query = bind_values(query, row);
                }
                total += query.execute(&mut *tx).await?.rows_affected();
                offset += statement.rows;
            }
            tx.commit().await?;
            Ok::<u64, BackendError>(total)
        }
        .instrument(span.clone())
        .await?;

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(total)
    }
}

/// One multi-row insert statement covering `rows` consecutive rows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InsertStatement {
    sql: String,
    rows: usize,
}

fn validate_bulk_shape(columns: &[&str], rows: &[Vec<DbValue>]) -> Result<()> {
    if columns.is_empty() {
        return Err(BackendError::invalid_input(
            "bulk_insert_rows requires at least one column",
        ));
    }

    for (index, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(BackendError::InvalidInput(format!(
                "Row {} has {} values, expected {}",
                index,
                row.len(),
                columns.len()
            )));
        }
    }
    Ok(())
}

fn plan_bulk_insert(
    table: &str,
    columns: &[&str],
    row_count: usize,
    max_params: usize,
) -> Result<Vec<InsertStatement>> {
    let cols_len = columns.len();
    if cols_len > max_params {
        return Err(BackendError::InvalidInput(format!(
            "Too many columns ({}) for max params ({})",
            cols_len, max_params
        )));
    }
    let rows_per_chunk = max_params / cols_len;

    let quoted_table = quote_ident_path(table);
    let quoted_cols = columns
        .iter()
        .map(|col| quote_ident(col))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; cols_len].join(", ");
    let row_clause = format!("({})", placeholders);

    let mut statements = Vec::new();
    let mut remaining = row_count;
    while remaining > 0 {
        let rows = remaining.min(rows_per_chunk);
        let values_clause = std::iter::repeat(row_clause.as_str())
            .take(rows)
            .collect::<Vec<_>>()
            .join(", ");
        statements.push(InsertStatement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES {}",
                quoted_table, quoted_cols, values_clause
            ),
            rows,
        });
        remaining -= rows;
    }
    Ok(statements)
}

fn bind_values<'q>(mut query: SqliteQuery<'q>, params: &'q [DbValue]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            DbValue::Null => query.bind(Option::<String>::None),
            DbValue::Integer(v) => query.bind(*v),
            DbValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

fn sqlite_row_to_db_row(row: &SqliteRow) -> Result<DbRow> {
    let columns: Vec<String> = row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();

    let mut values = Vec::with_capacity(columns.len());
    for index in 0..columns.len() {
        let storage = {
            let raw = row.try_get_raw(index)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };
        let value = match storage.as_deref() {
            None => DbValue::Null,
            Some("INTEGER") | Some("BOOLEAN") => DbValue::Integer(row.try_get_unchecked(index)?),
            Some("REAL") => {
                let v: f64 = row.try_get_unchecked(index)?;
                DbValue::Text(v.to_string())
            }
            Some("BLOB") => {
                let v: Vec<u8> = row.try_get_unchecked(index)?;
                DbValue::Text(String::from_utf8_lossy(&v).into_owned())
            }
            Some(_) => DbValue::Text(row.try_get_unchecked(index)?),
        };
        values.push(value);
    }

    Ok(DbRow::new(columns, values))
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for ch in name.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

fn quote_ident_path(path: &str) -> String {
    path.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bulk_insert_rows_inserts_expected_rows() {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER, name TEXT)")
            .await
            .unwrap();

        let rows = vec![
            vec![DbValue::from(1_i64), DbValue::from("alpha")],
            vec![DbValue::from(2_i64), DbValue::Null],
        ];
        let inserted = conn.bulk_insert_rows("t", &["id", "name"], &rows).await.unwrap();

        assert_eq!(inserted, 2);
        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(count, 2);
        let missing: i64 = conn
            .query_scalar("SELECT COUNT(*) FROM t WHERE name IS NULL", &[])
            .await
            .unwrap();
        assert_eq!(missing, 1);
    }

    #[tokio::test]
    async fn legacy_numeric_cells_read_as_text() {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        conn.execute_batch(
            "CREATE TABLE legacy (n NUMBER, r NUMBER, b BLOB); \
             INSERT INTO legacy VALUES (12, 2.5, X'6F6B');",
        )
        .await
        .unwrap();

        let rows = conn.query_all("SELECT n, r, b FROM legacy", &[]).await.unwrap();
        assert_eq!(rows[0].get::<String>(0).unwrap(), "12");
        assert_eq!(rows[0].get::<String>(1).unwrap(), "2.5");
        assert_eq!(rows[0].get::<String>(2).unwrap(), "ok");
    }

    #[tokio::test]
    async fn bulk_insert_rows_rejects_mismatched_row_len() {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER, name TEXT)")
            .await
            .unwrap();

        let rows = vec![
            vec![DbValue::from(1_i64)],
            vec![DbValue::from(2_i64), DbValue::from("beta")],
        ];
        let err = conn
            .bulk_insert_rows("t", &["id", "name"], &rows)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn bulk_insert_rows_empty_is_noop() {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").await.unwrap();

        let inserted = conn.bulk_insert_rows("t", &["id"], &[]).await.unwrap();
        assert_eq!(inserted, 0);
    }

    #[test]
    fn plan_bulk_insert_uses_one_statement_when_it_fits() {
        let statements = plan_bulk_insert("t", &["a", "b"], 3, 999).unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].rows, 3);
        assert_eq!(
            statements[0].sql,
            r#"INSERT INTO "t" ("a", "b") VALUES (?, ?), (?, ?), (?, ?)"#
        );
    }

    #[test]
    fn plan_bulk_insert_chunks_on_param_limit() {
        let statements = plan_bulk_insert("t", &["a", "b", "c"], 10, 9).unwrap();
        let sizes: Vec<usize> = statements.iter().map(|s| s.rows).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(quote_ident_path("main.t"), r#""main"."t""#);
    }

    #[tokio::test]
    async fn column_declared_type_is_case_insensitive() {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        conn.execute_batch("CREATE TABLE docs (ref_no VARCHAR2(255), body CLOB)")
            .await
            .unwrap();

        let decl = conn.column_declared_type("DOCS", "REF_NO").await.unwrap();
        assert_eq!(decl.as_deref(), Some("VARCHAR2(255)"));
        let decl = conn.column_declared_type("docs", "body").await.unwrap();
        assert_eq!(decl.as_deref(), Some("CLOB"));
        let decl = conn.column_declared_type("docs", "missing").await.unwrap();
        assert_eq!(decl, None);
    }

    #[tokio::test]
    async fn unique_violation_is_classified_as_constraint() {
        let conn = DbConnection::open_sqlite_memory().await.unwrap();
        conn.execute_batch("CREATE TABLE u (k TEXT UNIQUE)")
            .await
            .unwrap();
        conn.execute("INSERT INTO u (k) VALUES (?)", &[DbValue::from("a")])
            .await
            .unwrap();

        let err = conn
            .execute("INSERT INTO u (k) VALUES (?)", &[DbValue::from("a")])
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn from_url_rejects_other_schemes() {
        assert!(DbConfig::from_url("postgres://localhost/db").is_err());
        let memory = DbConfig::from_url("sqlite::memory:").unwrap();
        assert_eq!(memory.max_connections, 1);
        assert_eq!(memory.with_max_connections(8).max_connections, 1);
    }
}
