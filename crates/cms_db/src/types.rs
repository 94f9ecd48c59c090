//! Parameter values and result rows.
//!
//! The complaint store only binds text and nulls. Integers appear for
//! `COUNT(*)` results and for cells a legacy table stored numerically.

use crate::error::BackendError;

/// A bound parameter or a decoded result cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Text(String),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_owned())
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DbValue::Null, Into::into)
    }
}

/// One result row: column names paired positionally with decoded cells.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Vec<String>,
    values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        Self { columns, values }
    }

    /// Typed read of the cell at `index`.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        let value = self.values.get(index).ok_or_else(|| {
            BackendError::TypeConversion(format!(
                "column index {} out of bounds ({} columns)",
                index,
                self.values.len()
            ))
        })?;
        T::from_db_value(value)
    }

    /// Typed read of the cell under an exact column name.
    pub fn get_by_name<T: FromDbValue>(&self, name: &str) -> Result<T, BackendError> {
        match self.columns.iter().position(|c| c == name) {
            Some(index) => self.get(index),
            None => Err(BackendError::TypeConversion(format!(
                "column '{}' not in result",
                name
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }
}

/// Conversion from a decoded cell.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

fn unexpected_null(target: &str) -> BackendError {
    BackendError::TypeConversion(format!(
        "{target} cell is NULL; read it as Option<{target}>"
    ))
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Text(v) => v.trim().parse().map_err(|_| {
                BackendError::TypeConversion(format!("expected integer, found text '{}'", v))
            }),
            DbValue::Null => Err(unexpected_null("i64")),
        }
    }
}

/// Numeric cells from legacy tables read back as their decimal text.
impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            DbValue::Integer(v) => Ok(v.to_string()),
            DbValue::Null => Err(unexpected_null("String")),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            other => T::from_db_value(other).map(Some),
        }
    }
}
