//! Database row representation.

use crate::error::{Error, QueryError, QueryErrorKind};
use crate::value::Value;
use std::collections::HashMap;

/// A single row returned from a query, decoded via either the text or
/// binary protocol.
///
/// Rows provide both index-based and name-based access to column values.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in order
    values: Vec<Value>,
    /// Column name to index mapping
    columns: HashMap<String, usize>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = column_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();

        Self { values, columns }
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.get(name).and_then(|&i| self.values.get(i))
    }

    /// Get a typed value by column index.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T, Error> {
        let value = self.get(index).ok_or_else(|| conversion_error::<T>("index out of bounds", None))?;
        T::from_value(value)
    }

    /// Get a typed value by column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T, Error> {
        let value = self
            .get_by_name(name)
            .ok_or_else(|| conversion_error::<T>("column not found", Some(name.to_string())))?;
        T::from_value(value)
    }

    /// Get all column names, in declared order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        let mut names: Vec<_> = self.columns.iter().collect();
        names.sort_by_key(|(_, i)| *i);
        names.into_iter().map(|(name, _)| name.as_str())
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        let mut pairs: Vec<_> = self.columns.iter().collect();
        pairs.sort_by_key(|(_, i)| *i);
        pairs
            .into_iter()
            .map(|(name, i)| (name.as_str(), &self.values[*i]))
    }
}

fn conversion_error<T>(found: &str, column: Option<String>) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Conversion,
        message: format!(
            "cannot get {} from row: {}",
            std::any::type_name::<T>(),
            found
        ),
        sqlstate: None,
        vendor_code: None,
        sql: column,
        params: None,
    })
}

/// Trait for converting from a [`Value`] to a typed value, used by
/// [`Row::get_as`]/[`Row::get_named`] and the result-set cursor's typed
/// getters.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

macro_rules! from_value_via {
    ($ty:ty, $method:ident) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self, Error> {
                value
                    .$method()
                    .ok_or_else(|| conversion_error::<$ty>(value.type_name(), None))
            }
        }
    };
}

from_value_via!(bool, as_bool);
from_value_via!(i64, as_i64);
from_value_via!(f64, as_f64);

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::TinyInt(v) => Ok(i32::from(*v)),
            Value::SmallInt(v) => Ok(i32::from(*v)),
            Value::Int(v) => Ok(*v),
            _ => Err(conversion_error::<i32>(value.type_name(), None)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Decimal(s) => Ok(s.clone()),
            _ => Err(conversion_error::<String>(value.type_name(), None)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.clone().into_bytes()),
            _ => Err(conversion_error::<Vec<u8>>(value.type_name(), None)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int(7), Value::Text("ok".into())],
        )
    }

    #[test]
    fn get_by_index_and_name() {
        let row = sample_row();
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("ok".into())));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn typed_getters() {
        let row = sample_row();
        assert_eq!(row.get_as::<i32>(0).unwrap(), 7);
        assert_eq!(row.get_named::<String>("name").unwrap(), "ok");
    }

    #[test]
    fn typed_getter_conversion_error() {
        let row = sample_row();
        let err = row.get_as::<String>(0).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn column_names_preserve_declaration_order() {
        let row = sample_row();
        let names: Vec<&str> = row.column_names().collect();
        assert_eq!(names, vec!["id", "name"]);
    }
}
