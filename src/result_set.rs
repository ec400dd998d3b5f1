//! The result-set cursor: a scrollable view over a fully materialized
//! set of decoded rows, with typed getters that classify a `0000-00-00`
//! zero date/datetime according to the configured
//! [`ZeroDateBehavior`] instead of silently treating it as NULL.

use crate::error::{Error, QueryError, QueryErrorKind};
use crate::row::Row;
use crate::types::{ColumnDef, ZERO_DATE_SENTINEL, ZERO_DATETIME_SENTINEL};
use crate::value::Value;

/// Whether the cursor may only move forward (the common case — text and
/// server-side prepared statements without `CURSOR_TYPE_SCROLLABLE`
/// both produce a forward-only stream) or may re-visit earlier rows
/// because the full row set is already materialized in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollType {
    #[default]
    ForwardOnly,
    ScrollInsensitive,
}

/// Whether the cursor supports writing back to the server. Always
/// `ReadOnly` today — there is no updatable-result-set support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    #[default]
    ReadOnly,
}

/// What a getter should do when it decodes a `0000-00-00` (or
/// `0000-00-00 00:00:00`) zero date/datetime: the server stores these
/// as valid, distinguishable from both NULL and a real calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroDateBehavior {
    /// Surface a `QueryErrorKind::Conversion` error (the default — a
    /// zero date is not silently a valid value for callers expecting a
    /// real date).
    #[default]
    Error,
    /// Treat the zero date as NULL.
    ConvertToNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorPosition {
    BeforeFirst,
    At(usize),
    AfterLast,
}

fn conversion_error(message: impl Into<String>) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Conversion,
        message: message.into(),
        sqlstate: None,
        vendor_code: None,
        sql: None,
        params: None,
    })
}

fn cursor_error(message: impl Into<String>) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::BadParameter,
        message: message.into(),
        sqlstate: None,
        vendor_code: None,
        sql: None,
        params: None,
    })
}

/// A scrollable cursor over a decoded result set.
#[derive(Debug)]
pub struct ResultSet {
    column_defs: Vec<ColumnDef>,
    rows: Vec<Row>,
    position: CursorPosition,
    scroll_type: ScrollType,
    concurrency: Concurrency,
    zero_date_behavior: ZeroDateBehavior,
    was_last_read_null: bool,
}

impl ResultSet {
    pub fn new(column_defs: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        Self {
            column_defs,
            rows,
            position: CursorPosition::BeforeFirst,
            scroll_type: ScrollType::default(),
            concurrency: Concurrency::default(),
            zero_date_behavior: ZeroDateBehavior::default(),
            was_last_read_null: false,
        }
    }

    pub fn with_scroll_type(mut self, scroll_type: ScrollType) -> Self {
        self.scroll_type = scroll_type;
        self
    }

    pub fn with_zero_date_behavior(mut self, behavior: ZeroDateBehavior) -> Self {
        self.zero_date_behavior = behavior;
        self
    }

    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.column_defs
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn scroll_type(&self) -> ScrollType {
        self.scroll_type
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Whether the most recently read column value was SQL NULL (or a
    /// zero date mapped to NULL by [`ZeroDateBehavior::ConvertToNull`]).
    pub fn was_last_read_null(&self) -> bool {
        self.was_last_read_null
    }

    fn require_scrollable(&self) -> Result<(), Error> {
        if self.scroll_type == ScrollType::ForwardOnly {
            Err(cursor_error(
                "cursor is forward-only; cannot move backward or to an absolute position",
            ))
        } else {
            Ok(())
        }
    }

    fn land_at(&mut self, index: Option<usize>) -> bool {
        match index {
            Some(i) if i < self.rows.len() => {
                self.position = CursorPosition::At(i);
                true
            }
            Some(i) if i >= self.rows.len() => {
                self.position = CursorPosition::AfterLast;
                false
            }
            _ => {
                self.position = CursorPosition::BeforeFirst;
                false
            }
        }
    }

    /// Advance to the next row. Returns `false` once the cursor has
    /// moved past the last row.
    pub fn next(&mut self) -> Result<bool, Error> {
        let next_index = match self.position {
            CursorPosition::BeforeFirst => 0,
            CursorPosition::At(i) => i + 1,
            CursorPosition::AfterLast => return Ok(false),
        };
        Ok(self.land_at(Some(next_index)))
    }

    /// Move to the previous row. Only valid on a scroll-insensitive
    /// cursor.
    pub fn previous(&mut self) -> Result<bool, Error> {
        self.require_scrollable()?;
        let prev_index = match self.position {
            CursorPosition::BeforeFirst => return Ok(false),
            CursorPosition::At(0) => {
                self.position = CursorPosition::BeforeFirst;
                return Ok(false);
            }
            CursorPosition::At(i) => i - 1,
            CursorPosition::AfterLast => self.rows.len().saturating_sub(1),
        };
        Ok(self.land_at(Some(prev_index)))
    }

    /// Jump to an absolute row number (1-based, negative counts from
    /// the end, matching the distilled cursor's `absolute` semantics).
    pub fn absolute(&mut self, row: i64) -> Result<bool, Error> {
        self.require_scrollable()?;
        let len = self.rows.len() as i64;
        if row == 0 {
            self.position = CursorPosition::BeforeFirst;
            return Ok(false);
        }
        let zero_based = if row > 0 { row - 1 } else { len + row };
        if zero_based < 0 {
            self.position = CursorPosition::BeforeFirst;
            return Ok(false);
        }
        Ok(self.land_at(Some(zero_based as usize)))
    }

    /// Move `n` rows relative to the current position (negative moves
    /// backward).
    pub fn relative(&mut self, n: i64) -> Result<bool, Error> {
        if n < 0 {
            self.require_scrollable()?;
        }
        let current = match self.position {
            CursorPosition::BeforeFirst => -1,
            CursorPosition::At(i) => i as i64,
            CursorPosition::AfterLast => self.rows.len() as i64,
        };
        let target = current + n;
        if target < 0 {
            self.position = CursorPosition::BeforeFirst;
            return Ok(false);
        }
        Ok(self.land_at(Some(target as usize)))
    }

    pub fn first(&mut self) -> Result<bool, Error> {
        self.require_scrollable()?;
        Ok(self.land_at(if self.rows.is_empty() { None } else { Some(0) }))
    }

    pub fn last(&mut self) -> Result<bool, Error> {
        self.require_scrollable()?;
        Ok(self.land_at(self.rows.len().checked_sub(1)))
    }

    pub fn before_first(&mut self) -> Result<(), Error> {
        self.require_scrollable()?;
        self.position = CursorPosition::BeforeFirst;
        Ok(())
    }

    pub fn after_last(&mut self) -> Result<(), Error> {
        self.require_scrollable()?;
        self.position = CursorPosition::AfterLast;
        Ok(())
    }

    fn current_row(&self) -> Result<&Row, Error> {
        match self.position {
            CursorPosition::At(i) => Ok(&self.rows[i]),
            CursorPosition::BeforeFirst => Err(cursor_error("cursor is positioned before the first row")),
            CursorPosition::AfterLast => Err(cursor_error("cursor is positioned after the last row")),
        }
    }

    fn value_at(&mut self, index: usize) -> Result<&Value, Error> {
        let value = self
            .current_row()?
            .get(index)
            .ok_or_else(|| cursor_error(format!("column index {index} out of range")))?;
        self.was_last_read_null = value.is_null();
        Ok(value)
    }

    /// Apply the zero-date-behavior flag to a decoded temporal value,
    /// returning `Ok(None)` for either SQL NULL or (when configured) a
    /// zero date/datetime.
    fn apply_zero_date<T>(&mut self, value: &Value, sentinel: T) -> Result<Option<T>, Error>
    where
        T: Copy + PartialEq,
        Value: TemporalValue<T>,
    {
        if let Some(raw) = Value::temporal_value(value) {
            if raw == sentinel {
                return match self.zero_date_behavior {
                    ZeroDateBehavior::ConvertToNull => {
                        self.was_last_read_null = true;
                        Ok(None)
                    }
                    ZeroDateBehavior::Error => Err(conversion_error(
                        "column value is the zero date/datetime, and zero-date-behavior is Error",
                    )),
                };
            }
            Ok(Some(raw))
        } else if value.is_null() {
            Ok(None)
        } else {
            Err(conversion_error(format!(
                "cannot read {} as a temporal value",
                value.type_name()
            )))
        }
    }

    pub fn get_value(&mut self, index: usize) -> Result<Value, Error> {
        self.value_at(index).map(Value::clone)
    }

    pub fn get_i64(&mut self, index: usize) -> Result<Option<i64>, Error> {
        let value = self.value_at(index)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_i64()
            .map(Some)
            .ok_or_else(|| conversion_error(format!("cannot read {} as i64", value.type_name())))
    }

    pub fn get_f64(&mut self, index: usize) -> Result<Option<f64>, Error> {
        let value = self.value_at(index)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_f64()
            .map(Some)
            .ok_or_else(|| conversion_error(format!("cannot read {} as f64", value.type_name())))
    }

    pub fn get_str(&mut self, index: usize) -> Result<Option<String>, Error> {
        let value = self.value_at(index)?;
        if value.is_null() {
            return Ok(None);
        }
        match value {
            Value::Text(s) => Ok(Some(s.clone())),
            Value::Decimal(s) => Ok(Some(s.clone())),
            Value::Bytes(b) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
            _ => Err(conversion_error(format!(
                "cannot read {} as a string",
                value.type_name()
            ))),
        }
    }

    pub fn get_bytes(&mut self, index: usize) -> Result<Option<Vec<u8>>, Error> {
        let value = self.value_at(index)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_bytes()
            .map(|b| Some(b.to_vec()))
            .ok_or_else(|| conversion_error(format!("cannot read {} as bytes", value.type_name())))
    }

    /// Day count since the Unix epoch (see `types::ymd_to_days`), or
    /// `None` for NULL/zero-date-as-NULL.
    pub fn get_date(&mut self, index: usize) -> Result<Option<i32>, Error> {
        let value = self.value_at(index)?.clone();
        self.apply_zero_date(&value, ZERO_DATE_SENTINEL)
    }

    /// Microseconds since midnight (TIME) or since the epoch
    /// (DATETIME/TIMESTAMP), or `None` for NULL/zero-date-as-NULL.
    pub fn get_datetime(&mut self, index: usize) -> Result<Option<i64>, Error> {
        let value = self.value_at(index)?.clone();
        self.apply_zero_date(&value, ZERO_DATETIME_SENTINEL)
    }

    pub fn get_named_value(&mut self, name: &str) -> Result<Value, Error> {
        let idx = self
            .column_defs
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| cursor_error(format!("no such column: {name}")))?;
        self.get_value(idx)
    }
}

/// Extracts the numeric representation a temporal [`Value`] variant
/// carries, so [`ResultSet::apply_zero_date`] can compare it against
/// the relevant sentinel generically for both `Date` (i32) and
/// `Time`/`Timestamp`/`TimestampTz` (i64).
trait TemporalValue<T> {
    fn temporal_value(value: &Value) -> Option<T>;
}

impl TemporalValue<i32> for Value {
    fn temporal_value(value: &Value) -> Option<i32> {
        match value {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl TemporalValue<i64> for Value {
    fn temporal_value(value: &Value) -> Option<i64> {
        match value {
            Value::Time(t) | Value::Timestamp(t) | Value::TimestampTz(t) => Some(*t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn column(name: &str, ty: FieldType) -> ColumnDef {
        ColumnDef {
            catalog: "def".into(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.into(),
            org_name: String::new(),
            charset: 45,
            column_length: 0,
            column_type: ty,
            flags: 0,
            decimals: 0,
        }
    }

    fn sample() -> ResultSet {
        let columns = vec![column("id", FieldType::Long), column("name", FieldType::VarString)];
        let rows = vec![
            Row::new(vec!["id".into(), "name".into()], vec![Value::Int(1), Value::Text("a".into())]),
            Row::new(vec!["id".into(), "name".into()], vec![Value::Int(2), Value::Text("b".into())]),
        ];
        ResultSet::new(columns, rows)
    }

    #[test]
    fn forward_iteration() {
        let mut rs = sample();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get_i64(0).unwrap(), Some(1));
        assert!(rs.next().unwrap());
        assert_eq!(rs.get_i64(0).unwrap(), Some(2));
        assert!(!rs.next().unwrap());
    }

    #[test]
    fn forward_only_cursor_rejects_previous() {
        let mut rs = sample();
        rs.next().unwrap();
        assert!(rs.previous().is_err());
    }

    #[test]
    fn scroll_insensitive_absolute_and_relative() {
        let mut rs = sample().with_scroll_type(ScrollType::ScrollInsensitive);
        assert!(rs.absolute(2).unwrap());
        assert_eq!(rs.get_str(1).unwrap(), Some("b".to_string()));
        assert!(rs.relative(-1).unwrap());
        assert_eq!(rs.get_str(1).unwrap(), Some("a".to_string()));
        assert!(rs.last().unwrap());
        assert_eq!(rs.get_str(1).unwrap(), Some("b".to_string()));
    }

    #[test]
    fn null_sets_was_last_read_null() {
        let columns = vec![column("id", FieldType::Long)];
        let rows = vec![Row::new(vec!["id".into()], vec![Value::Null])];
        let mut rs = ResultSet::new(columns, rows);
        rs.next().unwrap();
        assert_eq!(rs.get_i64(0).unwrap(), None);
        assert!(rs.was_last_read_null());
    }

    #[test]
    fn zero_date_errors_by_default() {
        let columns = vec![column("d", FieldType::Date)];
        let rows = vec![Row::new(vec!["d".into()], vec![Value::Date(ZERO_DATE_SENTINEL)])];
        let mut rs = ResultSet::new(columns, rows);
        rs.next().unwrap();
        assert!(rs.get_date(0).is_err());
    }

    #[test]
    fn zero_date_converts_to_null_when_configured() {
        let columns = vec![column("d", FieldType::Date)];
        let rows = vec![Row::new(vec!["d".into()], vec![Value::Date(ZERO_DATE_SENTINEL)])];
        let mut rs = ResultSet::new(columns, rows).with_zero_date_behavior(ZeroDateBehavior::ConvertToNull);
        rs.next().unwrap();
        assert_eq!(rs.get_date(0).unwrap(), None);
        assert!(rs.was_last_read_null());
    }
}
