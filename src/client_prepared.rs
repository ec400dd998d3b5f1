//! Client-side prepared statements: a SQL template with `?` placeholders
//! that this crate itself fills in via textual substitution before
//! sending a plain `COM_QUERY`, plus the two batching strategies for
//! executing the same template against many parameter rows.
//!
//! Nothing here talks to the wire. `connection`/`async_connection` call
//! into this module to build the SQL text, then drive the exchange
//! themselves (the multi-statement strategy needs `COM_SET_OPTION`
//! around the exchange, which only the connection can issue).

use crate::types::interpolate_params;
use crate::value::Value;

/// The JDBC `Statement.SUCCESS_NO_INFO` sentinel: an update count is
/// known to be nonzero but the exact count wasn't returned per-row,
/// because the batch was sent as a single collapsed `INSERT`.
pub const SUCCESS_NO_INFO: i64 = -2;

/// A SQL template with `?` placeholders, rendered by direct textual
/// substitution rather than a real server-side bind.
#[derive(Debug, Clone)]
pub struct ClientPreparedStatement {
    sql_template: String,
}

impl ClientPreparedStatement {
    pub fn new(sql_template: impl Into<String>) -> Self {
        Self {
            sql_template: sql_template.into(),
        }
    }

    pub fn sql_template(&self) -> &str {
        &self.sql_template
    }

    /// Render this template against one row of bound parameters.
    pub fn render(&self, params: &[Value]) -> String {
        interpolate_params(&self.sql_template, params)
    }

    /// Count `?` placeholders, skipping those inside string/identifier
    /// literals — mirrors `types::interpolate_params`'s own quote
    /// handling so the count always matches what `render` will consume.
    pub fn placeholder_count(&self) -> usize {
        let mut count = 0;
        let mut chars = self.sql_template.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '?' => count += 1,
                '\'' | '"' | '`' => {
                    for next_ch in chars.by_ref() {
                        if next_ch == ch {
                            if chars.peek() == Some(&ch) {
                                chars.next();
                                continue;
                            }
                            break;
                        }
                    }
                }
                _ => {}
            }
        }
        count
    }
}

/// Collapse a batch of `INSERT ... VALUES (?, ?)` parameter rows
/// sharing one template into a single statement with one `VALUES`
/// clause per row: `INSERT INTO t (a,b) VALUES (1,2),(3,4)`. Returns
/// the combined SQL text and the batch result JDBC would report
/// (`SUCCESS_NO_INFO` per row, since the server only returns one
/// aggregate `affected_rows` for the whole statement).
///
/// Returns `None` if the template doesn't contain a `VALUES (...)`
/// clause to duplicate.
pub fn collapse_insert_batch(sql_template: &str, rows: &[Vec<Value>]) -> Option<(String, Vec<i64>)> {
    if rows.is_empty() {
        return None;
    }
    let upper = sql_template.to_ascii_uppercase();
    let values_pos = upper.find("VALUES")?;
    let after_keyword = values_pos + "VALUES".len();
    let paren_offset = sql_template[after_keyword..].find('(')?;
    let tuple_start = after_keyword + paren_offset;

    let bytes = sql_template.as_bytes();
    let mut depth = 0usize;
    let mut tuple_end = None;
    for (i, &b) in bytes[tuple_start..].iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    tuple_end = Some(tuple_start + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let tuple_end = tuple_end?;

    let prefix = &sql_template[..tuple_start];
    let tuple_template = &sql_template[tuple_start..=tuple_end];
    let suffix = &sql_template[tuple_end + 1..];

    let mut sql = String::with_capacity(sql_template.len() * rows.len());
    sql.push_str(prefix);
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(&interpolate_params(tuple_template, row));
    }
    sql.push_str(suffix);

    Some((sql, vec![SUCCESS_NO_INFO; rows.len()]))
}

/// Render a batch of `UPDATE`/`DELETE`/arbitrary statements sharing one
/// template into a single `;`-separated multi-statement string. The
/// caller is responsible for toggling `CLIENT_MULTI_STATEMENTS` on via
/// `COM_SET_OPTION` before sending this and back off afterward (even on
/// a mid-batch error) — this function only does the textual assembly.
pub fn split_multi_statement_batch(sql_template: &str, rows: &[Vec<Value>]) -> String {
    rows.iter()
        .map(|params| interpolate_params(sql_template, params))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_placeholders() {
        let stmt = ClientPreparedStatement::new("SELECT * FROM t WHERE id = ?");
        assert_eq!(
            stmt.render(&[Value::Int(7)]),
            "SELECT * FROM t WHERE id = 7"
        );
    }

    #[test]
    fn placeholder_count_skips_literal_question_marks() {
        let stmt = ClientPreparedStatement::new("SELECT ? FROM t WHERE name = '?' AND id = ?");
        assert_eq!(stmt.placeholder_count(), 2);
    }

    #[test]
    fn collapse_insert_batch_concatenates_value_tuples() {
        let rows = vec![
            vec![Value::Int(1), Value::Text("a".into())],
            vec![Value::Int(2), Value::Text("b".into())],
        ];
        let (sql, counts) =
            collapse_insert_batch("INSERT INTO t (a, b) VALUES (?, ?)", &rows).unwrap();
        assert_eq!(sql, "INSERT INTO t (a, b) VALUES (1, 'a'),(2, 'b')");
        assert_eq!(counts, vec![SUCCESS_NO_INFO, SUCCESS_NO_INFO]);
    }

    #[test]
    fn collapse_insert_batch_none_without_values_clause() {
        let rows = vec![vec![Value::Int(1)]];
        assert!(collapse_insert_batch("UPDATE t SET x = ?", &rows).is_none());
    }

    #[test]
    fn split_multi_statement_batch_joins_with_semicolons() {
        let rows = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
        let sql = split_multi_statement_batch("DELETE FROM t WHERE id = ?", &rows);
        assert_eq!(sql, "DELETE FROM t WHERE id = 1;DELETE FROM t WHERE id = 2");
    }
}
