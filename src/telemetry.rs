//! The telemetry shim: pure string functions that turn a SQL statement
//! into span attributes, consumed by `tracing` spans created around
//! each command exchange in `connection`/`async_connection`.
//!
//! Nothing here talks to a tracer directly — `tracing::Span` already is
//! the "opaque tracer interface" distilled spec §1 asks for, and these
//! functions only ever produce the strings fed into its fields.

const DB_SYSTEM: &str = "mysql";

/// Replace numeric and string literals with `?`, and collapse an
/// `IN (...)` value list to a single `?`. Operates on the *original*
/// SQL text; never call this on an already-parameterized template.
pub fn sanitize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' => {
                let quote = b;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' && i + 1 < bytes.len() {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        // doubled-quote escape: '' or ""
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                out.push('?');
            }
            b'0'..=b'9' => {
                // Don't treat digits inside an identifier (e.g. `col1`) as a literal.
                let prev_is_ident = out
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_');
                if prev_is_ident {
                    out.push(b as char);
                    i += 1;
                    continue;
                }
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit() || bytes[i] == b'.' || bytes[i] == b'e' || bytes[i] == b'E')
                {
                    i += 1;
                }
                out.push('?');
            }
            _ => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    collapse_in_lists(&out)
}

fn collapse_in_lists(sql: &str) -> String {
    let upper = sql.to_ascii_uppercase();
    let mut result = String::with_capacity(sql.len());
    let mut i = 0;
    let bytes = sql.as_bytes();
    while i < bytes.len() {
        if upper[i..].starts_with("IN") && is_word_boundary(bytes, i, 2) {
            result.push_str("IN");
            i += 2;
            let mut j = i;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'(' {
                let mut depth = 1;
                let mut k = j + 1;
                while k < bytes.len() && depth > 0 {
                    match bytes[k] {
                        b'(' => depth += 1,
                        b')' => depth -= 1,
                        _ => {}
                    }
                    k += 1;
                }
                result.push_str(" (?)");
                i = k;
                continue;
            }
        } else {
            result.push(bytes[i] as char);
            i += 1;
        }
    }
    result
}

fn is_word_boundary(bytes: &[u8], start: usize, len: usize) -> bool {
    let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
    let after = start + len;
    let after_ok = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
    before_ok && after_ok
}

const KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "REPLACE", "CREATE", "ALTER", "DROP", "SET", "SHOW",
    "CALL", "BEGIN", "COMMIT", "ROLLBACK", "START",
];

/// The first non-comment keyword, uppercased, or `None` if the
/// statement doesn't start with one of the recognized keywords.
pub fn operation_name(sql: &str) -> Option<&'static str> {
    let trimmed = skip_leading_comments(sql);
    let first_word: String = trimmed
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect();
    let upper = first_word.to_ascii_uppercase();
    KEYWORDS.iter().find(|k| **k == upper).copied()
}

fn skip_leading_comments(sql: &str) -> &str {
    let mut s = sql.trim_start();
    loop {
        if let Some(rest) = s.strip_prefix("--") {
            s = rest.splitn(2, '\n').nth(1).unwrap_or("").trim_start();
        } else if let Some(rest) = s.strip_prefix("/*") {
            if let Some(end) = rest.find("*/") {
                s = rest[end + 2..].trim_start();
            } else {
                return "";
            }
        } else {
            break;
        }
    }
    s
}

const FOLLOWERS: &[&str] = &["FROM", "JOIN", "INTO", "UPDATE"];

/// The first identifier following `FROM|JOIN|INTO|UPDATE`, if any.
pub fn collection_name(sql: &str) -> Option<&str> {
    let upper = sql.to_ascii_uppercase();
    let mut best: Option<usize> = None;
    for follower in FOLLOWERS {
        let mut search_from = 0;
        while let Some(pos) = upper[search_from..].find(follower) {
            let abs = search_from + pos;
            if is_word_boundary(sql.as_bytes(), abs, follower.len()) {
                if best.is_none_or(|b| abs < b) {
                    best = Some(abs + follower.len());
                }
                break;
            }
            search_from = abs + follower.len();
        }
    }
    let start = best?;
    let rest = sql[start..].trim_start();
    let offset = start + (sql[start..].len() - rest.len());
    let ident: String = sql[offset..]
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '`')
        .collect();
    if ident.is_empty() {
        None
    } else {
        Some(&sql[offset..offset + ident.len()])
    }
}

/// Generate a span name following the four-step priority order:
/// 1. `"{operation} {collection}"` if both known.
/// 2. `"{operation} {target}"` where target is a namespace or `host:port`.
/// 3. `"{collection}"` alone.
/// 4. A fixed database-system identifier string.
pub fn span_name(sql: &str, target: Option<&str>) -> String {
    let op = operation_name(sql);
    let coll = collection_name(sql);
    match (op, coll, target) {
        (Some(op), Some(coll), _) => format!("{op} {coll}"),
        (Some(op), None, Some(target)) => format!("{op} {target}"),
        (None, Some(coll), _) => coll.to_string(),
        _ => DB_SYSTEM.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_string_and_numeric_literals() {
        let sql = "SELECT * FROM users WHERE id = 42 AND name = 'bob''s'";
        let sanitized = sanitize(sql);
        assert_eq!(
            sanitized,
            "SELECT * FROM users WHERE id = ? AND name = ?"
        );
    }

    #[test]
    fn collapses_in_lists() {
        let sql = "SELECT * FROM t WHERE id IN (1, 2, 3)";
        assert_eq!(sanitize(sql), "SELECT * FROM t WHERE id IN (?)");
    }

    #[test]
    fn operation_name_uppercases_first_keyword() {
        assert_eq!(operation_name("select 1"), Some("SELECT"));
        assert_eq!(operation_name("  INSERT INTO t VALUES (1)"), Some("INSERT"));
        assert_eq!(operation_name("-- comment\nUPDATE t SET x=1"), Some("UPDATE"));
        assert_eq!(operation_name("not a keyword"), None);
    }

    #[test]
    fn collection_name_finds_table_after_from() {
        assert_eq!(collection_name("SELECT * FROM orders WHERE id = 1"), Some("orders"));
        assert_eq!(collection_name("INSERT INTO customers (a) VALUES (1)"), Some("customers"));
        assert_eq!(collection_name("UPDATE accounts SET x = 1"), Some("accounts"));
        assert_eq!(collection_name("SHOW TABLES"), None);
    }

    #[test]
    fn span_name_priority_order() {
        assert_eq!(span_name("SELECT * FROM t", Some("db1")), "SELECT t");
        assert_eq!(span_name("SHOW TABLES", Some("db1")), "SHOW db1");
        assert_eq!(span_name("garbage FROM t", None), "t");
        assert_eq!(span_name("garbage", None), "mysql");
    }
}
