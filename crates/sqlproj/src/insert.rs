//! JSON bulk insert with auto-detected shape: a single object, a JSON
//! array of objects, or newline-delimited JSON — each yields one or more
//! rows inserted into the session's current target table.

use rusqlite::{types::Value as SqlValue, Connection};
use serde_json::Value;

use agfs_core::{AgfsError, AgfsResult};

pub fn bulk_insert(conn: &Connection, table: &str, input: &str) -> AgfsResult<usize> {
    let rows = parse_rows(input)?;
    let mut inserted = 0;
    for row in rows {
        insert_row(conn, table, &row)?;
        inserted += 1;
    }
    Ok(inserted)
}

fn parse_rows(input: &str) -> AgfsResult<Vec<serde_json::Map<String, Value>>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed)?;
        return values.into_iter().map(require_object).collect();
    }

    let lines: Vec<&str> = trimmed.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() > 1 {
        return lines
            .into_iter()
            .map(|line| serde_json::from_str(line).map_err(AgfsError::from).and_then(require_object))
            .collect();
    }

    let value: Value = serde_json::from_str(trimmed)?;
    Ok(vec![require_object(value)?])
}

fn require_object(value: Value) -> AgfsResult<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AgfsError::invalid_argument("each row must be a JSON object")),
    }
}

fn insert_row(conn: &Connection, table: &str, row: &serde_json::Map<String, Value>) -> AgfsResult<()> {
    let columns: Vec<&str> = row.keys().map(String::as_str).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    let values: Vec<SqlValue> = row.values().map(json_to_sqlite_value).collect();
    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    conn.execute(&sql, params.as_slice())?;
    Ok(())
}

fn json_to_sqlite_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(conn: &Connection) {
        conn.execute_batch("CREATE TABLE t (a INTEGER, b TEXT)").unwrap();
    }

    #[test]
    fn single_object_inserts_one_row() {
        let conn = Connection::open_in_memory().unwrap();
        table(&conn);
        let n = bulk_insert(&conn, "t", r#"{"a": 1, "b": "x"}"#).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn array_inserts_each_element() {
        let conn = Connection::open_in_memory().unwrap();
        table(&conn);
        let n = bulk_insert(&conn, "t", r#"[{"a":1,"b":"x"},{"a":2,"b":"y"}]"#).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn ndjson_inserts_each_line() {
        let conn = Connection::open_in_memory().unwrap();
        table(&conn);
        let input = "{\"a\":1,\"b\":\"x\"}\n{\"a\":2,\"b\":\"y\"}\n";
        let n = bulk_insert(&conn, "t", input).unwrap();
        assert_eq!(n, 2);
    }
}
