//! Unique-constraint error enrichment
//!
//! SQLite reports `UNIQUE constraint failed: users.email` without naming the
//! index. We look the index up with `PRAGMA index_list` / `PRAGMA index_info`
//! and append ` (index: <name>)`. Any lookup failure leaves the original
//! error untouched.

use sqlbridge_core::{Error, QueryResult, Value};
use sqlbridge_driver::Session;

const UNIQUE_PREFIX: &str = "UNIQUE constraint failed: ";

/// Table and columns named by a unique-constraint message.
fn parse_unique_violation(message: &str) -> Option<(String, Vec<String>)> {
    let start = message.find(UNIQUE_PREFIX)? + UNIQUE_PREFIX.len();
    let list = message[start..].trim();
    if list.contains("(index:") {
        return None;
    }

    let mut table = None;
    let mut columns = Vec::new();
    for item in list.split(',') {
        let (t, c) = item.trim().split_once('.')?;
        match &table {
            None => table = Some(t.to_string()),
            Some(existing) if existing != t => return None,
            Some(_) => {}
        }
        columns.push(c.to_string());
    }
    Some((table?, columns))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_index(result: &QueryResult, name: &str) -> Option<usize> {
    result.columns.iter().position(|c| c == name)
}

async fn find_unique_index(
    session: &mut dyn Session,
    table: &str,
    columns: &[String],
) -> Option<String> {
    let list = session
        .query(&format!("PRAGMA index_list({})", quote_ident(table)), &[])
        .await
        .ok()?;
    let name_at = column_index(&list, "name")?;
    let unique_at = column_index(&list, "unique")?;

    let mut wanted: Vec<&str> = columns.iter().map(String::as_str).collect();
    wanted.sort_unstable();

    for row in &list.rows {
        if row.get(unique_at) != Some(&Value::Integer(1)) {
            continue;
        }
        let Some(index) = row.get(name_at).and_then(Value::as_text) else {
            continue;
        };
        let info = session
            .query(&format!("PRAGMA index_info({})", quote_ident(index)), &[])
            .await
            .ok()?;
        let Some(col_at) = column_index(&info, "name") else {
            continue;
        };
        let mut indexed: Vec<&str> = info
            .rows
            .iter()
            .filter_map(|r| r.get(col_at).and_then(Value::as_text))
            .collect();
        indexed.sort_unstable();
        if indexed == wanted {
            return Some(index.to_string());
        }
    }
    None
}

/// Append the violated index name to a unique-constraint driver error.
pub(crate) async fn enrich(session: &mut dyn Session, err: Error) -> Error {
    let Error::Driver { message } = &err else {
        return err;
    };
    let Some((table, columns)) = parse_unique_violation(message) else {
        return err;
    };
    match find_unique_index(session, &table, &columns).await {
        Some(index) => Error::driver(format!("{} (index: {})", message, index)),
        None => err,
    }
}
