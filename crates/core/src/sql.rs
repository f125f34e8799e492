//! SQL text classification
//!
//! These helpers look at SQL text without parsing it. They decide whether a
//! statement should run on the row-returning path and validate savepoint
//! names before they are spliced into `SAVEPOINT` statements.
//!
//! Keyword matching ignores string literals and comments. A false positive
//! in [`should_use_query`] only sends a statement down the row-returning
//! path, which is still correct; a false negative would lose rows.

use crate::error::{Error, Result};

/// Leading keyword of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// `SELECT`
    Select,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
    /// `CREATE`
    Create,
    /// `DROP`
    Drop,
    /// `ALTER`
    Alter,
    /// `BEGIN`
    Begin,
    /// `COMMIT`
    Commit,
    /// `ROLLBACK`
    Rollback,
    /// Anything else
    Other,
}

/// Keywords that start a statement which always yields rows.
const ROW_LEADERS: [&[u8]; 5] = [b"SELECT", b"WITH", b"VALUES", b"PRAGMA", b"EXPLAIN"];

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True if `bytes[at..]` starts with `kw` (ASCII, case-insensitive) and the
/// keyword is not the prefix of a longer identifier.
fn keyword_at(bytes: &[u8], at: usize, kw: &[u8]) -> bool {
    let end = at + kw.len();
    end <= bytes.len()
        && bytes[at..end].eq_ignore_ascii_case(kw)
        && bytes.get(end).map_or(true, |b| !is_word_byte(*b))
}

fn first_token_start(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|b| !b.is_ascii_whitespace())
}

/// Classify a statement by its first keyword
pub fn detect_query_type(sql: &str) -> QueryType {
    let bytes = sql.as_bytes();
    let Some(start) = first_token_start(bytes) else {
        return QueryType::Other;
    };
    const TABLE: [(&[u8], QueryType); 10] = [
        (b"SELECT", QueryType::Select),
        (b"INSERT", QueryType::Insert),
        (b"UPDATE", QueryType::Update),
        (b"DELETE", QueryType::Delete),
        (b"CREATE", QueryType::Create),
        (b"DROP", QueryType::Drop),
        (b"ALTER", QueryType::Alter),
        (b"BEGIN", QueryType::Begin),
        (b"COMMIT", QueryType::Commit),
        (b"ROLLBACK", QueryType::Rollback),
    ];
    TABLE
        .iter()
        .find(|(kw, _)| keyword_at(bytes, start, kw))
        .map_or(QueryType::Other, |(_, t)| *t)
}

/// True if the statement returns rows and must run on the query path
///
/// Matches a leading `SELECT`/`WITH`/`VALUES`/`PRAGMA`/`EXPLAIN`, or a
/// standalone `RETURNING` keyword anywhere. Does not allocate.
pub fn should_use_query(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let Some(start) = first_token_start(bytes) else {
        return false;
    };
    if ROW_LEADERS.iter().any(|kw| keyword_at(bytes, start, kw)) {
        return true;
    }

    const RETURNING: &[u8] = b"RETURNING";
    (start..bytes.len()).any(|i| {
        (i == 0 || !is_word_byte(bytes[i - 1])) && keyword_at(bytes, i, RETURNING)
    })
}

/// Accept only plain SQL identifiers as savepoint names.
///
/// # Errors
///
/// `InvalidInput` for empty names or names containing anything other than
/// ASCII letters, digits and `_`, or starting with a digit.
pub fn validate_savepoint_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "savepoint name must be an identifier: {:?}",
            name
        )))
    }
}
