use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};

const OUTBOX_DDL: &str = "
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY,
    aggregate_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    event_version INTEGER NOT NULL,
    request_id TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    payload BLOB NOT NULL,
    is_compressed INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    ulen INTEGER NOT NULL
)";

const SNAPSHOTS_DDL: &str = "
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    aggregate_id TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    version INTEGER NOT NULL,
    payload BLOB NOT NULL,
    is_compressed INTEGER NOT NULL,
    UNIQUE(aggregate_id, block_height)
)";

/// Opens (creating if absent) the embedded store at `path`, setting the
/// pragmas spec.md §4.5 calls for on the embedded engine: WAL journal
/// mode, synchronous NORMAL, a busy timeout so concurrent readers don't
/// immediately error out, and WAL auto-checkpointing so the log doesn't
/// grow unbounded.
pub fn open(path: &std::path::Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    conn.execute(OUTBOX_DDL, [])?;
    conn.execute(SNAPSHOTS_DDL, [])?;
    Ok(conn)
}

pub fn open_in_memory() -> StoreResult<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_pragmas(&conn)?;
    conn.execute(OUTBOX_DDL, [])?;
    conn.execute(SNAPSHOTS_DDL, [])?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    Ok(())
}

/// Validates that `aggregate_id` is safe to interpolate as a quoted SQL
/// identifier (alphanumeric/underscore, non-empty, doesn't start with a
/// digit). Per-aggregate event tables are named directly after the
/// aggregate id (spec.md §6's SQL surface: `a table named "A"`), and
/// `rusqlite` has no bind-parameter form for identifiers, so this check
/// is the only thing standing between an attacker-controlled aggregate id
/// and SQL injection into `CREATE TABLE`/`INSERT INTO` statements.
pub fn validate_aggregate_id(aggregate_id: &str) -> StoreResult<()> {
    let mut chars = aggregate_id.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidAggregateId(aggregate_id.to_string()))
    }
}

pub fn ensure_aggregate_table(conn: &Connection, aggregate_id: &str) -> StoreResult<()> {
    validate_aggregate_id(aggregate_id)?;
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS \"{aggregate_id}\" (
            version INTEGER PRIMARY KEY,
            request_id TEXT NOT NULL,
            block_height INTEGER NULL,
            payload BLOB NOT NULL,
            is_compressed INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            type TEXT NOT NULL
        )"
    );
    conn.execute(&ddl, [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_identifiers_pass() {
        assert!(validate_aggregate_id("network").is_ok());
        assert!(validate_aggregate_id("_mempool_1").is_ok());
    }

    #[test]
    fn identifiers_with_sql_metacharacters_are_rejected() {
        assert!(validate_aggregate_id("network\"; DROP TABLE outbox;--").is_err());
        assert!(validate_aggregate_id("").is_err());
        assert!(validate_aggregate_id("1network").is_err());
    }
}
