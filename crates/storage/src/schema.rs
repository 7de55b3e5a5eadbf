use rusqlite::Connection;

use crate::error::StorageError;

/// Layout version recorded in `PRAGMA user_version`.
pub const STORE_SCHEMA_VERSION: i32 = 1;

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;
";

/// One row per logical record. `fields` is the msgpack-encoded field map.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS records (
    table_name TEXT NOT NULL,
    record_key TEXT NOT NULL CHECK (length(record_key) > 0),
    version INTEGER NOT NULL CHECK (version >= 1),
    origin TEXT NOT NULL,
    synced_version INTEGER CHECK (synced_version IS NULL OR synced_version <= version),
    updated_at TEXT NOT NULL,
    fields BLOB NOT NULL,
    PRIMARY KEY (table_name, record_key)
) WITHOUT ROWID;
";

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(PRAGMAS)?;

    let found: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found > STORE_SCHEMA_VERSION {
        return Err(StorageError::SchemaVersion {
            found,
            supported: STORE_SCHEMA_VERSION,
        });
    }

    conn.execute_batch(SCHEMA_SQL)?;
    if found < STORE_SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", STORE_SCHEMA_VERSION)?;
    }
    Ok(())
}
