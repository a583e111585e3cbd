//! SQLite table layout for [`SqliteStore`](crate::SqliteStore).

use crate::{DbError, Result};
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

/// Version of the table layout below. Independent of the record-level
/// schema version checked by [`check_schema_version`](crate::check_schema_version).
pub const LAYOUT_VERSION: i32 = 1;

/// SQL to create the tables.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS storestate (
    statename TEXT PRIMARY KEY,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS kvstore (
    partition BLOB NOT NULL,
    key BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (partition, key)
) WITHOUT ROWID;
"#;

/// Read the layout version, `None` for a fresh database.
pub fn get_layout_version(conn: &Connection) -> Result<Option<i32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT state FROM storestate WHERE statename = 'layoutversion'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|v| {
            v.parse().map_err(|_| DbError::Corrupted {
                key: "layoutversion".to_string(),
                reason: format!("not a number: {}", v),
            })
        })
        .transpose()
}

fn set_layout_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO storestate (statename, state) VALUES ('layoutversion', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Create tables on a fresh database and verify the layout of an existing one.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA)?;
    match get_layout_version(conn)? {
        None => {
            set_layout_version(conn, LAYOUT_VERSION)?;
            info!(version = LAYOUT_VERSION, "Initialized database layout");
            Ok(())
        }
        Some(v) if v == LAYOUT_VERSION => Ok(()),
        Some(v) => Err(DbError::IncompatibleSchema {
            found: format!("layout {}", v),
            expected: format!("layout {}", LAYOUT_VERSION),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_layout_version(&conn).unwrap(), Some(LAYOUT_VERSION));
        // Idempotent.
        initialize_schema(&conn).unwrap();
    }

    #[test]
    fn test_newer_layout_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_SCHEMA).unwrap();
        set_layout_version(&conn, LAYOUT_VERSION + 1).unwrap();
        assert!(matches!(
            initialize_schema(&conn),
            Err(DbError::IncompatibleSchema { .. })
        ));
    }
}
