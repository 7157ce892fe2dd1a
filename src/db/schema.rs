//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Registered devices
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            endpoint TEXT NOT NULL UNIQUE,
            latitude REAL NOT NULL DEFAULT 0,
            longitude REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Commands each device implements (ids come from the command catalog)
        CREATE TABLE IF NOT EXISTS device_commands (
            device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
            command_id INTEGER NOT NULL,
            PRIMARY KEY (device_id, command_id)
        );

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Hashed PIN for SMS-triggered commands
        ALTER TABLE devices ADD COLUMN sms_pin_hash TEXT;

        CREATE INDEX IF NOT EXISTS idx_devices_owner ON devices(owner);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2 (sms pin)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('devices', 'device_commands')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap(); // Should not fail
    }
}
