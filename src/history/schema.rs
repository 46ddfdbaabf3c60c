//! History database schema and upgrades

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize or upgrade the schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating history schema v{}", SCHEMA_VERSION);
        conn.execute_batch(HISTORY_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating history schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else {
        info!("History schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Current schema version (0 if not initialized)
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    if from_version < 2 {
        // v1 stored questions only; answers were tracked elsewhere
        tx.execute_batch("ALTER TABLE history ADD COLUMN answer_url TEXT;")?;
    }

    set_schema_version(&tx, SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// `timestamp` is the key; rowid order is therefore timestamp order
const HISTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS history (
    timestamp       INTEGER PRIMARY KEY,
    video_id        TEXT NOT NULL,
    video_title     TEXT NOT NULL,
    video_caption   TEXT,
    video_thumbnail TEXT,
    question        TEXT NOT NULL,
    answer_url      TEXT
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE history (
                timestamp INTEGER PRIMARY KEY,
                video_id TEXT NOT NULL,
                video_title TEXT NOT NULL,
                video_caption TEXT,
                video_thumbnail TEXT,
                question TEXT NOT NULL
            );
            CREATE TABLE schema_version (version INTEGER NOT NULL);
            INSERT INTO schema_version (version) VALUES (1);
            INSERT INTO history (timestamp, video_id, video_title, question)
                VALUES (10, 'v', 't', 'q');",
        )
        .unwrap();

        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        let answer: Option<String> = conn
            .query_row("SELECT answer_url FROM history WHERE timestamp = 10", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(answer, None);
    }
}
