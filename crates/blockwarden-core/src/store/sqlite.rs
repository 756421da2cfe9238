//! SQLite-backed record store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{BlockRecord, RecordStore};
use crate::error::Result;

/// Record store backed by a single-file SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the block database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database, useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip TEXT UNIQUE,
                blocked_at INTEGER DEFAULT 0,
                unblock_after INTEGER DEFAULT 0,
                block_count INTEGER DEFAULT 0,
                trigger_count INTEGER DEFAULT 0,
                last_event_time INTEGER DEFAULT 0,
                action_taken BOOLEAN DEFAULT 0
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRecord> {
    Ok(BlockRecord {
        ip: row.get(0)?,
        blocked_at: row.get(1)?,
        unblock_after: row.get(2)?,
        block_count: row.get(3)?,
        trigger_count: row.get(4)?,
        last_event_time: row.get(5)?,
        action_taken: row.get(6)?,
    })
}

impl RecordStore for SqliteStore {
    fn get_or_create(&self, ip: &str) -> Result<BlockRecord> {
        let conn = self.conn.lock().expect("sqlite store poisoned");
        let existing = conn
            .query_row(
                "SELECT ip, blocked_at, unblock_after, block_count, trigger_count,
                        last_event_time, action_taken
                 FROM blocks WHERE ip = ?1",
                params![ip],
                row_to_record,
            )
            .optional()?;
        if let Some(record) = existing {
            return Ok(record);
        }
        conn.execute(
            "INSERT INTO blocks (ip, blocked_at, unblock_after, block_count,
                                 trigger_count, last_event_time, action_taken)
             VALUES (?1, 0, 0, 0, 0, 0, 0)",
            params![ip],
        )?;
        Ok(BlockRecord {
            ip: ip.to_string(),
            ..BlockRecord::default()
        })
    }

    fn update(&self, record: &BlockRecord) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite store poisoned");
        conn.execute(
            "UPDATE blocks
             SET blocked_at = ?1, unblock_after = ?2, block_count = ?3,
                 trigger_count = ?4, last_event_time = ?5, action_taken = ?6
             WHERE ip = ?7",
            params![
                record.blocked_at,
                record.unblock_after,
                record.block_count,
                record.trigger_count,
                record.last_event_time,
                record.action_taken,
                record.ip,
            ],
        )?;
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<BlockRecord>> {
        let conn = self.conn.lock().expect("sqlite store poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip, blocked_at, unblock_after, block_count, trigger_count,
                    last_event_time, action_taken
             FROM blocks ORDER BY ip",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
