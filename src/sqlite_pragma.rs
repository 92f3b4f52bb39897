//! Shared SQLite connection tuning
//!
//! Applied to every connection the trade store opens, writer and reader alike.

use rusqlite::Connection;
use std::time::Duration;

/// Pages written to the WAL before an automatic checkpoint
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// WAL journal, NORMAL sync, in-memory temp store, busy timeout, autocheckpoint
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    let _pages: i64 = conn.pragma_update_and_check(
        None,
        "wal_autocheckpoint",
        WAL_AUTOCHECKPOINT_PAGES,
        |row| row.get(0),
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}
