//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file, in-memory, or read-only SQLite connections.
//! - Configure connection pragmas and bring the schema up to date.
//!
//! # Invariants
//! - Writable connections have `foreign_keys=ON` and migrations applied.
//! - Read-only connections are rejected unless already at the latest schema.

use super::migrations::{apply_migrations, current_user_version, latest_version};
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a store database file, creating it when missing, and migrates it.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_logged("file", || Connection::open(path), bootstrap_writable)
}

/// Opens an in-memory store database and migrates it.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_logged("memory", Connection::open_in_memory, bootstrap_writable)
}

/// Opens an existing store database without write access.
///
/// # Errors
/// - `SchemaNotInitialized` when the file has not been migrated to the
///   latest version; a read-only handle cannot migrate it.
pub fn open_db_read_only(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_logged(
        "read_only",
        || {
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        },
        bootstrap_read_only,
    )
}

fn open_logged(
    mode: &'static str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
    bootstrap: fn(&mut Connection) -> DbResult<()>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap(&mut conn) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_writable(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}

fn bootstrap_read_only(conn: &mut Connection) -> DbResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    let db_version = current_user_version(conn)?;
    let expected_version = latest_version();
    if db_version > expected_version {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported: expected_version,
        });
    }
    if db_version < expected_version {
        return Err(DbError::SchemaNotInitialized {
            db_version,
            expected_version,
        });
    }
    Ok(())
}
