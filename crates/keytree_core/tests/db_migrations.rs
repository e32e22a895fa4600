use keytree_core::db::migrations::latest_version;
use keytree_core::db::{open_db, open_db_in_memory, open_db_read_only, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "store_meta");
    assert_table_exists(&conn, "groups");
    assert_table_exists(&conn, "entries");
    assert_table_exists(&conn, "attachments");
    assert_table_exists(&conn, "entry_attachments");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "groups");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(matches!(
        open_db_read_only(&path),
        Err(DbError::UnsupportedSchemaVersion { db_version: 999, .. })
    ));
}

#[test]
fn read_only_open_requires_migrated_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE scratch (id INTEGER);").unwrap();
    drop(conn);

    let err = open_db_read_only(&path).unwrap_err();
    match err {
        DbError::SchemaNotInitialized {
            db_version,
            expected_version,
        } => {
            assert_eq!(db_version, 0);
            assert_eq!(expected_version, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn read_only_open_of_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();

    let err = open_db_read_only(dir.path().join("missing.db")).unwrap_err();

    assert!(matches!(err, DbError::Sqlite(_)));
}

#[test]
fn read_only_connection_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.db");
    drop(open_db(&path).unwrap());

    let conn = open_db_read_only(&path).unwrap();
    let result = conn.execute(
        "INSERT INTO store_meta (key, value) VALUES ('marker', 'x');",
        [],
    );

    assert!(result.is_err());
}

#[test]
fn group_rows_require_existing_parent_at_commit() {
    let mut conn = open_db_in_memory().unwrap();
    let tx = conn.transaction().unwrap();
    tx.execute(
        "INSERT INTO groups (id, parent_id, name, icon, sort_order, allow_entries_at_root)
         VALUES ('child', 'missing-parent', 'Child', 0, 0, 1);",
        [],
    )
    .unwrap();

    assert!(tx.commit().is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
