//! Persistence gateway contract and SQLite snapshot implementation.
//!
//! # Responsibility
//! - Define the `save` boundary every mutation calls after changing the tree.
//! - Store and reload a full tree snapshot in SQLite.
//!
//! # Invariants
//! - `save` writes the whole tree in one transaction; a failed save leaves the
//!   previous snapshot intact.
//! - Saving an unchanged tree twice produces the same rows.
//! - Child order is preserved via `sort_order`.
//! - Unlinked attachment blobs are stored like linked ones.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::node::{AttachmentId, Entry, EntryId, Group, GroupId};
use crate::model::tree::{NodeTree, TreeError};
use log::{debug, error};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

const ROOT_ID_KEY: &str = "root_id";

/// Result type used by persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors from writing or reading the backing store.
#[derive(Debug)]
pub enum PersistError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted rows cannot be converted to a valid tree.
    InvalidData(String),
    /// Persisted rows form an invalid tree.
    Tree(TreeError),
    /// Failure reported by a non-SQLite gateway.
    Backend(String),
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "tree store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid store data: {message}"),
            Self::Tree(err) => write!(f, "stored tree is invalid: {err}"),
            Self::Backend(message) => write!(f, "store write failed: {message}"),
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::UninitializedConnection { .. } => None,
            Self::InvalidData(_) => None,
            Self::Backend(_) => None,
        }
    }
}

impl From<DbError> for PersistError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable write boundary for the in-memory tree.
///
/// Implementations must be safe to call after every mutation and idempotent
/// for an unchanged tree.
pub trait PersistenceGateway: Send {
    /// Writes the current tree state.
    fn save(&mut self, tree: &NodeTree) -> PersistResult<()>;
}

impl<G: PersistenceGateway + ?Sized> PersistenceGateway for Box<G> {
    fn save(&mut self, tree: &NodeTree) -> PersistResult<()> {
        (**self).save(tree)
    }
}

/// SQLite-backed snapshot store.
pub struct SqliteTreeRepository {
    conn: Connection,
}

impl SqliteTreeRepository {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: Connection) -> PersistResult<Self> {
        ensure_tree_connection_ready(&conn)?;
        Ok(Self { conn })
    }

    /// Loads the stored tree, or `None` when nothing was saved yet.
    pub fn load(&self) -> PersistResult<Option<NodeTree>> {
        let root_text: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1;",
                [ROOT_ID_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let Some(root_text) = root_text else {
            return Ok(None);
        };
        let root = parse_uuid(&root_text, "store_meta.value")?;

        let mut groups = load_groups(&self.conn)?;
        let mut index: HashMap<GroupId, usize> = HashMap::with_capacity(groups.len());
        for (position, group) in groups.iter().enumerate() {
            index.insert(group.id, position);
        }
        let links: Vec<(GroupId, GroupId)> = groups
            .iter()
            .filter_map(|group| group.parent.map(|parent| (parent, group.id)))
            .collect();
        for (parent, child) in links {
            if let Some(position) = index.get(&parent) {
                groups[*position].groups.push(child);
            }
        }

        let mut entries = load_entries(&self.conn)?;
        let links = load_attachment_links(&self.conn)?;
        for entry in &mut entries {
            if let Some(linked) = links.get(&entry.id) {
                entry.attachments = linked.clone();
            }
        }
        for entry in &entries {
            if let Some(position) = index.get(&entry.group) {
                groups[*position].entries.push(entry.id);
            }
        }

        let attachments = load_attachments(&self.conn)?;
        NodeTree::from_parts(root, groups, entries, attachments)
            .map(Some)
            .map_err(PersistError::Tree)
    }

    /// Borrows the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl PersistenceGateway for SqliteTreeRepository {
    fn save(&mut self, tree: &NodeTree) -> PersistResult<()> {
        let started_at = Instant::now();
        let result = write_snapshot(&mut self.conn, tree);
        match &result {
            Ok(()) => debug!(
                "event=tree_save module=repo status=ok groups={} entries={} duration_ms={}",
                tree.group_count(),
                tree.entry_count(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=tree_save module=repo status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }
}

fn write_snapshot(conn: &mut Connection, tree: &NodeTree) -> PersistResult<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM entry_attachments;", [])?;
    tx.execute("DELETE FROM attachments;", [])?;
    tx.execute("DELETE FROM entries;", [])?;
    tx.execute("DELETE FROM groups;", [])?;

    {
        let mut insert_group = tx.prepare(
            "INSERT INTO groups (
                id,
                parent_id,
                name,
                icon,
                sort_order,
                allow_entries_at_root
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        )?;
        let mut insert_entry = tx.prepare(
            "INSERT INTO entries (
                id,
                group_id,
                title,
                icon,
                payload,
                sort_order
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        )?;
        let mut insert_attachment =
            tx.prepare("INSERT INTO attachments (id, data) VALUES (?1, ?2);")?;
        let mut insert_link = tx.prepare(
            "INSERT INTO entry_attachments (
                entry_id,
                attachment_id,
                sort_order
            ) VALUES (?1, ?2, ?3);",
        )?;

        for (id, data) in tree.attachments() {
            insert_attachment.execute(params![id.to_string(), data])?;
        }

        let mut sort_orders: HashMap<GroupId, i64> = HashMap::new();
        for group in tree.walk_groups() {
            let sort_order = sort_orders.get(&group.id).copied().unwrap_or(0);
            insert_group.execute(params![
                group.id.to_string(),
                group.parent.map(|parent| parent.to_string()),
                group.name,
                group.icon,
                sort_order,
                group.allow_entries_at_root,
            ])?;
            for (position, child) in group.groups.iter().enumerate() {
                sort_orders.insert(*child, position as i64);
            }
            for (position, entry_id) in group.entries.iter().enumerate() {
                let entry = tree
                    .lookup_entry(*entry_id)
                    .map_err(|err| PersistError::InvalidData(err.to_string()))?;
                insert_entry.execute(params![
                    entry.id.to_string(),
                    group.id.to_string(),
                    entry.title,
                    entry.icon,
                    entry.payload,
                    position as i64,
                ])?;
                for (link_position, attachment) in entry.attachments.iter().enumerate() {
                    insert_link.execute(params![
                        entry.id.to_string(),
                        attachment.to_string(),
                        link_position as i64,
                    ])?;
                }
            }
        }
    }

    tx.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![ROOT_ID_KEY, tree.root_id().to_string()],
    )?;
    tx.commit()?;
    Ok(())
}

fn load_groups(conn: &Connection) -> PersistResult<Vec<Group>> {
    let mut stmt = conn.prepare(
        "SELECT
            id,
            parent_id,
            name,
            icon,
            allow_entries_at_root
         FROM groups
         ORDER BY sort_order ASC, id ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut groups = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get("id")?;
        let parent = row
            .get::<_, Option<String>>("parent_id")?
            .map(|value| parse_uuid(&value, "groups.parent_id"))
            .transpose()?;
        let allow_entries_at_root = match row.get::<_, i64>("allow_entries_at_root")? {
            0 => false,
            1 => true,
            other => {
                return Err(PersistError::InvalidData(format!(
                    "invalid allow_entries_at_root value `{other}` in groups.allow_entries_at_root"
                )));
            }
        };

        let mut group = Group::new(
            parse_uuid(&id_text, "groups.id")?,
            row.get::<_, String>("name")?,
            row.get("icon")?,
        );
        group.parent = parent;
        group.allow_entries_at_root = allow_entries_at_root;
        groups.push(group);
    }
    Ok(groups)
}

fn load_entries(conn: &Connection) -> PersistResult<Vec<Entry>> {
    let mut stmt = conn.prepare(
        "SELECT
            id,
            group_id,
            title,
            icon,
            payload
         FROM entries
         ORDER BY sort_order ASC, id ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get("id")?;
        let group_text: String = row.get("group_id")?;
        entries.push(Entry {
            id: parse_uuid(&id_text, "entries.id")?,
            group: parse_uuid(&group_text, "entries.group_id")?,
            title: row.get("title")?,
            icon: row.get("icon")?,
            payload: row.get("payload")?,
            attachments: Vec::new(),
        });
    }
    Ok(entries)
}

fn load_attachments(conn: &Connection) -> PersistResult<HashMap<AttachmentId, Vec<u8>>> {
    let mut stmt = conn.prepare("SELECT id, data FROM attachments;")?;
    let mut rows = stmt.query([])?;
    let mut attachments = HashMap::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get("id")?;
        attachments.insert(parse_uuid(&id_text, "attachments.id")?, row.get("data")?);
    }
    Ok(attachments)
}

fn load_attachment_links(
    conn: &Connection,
) -> PersistResult<HashMap<EntryId, Vec<AttachmentId>>> {
    let mut stmt = conn.prepare(
        "SELECT
            entry_id,
            attachment_id
         FROM entry_attachments
         ORDER BY entry_id ASC, sort_order ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut links: HashMap<EntryId, Vec<AttachmentId>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let entry_text: String = row.get("entry_id")?;
        let attachment_text: String = row.get("attachment_id")?;
        links
            .entry(parse_uuid(&entry_text, "entry_attachments.entry_id")?)
            .or_default()
            .push(parse_uuid(&attachment_text, "entry_attachments.attachment_id")?);
    }
    Ok(links)
}

fn parse_uuid(value: &str, column: &'static str) -> PersistResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| PersistError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_tree_connection_ready(conn: &Connection) -> PersistResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(PersistError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{PersistenceGateway, SqliteTreeRepository};
    use crate::db::open_db_in_memory;
    use crate::model::node::{Entry, Group, DEFAULT_ICON};
    use crate::model::tree::NodeTree;

    #[test]
    fn empty_store_loads_nothing() {
        let repo = SqliteTreeRepository::try_new(open_db_in_memory().unwrap()).unwrap();
        assert!(repo.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_keeps_child_order_and_policy() {
        let mut repo = SqliteTreeRepository::try_new(open_db_in_memory().unwrap()).unwrap();
        let mut tree = NodeTree::new("Root", 48, false);
        let root = tree.root_id();
        let bills = tree
            .insert_group(root, Group::new(tree.mint_group_id(), "Bills", 7))
            .unwrap();
        let mail = tree
            .insert_group(root, Group::new(tree.mint_group_id(), "Mail", DEFAULT_ICON))
            .unwrap();
        tree.insert_entry(bills, Entry::new("power", 1, vec![0, 159, 146, 150]))
            .unwrap();
        tree.insert_entry(bills, Entry::new("water", 1, Vec::new()))
            .unwrap();

        repo.save(&tree).unwrap();
        let loaded = repo.load().unwrap().unwrap();

        assert_eq!(loaded, tree);
        assert_eq!(loaded.root().groups, vec![bills, mail]);
        assert!(!loaded.can_add_entry(root));
    }

    #[test]
    fn saving_twice_is_idempotent() {
        let mut repo = SqliteTreeRepository::try_new(open_db_in_memory().unwrap()).unwrap();
        let tree = NodeTree::new("Root", DEFAULT_ICON, true);

        repo.save(&tree).unwrap();
        repo.save(&tree).unwrap();

        let groups: i64 = repo
            .connection()
            .query_row("SELECT COUNT(*) FROM groups;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(groups, 1);
        assert_eq!(repo.load().unwrap().unwrap(), tree);
    }

    #[test]
    fn attachment_pool_and_links_survive_reload() {
        let mut repo = SqliteTreeRepository::try_new(open_db_in_memory().unwrap()).unwrap();
        let mut tree = NodeTree::new("Root", DEFAULT_ICON, true);
        let root = tree.root_id();
        let scan = tree.add_attachment(vec![1, 2, 3]);
        let key = tree.add_attachment(b"-----BEGIN-----".to_vec());
        let unlinked = tree.add_attachment(Vec::new());
        let entry = tree
            .insert_entry(root, Entry::new("passport", 3, Vec::new()))
            .unwrap();
        tree.link_attachment(entry, key).unwrap();
        tree.link_attachment(entry, scan).unwrap();

        repo.save(&tree).unwrap();
        let loaded = repo.load().unwrap().unwrap();

        assert_eq!(loaded, tree);
        assert_eq!(loaded.lookup_entry(entry).unwrap().attachments, vec![key, scan]);
        assert_eq!(loaded.unlinked_attachments(), vec![unlinked]);
    }
}
