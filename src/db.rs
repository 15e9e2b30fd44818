//! Database module for topical
//!
//! SQLite persistence for conversations and their topic instance trees.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Conversation already open: {0}")]
    ConversationExists(String),
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
    #[error("State encoding error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Database connection poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Conversation Operations ====================

    /// Record a newly started conversation
    pub fn open_conversation(&self, record: &ConversationRecord) -> DbResult<()> {
        let conn = self.conn()?;
        insert_conversation(&conn, record)
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<ConversationRecord> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, root_instance_id, root_topic, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id],
            conversation_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::ConversationNotFound(id.to_string()))
    }

    /// List open conversations, most recently active first
    pub fn list_conversations(&self) -> DbResult<Vec<ConversationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, root_instance_id, root_topic, created_at, updated_at
             FROM conversations ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], conversation_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a conversation and every instance in its tree
    pub fn close_conversation(&self, id: &str) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_conversation(&tx, id)?;
        tx.commit()?;
        Ok(())
    }

    /// Apply one turn's writes in a single transaction; either every write
    /// lands or none does
    pub fn apply_turn(&self, conversation_id: &str, writes: &TurnWrites) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if writes.close {
            delete_conversation(&tx, conversation_id)?;
        } else {
            if let Some(record) = &writes.open {
                insert_conversation(&tx, record)?;
            }
            for record in &writes.persist {
                upsert_instance(&tx, conversation_id, record)?;
            }
            for id in &writes.delete {
                remove_instance(&tx, conversation_id, id)?;
            }
            touch_conversation(&tx, conversation_id)?;
        }

        tx.commit()?;
        Ok(())
    }

    // ==================== Instance Operations ====================

    /// Insert or replace an instance record
    pub fn put_instance(&self, conversation_id: &str, record: &InstanceRecord) -> DbResult<()> {
        let conn = self.conn()?;
        upsert_instance(&conn, conversation_id, record)?;
        touch_conversation(&conn, conversation_id)
    }

    /// Get a single instance by ID
    pub fn get_instance(&self, conversation_id: &str, id: &str) -> DbResult<InstanceRecord> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT id, topic_name, parent_id, state, child_instance_id, return_args, created_at, updated_at
                 FROM topic_instances WHERE conversation_id = ?1 AND id = ?2",
                params![conversation_id, id],
                RawInstance::from_row,
            )
            .optional()?
            .ok_or_else(|| DbError::InstanceNotFound(id.to_string()))?;
        raw.decode()
    }

    /// Load every instance of a conversation in creation order
    pub fn load_instances(&self, conversation_id: &str) -> DbResult<Vec<InstanceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, topic_name, parent_id, state, child_instance_id, return_args, created_at, updated_at
             FROM topic_instances WHERE conversation_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], RawInstance::from_row)?;

        let mut records = Vec::new();
        for raw in rows {
            records.push(raw?.decode()?);
        }
        Ok(records)
    }

    /// Remove an instance; removing an absent one is not an error
    pub fn delete_instance(&self, conversation_id: &str, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        remove_instance(&conn, conversation_id, id)
    }
}

// Statement helpers shared by the single-write methods and `apply_turn`

fn insert_conversation(conn: &Connection, record: &ConversationRecord) -> DbResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
        params![record.conversation_id],
        |row| row.get(0),
    )?;
    if exists {
        return Err(DbError::ConversationExists(record.conversation_id.clone()));
    }

    conn.execute(
        "INSERT INTO conversations (id, root_instance_id, root_topic, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.conversation_id,
            record.root_instance_id,
            record.root_topic,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn delete_conversation(conn: &Connection, id: &str) -> DbResult<()> {
    conn.execute(
        "DELETE FROM topic_instances WHERE conversation_id = ?1",
        params![id],
    )?;
    let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(DbError::ConversationNotFound(id.to_string()));
    }
    Ok(())
}

fn touch_conversation(conn: &Connection, id: &str) -> DbResult<()> {
    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), id],
    )?;
    Ok(())
}

fn upsert_instance(
    conn: &Connection,
    conversation_id: &str,
    record: &InstanceRecord,
) -> DbResult<()> {
    let state = serde_json::to_string(&record.state)?;
    let return_args = record
        .return_args
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO topic_instances
            (id, conversation_id, topic_name, parent_id, state, child_instance_id, return_args, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            state = excluded.state,
            child_instance_id = excluded.child_instance_id,
            return_args = excluded.return_args,
            updated_at = excluded.updated_at",
        params![
            record.id,
            conversation_id,
            record.topic_name,
            record.parent_id,
            state,
            record.child_instance_id,
            return_args,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn remove_instance(conn: &Connection, conversation_id: &str, id: &str) -> DbResult<()> {
    conn.execute(
        "DELETE FROM topic_instances WHERE conversation_id = ?1 AND id = ?2",
        params![conversation_id, id],
    )?;
    Ok(())
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        conversation_id: row.get(0)?,
        root_instance_id: row.get(1)?,
        root_topic: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

/// Row as stored, before the JSON columns are decoded
struct RawInstance {
    id: String,
    topic_name: String,
    parent_id: Option<String>,
    state: String,
    child_instance_id: Option<String>,
    return_args: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawInstance {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            topic_name: row.get(1)?,
            parent_id: row.get(2)?,
            state: row.get(3)?,
            child_instance_id: row.get(4)?,
            return_args: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn decode(self) -> DbResult<InstanceRecord> {
        Ok(InstanceRecord {
            id: self.id,
            topic_name: self.topic_name,
            parent_id: self.parent_id,
            state: serde_json::from_str(&self.state)?,
            child_instance_id: self.child_instance_id,
            return_args: self
                .return_args
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(id: &str, parent: Option<&str>) -> InstanceRecord {
        let now = Utc::now();
        InstanceRecord {
            id: id.to_string(),
            topic_name: "simple_form".to_string(),
            parent_id: parent.map(String::from),
            state: json!({ "form": {} }),
            child_instance_id: None,
            return_args: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_open_and_get_conversation() {
        let db = Database::open_in_memory().unwrap();
        let record = ConversationRecord::new("conv-1", "root-1", "simple_form");

        db.open_conversation(&record).unwrap();

        let fetched = db.get_conversation("conv-1").unwrap();
        assert_eq!(fetched.root_instance_id, "root-1");
        assert_eq!(fetched.root_topic, "simple_form");
    }

    #[test]
    fn test_open_conversation_twice_fails() {
        let db = Database::open_in_memory().unwrap();
        let record = ConversationRecord::new("conv-1", "root-1", "simple_form");

        db.open_conversation(&record).unwrap();
        let result = db.open_conversation(&record);

        assert!(matches!(result, Err(DbError::ConversationExists(_))));
    }

    #[test]
    fn test_missing_conversation() {
        let db = Database::open_in_memory().unwrap();
        let result = db.get_conversation("nope");
        assert!(matches!(result, Err(DbError::ConversationNotFound(_))));
    }

    #[test]
    fn test_put_instance_upserts() {
        let db = Database::open_in_memory().unwrap();
        db.open_conversation(&ConversationRecord::new("conv-1", "root-1", "simple_form"))
            .unwrap();

        let mut root = instance("root-1", None);
        db.put_instance("conv-1", &root).unwrap();

        root.state = json!({ "form": { "name": "Ada" } });
        root.child_instance_id = Some("child-1".to_string());
        db.put_instance("conv-1", &root).unwrap();

        let fetched = db.get_instance("conv-1", "root-1").unwrap();
        assert_eq!(fetched.state, json!({ "form": { "name": "Ada" } }));
        assert_eq!(fetched.child_instance_id.as_deref(), Some("child-1"));
        assert_eq!(db.load_instances("conv-1").unwrap().len(), 1);
    }

    #[test]
    fn test_return_args_round_trip_through_columns() {
        let db = Database::open_in_memory().unwrap();
        db.open_conversation(&ConversationRecord::new("conv-1", "root-1", "simple_form"))
            .unwrap();

        let mut child = instance("child-1", Some("root-1"));
        child.return_args = Some(json!({ "name": "city", "result": { "value": "Paris" } }));
        db.put_instance("conv-1", &child).unwrap();

        let fetched = db.get_instance("conv-1", "child-1").unwrap();
        assert!(fetched.has_returned());
        assert!(!fetched.is_root());
        assert_eq!(fetched.return_args, child.return_args);
    }

    #[test]
    fn test_load_instances_in_creation_order() {
        let db = Database::open_in_memory().unwrap();
        db.open_conversation(&ConversationRecord::new("conv-1", "root-1", "simple_form"))
            .unwrap();

        db.put_instance("conv-1", &instance("root-1", None)).unwrap();
        db.put_instance("conv-1", &instance("child-1", Some("root-1")))
            .unwrap();

        let ids: Vec<String> = db
            .load_instances("conv-1")
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["root-1".to_string(), "child-1".to_string()]);
    }

    #[test]
    fn test_close_conversation_removes_tree() {
        let db = Database::open_in_memory().unwrap();
        db.open_conversation(&ConversationRecord::new("conv-1", "root-1", "simple_form"))
            .unwrap();
        db.put_instance("conv-1", &instance("root-1", None)).unwrap();
        db.put_instance("conv-1", &instance("child-1", Some("root-1")))
            .unwrap();

        db.close_conversation("conv-1").unwrap();

        assert!(db.load_instances("conv-1").unwrap().is_empty());
        assert!(db.list_conversations().unwrap().is_empty());
        assert!(matches!(
            db.close_conversation("conv-1"),
            Err(DbError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_delete_instance_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.open_conversation(&ConversationRecord::new("conv-1", "root-1", "simple_form"))
            .unwrap();
        db.put_instance("conv-1", &instance("child-1", Some("root-1")))
            .unwrap();

        db.delete_instance("conv-1", "child-1").unwrap();
        db.delete_instance("conv-1", "child-1").unwrap();

        assert!(matches!(
            db.get_instance("conv-1", "child-1"),
            Err(DbError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn test_apply_turn_writes_whole_batch() {
        let db = Database::open_in_memory().unwrap();
        let mut root = instance("root-1", None);
        root.child_instance_id = Some("child-1".to_string());

        db.apply_turn(
            "conv-1",
            &TurnWrites {
                open: Some(ConversationRecord::new("conv-1", "root-1", "simple_form")),
                persist: vec![root, instance("child-1", Some("root-1"))],
                ..TurnWrites::default()
            },
        )
        .unwrap();
        assert_eq!(db.load_instances("conv-1").unwrap().len(), 2);

        db.apply_turn(
            "conv-1",
            &TurnWrites {
                delete: vec!["child-1".to_string()],
                ..TurnWrites::default()
            },
        )
        .unwrap();
        assert_eq!(db.load_instances("conv-1").unwrap().len(), 1);

        db.apply_turn(
            "conv-1",
            &TurnWrites {
                close: true,
                ..TurnWrites::default()
            },
        )
        .unwrap();
        assert!(db.list_conversations().unwrap().is_empty());
        assert!(db.load_instances("conv-1").unwrap().is_empty());
    }

    #[test]
    fn test_apply_turn_rolls_back_when_a_later_write_fails() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_child BEFORE INSERT ON topic_instances
                 WHEN NEW.id = 'child-1'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
        let mut root = instance("root-1", None);
        root.child_instance_id = Some("child-1".to_string());

        let result = db.apply_turn(
            "conv-1",
            &TurnWrites {
                open: Some(ConversationRecord::new("conv-1", "root-1", "simple_form")),
                persist: vec![root, instance("child-1", Some("root-1"))],
                ..TurnWrites::default()
            },
        );

        assert!(matches!(result, Err(DbError::Sqlite(_))));
        // The root and its dangling child link were rolled back with the child
        assert!(matches!(
            db.get_conversation("conv-1"),
            Err(DbError::ConversationNotFound(_))
        ));
        assert!(db.load_instances("conv-1").unwrap().is_empty());
    }

    #[test]
    fn test_apply_turn_rejects_second_open() {
        let db = Database::open_in_memory().unwrap();
        db.open_conversation(&ConversationRecord::new("conv-1", "root-1", "simple_form"))
            .unwrap();
        db.put_instance("conv-1", &instance("root-1", None)).unwrap();

        let result = db.apply_turn(
            "conv-1",
            &TurnWrites {
                open: Some(ConversationRecord::new("conv-1", "root-2", "simple_form")),
                persist: vec![instance("root-2", None)],
                ..TurnWrites::default()
            },
        );

        assert!(matches!(result, Err(DbError::ConversationExists(_))));
        assert_eq!(
            db.get_conversation("conv-1").unwrap().root_instance_id,
            "root-1"
        );
        assert_eq!(db.load_instances("conv-1").unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topical.db");

        {
            let db = Database::open(&path).unwrap();
            db.open_conversation(&ConversationRecord::new("conv-1", "root-1", "simple_form"))
                .unwrap();
            db.put_instance("conv-1", &instance("root-1", None)).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_conversations().unwrap().len(), 1);
        assert_eq!(db.load_instances("conv-1").unwrap().len(), 1);
    }
}
