//! Embedded relational store.
//!
//! One `rusqlite::Connection` behind a `tokio::sync::Mutex`, matching the
//! teacher's `db: Arc<Mutex<Db>>` sharing pattern. Callers open the
//! connection with `Store::open`, then apply the forward-only schema with
//! `migrate` before the first query.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::envelope::Author;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found")]
    NotFound,
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Regular,
    Quote,
    Reaction,
}

impl MessageKind {
    fn as_db_str(self) -> &'static str {
        match self {
            MessageKind::Regular => "message",
            MessageKind::Quote => "quote",
            MessageKind::Reaction => "reaction",
        }
    }

    fn from_db_str(s: &str) -> MessageKind {
        match s {
            "quote" => MessageKind::Quote,
            "reaction" => MessageKind::Reaction,
            _ => MessageKind::Regular,
        }
    }
}

/// A message ready to insert, already resolved to internal `user_id`/`group_id`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: i64,
    pub group_id: i64,
    pub timestamp: i64,
    pub text: String,
    pub kind: MessageKind,
    pub quote_id: Option<i64>,
    pub quote_author_uuid: Option<String>,
    pub quote_text: Option<String>,
    pub reaction_emoji: Option<String>,
    pub reaction_target_author_uuid: Option<String>,
    pub reaction_target_timestamp: Option<i64>,
}

/// A message as returned by `fetch_window`.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub user_id: i64,
    pub timestamp: i64,
    pub text: String,
    pub kind: MessageKind,
    pub quote_text: Option<String>,
    pub reaction_emoji: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub id: i64,
    pub group_id: i64,
    pub text: String,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub created_at: String,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Applies PRAGMAs and the forward-only schema. Call once after `open`.
    pub async fn migrate(&self) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub async fn integrity_check(&self) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(StoreError::IntegrityCheckFailed(result));
        }
        Ok(())
    }

    pub async fn ensure_user(&self, author: &Author, display_name: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        let (uuid, number): (Option<&str>, Option<&str>) = match author {
            Author::Uuid(s) => (Some(s.as_str()), None),
            Author::Number(s) => (None, Some(s.as_str())),
        };
        let (column, key) = match author {
            Author::Uuid(s) => ("uuid", s.as_str()),
            Author::Number(s) => ("number", s.as_str()),
        };
        let updated = conn.execute(
            &format!("UPDATE users SET name = CASE WHEN ?1 != '' THEN ?1 ELSE name END WHERE {column} = ?2"),
            params![display_name, key],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO users (uuid, number, name) VALUES (?1, ?2, ?3)",
                params![uuid, number, display_name],
            )?;
        }

        let id: i64 = conn.query_row(
            &format!("SELECT id FROM users WHERE {column} = ?1"),
            params![key],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub async fn ensure_group(&self, group_id: &str, display_name: Option<&str>) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO groups (group_id, name) VALUES (?1, ?2)
             ON CONFLICT(group_id) DO UPDATE SET name = CASE WHEN ?2 != '' THEN ?2 ELSE groups.name END",
            params![group_id, display_name.unwrap_or_default()],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM groups WHERE group_id = ?1",
            params![group_id],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub async fn group_internal_id(&self, external_group_id: &str) -> StoreResult<Option<i64>> {
        let conn = self.conn.lock().await;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM groups WHERE group_id = ?1",
                params![external_group_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub async fn list_group_ids(&self) -> StoreResult<Vec<i64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id FROM groups ORDER BY id")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn insert_message(&self, m: NewMessage) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO messages (
                user_id, group_id, timestamp, message_text, message_type,
                quote_id, quote_author_uuid, quote_text,
                is_reaction, reaction_emoji, reaction_target_author_uuid, reaction_target_timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                m.user_id,
                m.group_id,
                m.timestamp,
                m.text,
                m.kind.as_db_str(),
                m.quote_id,
                m.quote_author_uuid,
                m.quote_text,
                matches!(m.kind, MessageKind::Reaction),
                m.reaction_emoji,
                m.reaction_target_author_uuid,
                m.reaction_target_timestamp,
            ],
        )?;
        Ok(())
    }

    /// Cancels a prior matching reaction (same author, target, emoji) if present.
    /// No-op if no match — a reaction-remove with no counterpart is
    /// silently ignored, never inserted as a row itself.
    pub async fn apply_reaction_removal(
        &self,
        author: &Author,
        group_id: i64,
        target_author_uuid: Option<&str>,
        target_timestamp: i64,
        emoji: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let user_key: (Option<&str>, Option<&str>) = match author {
            Author::Uuid(s) => (Some(s.as_str()), None),
            Author::Number(s) => (None, Some(s.as_str())),
        };
        conn.execute(
            "DELETE FROM messages WHERE id IN (
                SELECT m.id FROM messages m
                JOIN users u ON u.id = m.user_id
                WHERE m.group_id = ?1
                  AND m.message_type = 'reaction'
                  AND m.reaction_is_remove = 0
                  AND m.reaction_emoji = ?2
                  AND m.reaction_target_author_uuid = ?3
                  AND m.reaction_target_timestamp = ?4
                  AND ((?5 IS NOT NULL AND u.uuid = ?5) OR (?6 IS NOT NULL AND u.number = ?6))
                LIMIT 1
            )",
            params![
                group_id,
                emoji,
                target_author_uuid,
                target_timestamp,
                user_key.0,
                user_key.1
            ],
        )?;
        Ok(())
    }

    pub async fn fetch_window(
        &self,
        group_id: i64,
        start_ms: i64,
        end_ms: i64,
    ) -> StoreResult<Vec<Message>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, timestamp, message_text, message_type, quote_text, reaction_emoji
             FROM messages
             WHERE group_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![group_id, start_ms, end_ms], |r| {
            Ok(Message {
                id: r.get(0)?,
                user_id: r.get(1)?,
                timestamp: r.get(2)?,
                text: r.get(3)?,
                kind: MessageKind::from_db_str(&r.get::<_, String>(4)?),
                quote_text: r.get(5)?,
                reaction_emoji: r.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn save_summary(
        &self,
        group_id: i64,
        text: &str,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> StoreResult<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO summaries (group_id, summary_text, start_timestamp, end_timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![group_id, text, window_start_ms, window_end_ms],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn delete_summary(&self, summary_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        let affected = conn.execute("DELETE FROM summaries WHERE id = ?1", params![summary_id])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn get_summary(&self, summary_id: i64) -> StoreResult<Option<Summary>> {
        let conn = self.conn.lock().await;
        let summary = conn
            .query_row(
                "SELECT id, group_id, summary_text, start_timestamp, end_timestamp, created_at
                 FROM summaries WHERE id = ?1",
                params![summary_id],
                row_to_summary,
            )
            .optional()?;
        Ok(summary)
    }

    pub async fn list_summaries(
        &self,
        group_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Summary>> {
        let conn = self.conn.lock().await;
        let mut stmt = match group_id {
            Some(_) => conn.prepare(
                "SELECT id, group_id, summary_text, start_timestamp, end_timestamp, created_at
                 FROM summaries WHERE group_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            )?,
            None => conn.prepare(
                "SELECT id, group_id, summary_text, start_timestamp, end_timestamp, created_at
                 FROM summaries
                 ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            )?,
        };
        let rows = match group_id {
            Some(gid) => stmt.query_map(params![gid, limit, offset], row_to_summary)?,
            None => stmt.query_map(params![limit, offset], row_to_summary)?,
        };
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Export ordered oldest-first, unbounded — used by the bulk export endpoint.
    pub async fn export_summaries(&self, group_id: i64) -> StoreResult<Vec<Summary>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, group_id, summary_text, start_timestamp, end_timestamp, created_at
             FROM summaries WHERE group_id = ?1
             ORDER BY start_timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![group_id], row_to_summary)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fallback `"User <id>"` when the id is unknown; errors never propagate.
    pub async fn user_name_by_id(&self, user_id: i64) -> String {
        let name = self.conn.lock().await.query_row(
            "SELECT name FROM users WHERE id = ?1",
            params![user_id],
            |r| r.get::<_, String>(0),
        );
        match name {
            Ok(n) if !n.is_empty() => n,
            _ => format!("User {user_id}"),
        }
    }
}

fn row_to_summary(r: &rusqlite::Row<'_>) -> rusqlite::Result<Summary> {
    Ok(Summary {
        id: r.get(0)?,
        group_id: r.get(1)?,
        text: r.get(2)?,
        window_start_ms: r.get(3)?,
        window_end_ms: r.get(4)?,
        created_at: r.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_user_dedupes_on_uuid() {
        let store = test_store().await;
        let a = Author::Uuid("u1".into());
        let id1 = store.ensure_user(&a, "Alice").await.unwrap();
        let id2 = store.ensure_user(&a, "Alice Renamed").await.unwrap();
        assert_eq!(id1, id2);
        let name = store.user_name_by_id(id1).await;
        assert_eq!(name, "Alice Renamed");
    }

    #[tokio::test]
    async fn user_name_by_id_falls_back_for_unknown() {
        let store = test_store().await;
        let name = store.user_name_by_id(999).await;
        assert_eq!(name, "User 999");
    }

    #[tokio::test]
    async fn ensure_group_keeps_latest_name() {
        let store = test_store().await;
        let id1 = store.ensure_group("G1", Some("Dev")).await.unwrap();
        let id2 = store.ensure_group("G1", Some("Dev Team")).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn insert_message_dedupes_on_natural_key() {
        let store = test_store().await;
        let uid = store.ensure_user(&Author::Uuid("u1".into()), "Alice").await.unwrap();
        let gid = store.ensure_group("G1", None).await.unwrap();
        let msg = NewMessage {
            user_id: uid,
            group_id: gid,
            timestamp: 1000,
            text: "hi".into(),
            kind: MessageKind::Regular,
            quote_id: None,
            quote_author_uuid: None,
            quote_text: None,
            reaction_emoji: None,
            reaction_target_author_uuid: None,
            reaction_target_timestamp: None,
        };
        store.insert_message(msg.clone()).await.unwrap();
        store.insert_message(msg).await.unwrap();
        let window = store.fetch_window(gid, 0, 2000).await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn fetch_window_orders_by_timestamp_then_id() {
        let store = test_store().await;
        let uid = store.ensure_user(&Author::Uuid("u1".into()), "Alice").await.unwrap();
        let gid = store.ensure_group("G1", None).await.unwrap();
        for (ts, text) in [(200, "b"), (100, "a"), (200, "c")] {
            store
                .insert_message(NewMessage {
                    user_id: uid,
                    group_id: gid,
                    timestamp: ts,
                    text: text.into(),
                    kind: MessageKind::Regular,
                    quote_id: None,
                    quote_author_uuid: None,
                    quote_text: None,
                    reaction_emoji: None,
                    reaction_target_author_uuid: None,
                    reaction_target_timestamp: None,
                })
                .await
                .unwrap();
        }
        let window = store.fetch_window(gid, 0, 1000).await.unwrap();
        let texts: Vec<_> = window.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn fetch_window_excludes_end_boundary() {
        let store = test_store().await;
        let uid = store.ensure_user(&Author::Uuid("u1".into()), "Alice").await.unwrap();
        let gid = store.ensure_group("G1", None).await.unwrap();
        store
            .insert_message(NewMessage {
                user_id: uid,
                group_id: gid,
                timestamp: 500,
                text: "edge".into(),
                kind: MessageKind::Regular,
                quote_id: None,
                quote_author_uuid: None,
                quote_text: None,
                reaction_emoji: None,
                reaction_target_author_uuid: None,
                reaction_target_timestamp: None,
            })
            .await
            .unwrap();
        let window = store.fetch_window(gid, 0, 500).await.unwrap();
        assert!(window.is_empty());
        let window = store.fetch_window(gid, 0, 501).await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn reaction_apply_then_remove_leaves_no_residue() {
        let store = test_store().await;
        let uid = store.ensure_user(&Author::Uuid("u1".into()), "Alice").await.unwrap();
        let gid = store.ensure_group("G1", None).await.unwrap();
        store
            .insert_message(NewMessage {
                user_id: uid,
                group_id: gid,
                timestamp: 1500,
                text: String::new(),
                kind: MessageKind::Reaction,
                quote_id: None,
                quote_author_uuid: None,
                quote_text: None,
                reaction_emoji: Some("👍".into()),
                reaction_target_author_uuid: Some("u2".into()),
                reaction_target_timestamp: Some(1000),
            })
            .await
            .unwrap();
        store
            .apply_reaction_removal(
                &Author::Uuid("u1".into()),
                gid,
                Some("u2"),
                1000,
                "👍",
            )
            .await
            .unwrap();
        let window = store.fetch_window(gid, 0, 2000).await.unwrap();
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn save_and_get_and_delete_summary() {
        let store = test_store().await;
        let gid = store.ensure_group("G1", None).await.unwrap();
        let id = store.save_summary(gid, "summary text", 0, 1000).await.unwrap();
        let fetched = store.get_summary(id).await.unwrap().unwrap();
        assert_eq!(fetched.text, "summary text");
        store.delete_summary(id).await.unwrap();
        assert!(store.get_summary(id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_summary(id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_summaries_filters_by_group_and_orders_newest_first() {
        let store = test_store().await;
        let g1 = store.ensure_group("G1", None).await.unwrap();
        let g2 = store.ensure_group("G2", None).await.unwrap();
        store.save_summary(g1, "first", 0, 100).await.unwrap();
        store.save_summary(g1, "second", 100, 200).await.unwrap();
        store.save_summary(g2, "other group", 0, 100).await.unwrap();
        let list = store.list_summaries(Some(g1), 10, 0).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].text, "second");
    }
}
