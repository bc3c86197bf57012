//! Database storage layer for Parley Server

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

use crate::conversations::Side;
use crate::models::*;

const MESSAGE_COLUMNS: &str = "seq, message_id, conversation_id, sender_id, recipient_id, content,
    image_urls, reply_to_id, reply_to_content, reply_to_sender_id, is_system, is_read, read_at,
    pinned_by, pinned_at, is_edited, edited_at, original_content, is_deleted_for_everyone,
    deleted_for_everyone_at, deleted_for_everyone_by, deleted_for_user_ids, created_at";

const CONVERSATION_COLUMNS: &str = "id, participant1_id, participant2_id,
    p1_muted, p1_pinned, p1_theme_color, p1_nickname, p1_auto_translate,
    p2_muted, p2_pinned, p2_theme_color, p2_nickname, p2_auto_translate,
    last_message, last_message_sender_id, last_message_at, created_at, updated_at";

/// Excludes rows the bound viewer has hidden with delete-for-me
const NOT_HIDDEN_FOR_VIEWER: &str =
    "NOT EXISTS (SELECT 1 FROM json_each(messages.deleted_for_user_ids) WHERE json_each.value = ?)";

/// A message about to be persisted
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub image_urls: Vec<String>,
    pub reply_to: Option<ReplySnapshot>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        if database_path == ":memory:" {
            return Self::in_memory().await;
        }

        // Ensure directory exists
        if let Some(parent) = Path::new(database_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Private database living as long as the pool; a single connection keeps every query on it
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                participant1_id TEXT NOT NULL,
                participant2_id TEXT NOT NULL,
                p1_muted INTEGER NOT NULL DEFAULT 0,
                p1_pinned INTEGER NOT NULL DEFAULT 0,
                p1_theme_color TEXT,
                p1_nickname TEXT,
                p1_auto_translate INTEGER NOT NULL DEFAULT 0,
                p2_muted INTEGER NOT NULL DEFAULT 0,
                p2_pinned INTEGER NOT NULL DEFAULT 0,
                p2_theme_color TEXT,
                p2_nickname TEXT,
                p2_auto_translate INTEGER NOT NULL DEFAULT 0,
                last_message TEXT,
                last_message_sender_id TEXT,
                last_message_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                content TEXT NOT NULL,
                image_urls TEXT NOT NULL DEFAULT '[]',
                reply_to_id TEXT,
                reply_to_content TEXT,
                reply_to_sender_id TEXT,
                is_system INTEGER NOT NULL DEFAULT 0,
                is_read INTEGER NOT NULL DEFAULT 0,
                read_at TEXT,
                pinned_by TEXT,
                pinned_at TEXT,
                is_edited INTEGER NOT NULL DEFAULT 0,
                edited_at TEXT,
                original_content TEXT,
                is_deleted_for_everyone INTEGER NOT NULL DEFAULT 0,
                deleted_for_everyone_at TEXT,
                deleted_for_everyone_by TEXT,
                deleted_for_user_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_p1 ON conversations(participant1_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_p2 ON conversations(participant2_id);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq);
            CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(recipient_id, is_read);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    pub async fn get_conversation(&self, id: &str) -> sqlx::Result<Option<Conversation>> {
        sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Inserts the conversation unless it already exists
    pub async fn ensure_conversation(
        &self,
        id: &str,
        participant1_id: &str,
        participant2_id: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO conversations (id, participant1_id, participant2_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(participant1_id)
        .bind(participant2_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub(crate) async fn update_side_settings(
        &self,
        id: &str,
        side: Side,
        patch: &SettingsPatch,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        let p = side.column_prefix();
        let sql = format!(
            "UPDATE conversations SET
                {p}_muted = COALESCE(?, {p}_muted),
                {p}_pinned = COALESCE(?, {p}_pinned),
                {p}_nickname = CASE WHEN ? THEN ? ELSE {p}_nickname END,
                {p}_auto_translate = COALESCE(?, {p}_auto_translate),
                updated_at = ?
             WHERE id = ?"
        );

        let nickname = patch
            .nickname
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        sqlx::query(&sql)
            .bind(patch.muted)
            .bind(patch.pinned)
            .bind(patch.nickname.is_some())
            .bind(nickname)
            .bind(patch.auto_translate)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_theme_for_both(
        &self,
        id: &str,
        theme_color: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE conversations SET p1_theme_color = ?, p2_theme_color = ?, updated_at = ? WHERE id = ?",
        )
        .bind(theme_color)
        .bind(theme_color)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_last_message(
        &self,
        id: &str,
        last: Option<&Message>,
        now: DateTime<Utc>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE conversations SET
                last_message = ?, last_message_sender_id = ?, last_message_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(last.map(|m| m.content.as_str()))
        .bind(last.map(|m| m.sender_id.as_str()))
        .bind(last.map(|m| m.created_at))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_conversations_for(&self, user_id: &str) -> sqlx::Result<Vec<Conversation>> {
        sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE participant1_id = ? OR participant2_id = ?
             ORDER BY COALESCE(last_message_at, created_at) DESC"
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    pub async fn insert_message(&self, new: &NewMessage) -> anyhow::Result<Message> {
        let image_urls = serde_json::to_string(&new.image_urls)?;

        sqlx::query(
            "INSERT INTO messages
             (message_id, conversation_id, sender_id, recipient_id, content, image_urls,
              reply_to_id, reply_to_content, reply_to_sender_id, is_system, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.message_id)
        .bind(&new.conversation_id)
        .bind(&new.sender_id)
        .bind(&new.recipient_id)
        .bind(&new.content)
        .bind(image_urls)
        .bind(new.reply_to.as_ref().map(|r| r.message_id.as_str()))
        .bind(new.reply_to.as_ref().map(|r| r.content.as_str()))
        .bind(new.reply_to.as_ref().map(|r| r.sender_id.as_str()))
        .bind(new.is_system)
        .bind(new.created_at)
        .execute(&self.pool)
        .await?;

        self.get_message(&new.message_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("message {} vanished after insert", new.message_id))
    }

    pub async fn get_message(&self, message_id: &str) -> anyhow::Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose().map_err(Into::into)
    }

    /// Overwrites the content, keeping the pre-edit text in `original_content` on the first edit only.
    /// Returns false when the message was unsent in the meantime.
    pub async fn update_message_content(
        &self,
        message_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET
                original_content = COALESCE(original_content, content),
                content = ?,
                is_edited = 1,
                edited_at = ?
             WHERE message_id = ? AND is_deleted_for_everyone = 0",
        )
        .bind(content)
        .bind(now)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns false when the message is unsent
    pub async fn set_pin(&self, message_id: &str, user_id: &str, now: DateTime<Utc>) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET pinned_by = ?, pinned_at = ?
             WHERE message_id = ? AND is_deleted_for_everyone = 0",
        )
        .bind(user_id)
        .bind(now)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Forces both pin columns back to NULL, but only while `pinned_by` still holds the pin
    pub async fn clear_pin(&self, message_id: &str, pinned_by: &str) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET pinned_by = NULL, pinned_at = NULL
             WHERE message_id = ? AND pinned_by = ?",
        )
        .bind(message_id)
        .bind(pinned_by)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Adds the viewer to the hide set; returns false when they were already in it
    pub async fn hide_for_user(&self, message_id: &str, user_id: &str) -> sqlx::Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE messages SET deleted_for_user_ids = json_insert(deleted_for_user_ids, '$[#]', ?)
             WHERE message_id = ? AND {NOT_HIDDEN_FOR_VIEWER}"
        ))
        .bind(user_id)
        .bind(message_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clears content, images and pin and marks the message unsent; returns false if it already was
    pub async fn mark_deleted_for_everyone(
        &self,
        message_id: &str,
        deleted_by: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET
                content = '',
                image_urls = '[]',
                pinned_by = NULL,
                pinned_at = NULL,
                is_deleted_for_everyone = 1,
                deleted_for_everyone_at = ?,
                deleted_for_everyone_by = ?
             WHERE message_id = ? AND is_deleted_for_everyone = 0",
        )
        .bind(now)
        .bind(deleted_by)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent message that still has content to show in a conversation list
    pub async fn latest_live_message(&self, conversation_id: &str) -> anyhow::Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? AND is_deleted_for_everyone = 0 AND is_system = 0
             ORDER BY seq DESC LIMIT 1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose().map_err(Into::into)
    }

    /// Most recent live, non-system message the viewer has not hidden
    pub async fn latest_visible_message(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> anyhow::Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? AND is_deleted_for_everyone = 0 AND is_system = 0
               AND {NOT_HIDDEN_FOR_VIEWER}
             ORDER BY seq DESC LIMIT 1"
        ))
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Message::try_from).transpose().map_err(Into::into)
    }

    /// Newest first
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        limit: u32,
        offset: u32,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? AND {NOT_HIDDEN_FOR_VIEWER}
             ORDER BY seq DESC LIMIT ? OFFSET ?"
        ))
        .bind(conversation_id)
        .bind(viewer_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        to_messages(rows)
    }

    /// Live, non-system messages whose content contains `needle` (case-insensitive), newest first
    pub async fn search_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        needle: &str,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? AND {NOT_HIDDEN_FOR_VIEWER}
               AND is_deleted_for_everyone = 0 AND is_system = 0
               AND instr(lower(content), lower(?)) > 0
             ORDER BY seq DESC"
        ))
        .bind(conversation_id)
        .bind(viewer_id)
        .bind(needle)
        .fetch_all(&self.pool)
        .await?;

        to_messages(rows)
    }

    /// Live messages with images or a leading content tag, newest first
    pub async fn media_candidates(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? AND {NOT_HIDDEN_FOR_VIEWER}
               AND is_deleted_for_everyone = 0
               AND (json_array_length(image_urls) > 0 OR ltrim(content) LIKE '[%')
             ORDER BY seq DESC"
        ))
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        to_messages(rows)
    }

    pub async fn pinned_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ? AND {NOT_HIDDEN_FOR_VIEWER}
               AND pinned_by IS NOT NULL AND is_deleted_for_everyone = 0
             ORDER BY pinned_at DESC"
        ))
        .bind(conversation_id)
        .bind(viewer_id)
        .fetch_all(&self.pool)
        .await?;

        to_messages(rows)
    }

    /// Marks everything addressed to `reader` in the conversation as read
    pub async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "UPDATE messages SET is_read = 1, read_at = ?
             WHERE conversation_id = ? AND recipient_id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Unread messages addressed to the user, optionally within one conversation
    pub async fn unread_count(&self, user_id: &str, conversation_id: Option<&str>) -> sqlx::Result<i64> {
        let count: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM messages
             WHERE recipient_id = ? AND is_read = 0 AND is_deleted_for_everyone = 0
               AND (? IS NULL OR conversation_id = ?)
               AND {NOT_HIDDEN_FOR_VIEWER}"
        ))
        .bind(user_id)
        .bind(conversation_id)
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn get_stats(&self) -> anyhow::Result<ServerStats> {
        let conversations: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;

        let messages: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;

        let unsent: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE is_deleted_for_everyone = 1")
                .fetch_one(&self.pool)
                .await?;

        Ok(ServerStats {
            conversations: conversations.0,
            messages: messages.0,
            unsent_messages: unsent.0,
            online_users: 0, // Filled in by the presence tracker when served live
        })
    }
}

fn to_messages(rows: Vec<MessageRow>) -> anyhow::Result<Vec<Message>> {
    rows.into_iter()
        .map(|row| Message::try_from(row).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn new_message(id: &str, content: &str, minute: u32) -> NewMessage {
        NewMessage {
            message_id: id.to_string(),
            conversation_id: "a_b".to_string(),
            sender_id: "a".to_string(),
            recipient_id: "b".to_string(),
            content: content.to_string(),
            image_urls: vec![],
            reply_to: None,
            is_system: false,
            created_at: at(minute),
        }
    }

    async fn seeded() -> Storage {
        let storage = Storage::in_memory().await.unwrap();
        storage.ensure_conversation("a_b", "a", "b", at(0)).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn hide_for_user_is_idempotent() {
        let storage = seeded().await;
        storage.insert_message(&new_message("m1", "hi", 1)).await.unwrap();

        assert!(storage.hide_for_user("m1", "b").await.unwrap());
        assert!(!storage.hide_for_user("m1", "b").await.unwrap());

        let message = storage.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.deleted_for_user_ids, vec!["b".to_string()]);

        assert!(storage.list_messages("a_b", "b", 10, 0).await.unwrap().is_empty());
        assert_eq!(storage.list_messages("a_b", "a", 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_edit_keeps_original_content() {
        let storage = seeded().await;
        storage.insert_message(&new_message("m1", "one", 1)).await.unwrap();

        assert!(storage.update_message_content("m1", "two", at(2)).await.unwrap());
        assert!(storage.update_message_content("m1", "three", at(3)).await.unwrap());

        let message = storage.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.content, "three");
        assert_eq!(message.original_content.as_deref(), Some("one"));
        assert!(message.is_edited);
        assert_eq!(message.edited_at, Some(at(3)));
    }

    #[tokio::test]
    async fn messages_list_newest_first() {
        let storage = seeded().await;
        for (i, id) in ["m1", "m2", "m3"].iter().enumerate() {
            storage.insert_message(&new_message(id, id, i as u32)).await.unwrap();
        }

        let ids: Vec<String> = storage
            .list_messages("a_b", "a", 2, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["m3", "m2"]);

        let rest = storage.list_messages("a_b", "a", 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "m1");
    }

    #[tokio::test]
    async fn unsend_clears_content_and_pin() {
        let storage = seeded().await;
        let mut new = new_message("m1", "secret", 1);
        new.image_urls = vec!["https://cdn/x.png".to_string()];
        storage.insert_message(&new).await.unwrap();
        assert!(storage.set_pin("m1", "b", at(2)).await.unwrap());

        assert!(storage.mark_deleted_for_everyone("m1", "a", at(3)).await.unwrap());
        assert!(!storage.mark_deleted_for_everyone("m1", "a", at(4)).await.unwrap());

        let message = storage.get_message("m1").await.unwrap().unwrap();
        assert!(message.is_deleted_for_everyone);
        assert!(message.content.is_empty());
        assert!(message.image_urls.is_empty());
        assert!(message.pinned_by.is_none());
        assert!(message.pinned_at.is_none());
        assert_eq!(message.deleted_for_everyone_by.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn clear_pin_only_releases_the_current_pinner() {
        let storage = seeded().await;
        storage.insert_message(&new_message("m1", "hi", 1)).await.unwrap();
        assert!(storage.set_pin("m1", "a", at(2)).await.unwrap());
        // Someone else re-pinned before the first pinner's clear reached the row
        assert!(storage.set_pin("m1", "b", at(3)).await.unwrap());

        assert!(!storage.clear_pin("m1", "a").await.unwrap());
        let message = storage.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.pinned_by.as_deref(), Some("b"));
        assert_eq!(message.pinned_at, Some(at(3)));

        assert!(storage.clear_pin("m1", "b").await.unwrap());
        let message = storage.get_message("m1").await.unwrap().unwrap();
        assert!(message.pinned_by.is_none());
        assert!(message.pinned_at.is_none());
    }

    #[tokio::test]
    async fn writes_to_an_unsent_message_report_no_change() {
        let storage = seeded().await;
        storage.insert_message(&new_message("m1", "hi", 1)).await.unwrap();
        assert!(storage.mark_deleted_for_everyone("m1", "a", at(2)).await.unwrap());

        assert!(!storage.update_message_content("m1", "edited", at(3)).await.unwrap());
        assert!(!storage.set_pin("m1", "b", at(3)).await.unwrap());

        let message = storage.get_message("m1").await.unwrap().unwrap();
        assert!(message.content.is_empty());
        assert!(!message.is_edited);
        assert!(message.pinned_by.is_none());
        assert!(message.pinned_at.is_none());
    }

    #[tokio::test]
    async fn unread_count_skips_hidden_and_read() {
        let storage = seeded().await;
        storage.insert_message(&new_message("m1", "one", 1)).await.unwrap();
        storage.insert_message(&new_message("m2", "two", 2)).await.unwrap();
        storage.hide_for_user("m2", "b").await.unwrap();

        assert_eq!(storage.unread_count("b", None).await.unwrap(), 1);
        assert_eq!(storage.unread_count("b", Some("a_b")).await.unwrap(), 1);
        assert_eq!(storage.unread_count("a", None).await.unwrap(), 0);

        assert_eq!(storage.mark_conversation_read("a_b", "b", at(5)).await.unwrap(), 2);
        assert_eq!(storage.unread_count("b", None).await.unwrap(), 0);
    }
}
