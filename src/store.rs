//! Durable record of conversations and their messages.
//!
//! The store is a single SQLite file accessed through one pooled connection.
//! Every mutation runs inside its own transaction, and every aggregate read is
//! a single statement, so a reader never observes half of a write.
//!
//! Timestamps are integer Unix microseconds drawn from a store-wide
//! high-water mark: each write is stamped strictly after every earlier write,
//! even when the wall clock stalls or steps backwards.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::message::Role;
use crate::observability::{STORE_ERRORS, STORE_SYSTEM_MESSAGES_CLEANED, STORE_WRITES};
use crate::utils::time::{from_unix_micros, unix_micros_now};

/// Default filename of the store under the confab home.
pub const DB_FILE: &str = "conversations.db";

/// Number of conversations `/history` shows when no limit is given.
pub const DEFAULT_LIST_LIMIT: u32 = 20;

/// Number of conversations `/search` shows.
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// A stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Store-assigned identifier.
    pub id: i64,
    /// Title shown in history listings.
    pub title: String,
    /// Model the conversation was started with.
    pub model: String,
    /// Persona the conversation was started with.
    pub persona_id: String,
    /// When the conversation was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
    /// When a message was last added, or the title last changed.
    #[serde(with = "crate::utils::time")]
    pub updated_at: OffsetDateTime,
}

/// A conversation together with its message aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Number of stored messages of any role.
    pub message_count: i64,
    /// Sum of message costs, rounded to six decimal places.
    pub total_cost: f64,
}

/// A stored message.
///
/// The role is kept as the raw stored string; rows written by other tools may
/// carry roles confab does not understand.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: String,
    pub content: String,
    pub timestamp: OffsetDateTime,
    pub tokens_used: i64,
    pub cost: f64,
}

impl Message {
    /// The role of this message, if it is one of system, user or assistant.
    pub fn known_role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

/// Aggregates across the whole store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_cost: f64,
    pub distinct_models: i64,
    pub distinct_personas: i64,
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    id: i64,
    title: String,
    model: String,
    persona_id: String,
    created_at: i64,
    updated_at: i64,
    message_count: i64,
    total_cost: f64,
}

impl From<SummaryRow> for ConversationSummary {
    fn from(row: SummaryRow) -> Self {
        ConversationSummary {
            conversation: Conversation {
                id: row.id,
                title: row.title,
                model: row.model,
                persona_id: row.persona_id,
                created_at: from_unix_micros(row.created_at),
                updated_at: from_unix_micros(row.updated_at),
            },
            message_count: row.message_count,
            total_cost: row.total_cost,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    role: String,
    content: String,
    timestamp: i64,
    tokens_used: i64,
    cost: f64,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role: row.role,
            content: row.content,
            timestamp: from_unix_micros(row.timestamp),
            tokens_used: row.tokens_used,
            cost: row.cost,
        }
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total_conversations: i64,
    total_messages: i64,
    total_cost: f64,
    distinct_models: i64,
    distinct_personas: i64,
}

const SUMMARY_SELECT: &str = "SELECT c.id, c.title, c.model, c.persona_id, c.created_at, c.updated_at, \
     COUNT(m.id) AS message_count, \
     ROUND(COALESCE(SUM(m.cost), 0.0), 6) AS total_cost \
     FROM conversation c \
     LEFT JOIN message m ON m.conversation_id = c.id";

const SUMMARY_ORDER: &str = "GROUP BY c.id ORDER BY c.updated_at DESC, c.id DESC LIMIT ?";

/// Thin wrapper around a single-connection SQLite pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the store at `db_path` and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                Error::io(
                    format!("failed to create store directory {}", parent.display()),
                    err,
                )
            })?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let store = Self::connect(options).await?;
        tracing::debug!(path = %db_path.display(), "opened conversation store");
        Ok(store)
    }

    /// Opens a private in-memory store.  Used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Inserts a new conversation stamped with the current time.
    pub async fn create_conversation(
        &self,
        title: &str,
        model: &str,
        persona_id: &str,
    ) -> Result<i64> {
        record(async {
            let mut tx = self.pool.begin().await?;
            let id = insert_conversation(&mut tx, title, model, persona_id).await?;
            tx.commit().await?;
            tracing::info!(conversation_id = id, title, model, persona_id, "created conversation");
            Ok::<_, Error>(id)
        })
        .await
    }

    /// Inserts a new conversation together with its opening system message.
    ///
    /// Both rows are written in one transaction, so a failure leaves nothing
    /// behind.
    pub async fn start_conversation(
        &self,
        title: &str,
        model: &str,
        persona_id: &str,
        system_prompt: &str,
    ) -> Result<i64> {
        record(async {
            let mut tx = self.pool.begin().await?;
            let id = insert_conversation(&mut tx, title, model, persona_id).await?;
            insert_message(&mut tx, id, Role::System, system_prompt, 0, 0.0).await?;
            tx.commit().await?;
            tracing::info!(conversation_id = id, title, model, persona_id, "started conversation");
            Ok::<_, Error>(id)
        })
        .await
    }

    /// Appends a message and bumps the conversation's `updated_at`.
    ///
    /// Fails with `NotFound` when the conversation does not exist.
    pub async fn add_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        tokens_used: u32,
        cost: f64,
    ) -> Result<i64> {
        if cost.is_nan() || cost < 0.0 {
            return Err(Error::validation(
                format!("message cost must be non-negative, got {cost}"),
                Some("cost".to_string()),
            ));
        }
        record(async {
            let mut tx = self.pool.begin().await?;
            let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM conversation WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(Error::conversation_not_found(conversation_id));
            }
            let id = insert_message(&mut tx, conversation_id, role, content, tokens_used, cost).await?;
            tx.commit().await?;
            tracing::debug!(conversation_id, message_id = id, role = %role, "stored message");
            Ok::<_, Error>(id)
        })
        .await
    }

    /// Messages of a conversation in the order they were written.
    ///
    /// Unknown conversations yield an empty list.
    pub async fn get_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, timestamp, tokens_used, cost \
             FROM message WHERE conversation_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    /// The most recently updated conversations, newest first.
    pub async fn list_conversations(&self, limit: u32) -> Result<Vec<ConversationSummary>> {
        let sql = format!("{SUMMARY_SELECT} {SUMMARY_ORDER}");
        let rows: Vec<SummaryRow> = sqlx::query_as(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ConversationSummary::from).collect())
    }

    /// Conversations whose title or any message contains `query`.
    ///
    /// Matching is a case-sensitive substring test.
    pub async fn search_conversations(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>> {
        let sql = format!(
            "{SUMMARY_SELECT} \
             WHERE instr(c.title, ?) > 0 \
             OR EXISTS (SELECT 1 FROM message s WHERE s.conversation_id = c.id AND instr(s.content, ?) > 0) \
             {SUMMARY_ORDER}"
        );
        let rows: Vec<SummaryRow> = sqlx::query_as(&sql)
            .bind(query)
            .bind(query)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ConversationSummary::from).collect())
    }

    /// Deletes a conversation and all of its messages.
    ///
    /// Returns whether the conversation existed.
    pub async fn delete_conversation(&self, conversation_id: i64) -> Result<bool> {
        record(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM message WHERE conversation_id = ?")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM conversation WHERE id = ?")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            let existed = result.rows_affected() > 0;
            if existed {
                tracing::info!(conversation_id, "deleted conversation");
            }
            Ok::<_, Error>(existed)
        })
        .await
    }

    /// One conversation with its aggregates, if it exists.
    pub async fn get_conversation_info(
        &self,
        conversation_id: i64,
    ) -> Result<Option<ConversationSummary>> {
        let sql = format!("{SUMMARY_SELECT} WHERE c.id = ? GROUP BY c.id");
        let row: Option<SummaryRow> = sqlx::query_as(&sql)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ConversationSummary::from))
    }

    /// Renames a conversation.  Returns whether the conversation existed.
    pub async fn update_conversation_title(&self, conversation_id: i64, title: &str) -> Result<bool> {
        record(async {
            let mut tx = self.pool.begin().await?;
            let now = next_timestamp(&mut tx).await?;
            let result = sqlx::query("UPDATE conversation SET title = ?, updated_at = ? WHERE id = ?")
                .bind(title)
                .bind(now)
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok::<_, Error>(result.rows_affected() > 0)
        })
        .await
    }

    /// Totals across the whole store, read in a single statement.
    pub async fn get_stats(&self) -> Result<StoreStats> {
        let row: StatsRow = sqlx::query_as(
            "SELECT \
             (SELECT COUNT(*) FROM conversation) AS total_conversations, \
             (SELECT COUNT(*) FROM message) AS total_messages, \
             (SELECT ROUND(COALESCE(SUM(cost), 0.0), 6) FROM message) AS total_cost, \
             (SELECT COUNT(DISTINCT model) FROM conversation) AS distinct_models, \
             (SELECT COUNT(DISTINCT persona_id) FROM conversation) AS distinct_personas",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreStats {
            total_conversations: row.total_conversations,
            total_messages: row.total_messages,
            total_cost: row.total_cost,
            distinct_models: row.distinct_models,
            distinct_personas: row.distinct_personas,
        })
    }

    /// Keeps only the newest system message of every conversation.
    ///
    /// Returns the number of rows deleted.
    pub async fn clean_duplicate_system_messages(&self) -> Result<u64> {
        record(async {
            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                "DELETE FROM message \
                 WHERE role = 'system' \
                 AND id NOT IN ( \
                     SELECT id FROM ( \
                         SELECT id, ROW_NUMBER() OVER ( \
                             PARTITION BY conversation_id ORDER BY timestamp DESC, id DESC \
                         ) AS position \
                         FROM message WHERE role = 'system' \
                     ) WHERE position = 1 \
                 )",
            )
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            let removed = result.rows_affected();
            STORE_SYSTEM_MESSAGES_CLEANED.count(removed);
            tracing::info!(removed, "cleaned duplicate system messages");
            Ok::<_, Error>(removed)
        })
        .await
    }
}

/// The next timestamp to write: now, or just after the newest write.
async fn next_timestamp(tx: &mut Transaction<'_, Sqlite>) -> Result<i64> {
    let (latest,): (Option<i64>,) = sqlx::query_as("SELECT MAX(updated_at) FROM conversation")
        .fetch_one(&mut **tx)
        .await?;
    let now = unix_micros_now();
    Ok(match latest {
        Some(latest) if latest >= now => latest + 1,
        _ => now,
    })
}

async fn insert_conversation(
    tx: &mut Transaction<'_, Sqlite>,
    title: &str,
    model: &str,
    persona_id: &str,
) -> Result<i64> {
    let now = next_timestamp(tx).await?;
    let result = sqlx::query(
        "INSERT INTO conversation (title, model, persona_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(title)
    .bind(model)
    .bind(persona_id)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_message(
    tx: &mut Transaction<'_, Sqlite>,
    conversation_id: i64,
    role: Role,
    content: &str,
    tokens_used: u32,
    cost: f64,
) -> Result<i64> {
    let now = next_timestamp(tx).await?;
    let result = sqlx::query(
        "INSERT INTO message (conversation_id, role, content, timestamp, tokens_used, cost) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(conversation_id)
    .bind(role.as_str())
    .bind(content)
    .bind(now)
    .bind(i64::from(tokens_used))
    .bind(cost)
    .execute(&mut **tx)
    .await?;
    sqlx::query("UPDATE conversation SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(conversation_id)
        .execute(&mut **tx)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Counts a write.  Only database failures count as store errors; `NotFound`
/// and validation results pass through untouched.
async fn record<T>(write: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    let result = write.await;
    match &result {
        Ok(_) => STORE_WRITES.click(),
        Err(err) if err.is_store() => {
            STORE_ERRORS.click();
            tracing::warn!(error = %err, "store write failed");
        }
        Err(_) => {}
    }
    result
}
