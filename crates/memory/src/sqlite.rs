//! SQLite conversation store.
//!
//! Uses a single SQLite database file with three tables:
//! - `conversations`: one serialized `AgentState` per conversation
//! - `active_conversations`: the current conversation per user
//! - `interactions`: append-only turn log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concierge_core::error::StorageError;
use concierge_core::storage::{self, InteractionRecord, StorageManager};
use concierge_core::{AgentState, ConversationId, Termination};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStateStore {
    pool: SqlitePool,
}

fn backend_err(context: &str) -> impl FnOnce(sqlx::Error) -> StorageError + '_ {
    move |e| StorageError::Backend(format!("{context}: {e}"))
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteStateStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database; it is
    /// limited to one connection so every query sees the same database.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let in_memory = path.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StorageError::Backend(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(backend_err("Failed to open SQLite"))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let statements = [
            (
                "conversations table",
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id          TEXT PRIMARY KEY NOT NULL,
                    user_id     TEXT NOT NULL,
                    state       TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "active_conversations table",
                r#"
                CREATE TABLE IF NOT EXISTS active_conversations (
                    user_id          TEXT PRIMARY KEY NOT NULL,
                    conversation_id  TEXT NOT NULL,
                    updated_at       TEXT NOT NULL
                )
                "#,
            ),
            (
                "interactions table",
                r#"
                CREATE TABLE IF NOT EXISTS interactions (
                    iid              INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id  TEXT NOT NULL,
                    user_id          TEXT NOT NULL,
                    user_input       TEXT NOT NULL,
                    response         TEXT NOT NULL,
                    tool_calls       TEXT NOT NULL DEFAULT '[]',
                    termination      TEXT NOT NULL,
                    steps            INTEGER NOT NULL,
                    latency_ms       INTEGER NOT NULL,
                    created_at       TEXT NOT NULL
                )
                "#,
            ),
            (
                "interactions index",
                "CREATE INDEX IF NOT EXISTS idx_interactions_user ON interactions(user_id, iid DESC)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_interaction(row: &sqlx::sqlite::SqliteRow) -> Result<InteractionRecord, StorageError> {
        let get = |col: &str| -> Result<String, StorageError> {
            row.try_get::<String, _>(col)
                .map_err(|e| StorageError::Backend(format!("{col} column: {e}")))
        };
        let tool_calls = serde_json::from_str(&get("tool_calls")?).unwrap_or_default();
        let termination: Termination = serde_json::from_value(serde_json::Value::String(get("termination")?))
            .map_err(|e| StorageError::Serialization(format!("termination column: {e}")))?;
        let steps: i64 = row
            .try_get("steps")
            .map_err(|e| StorageError::Backend(format!("steps column: {e}")))?;
        let latency_ms: i64 = row
            .try_get("latency_ms")
            .map_err(|e| StorageError::Backend(format!("latency_ms column: {e}")))?;

        Ok(InteractionRecord {
            conversation_id: ConversationId(get("conversation_id")?),
            user_id: get("user_id")?,
            user_input: get("user_input")?,
            response: get("response")?,
            tool_calls,
            termination,
            steps: u32::try_from(steps).unwrap_or(0),
            latency_ms: u64::try_from(latency_ms).unwrap_or(0),
            timestamp: parse_time(&get("created_at")?),
        })
    }
}

#[async_trait]
impl StorageManager for SqliteStateStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_state(
        &self,
        conversation_id: &ConversationId,
        state: &AgentState,
        user_id: &str,
    ) -> Result<(), StorageError> {
        let raw = storage::encode_state(state)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(backend_err("BEGIN failed"))?;
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, state, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(user_id)
        .bind(&raw)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(backend_err("Saving state failed"))?;

        sqlx::query(
            r#"
            INSERT INTO active_conversations (user_id, conversation_id, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                conversation_id = excluded.conversation_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(conversation_id.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(backend_err("Updating active conversation failed"))?;

        tx.commit().await.map_err(backend_err("COMMIT failed"))?;
        debug!(conversation_id = %conversation_id, user_id, bytes = raw.len(), "State saved");
        Ok(())
    }

    async fn load_state(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<AgentState>, StorageError> {
        let row = sqlx::query("SELECT state FROM conversations WHERE id = ?1")
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err("Loading state failed"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row
            .try_get("state")
            .map_err(|e| StorageError::Backend(format!("state column: {e}")))?;
        storage::decode_state(conversation_id, &raw).map(Some)
    }

    async fn get_conversation_timestamp(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let row = sqlx::query("SELECT updated_at FROM conversations WHERE id = ?1")
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err("Timestamp lookup failed"))?;

        row.map(|r| {
            r.try_get::<String, _>("updated_at")
                .map(|raw| parse_time(&raw))
                .map_err(|e| StorageError::Backend(format!("updated_at column: {e}")))
        })
        .transpose()
    }

    async fn get_active_conversation(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationId>, StorageError> {
        let row = sqlx::query("SELECT conversation_id FROM active_conversations WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err("Active conversation lookup failed"))?;

        row.map(|r| {
            r.try_get::<String, _>("conversation_id")
                .map(ConversationId)
                .map_err(|e| StorageError::Backend(format!("conversation_id column: {e}")))
        })
        .transpose()
    }

    async fn log_agent_interaction(&self, record: &InteractionRecord) -> Result<(), StorageError> {
        let tool_calls = serde_json::to_string(&record.tool_calls)
            .map_err(|e| StorageError::Serialization(format!("tool calls: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO interactions
                (conversation_id, user_id, user_input, response, tool_calls, termination, steps, latency_ms, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(record.conversation_id.as_str())
        .bind(&record.user_id)
        .bind(&record.user_input)
        .bind(&record.response)
        .bind(&tool_calls)
        .bind(record.termination.as_str())
        .bind(i64::from(record.steps))
        .bind(i64::try_from(record.latency_ms).unwrap_or(i64::MAX))
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend_err("Logging interaction failed"))?;
        Ok(())
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM interactions WHERE user_id = ?1 ORDER BY iid DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err("Interaction query failed"))?;

        rows.iter().map(Self::row_to_interaction).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::StateConfig;

    async fn test_store() -> SqliteStateStore {
        SqliteStateStore::new("sqlite::memory:").await.unwrap()
    }

    fn state(id: &ConversationId, input: &str) -> AgentState {
        let mut state = AgentState::new(id.clone(), "u1", StateConfig::default());
        state.reset_for_turn(input);
        state.append_user_input(input);
        state.append_assistant("done");
        state
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = test_store().await;
        let id = ConversationId::from("c1");
        store.save_state(&id, &state(&id, "hello"), "u1").await.unwrap();

        let loaded = store.load_state(&id).await.unwrap().unwrap();
        assert_eq!(loaded.conversation_history.len(), 2);
        assert_eq!(loaded.user_input, "hello");
    }

    #[tokio::test]
    async fn save_overwrites_and_tracks_active() {
        let store = test_store().await;
        let first = ConversationId::from("c1");
        let second = ConversationId::from("c2");
        store.save_state(&first, &state(&first, "one"), "u1").await.unwrap();
        store.save_state(&second, &state(&second, "two"), "u1").await.unwrap();
        store.save_state(&second, &state(&second, "three"), "u1").await.unwrap();

        assert_eq!(store.get_active_conversation("u1").await.unwrap(), Some(second.clone()));
        assert_eq!(store.load_state(&second).await.unwrap().unwrap().user_input, "three");
        // Superseded conversations are kept.
        assert!(store.load_state(&first).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn timestamps_and_missing_rows() {
        let store = test_store().await;
        let id = ConversationId::from("c1");
        assert!(store.get_conversation_timestamp(&id).await.unwrap().is_none());
        assert!(store.get_active_conversation("u1").await.unwrap().is_none());
        assert!(store.load_state(&id).await.unwrap().is_none());

        let before = Utc::now() - chrono::Duration::seconds(1);
        store.save_state(&id, &state(&id, "hi"), "u1").await.unwrap();
        let at = store.get_conversation_timestamp(&id).await.unwrap().unwrap();
        assert!(at >= before);
    }

    #[tokio::test]
    async fn corrupt_state_reported() {
        let store = test_store().await;
        sqlx::query("INSERT INTO conversations (id, user_id, state, updated_at) VALUES ('bad', 'u1', '{oops', '2026-01-01T00:00:00Z')")
            .execute(&store.pool)
            .await
            .unwrap();
        let err = store.load_state(&ConversationId::from("bad")).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn interaction_log_round_trip() {
        let store = test_store().await;
        for (i, termination) in [Termination::FinalAnswer, Termination::ForcedFinish].into_iter().enumerate() {
            store
                .log_agent_interaction(&InteractionRecord {
                    conversation_id: ConversationId::from("c1"),
                    user_id: "u1".into(),
                    user_input: format!("input {i}"),
                    response: "ok".into(),
                    tool_calls: vec![],
                    termination,
                    steps: 3,
                    latency_ms: 42,
                    timestamp: Utc::now(),
                })
                .await
                .unwrap();
        }

        let recent = store.recent_interactions("u1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].termination, Termination::ForcedFinish);
        assert_eq!(recent[0].user_input, "input 1");
        assert_eq!(recent[1].latency_ms, 42);
        assert!(store.recent_interactions("u2", 10).await.unwrap().is_empty());
    }
}
