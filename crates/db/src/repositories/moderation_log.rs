use sqlx::sqlite::SqliteRow;

use parley_core::domain::chat::ChatId;
use parley_core::domain::moderation::{ModerationAction, ModerationLogEntry};
use parley_core::domain::restriction::RestrictionId;
use parley_core::domain::user::UserId;

use super::{column, parse_timestamp, ModerationLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlModerationLogRepository {
    pool: DbPool,
}

impl SqlModerationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<ModerationLogEntry, RepositoryError> {
    let action: String = column(row, "action")?;
    let created_at: String = column(row, "created_at")?;

    Ok(ModerationLogEntry {
        chat_id: column::<Option<i64>>(row, "chat_id")?.map(ChatId),
        target_user_id: UserId(column(row, "target_user_id")?),
        moderator_id: UserId(column(row, "moderator_id")?),
        action: action.parse::<ModerationAction>().map_err(|e| RepositoryError::Decode(e.to_string()))?,
        reason: column(row, "reason")?,
        restriction_id: column::<Option<i64>>(row, "restriction_id")?.map(RestrictionId),
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl ModerationLogRepository for SqlModerationLogRepository {
    async fn append(&self, entry: &ModerationLogEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO moderation_log (chat_id, target_user_id, moderator_id, action, reason,
                                         restriction_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.chat_id.map(|chat| chat.0))
        .bind(entry.target_user_id.0)
        .bind(entry.moderator_id.0)
        .bind(entry.action.as_str())
        .bind(&entry.reason)
        .bind(entry.restriction_id.map(|id| id.0))
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<ModerationLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT chat_id, target_user_id, moderator_id, action, reason, restriction_id, created_at
             FROM moderation_log
             WHERE target_user_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}
