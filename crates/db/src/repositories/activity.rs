use sqlx::sqlite::SqliteRow;

use parley_core::domain::analytics::AnalyticsEvent;
use parley_core::domain::chat::{Chat, ChatId, ChatKind};
use parley_core::domain::message::DecisionContext;
use parley_core::domain::user::{User, UserId};

use super::{column, count_from_db, parse_timestamp, ActivityRepository, RepositoryError};
use crate::DbPool;

pub struct SqlActivityRepository {
    pool: DbPool,
}

impl SqlActivityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let first_seen: String = column(row, "first_seen")?;
    let last_seen: String = column(row, "last_seen")?;

    Ok(User {
        id: UserId(column(row, "id")?),
        display_name: column(row, "display_name")?,
        username: column(row, "username")?,
        first_seen: parse_timestamp(&first_seen)?,
        last_seen: parse_timestamp(&last_seen)?,
        message_count: count_from_db(column(row, "message_count")?),
    })
}

fn row_to_chat(row: &SqliteRow) -> Result<Chat, RepositoryError> {
    let kind: String = column(row, "kind")?;
    let first_seen: String = column(row, "first_seen")?;
    let last_activity: String = column(row, "last_activity")?;

    Ok(Chat {
        id: ChatId(column(row, "id")?),
        kind: kind.parse::<ChatKind>().map_err(|e| RepositoryError::Decode(e.to_string()))?,
        title: column(row, "title")?,
        first_seen: parse_timestamp(&first_seen)?,
        last_activity: parse_timestamp(&last_activity)?,
        message_count: count_from_db(column(row, "message_count")?),
    })
}

#[async_trait::async_trait]
impl ActivityRepository for SqlActivityRepository {
    async fn record_message(&self, ctx: &DecisionContext) -> Result<(), RepositoryError> {
        let received_at = ctx.received_at.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, display_name, username, first_seen, last_seen, message_count)
             VALUES (?, ?, ?, ?, ?, 1)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = CASE WHEN excluded.display_name = ''
                                     THEN users.display_name
                                     ELSE excluded.display_name END,
                 username = COALESCE(excluded.username, users.username),
                 last_seen = MAX(users.last_seen, excluded.last_seen),
                 message_count = users.message_count + 1",
        )
        .bind(ctx.sender.id.0)
        .bind(&ctx.sender.display_name)
        .bind(&ctx.sender.username)
        .bind(&received_at)
        .bind(&received_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chats (id, kind, title, first_seen, last_activity, message_count)
             VALUES (?, ?, ?, ?, ?, 1)
             ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 title = COALESCE(excluded.title, chats.title),
                 last_activity = MAX(chats.last_activity, excluded.last_activity),
                 message_count = chats.message_count + 1",
        )
        .bind(ctx.chat_id.0)
        .bind(ctx.chat_kind.as_str())
        .bind(&ctx.chat_title)
        .bind(&received_at)
        .bind(&received_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO messages (platform_message_id, chat_id, user_id, text, is_reply, received_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(ctx.message_id)
        .bind(ctx.chat_id.0)
        .bind(ctx.sender.id.0)
        .bind(&ctx.text)
        .bind(ctx.reply_to.is_some())
        .bind(&received_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_action(&self, event: &AnalyticsEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_actions (user_id, chat_id, kind, payload_json, occurred_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.user_id.0)
        .bind(event.chat_id.0)
        .bind(event.kind())
        .bind(event.payload().to_string())
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, display_name, username, first_seen, last_seen, message_count
             FROM users WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_chat(&self, id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, kind, title, first_seen, last_activity, message_count
             FROM chats WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_chat).transpose()
    }
}
