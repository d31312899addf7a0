use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use parley_core::domain::chat::ChatId;
use parley_core::domain::trigger::{MatchKind, NewTrigger, Trigger, TriggerId, TriggerResponse};
use parley_core::domain::user::UserId;

use super::{
    column, count_from_db, parse_optional_timestamp, parse_timestamp, RepositoryError,
    TriggerRepository,
};
use crate::DbPool;

const TRIGGER_COLUMNS: &str = "id, owner_id, chat_id, name, match_kind, pattern, response_json,
     is_active, is_global, usage_count, success_count, last_used, created_at";

pub struct SqlTriggerRepository {
    pool: DbPool,
}

impl SqlTriggerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_trigger(row: &SqliteRow) -> Result<Trigger, RepositoryError> {
    let match_kind: String = column(row, "match_kind")?;
    let response_json: String = column(row, "response_json")?;
    let created_at: String = column(row, "created_at")?;

    Ok(Trigger {
        id: TriggerId(column(row, "id")?),
        owner_id: UserId(column(row, "owner_id")?),
        chat_id: column::<Option<i64>>(row, "chat_id")?.map(ChatId),
        name: column(row, "name")?,
        match_kind: match_kind
            .parse::<MatchKind>()
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        pattern: column(row, "pattern")?,
        response: serde_json::from_str::<TriggerResponse>(&response_json)
            .map_err(|e| RepositoryError::Decode(format!("response_json: {e}")))?,
        is_active: column(row, "is_active")?,
        is_global: column(row, "is_global")?,
        usage_count: count_from_db(column(row, "usage_count")?),
        success_count: count_from_db(column(row, "success_count")?),
        last_used: parse_optional_timestamp(column(row, "last_used")?)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl TriggerRepository for SqlTriggerRepository {
    async fn list_active(&self) -> Result<Vec<Trigger>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE is_active = 1 ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_trigger).collect()
    }

    async fn find_by_id(&self, id: TriggerId) -> Result<Option<Trigger>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_trigger).transpose()
    }

    async fn upsert(
        &self,
        trigger: NewTrigger,
        at: DateTime<Utc>,
    ) -> Result<Trigger, RepositoryError> {
        let response_json = serde_json::to_string(&trigger.response)
            .map_err(|e| RepositoryError::Decode(format!("response_json: {e}")))?;
        let chat_id = trigger.chat_id.map(|chat| chat.0);
        let at = at.to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM triggers WHERE owner_id = ? AND chat_id IS ? AND name = ?",
        )
        .bind(trigger.owner_id.0)
        .bind(chat_id)
        .bind(&trigger.name)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE triggers
                     SET match_kind = ?, pattern = ?, response_json = ?, is_global = ?,
                         is_active = 1, updated_at = ?
                     WHERE id = ?",
                )
                .bind(trigger.match_kind.as_str())
                .bind(&trigger.pattern)
                .bind(&response_json)
                .bind(trigger.is_global)
                .bind(&at)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => sqlx::query(
                "INSERT INTO triggers (owner_id, chat_id, name, match_kind, pattern, response_json,
                                       is_active, is_global, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
            )
            .bind(trigger.owner_id.0)
            .bind(chat_id)
            .bind(&trigger.name)
            .bind(trigger.match_kind.as_str())
            .bind(&trigger.pattern)
            .bind(&response_json)
            .bind(trigger.is_global)
            .bind(&at)
            .bind(&at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid(),
        };
        tx.commit().await?;

        self.find_by_id(TriggerId(id))
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("trigger {id} missing after upsert")))
    }

    async fn set_active(&self, id: TriggerId, is_active: bool) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE triggers SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now().to_rfc3339())
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_use(
        &self,
        id: TriggerId,
        was_successful: bool,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE triggers
             SET usage_count = usage_count + 1,
                 success_count = success_count + ?,
                 last_used = ?
             WHERE id = ?",
        )
        .bind(i64::from(was_successful))
        .bind(at.to_rfc3339())
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
