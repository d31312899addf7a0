use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use parley_core::domain::chat::ChatId;
use parley_core::domain::restriction::{
    DeactivationReason, NewRestriction, Restriction, RestrictionId, RestrictionKind,
};
use parley_core::domain::user::UserId;

use super::{column, parse_optional_timestamp, parse_timestamp, RepositoryError, RestrictionRepository};
use crate::DbPool;

const RESTRICTION_COLUMNS: &str =
    "id, user_id, chat_id, issued_by, kind, reason, issued_at, expires_at, is_active";

pub struct SqlRestrictionRepository {
    pool: DbPool,
}

impl SqlRestrictionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_restriction(row: &SqliteRow) -> Result<Restriction, RepositoryError> {
    let kind: String = column(row, "kind")?;
    let issued_at: String = column(row, "issued_at")?;

    Ok(Restriction {
        id: RestrictionId(column(row, "id")?),
        user_id: UserId(column(row, "user_id")?),
        chat_id: column::<Option<i64>>(row, "chat_id")?.map(ChatId),
        issued_by: UserId(column(row, "issued_by")?),
        kind: kind.parse::<RestrictionKind>().map_err(|e| RepositoryError::Decode(e.to_string()))?,
        reason: column(row, "reason")?,
        issued_at: parse_timestamp(&issued_at)?,
        expires_at: parse_optional_timestamp(column(row, "expires_at")?)?,
        is_active: column(row, "is_active")?,
    })
}

#[async_trait::async_trait]
impl RestrictionRepository for SqlRestrictionRepository {
    async fn active_for(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        kind: RestrictionKind,
    ) -> Result<Vec<Restriction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESTRICTION_COLUMNS} FROM restrictions
             WHERE user_id = ? AND kind = ? AND is_active = 1
               AND (chat_id = ? OR chat_id IS NULL)
             ORDER BY issued_at DESC, id DESC"
        ))
        .bind(user_id.0)
        .bind(kind.as_str())
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_restriction).collect()
    }

    async fn active_in_scope(
        &self,
        user_id: UserId,
        chat_id: Option<ChatId>,
        kind: RestrictionKind,
    ) -> Result<Vec<Restriction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RESTRICTION_COLUMNS} FROM restrictions
             WHERE user_id = ? AND kind = ? AND is_active = 1 AND chat_id IS ?
             ORDER BY issued_at DESC, id DESC"
        ))
        .bind(user_id.0)
        .bind(kind.as_str())
        .bind(chat_id.map(|chat| chat.0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_restriction).collect()
    }

    async fn insert(&self, restriction: NewRestriction) -> Result<Restriction, RepositoryError> {
        let id = sqlx::query(
            "INSERT INTO restrictions (user_id, chat_id, issued_by, kind, reason, issued_at,
                                       expires_at, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(restriction.user_id.0)
        .bind(restriction.chat_id.map(|chat| chat.0))
        .bind(restriction.issued_by.0)
        .bind(restriction.kind.as_str())
        .bind(&restriction.reason)
        .bind(restriction.issued_at.to_rfc3339())
        .bind(restriction.expires_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Restriction {
            id: RestrictionId(id),
            user_id: restriction.user_id,
            chat_id: restriction.chat_id,
            issued_by: restriction.issued_by,
            kind: restriction.kind,
            reason: restriction.reason,
            issued_at: restriction.issued_at,
            expires_at: restriction.expires_at,
            is_active: true,
        })
    }

    async fn deactivate(
        &self,
        ids: &[RestrictionId],
        reason: DeactivationReason,
        at: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let at = at.to_rfc3339();
        let mut changed = 0;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            changed += sqlx::query(
                "UPDATE restrictions
                 SET is_active = 0, deactivated_at = ?, deactivation_reason = ?
                 WHERE id = ? AND is_active = 1",
            )
            .bind(&at)
            .bind(reason.as_str())
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        Ok(changed)
    }
}
