use chrono::{DateTime, Utc};

use parley_core::domain::chat::ChatId;
use parley_core::domain::user::UserId;

use super::{AddressWordRepository, ModuleRepository, RepositoryError};
use crate::DbPool;

pub struct SqlModuleRepository {
    pool: DbPool,
}

impl SqlModuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ModuleRepository for SqlModuleRepository {
    async fn is_enabled(&self, chat_id: ChatId, module: &str) -> Result<bool, RepositoryError> {
        let stored: Option<bool> = sqlx::query_scalar(
            "SELECT is_enabled FROM chat_modules WHERE chat_id = ? AND module = ?",
        )
        .bind(chat_id.0)
        .bind(module)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stored.unwrap_or(true))
    }

    async fn set_enabled(
        &self,
        chat_id: ChatId,
        module: &str,
        is_enabled: bool,
        updated_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_modules (chat_id, module, is_enabled, updated_by, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(chat_id, module) DO UPDATE SET
                 is_enabled = excluded.is_enabled,
                 updated_by = excluded.updated_by,
                 updated_at = excluded.updated_at",
        )
        .bind(chat_id.0)
        .bind(module)
        .bind(is_enabled)
        .bind(updated_by.0)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct SqlAddressWordRepository {
    pool: DbPool,
}

impl SqlAddressWordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AddressWordRepository for SqlAddressWordRepository {
    async fn list(&self) -> Result<Vec<String>, RepositoryError> {
        let words: Vec<String> =
            sqlx::query_scalar("SELECT word FROM custom_address_words ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(words)
    }

    async fn add(
        &self,
        word: &str,
        added_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO custom_address_words (word, added_by, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(word) DO NOTHING",
        )
        .bind(word.trim().to_lowercase())
        .bind(added_by.0)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, word: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM custom_address_words WHERE word = ?")
            .bind(word.trim().to_lowercase())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use parley_core::domain::chat::ChatId;
    use parley_core::domain::user::UserId;

    use super::{SqlAddressWordRepository, SqlModuleRepository};
    use crate::repositories::{AddressWordRepository, ModuleRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn modules_default_to_enabled_and_toggle_per_chat() {
        let repo = SqlModuleRepository::new(setup_pool().await);
        assert!(repo.is_enabled(ChatId(100), "triggers").await.expect("default"));

        repo.set_enabled(ChatId(100), "triggers", false, UserId(1), Utc::now())
            .await
            .expect("disable");

        assert!(!repo.is_enabled(ChatId(100), "triggers").await.expect("disabled"));
        assert!(repo.is_enabled(ChatId(200), "triggers").await.expect("other chat"));

        repo.set_enabled(ChatId(100), "triggers", true, UserId(1), Utc::now())
            .await
            .expect("enable");
        assert!(repo.is_enabled(ChatId(100), "triggers").await.expect("enabled again"));
    }

    #[tokio::test]
    async fn address_words_are_normalized_and_unique() {
        let repo = SqlAddressWordRepository::new(setup_pool().await);

        assert!(repo.add(" Buddy ", UserId(1), Utc::now()).await.expect("add"));
        assert!(!repo.add("buddy", UserId(2), Utc::now()).await.expect("duplicate"));
        assert_eq!(repo.list().await.expect("list"), vec!["buddy".to_string()]);

        assert!(repo.remove("BUDDY").await.expect("remove"));
        assert!(repo.list().await.expect("list").is_empty());
    }
}
