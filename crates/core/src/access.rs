use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::BotConfig;
use crate::domain::chat::ChatId;
use crate::domain::user::{UserId, UserRole};
use crate::errors::ApplicationError;

/// Per-chat feature module switches. Modules default to enabled.
#[async_trait]
pub trait ModuleToggles: Send + Sync {
    async fn is_module_enabled(&self, chat_id: ChatId, module: &str)
        -> Result<bool, ApplicationError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllModulesEnabled;

#[async_trait]
impl ModuleToggles for AllModulesEnabled {
    async fn is_module_enabled(
        &self,
        _chat_id: ChatId,
        _module: &str,
    ) -> Result<bool, ApplicationError> {
        Ok(true)
    }
}

/// Decides whether a user may interact with the bot in a chat.
///
/// Rules, in order:
/// 1. admins are always allowed;
/// 2. an empty allow-list admits every chat (operators must opt in to restricting);
/// 3. chats missing from a non-empty allow-list are denied;
/// 4. a named module switched off for the chat is denied.
///
/// Toggle lookups that fail resolve to "allow" and are logged at warn level.
pub struct AccessGate {
    admins: HashSet<UserId>,
    allowed_chats: HashSet<ChatId>,
    toggles: Arc<dyn ModuleToggles>,
}

impl AccessGate {
    pub fn new(
        admins: impl IntoIterator<Item = UserId>,
        allowed_chats: impl IntoIterator<Item = ChatId>,
        toggles: Arc<dyn ModuleToggles>,
    ) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            allowed_chats: allowed_chats.into_iter().collect(),
            toggles,
        }
    }

    pub fn from_config(config: &BotConfig, toggles: Arc<dyn ModuleToggles>) -> Self {
        Self::new(config.admin_ids.iter().copied(), config.allowed_chat_ids.iter().copied(), toggles)
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn role_of(&self, user_id: UserId) -> UserRole {
        if self.is_admin(user_id) {
            UserRole::Admin
        } else {
            UserRole::Ordinary
        }
    }

    pub fn is_open(&self) -> bool {
        self.allowed_chats.is_empty()
    }

    pub async fn allow(&self, chat_id: ChatId, user_id: UserId, module: Option<&str>) -> bool {
        if self.is_admin(user_id) {
            return true;
        }

        if !self.is_open() && !self.allowed_chats.contains(&chat_id) {
            debug!(
                event_name = "engine.access.chat_not_allowed",
                chat_id = chat_id.0,
                user_id = user_id.0,
                "chat is not in the allow-list"
            );
            return false;
        }

        let Some(module) = module else {
            return true;
        };

        match self.toggles.is_module_enabled(chat_id, module).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    event_name = "engine.access.module_disabled",
                    chat_id = chat_id.0,
                    user_id = user_id.0,
                    module,
                    "module is disabled for chat"
                );
                false
            }
            Err(error) => {
                warn!(
                    event_name = "engine.access.lookup_failed",
                    chat_id = chat_id.0,
                    user_id = user_id.0,
                    module,
                    error = %error,
                    "module toggle lookup failed; allowing"
                );
                true
            }
        }
    }
}
