use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chat::ChatId;
use crate::domain::restriction::{RestrictionId, RestrictionKind};
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Ban,
    Mute,
    Warn,
    Unban,
    Unmute,
}

impl ModerationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Mute => "mute",
            Self::Warn => "warn",
            Self::Unban => "unban",
            Self::Unmute => "unmute",
        }
    }

    /// Restriction kind the action creates or lifts.
    pub fn restriction_kind(self) -> RestrictionKind {
        match self {
            Self::Ban | Self::Unban => RestrictionKind::Ban,
            Self::Mute | Self::Unmute => RestrictionKind::Mute,
            Self::Warn => RestrictionKind::Warning,
        }
    }

    pub fn is_lift(self) -> bool {
        matches!(self, Self::Unban | Self::Unmute)
    }
}

impl FromStr for ModerationAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ban" => Ok(Self::Ban),
            "mute" => Ok(Self::Mute),
            "warn" | "warning" => Ok(Self::Warn),
            "unban" => Ok(Self::Unban),
            "unmute" => Ok(Self::Unmute),
            other => Err(DomainError::InvalidRestriction(format!(
                "unsupported moderation action `{other}`"
            ))),
        }
    }
}

/// Append-only audit row written for every moderation action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationLogEntry {
    pub chat_id: Option<ChatId>,
    pub target_user_id: UserId,
    pub moderator_id: UserId,
    pub action: ModerationAction,
    pub reason: String,
    pub restriction_id: Option<RestrictionId>,
    pub created_at: DateTime<Utc>,
}
