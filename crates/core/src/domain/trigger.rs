use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::chat::ChatId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(pub i64);

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Contains,
    Regex,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Regex => "regex",
        }
    }
}

impl FromStr for MatchKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            other => Err(DomainError::InvalidTrigger {
                name: String::new(),
                reason: format!("unsupported match kind `{other}` (expected exact|contains|regex)"),
            }),
        }
    }
}

/// Response payload. Opaque to the engine beyond being handed to the sender.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerResponse {
    Text { text: String },
    Sticker { file_id: String },
    Content { content: serde_json::Value },
}

impl TriggerResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub owner_id: UserId,
    /// Owning chat; `None` for triggers created outside any chat.
    pub chat_id: Option<ChatId>,
    pub name: String,
    pub match_kind: MatchKind,
    pub pattern: String,
    pub response: TriggerResponse,
    pub is_active: bool,
    pub is_global: bool,
    pub usage_count: u64,
    pub success_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Trigger {
    /// Global triggers apply everywhere and ignore their owning chat.
    pub fn applies_to(&self, chat_id: ChatId) -> bool {
        self.is_active && (self.is_global || self.chat_id == Some(chat_id))
    }

    pub fn rank(&self) -> MatchRank {
        MatchRank {
            is_global: self.is_global,
            usage_count: self.usage_count,
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Write-side payload; the store assigns the id and counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTrigger {
    pub owner_id: UserId,
    pub chat_id: Option<ChatId>,
    pub name: String,
    pub match_kind: MatchKind,
    pub pattern: String,
    pub response: TriggerResponse,
    pub is_global: bool,
}

impl NewTrigger {
    /// Rejects definitions that could never be served. Invalid regexes are
    /// refused here; rows that slip through anyway simply never match.
    pub fn validate(&self) -> Result<(), DomainError> {
        let invalid = |reason: &str| DomainError::InvalidTrigger {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.pattern.trim().is_empty() {
            return Err(invalid("pattern must not be empty"));
        }
        if self.match_kind == MatchKind::Regex {
            Regex::new(&self.pattern).map_err(|error| invalid(&error.to_string()))?;
        }
        if let TriggerResponse::Text { text } = &self.response {
            if text.trim().is_empty() {
                return Err(invalid("text response must not be empty"));
            }
        }

        Ok(())
    }
}

/// Pattern compiled once per trigger load.
#[derive(Clone, Debug)]
pub enum TriggerMatcher {
    Exact(String),
    Contains(String),
    Regex(Regex),
    /// Pattern failed to compile; never matches.
    Never,
}

impl TriggerMatcher {
    pub fn compile(kind: MatchKind, pattern: &str) -> Self {
        match kind {
            MatchKind::Exact => Self::Exact(pattern.trim().to_lowercase()),
            MatchKind::Contains => Self::Contains(pattern.to_lowercase()),
            MatchKind::Regex => match Regex::new(pattern) {
                Ok(regex) => Self::Regex(regex),
                Err(error) => {
                    warn!(
                        event_name = "engine.triggers.invalid_pattern",
                        pattern,
                        error = %error,
                        "regex trigger pattern does not compile; trigger will never match"
                    );
                    Self::Never
                }
            },
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Exact(expected) => text.trim().to_lowercase() == *expected,
            Self::Contains(needle) => text.to_lowercase().contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(text),
            Self::Never => false,
        }
    }
}

/// Total order used to resolve several matching triggers: global before
/// chat-scoped, then higher usage, then earliest created, then lowest id.
/// `Ordering::Less` means "preferred".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchRank {
    pub is_global: bool,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub id: TriggerId,
}

impl Ord for MatchRank {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .is_global
            .cmp(&self.is_global)
            .then_with(|| other.usage_count.cmp(&self.usage_count))
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for MatchRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
