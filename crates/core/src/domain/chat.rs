use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
        }
    }
}

impl FromStr for ChatKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "private" => Ok(Self::Private),
            // platforms distinguish groups, supergroups and channels; the engine does not
            "group" | "supergroup" | "channel" => Ok(Self::Group),
            other => Err(DomainError::InvariantViolation(format!("unknown chat kind `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
}

impl Chat {
    pub fn first_observed(
        id: ChatId,
        kind: ChatKind,
        title: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self { id, kind, title, first_seen: at, last_activity: at, message_count: 1 }
    }

    pub fn observe(&mut self, title: Option<&str>, at: DateTime<Utc>) {
        if let Some(title) = title {
            self.title = Some(title.to_string());
        }
        self.last_activity = self.last_activity.max(at);
        self.message_count = self.message_count.saturating_add(1);
    }
}
