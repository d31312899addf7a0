use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned numeric user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derived from the static admin set at configuration time, never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Ordinary,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub username: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
}

impl User {
    pub fn first_observed(
        id: UserId,
        display_name: impl Into<String>,
        username: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            username,
            first_seen: at,
            last_seen: at,
            message_count: 1,
        }
    }

    /// Applies a newly observed message. Out-of-order deliveries never move
    /// `last_seen` backwards.
    pub fn observe(&mut self, display_name: &str, username: Option<&str>, at: DateTime<Utc>) {
        if !display_name.is_empty() {
            self.display_name = display_name.to_string();
        }
        if let Some(username) = username {
            self.username = Some(username.to_string());
        }
        self.last_seen = self.last_seen.max(at);
        self.message_count = self.message_count.saturating_add(1);
    }
}
