use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chat::ChatId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RestrictionId(pub i64);

impl fmt::Display for RestrictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionKind {
    Ban,
    Mute,
    Warning,
}

impl RestrictionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Mute => "mute",
            Self::Warning => "warning",
        }
    }

    /// Bans and mutes allow one active row per (user, chat); warnings stack.
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::Ban | Self::Mute)
    }
}

impl FromStr for RestrictionKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ban" => Ok(Self::Ban),
            "mute" => Ok(Self::Mute),
            "warning" | "warn" => Ok(Self::Warning),
            other => Err(DomainError::InvalidRestriction(format!(
                "unsupported restriction kind `{other}` (expected ban|mute|warning)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub id: RestrictionId,
    pub user_id: UserId,
    /// `None` means platform-wide.
    pub chat_id: Option<ChatId>,
    pub issued_by: UserId,
    pub kind: RestrictionKind,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
    /// `None` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Restriction {
    /// Subject and kind match, and the row is scoped to `chat_id` or platform-wide.
    pub fn applies_to(&self, user_id: UserId, chat_id: ChatId, kind: RestrictionKind) -> bool {
        self.user_id == user_id
            && self.kind == kind
            && self.chat_id.map_or(true, |scope| scope == chat_id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRestriction {
    pub user_id: UserId,
    pub chat_id: Option<ChatId>,
    pub issued_by: UserId,
    pub kind: RestrictionKind,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewRestriction {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= self.issued_at {
                return Err(DomainError::InvalidRestriction(format!(
                    "{} for user {} expires before it is issued",
                    self.kind.as_str(),
                    self.user_id
                )));
            }
        }
        Ok(())
    }
}

/// Why a restriction stopped being active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    /// `expires_at` passed; resolved lazily by a read.
    Expired,
    /// Lifted by an explicit unban/unmute.
    Lifted,
    /// Replaced by a newer ban/mute in the same scope.
    Superseded,
}

impl DeactivationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Lifted => "lifted",
            Self::Superseded => "superseded",
        }
    }
}

/// Result of evaluating candidate rows at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestrictionResolution {
    /// Most recently issued active row that has not expired.
    pub active: Option<Restriction>,
    /// Active rows whose expiry has passed; the caller deactivates them.
    pub expired: Vec<RestrictionId>,
    /// Number of additional unexpired active rows sharing the winner's scope.
    /// Non-zero only when the exclusivity invariant was violated upstream.
    pub conflicting: usize,
}

impl RestrictionResolution {
    pub fn resolve<'a>(
        candidates: impl IntoIterator<Item = &'a Restriction>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut resolution = Self::default();
        let mut live: Vec<&Restriction> = Vec::new();

        for restriction in candidates.into_iter().filter(|r| r.is_active) {
            if restriction.is_expired_at(now) {
                resolution.expired.push(restriction.id);
            } else {
                live.push(restriction);
            }
        }

        let winner = live.iter().copied().max_by(|a, b| {
            a.issued_at.cmp(&b.issued_at).then_with(|| a.id.cmp(&b.id))
        });
        if let Some(winner) = winner {
            resolution.conflicting = live
                .iter()
                .filter(|other| other.id != winner.id && other.chat_id == winner.chat_id)
                .count();
            resolution.active = Some(winner.clone());
        }

        resolution
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Restriction, RestrictionId, RestrictionKind, RestrictionResolution};
    use crate::domain::chat::ChatId;
    use crate::domain::user::UserId;

    fn mute(id: i64, chat: Option<i64>, issued_ago_mins: i64, expires_in_mins: Option<i64>) -> Restriction {
        let now = Utc::now();
        Restriction {
            id: RestrictionId(id),
            user_id: UserId(7),
            chat_id: chat.map(ChatId),
            issued_by: UserId(1),
            kind: RestrictionKind::Mute,
            reason: "spam".to_string(),
            issued_at: now - Duration::minutes(issued_ago_mins),
            expires_at: expires_in_mins.map(|mins| now + Duration::minutes(mins)),
            is_active: true,
        }
    }

    #[test]
    fn platform_wide_rows_apply_to_every_chat() {
        let global = mute(1, None, 5, None);
        assert!(global.applies_to(UserId(7), ChatId(100), RestrictionKind::Mute));
        assert!(global.applies_to(UserId(7), ChatId(-42), RestrictionKind::Mute));
        assert!(!global.applies_to(UserId(8), ChatId(100), RestrictionKind::Mute));
        assert!(!global.applies_to(UserId(7), ChatId(100), RestrictionKind::Ban));

        let scoped = mute(2, Some(100), 5, None);
        assert!(!scoped.applies_to(UserId(7), ChatId(200), RestrictionKind::Mute));
    }

    #[test]
    fn expired_rows_are_reported_for_deactivation() {
        let expired = mute(1, Some(100), 120, Some(-60));
        let resolution = RestrictionResolution::resolve([&expired], Utc::now());

        assert_eq!(resolution.active, None);
        assert_eq!(resolution.expired, vec![RestrictionId(1)]);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let row = mute(1, Some(100), 10, Some(0));
        let at_expiry = row.expires_at.expect("expiry");
        assert!(row.is_expired_at(at_expiry));
    }

    #[test]
    fn duplicate_active_rows_resolve_to_most_recent() {
        let older = mute(1, Some(100), 30, Some(60));
        let newer = mute(2, Some(100), 5, Some(60));
        let resolution = RestrictionResolution::resolve([&older, &newer], Utc::now());

        assert_eq!(resolution.active.map(|r| r.id), Some(RestrictionId(2)));
        assert_eq!(resolution.conflicting, 1);
    }

    #[test]
    fn inactive_rows_are_ignored() {
        let mut lifted = mute(1, Some(100), 30, None);
        lifted.is_active = false;
        let resolution = RestrictionResolution::resolve([&lifted], Utc::now());

        assert_eq!(resolution, RestrictionResolution::default());
    }
}
