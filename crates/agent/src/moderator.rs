use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use parley_core::domain::analytics::{AnalyticsDetail, AnalyticsEvent};
use parley_core::domain::chat::ChatId;
use parley_core::domain::moderation::{ModerationAction, ModerationLogEntry};
use parley_core::domain::restriction::{NewRestriction, Restriction, RestrictionKind};
use parley_core::domain::user::UserId;
use parley_core::errors::{ApplicationError, DomainError};
use parley_db::repositories::ModerationLogRepository;

use crate::collaborators::{AnalyticsSink, ModerationEffector};
use crate::ledger::RestrictionLedger;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModerationRequest {
    /// `None` applies the action platform-wide.
    pub chat_id: Option<ChatId>,
    pub target: UserId,
    pub moderator: UserId,
    pub reason: String,
    /// `None` is permanent. Ignored by lift actions.
    pub duration: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModerationReceipt {
    pub action: ModerationAction,
    pub restriction: Option<Restriction>,
    /// Rows lifted by unban/unmute.
    pub lifted: u64,
    /// Whether the platform-side effect was applied. Always `false` for
    /// warnings and platform-wide actions, which have no single chat to act in.
    pub enforced: bool,
    /// Active warnings after a `warn`.
    pub warning_count: Option<usize>,
}

/// Admin moderation commands: writes through the ledger first, then asks the
/// platform to enforce, then appends to the moderation log. Enforcement and
/// log failures are logged and reported in the receipt, never rolled back.
pub struct Moderator {
    ledger: Arc<RestrictionLedger>,
    log: Arc<dyn ModerationLogRepository>,
    effector: Arc<dyn ModerationEffector>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl Moderator {
    pub fn new(
        ledger: Arc<RestrictionLedger>,
        log: Arc<dyn ModerationLogRepository>,
        effector: Arc<dyn ModerationEffector>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self { ledger, log, effector, analytics }
    }

    pub async fn ban(&self, request: ModerationRequest) -> Result<ModerationReceipt, ApplicationError> {
        self.apply(ModerationAction::Ban, request).await
    }

    pub async fn mute(&self, request: ModerationRequest) -> Result<ModerationReceipt, ApplicationError> {
        self.apply(ModerationAction::Mute, request).await
    }

    pub async fn warn(&self, request: ModerationRequest) -> Result<ModerationReceipt, ApplicationError> {
        self.apply(ModerationAction::Warn, request).await
    }

    pub async fn unban(&self, request: ModerationRequest) -> Result<ModerationReceipt, ApplicationError> {
        self.apply(ModerationAction::Unban, request).await
    }

    pub async fn unmute(&self, request: ModerationRequest) -> Result<ModerationReceipt, ApplicationError> {
        self.apply(ModerationAction::Unmute, request).await
    }

    pub async fn warning_count(&self, user_id: UserId, chat_id: ChatId) -> Result<usize, ApplicationError> {
        self.ledger.active_count(user_id, chat_id, RestrictionKind::Warning, Utc::now()).await
    }

    pub async fn apply(
        &self,
        action: ModerationAction,
        request: ModerationRequest,
    ) -> Result<ModerationReceipt, ApplicationError> {
        let now = Utc::now();
        let kind = action.restriction_kind();
        let mut receipt = ModerationReceipt {
            action,
            restriction: None,
            lifted: 0,
            enforced: false,
            warning_count: None,
        };

        let expires_at = match request.duration {
            Some(duration) => Some(now.checked_add_signed(duration).ok_or_else(|| {
                DomainError::InvalidRestriction(format!("duration {duration} is out of range"))
            })?),
            None => None,
        };

        if action.is_lift() {
            receipt.lifted = self.ledger.deactivate(request.target, request.chat_id, kind, now).await?;
        } else {
            let restriction = self
                .ledger
                .add(NewRestriction {
                    user_id: request.target,
                    chat_id: request.chat_id,
                    issued_by: request.moderator,
                    kind,
                    reason: request.reason.clone(),
                    issued_at: now,
                    expires_at,
                })
                .await?;
            receipt.restriction = Some(restriction);
        }

        if let Some(chat_id) = request.chat_id {
            receipt.enforced = self.enforce(action, &request, chat_id, &receipt).await;
            if action == ModerationAction::Warn {
                receipt.warning_count = Some(self.warning_count(request.target, chat_id).await?);
            }
        }

        let entry = ModerationLogEntry {
            chat_id: request.chat_id,
            target_user_id: request.target,
            moderator_id: request.moderator,
            action,
            reason: request.reason.clone(),
            restriction_id: receipt.restriction.as_ref().map(|restriction| restriction.id),
            created_at: now,
        };
        if let Err(error) = self.log.append(&entry).await {
            warn!(
                event_name = "engine.moderation.log_failed",
                action = action.as_str(),
                target_user_id = request.target.0,
                error = %error,
                "moderation log append failed"
            );
        }

        self.analytics.record(AnalyticsEvent {
            user_id: request.moderator,
            chat_id: request.chat_id.unwrap_or(ChatId(0)),
            occurred_at: now,
            detail: AnalyticsDetail::Moderation { action, target_user_id: request.target },
        });

        info!(
            event_name = "engine.moderation.applied",
            action = action.as_str(),
            target_user_id = request.target.0,
            moderator_id = request.moderator.0,
            chat_id = request.chat_id.map(|chat| chat.0),
            enforced = receipt.enforced,
            "moderation action applied"
        );
        Ok(receipt)
    }

    async fn enforce(
        &self,
        action: ModerationAction,
        request: &ModerationRequest,
        chat_id: ChatId,
        receipt: &ModerationReceipt,
    ) -> bool {
        let result = match action {
            ModerationAction::Ban => self.effector.enforce_ban(request.target, chat_id).await,
            ModerationAction::Mute => {
                let until = receipt.restriction.as_ref().and_then(|r| r.expires_at);
                self.effector.enforce_mute(request.target, chat_id, until).await
            }
            ModerationAction::Unban | ModerationAction::Unmute if receipt.lifted > 0 => {
                self.effector.lift(request.target, chat_id).await
            }
            ModerationAction::Unban | ModerationAction::Unmute | ModerationAction::Warn => {
                return false;
            }
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    event_name = "engine.moderation.enforce_failed",
                    action = action.as_str(),
                    target_user_id = request.target.0,
                    chat_id = chat_id.0,
                    error_kind = error.kind(),
                    error = %error,
                    "platform enforcement failed; ledger state kept"
                );
                false
            }
        }
    }
}
