use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::chat::ChatId;
use crate::domain::message::DecisionContext;
use crate::domain::moderation::ModerationAction;
use crate::domain::user::UserId;

/// One fire-and-forget analytics record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub occurred_at: DateTime<Utc>,
    pub detail: AnalyticsDetail,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyticsDetail {
    /// Every inbound message, recorded before any decision is made.
    Message { context: DecisionContext },
    /// Recorded when the pipeline resolved a message to a bot response.
    Outcome { message_id: i64, outcome: String },
    Command { name: String },
    Moderation { action: ModerationAction, target_user_id: UserId },
}

impl AnalyticsEvent {
    pub fn message(ctx: &DecisionContext) -> Self {
        Self {
            user_id: ctx.sender.id,
            chat_id: ctx.chat_id,
            occurred_at: ctx.received_at,
            detail: AnalyticsDetail::Message { context: ctx.clone() },
        }
    }

    pub fn outcome(ctx: &DecisionContext, outcome: &str) -> Self {
        Self {
            user_id: ctx.sender.id,
            chat_id: ctx.chat_id,
            occurred_at: Utc::now(),
            detail: AnalyticsDetail::Outcome {
                message_id: ctx.message_id,
                outcome: outcome.to_string(),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.detail {
            AnalyticsDetail::Message { .. } => "message",
            AnalyticsDetail::Outcome { .. } => "outcome",
            AnalyticsDetail::Command { .. } => "command",
            AnalyticsDetail::Moderation { .. } => "moderation",
        }
    }

    /// Payload stored next to the kind for non-message events.
    pub fn payload(&self) -> Value {
        match &self.detail {
            AnalyticsDetail::Message { context } => json!({
                "message_id": context.message_id,
                "length": context.text.chars().count(),
                "is_reply": context.reply_to.is_some(),
            }),
            AnalyticsDetail::Outcome { message_id, outcome } => {
                json!({ "message_id": message_id, "outcome": outcome })
            }
            AnalyticsDetail::Command { name } => json!({ "command": name }),
            AnalyticsDetail::Moderation { action, target_user_id } => {
                json!({ "action": action.as_str(), "target_user_id": target_user_id.0 })
            }
        }
    }
}
