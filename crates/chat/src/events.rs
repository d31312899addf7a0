use chrono::{DateTime, Utc};

use parley_core::domain::chat::{ChatId, ChatKind};
use parley_core::domain::message::{DecisionContext, ReplyRef, Sender};

/// One update delivered by the platform connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub update_id: String,
    pub event: InboundEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Message(IncomingMessage),
    Unsupported { event_type: String },
}

impl InboundEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::Message(_) => "message",
            Self::Unsupported { event_type } => event_type,
        }
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            Self::Message(message) => Some(message.chat_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub chat_title: Option<String>,
    pub from: Sender,
    /// Text or media caption. `None` for media sent without one.
    pub text: Option<String>,
    pub reply_to: Option<ReplyRef>,
    pub date: DateTime<Utc>,
}

impl IncomingMessage {
    /// Messages without text still go through the pipeline as empty text so
    /// they are recorded like any other message.
    pub fn into_context(self) -> DecisionContext {
        DecisionContext {
            message_id: self.message_id,
            chat_id: self.chat_id,
            chat_kind: self.chat_kind,
            chat_title: self.chat_title,
            sender: self.from,
            text: self.text.unwrap_or_default(),
            reply_to: self.reply_to,
            received_at: self.date,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use parley_core::domain::chat::{ChatId, ChatKind};
    use parley_core::domain::message::Sender;
    use parley_core::domain::user::UserId;

    use super::{InboundEvent, IncomingMessage};

    fn photo_without_caption() -> IncomingMessage {
        IncomingMessage {
            message_id: 5,
            chat_id: ChatId(-100),
            chat_kind: ChatKind::Group,
            chat_title: Some("regulars".to_owned()),
            from: Sender { id: UserId(7), display_name: "Ann".to_owned(), username: None },
            text: None,
            reply_to: None,
            date: Utc::now(),
        }
    }

    #[test]
    fn captionless_media_becomes_empty_text() {
        let ctx = photo_without_caption().into_context();

        assert_eq!(ctx.text, "");
        assert_eq!(ctx.chat_id, ChatId(-100));
        assert_eq!(ctx.sender.id, UserId(7));
    }

    #[test]
    fn unsupported_events_have_no_chat() {
        let event = InboundEvent::Unsupported { event_type: "poll_answer".to_owned() };

        assert_eq!(event.event_type(), "poll_answer");
        assert_eq!(event.chat_id(), None);
        assert_eq!(InboundEvent::Message(photo_without_caption()).chat_id(), Some(ChatId(-100)));
    }
}
