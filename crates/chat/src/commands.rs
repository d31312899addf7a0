use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use parley_agent::collaborators::AnalyticsSink;
use parley_agent::identity::BotIdentityCache;
use parley_agent::moderator::{ModerationReceipt, ModerationRequest, Moderator};
use parley_agent::registry::TriggerRegistry;
use parley_core::access::AccessGate;
use parley_core::domain::analytics::{AnalyticsDetail, AnalyticsEvent};
use parley_core::domain::chat::ChatId;
use parley_core::domain::message::{Command, DecisionContext};
use parley_core::domain::moderation::ModerationAction;
use parley_core::domain::trigger::{MatchKind, NewTrigger, TriggerId, TriggerResponse};
use parley_core::domain::user::UserId;
use parley_core::errors::ApplicationError;
use parley_db::repositories::ModuleRepository;

pub const HELP_TEXT: &str = "Admin commands:\n\
/ban [user_id] [30m|2h|7d] [reason] - ban (reply to a message or give an id)\n\
/mute [user_id] [duration] [reason] - mute\n\
/warn [user_id] [reason] - warn\n\
/unban [user_id], /unmute [user_id] - lift\n\
/warnings [user_id] - count active warnings\n\
/trigger_add name | contains|exact|regex | pattern | response\n\
/trigger_global name | kind | pattern | response - trigger for every chat\n\
/trigger_del id, /trigger_reload\n\
/module_on name, /module_off name - toggle triggers, ai or autonomous";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Help,
    Moderate {
        action: ModerationAction,
        target: UserId,
        duration: Option<Duration>,
        reason: String,
    },
    Warnings { target: UserId },
    TriggerAdd {
        name: String,
        match_kind: MatchKind,
        pattern: String,
        response: String,
        is_global: bool,
    },
    TriggerDelete { trigger_id: TriggerId },
    TriggerReload,
    ModuleToggle { module: String, enabled: bool },
    Unknown { name: String },
}

impl ChatCommand {
    pub fn is_admin_only(&self) -> bool {
        !matches!(self, Self::Help | Self::Unknown { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("reply to the user's message or give their numeric id")]
    MissingTarget,
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown match kind `{0}`; use exact, contains or regex")]
    UnknownMatchKind(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Application(#[from] ApplicationError),
    #[error("{0}")]
    Rejected(String),
}

/// Turns a parsed prefix command into a typed one. `reply_target` is the
/// author of the message the command replied to, if any.
pub fn parse_chat_command(
    command: &Command,
    reply_target: Option<UserId>,
) -> Result<ChatCommand, CommandParseError> {
    let args = command.args.as_str();
    match command.name.as_str() {
        "help" | "start" => Ok(ChatCommand::Help),
        "ban" | "mute" | "warn" | "unban" | "unmute" => {
            let action = ModerationAction::from_str(&command.name)
                .map_err(|_| CommandParseError::Usage("/ban [user_id] [duration] [reason]"))?;
            parse_moderation(action, args, reply_target)
        }
        "warnings" => {
            let (target, _) = take_target(args, reply_target)?;
            Ok(ChatCommand::Warnings { target })
        }
        "trigger_add" | "trigger_global" => parse_trigger(args, command.name == "trigger_global"),
        "trigger_del" => args
            .trim()
            .parse::<i64>()
            .map(|id| ChatCommand::TriggerDelete { trigger_id: TriggerId(id) })
            .map_err(|_| CommandParseError::Usage("/trigger_del <id>")),
        "trigger_reload" => Ok(ChatCommand::TriggerReload),
        "module_on" | "module_off" => {
            let module = args.trim().to_ascii_lowercase();
            if module.is_empty() || module.contains(char::is_whitespace) {
                return Err(CommandParseError::Usage("/module_on <name>"));
            }
            Ok(ChatCommand::ModuleToggle { module, enabled: command.name == "module_on" })
        }
        other => Ok(ChatCommand::Unknown { name: other.to_owned() }),
    }
}

fn parse_moderation(
    action: ModerationAction,
    args: &str,
    reply_target: Option<UserId>,
) -> Result<ChatCommand, CommandParseError> {
    let (target, rest) = take_target(args, reply_target)?;

    let mut rest = rest.trim();
    let mut duration = None;
    if matches!(action, ModerationAction::Ban | ModerationAction::Mute) {
        if let Some((token, tail)) = split_first_token(rest) {
            if let Some(parsed) = parse_duration(token) {
                duration = Some(parsed);
                rest = tail;
            } else if looks_like_duration(token) {
                return Err(CommandParseError::Usage("duration out of range, use e.g. 30m, 2h or 7d"));
            }
        }
    }

    Ok(ChatCommand::Moderate { action, target, duration, reason: rest.trim().to_owned() })
}

/// A leading numeric id wins over the replied-to author.
fn take_target(args: &str, reply_target: Option<UserId>) -> Result<(UserId, &str), CommandParseError> {
    if let Some((token, rest)) = split_first_token(args) {
        if let Ok(id) = token.parse::<i64>() {
            return Ok((UserId(id), rest));
        }
    }
    reply_target.map(|target| (target, args)).ok_or(CommandParseError::MissingTarget)
}

fn split_first_token(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    Some(text.split_once(char::is_whitespace).unwrap_or((text, "")))
}

/// `30s`, `15m`, `2h`, `7d`. Amounts chrono cannot represent yield `None`.
pub fn parse_duration(token: &str) -> Option<Duration> {
    let unit = token.chars().last()?;
    let amount: i64 = token[..token.len() - unit.len_utf8()].parse().ok()?;
    if amount <= 0 {
        return None;
    }
    match unit.to_ascii_lowercase() {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        _ => None,
    }
}

fn looks_like_duration(token: &str) -> bool {
    match token.char_indices().last() {
        Some((split, unit)) => {
            matches!(unit.to_ascii_lowercase(), 's' | 'm' | 'h' | 'd')
                && split > 0
                && token[..split].bytes().all(|byte| byte.is_ascii_digit())
        }
        None => false,
    }
}

fn parse_trigger(args: &str, is_global: bool) -> Result<ChatCommand, CommandParseError> {
    let parts: Vec<_> = args.splitn(4, '|').map(str::trim).collect();
    let [name, kind, pattern, response] = parts.as_slice() else {
        return Err(CommandParseError::Usage("/trigger_add name | kind | pattern | response"));
    };
    let match_kind = MatchKind::from_str(&kind.to_ascii_lowercase())
        .map_err(|_| CommandParseError::UnknownMatchKind((*kind).to_owned()))?;

    Ok(ChatCommand::TriggerAdd {
        name: (*name).to_owned(),
        match_kind,
        pattern: (*pattern).to_owned(),
        response: (*response).to_owned(),
        is_global,
    })
}

/// Executes admin commands against the engine. Every method returns the text
/// to send back to the chat.
#[async_trait]
pub trait CommandService: Send + Sync {
    async fn moderate(
        &self,
        action: ModerationAction,
        request: ModerationRequest,
    ) -> Result<String, CommandError>;

    async fn warnings(&self, target: UserId, chat_id: ChatId) -> Result<String, CommandError>;

    async fn add_trigger(&self, trigger: NewTrigger) -> Result<String, CommandError>;

    async fn delete_trigger(&self, trigger_id: TriggerId) -> Result<String, CommandError>;

    async fn reload_triggers(&self) -> Result<String, CommandError>;

    async fn toggle_module(
        &self,
        chat_id: ChatId,
        module: &str,
        enabled: bool,
        updated_by: UserId,
    ) -> Result<String, CommandError>;
}

#[derive(Default)]
pub struct NoopCommandService;

#[async_trait]
impl CommandService for NoopCommandService {
    async fn moderate(
        &self,
        action: ModerationAction,
        request: ModerationRequest,
    ) -> Result<String, CommandError> {
        Ok(format!("{} {} (not applied)", action.as_str(), request.target))
    }

    async fn warnings(&self, target: UserId, _chat_id: ChatId) -> Result<String, CommandError> {
        Ok(format!("User {target} has 0 active warnings."))
    }

    async fn add_trigger(&self, trigger: NewTrigger) -> Result<String, CommandError> {
        Ok(format!("Trigger `{}` accepted (not saved).", trigger.name))
    }

    async fn delete_trigger(&self, trigger_id: TriggerId) -> Result<String, CommandError> {
        Ok(format!("Trigger {trigger_id} unchanged."))
    }

    async fn reload_triggers(&self) -> Result<String, CommandError> {
        Ok("Triggers unchanged.".to_owned())
    }

    async fn toggle_module(
        &self,
        _chat_id: ChatId,
        module: &str,
        enabled: bool,
        _updated_by: UserId,
    ) -> Result<String, CommandError> {
        Ok(format!("Module `{module}` would be {}.", if enabled { "enabled" } else { "disabled" }))
    }
}

pub struct EngineCommandService {
    moderator: Arc<Moderator>,
    registry: Arc<TriggerRegistry>,
    modules: Arc<dyn ModuleRepository>,
}

impl EngineCommandService {
    pub fn new(
        moderator: Arc<Moderator>,
        registry: Arc<TriggerRegistry>,
        modules: Arc<dyn ModuleRepository>,
    ) -> Self {
        Self { moderator, registry, modules }
    }
}

#[async_trait]
impl CommandService for EngineCommandService {
    async fn moderate(
        &self,
        action: ModerationAction,
        request: ModerationRequest,
    ) -> Result<String, CommandError> {
        let target = request.target;
        let receipt = self.moderator.apply(action, request).await?;
        Ok(describe_receipt(target, &receipt))
    }

    async fn warnings(&self, target: UserId, chat_id: ChatId) -> Result<String, CommandError> {
        let count = self.moderator.warning_count(target, chat_id).await?;
        Ok(format!("User {target} has {count} active warning(s)."))
    }

    async fn add_trigger(&self, trigger: NewTrigger) -> Result<String, CommandError> {
        let saved = self.registry.save_trigger(trigger).await?;
        let scope = if saved.is_global { "every chat" } else { "this chat" };
        Ok(format!("Trigger `{}` (#{}) saved for {scope}.", saved.name, saved.id))
    }

    async fn delete_trigger(&self, trigger_id: TriggerId) -> Result<String, CommandError> {
        if self.registry.deactivate_trigger(trigger_id).await? {
            Ok(format!("Trigger #{trigger_id} disabled."))
        } else {
            Err(CommandError::Rejected(format!("No trigger #{trigger_id}.")))
        }
    }

    async fn reload_triggers(&self) -> Result<String, CommandError> {
        let count = self.registry.reload().await?;
        Ok(format!("{count} active trigger(s) loaded."))
    }

    async fn toggle_module(
        &self,
        chat_id: ChatId,
        module: &str,
        enabled: bool,
        updated_by: UserId,
    ) -> Result<String, CommandError> {
        self.modules
            .set_enabled(chat_id, module, enabled, updated_by, Utc::now())
            .await
            .map_err(ApplicationError::from)?;
        Ok(format!("Module `{module}` {} here.", if enabled { "enabled" } else { "disabled" }))
    }
}

fn describe_receipt(target: UserId, receipt: &ModerationReceipt) -> String {
    let mut text = match receipt.action {
        ModerationAction::Unban | ModerationAction::Unmute if receipt.lifted == 0 => {
            return format!("User {target} had nothing to lift.");
        }
        ModerationAction::Unban => format!("User {target} unbanned."),
        ModerationAction::Unmute => format!("User {target} unmuted."),
        ModerationAction::Warn => format!(
            "User {target} warned ({} active).",
            receipt.warning_count.unwrap_or(1)
        ),
        ModerationAction::Ban | ModerationAction::Mute => {
            let verb = if receipt.action == ModerationAction::Ban { "banned" } else { "muted" };
            match receipt.restriction.as_ref().and_then(|restriction| restriction.expires_at) {
                Some(until) => format!("User {target} {verb} until {}.", until.format("%Y-%m-%d %H:%M UTC")),
                None => format!("User {target} {verb}."),
            }
        }
    };
    if matches!(receipt.action, ModerationAction::Ban | ModerationAction::Mute) && !receipt.enforced {
        text.push_str(" The platform did not confirm the action.");
    }
    text
}

/// Routes prefix commands from the pipeline to a [`CommandService`] and
/// produces the reply text, if any.
pub struct CommandRouter {
    service: Arc<dyn CommandService>,
    gate: Arc<AccessGate>,
    identity: Arc<BotIdentityCache>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl CommandRouter {
    pub fn new(
        service: Arc<dyn CommandService>,
        gate: Arc<AccessGate>,
        identity: Arc<BotIdentityCache>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self { service, gate, identity, analytics }
    }

    pub async fn route(&self, ctx: &DecisionContext, command: &Command) -> Option<String> {
        let bot = self.identity.current().await;
        let explicitly_ours = match &command.addressed_to {
            Some(handle) if !handle.eq_ignore_ascii_case(&bot.handle) => return None,
            Some(_) => true,
            None => ctx.is_private(),
        };

        self.analytics.record(AnalyticsEvent {
            user_id: ctx.sender.id,
            chat_id: ctx.chat_id,
            occurred_at: Utc::now(),
            detail: AnalyticsDetail::Command { name: command.name.clone() },
        });

        if !self.gate.allow(ctx.chat_id, ctx.sender.id, command.module()).await {
            return Some(format!("/{} is disabled in this chat.", command.name));
        }

        let reply_target = ctx.reply_to.as_ref().map(|reply| reply.author_id);
        let parsed = match parse_chat_command(command, reply_target) {
            Ok(parsed) => parsed,
            Err(error) => return Some(error.to_string()),
        };

        if parsed.is_admin_only() && !self.gate.is_admin(ctx.sender.id) {
            info!(
                event_name = "engine.commands.denied",
                chat_id = ctx.chat_id.0,
                user_id = ctx.sender.id.0,
                command = %command.name,
                "admin command from non-admin"
            );
            return Some("Only bot admins can do that.".to_owned());
        }

        let result = match parsed {
            ChatCommand::Help => return Some(HELP_TEXT.to_owned()),
            ChatCommand::Unknown { name } => {
                return explicitly_ours.then(|| format!("Unknown command /{name}. Try /help."));
            }
            ChatCommand::Moderate { action, target, duration, reason } => {
                let request = ModerationRequest {
                    chat_id: (!ctx.is_private()).then_some(ctx.chat_id),
                    target,
                    moderator: ctx.sender.id,
                    reason,
                    duration,
                };
                self.service.moderate(action, request).await
            }
            ChatCommand::Warnings { target } => self.service.warnings(target, ctx.chat_id).await,
            ChatCommand::TriggerAdd { name, match_kind, pattern, response, is_global } => {
                let trigger = NewTrigger {
                    owner_id: ctx.sender.id,
                    chat_id: Some(ctx.chat_id),
                    name,
                    match_kind,
                    pattern,
                    response: TriggerResponse::text(response),
                    is_global,
                };
                self.service.add_trigger(trigger).await
            }
            ChatCommand::TriggerDelete { trigger_id } => self.service.delete_trigger(trigger_id).await,
            ChatCommand::TriggerReload => self.service.reload_triggers().await,
            ChatCommand::ModuleToggle { module, enabled } => {
                self.service.toggle_module(ctx.chat_id, &module, enabled, ctx.sender.id).await
            }
        };

        Some(result.unwrap_or_else(|error| {
            warn!(
                event_name = "engine.commands.failed",
                chat_id = ctx.chat_id.0,
                user_id = ctx.sender.id.0,
                command = %command.name,
                error = %error,
                "command failed"
            );
            format!("Command failed: {error}")
        }))
    }
}
