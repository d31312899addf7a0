use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use parley_agent::collaborators::{
    AnalyticsSink, GenerationRequest, ModerationEffector, StaticIdentityProvider, TextGenerator,
};
use parley_agent::identity::BotIdentityCache;
use parley_agent::ledger::RestrictionLedger;
use parley_agent::pipeline::{DecisionPipeline, Outcome, PipelineSettings, Reply};
use parley_agent::registry::TriggerRegistry;
use parley_core::access::AccessGate;
use parley_core::domain::analytics::{AnalyticsDetail, AnalyticsEvent};
use parley_core::domain::chat::{ChatId, ChatKind};
use parley_core::domain::message::{DecisionContext, ReplyRef, Sender};
use parley_core::domain::restriction::{NewRestriction, Restriction, RestrictionId, RestrictionKind};
use parley_core::domain::trigger::{MatchKind, NewTrigger, TriggerResponse};
use parley_core::domain::user::UserId;
use parley_core::errors::CollaboratorError;
use parley_core::mention::{BotIdentity, MentionDetector};
use parley_core::throttle::{ActivityThrottle, DrawSource};
use parley_db::repositories::{
    InMemoryModuleRepository, InMemoryRestrictionRepository, InMemoryTriggerRepository,
    ModuleRepository, RepositoryModuleToggles, TriggerRepository,
};

const ADMIN: UserId = UserId(1);
const USER: UserId = UserId(7);
const BOT: UserId = UserId(42);
const CHAT: ChatId = ChatId(100);

struct FixedDraw(f64);

impl DrawSource for FixedDraw {
    fn draw(&self) -> f64 {
        self.0
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingSink {
    fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().expect("events lock").iter().map(AnalyticsEvent::kind).collect()
    }
}

impl AnalyticsSink for RecordingSink {
    fn record(&self, event: AnalyticsEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

#[derive(Default)]
struct RecordingEffector {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ModerationEffector for RecordingEffector {
    async fn enforce_ban(&self, user_id: UserId, chat_id: ChatId) -> Result<(), CollaboratorError> {
        self.calls.lock().expect("calls lock").push(format!("ban {user_id} {chat_id}"));
        Ok(())
    }

    async fn enforce_mute(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        _until: Option<DateTime<Utc>>,
    ) -> Result<(), CollaboratorError> {
        self.calls.lock().expect("calls lock").push(format!("mute {user_id} {chat_id}"));
        Ok(())
    }

    async fn lift(&self, user_id: UserId, chat_id: ChatId) -> Result<(), CollaboratorError> {
        self.calls.lock().expect("calls lock").push(format!("lift {user_id} {chat_id}"));
        Ok(())
    }
}

struct ScriptedGenerator {
    reply: Result<String, CollaboratorError>,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self { reply: Ok(text.to_string()), delay: None, requests: Mutex::new(Vec::new()) })
    }

    fn failing(error: CollaboratorError) -> Arc<Self> {
        Arc::new(Self { reply: Err(error), delay: None, requests: Mutex::new(Vec::new()) })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            reply: Ok("too late".to_string()),
            delay: Some(Duration::from_secs(600)),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        self.requests.lock().expect("requests lock").push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone()
    }
}

struct Harness {
    pipeline: DecisionPipeline,
    triggers: Arc<InMemoryTriggerRepository>,
    registry: Arc<TriggerRegistry>,
    ledger: Arc<RestrictionLedger>,
    restrictions: Arc<InMemoryRestrictionRepository>,
    modules: Arc<InMemoryModuleRepository>,
    analytics: Arc<RecordingSink>,
    effector: Arc<RecordingEffector>,
}

impl Harness {
    async fn evaluate(&self, ctx: &DecisionContext) -> Outcome {
        self.pipeline.evaluate(ctx, &CancellationToken::new()).await
    }

    async fn add_trigger(&self, name: &str, kind: MatchKind, pattern: &str, chat: Option<ChatId>, global: bool) {
        self.registry
            .save_trigger(NewTrigger {
                owner_id: USER,
                chat_id: chat,
                name: name.to_string(),
                match_kind: kind,
                pattern: pattern.to_string(),
                response: TriggerResponse::text(format!("{name} response")),
                is_global: global,
            })
            .await
            .expect("save trigger");
    }

    async fn restrict(&self, kind: RestrictionKind, ttl: Option<chrono::Duration>) -> Restriction {
        let now = Utc::now();
        self.ledger
            .add(NewRestriction {
                user_id: USER,
                chat_id: Some(CHAT),
                issued_by: ADMIN,
                kind,
                reason: "test".to_string(),
                issued_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
            })
            .await
            .expect("add restriction")
    }

    async fn disable(&self, module: &str) {
        self.modules.set_enabled(CHAT, module, false, ADMIN, Utc::now()).await.expect("toggle");
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        command_prefixes: vec!["/".to_string()],
        deny_notice: Some("no access here".to_string()),
        fallback_reply: Some("brain fog, try later".to_string()),
        unavailable_replies: vec!["offline".to_string()],
        filler_messages: vec!["so quiet".to_string()],
        min_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(5),
        generation_timeout: Duration::from_secs(10),
    }
}

async fn harness(generator: Option<Arc<dyn TextGenerator>>, autonomous: bool) -> Harness {
    let triggers = Arc::new(InMemoryTriggerRepository::default());
    let restrictions = Arc::new(InMemoryRestrictionRepository::default());
    let modules = Arc::new(InMemoryModuleRepository::default());
    let analytics = Arc::new(RecordingSink::default());
    let effector = Arc::new(RecordingEffector::default());

    let gate = Arc::new(AccessGate::new(
        [ADMIN],
        [CHAT],
        Arc::new(RepositoryModuleToggles::new(modules.clone())),
    ));
    let ledger = Arc::new(RestrictionLedger::new(restrictions.clone()));
    let registry = Arc::new(TriggerRegistry::load(triggers.clone()).await.expect("registry"));
    let mentions = Arc::new(MentionDetector::new(["bot".to_string()], 20));
    let probability = if autonomous { 1.0 } else { 0.0 };
    let throttle =
        Arc::new(ActivityThrottle::new(probability, chrono::Duration::hours(2), Arc::new(FixedDraw(0.0))));
    let identity = Arc::new(
        BotIdentityCache::resolve(Arc::new(StaticIdentityProvider(BotIdentity {
            user_id: BOT,
            handle: "parley_bot".to_string(),
            display_name: "Parley".to_string(),
        })))
        .await
        .expect("identity"),
    );

    let mut pipeline =
        DecisionPipeline::new(gate, ledger.clone(), registry.clone(), mentions, throttle, identity, settings())
            .with_effector(effector.clone())
            .with_analytics(analytics.clone());
    if let Some(generator) = generator {
        pipeline = pipeline.with_generator(generator);
    }

    Harness { pipeline, triggers, registry, ledger, restrictions, modules, analytics, effector }
}

fn message(chat: ChatId, user: UserId, text: &str) -> DecisionContext {
    DecisionContext {
        message_id: 1,
        chat_id: chat,
        chat_kind: ChatKind::Group,
        chat_title: Some("regulars".to_string()),
        sender: Sender { id: user, display_name: "Ann".to_string(), username: Some("ann".to_string()) },
        text: text.to_string(),
        reply_to: None,
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn keyword_address_resolves_to_generation() {
    let generator = ScriptedGenerator::replying("not much!");
    let h = harness(Some(generator.clone()), false).await;

    let outcome = h.evaluate(&message(CHAT, USER, "hey bot, what's up?")).await;

    assert!(matches!(outcome, Outcome::RespondViaGeneration(Reply::Generated(ref text)) if text == "not much!"));
    assert_eq!(generator.requests()[0].prompt, "hey bot, what's up?");
    assert_eq!(generator.requests()[0].context, None);
    assert_eq!(h.analytics.kinds(), ["message", "outcome"]);
}

#[tokio::test]
async fn active_mute_suppresses_regardless_of_triggers_and_mentions() {
    let generator = ScriptedGenerator::replying("hello");
    let h = harness(Some(generator.clone()), true).await;
    h.add_trigger("ping", MatchKind::Contains, "ping", Some(CHAT), false).await;
    let mute = h.restrict(RestrictionKind::Mute, Some(chrono::Duration::hours(1))).await;

    let outcome = h.evaluate(&message(CHAT, USER, "ping bot, are you there?")).await;

    assert!(matches!(
        outcome,
        Outcome::Suppressed { kind: RestrictionKind::Mute, restriction_id, enforced: false }
            if restriction_id == mute.id
    ));
    assert!(generator.requests().is_empty());
    let trigger = h.registry.find_match("ping", CHAT).expect("trigger");
    assert_eq!(trigger.usage_count, 0);
    assert!(h.effector.calls.lock().expect("calls").is_empty());
}

#[tokio::test]
async fn matching_trigger_responds_and_counts_one_use() {
    let h = harness(None, false).await;
    h.add_trigger("ping", MatchKind::Contains, "ping", Some(CHAT), false).await;

    let outcome = h.evaluate(&message(CHAT, USER, "ping!!")).await;

    let Outcome::RespondWithTrigger { trigger_id, name, response } = outcome else {
        panic!("expected trigger response, got {outcome:?}");
    };
    assert_eq!(name, "ping");
    assert_eq!(response, TriggerResponse::text("ping response"));

    let stored = h.triggers.find_by_id(trigger_id).await.expect("read").expect("stored");
    assert_eq!(stored.usage_count, 1);
    assert_eq!(stored.success_count, 1);
}

#[tokio::test]
async fn chat_outside_allow_list_is_denied_with_only_the_analytics_entry() {
    let generator = ScriptedGenerator::replying("hello");
    let h = harness(Some(generator.clone()), true).await;

    let outcome = h.evaluate(&message(ChatId(999), USER, "hey bot?")).await;

    assert!(matches!(outcome, Outcome::Denied { notice: Some(ref text) } if text == "no access here"));
    assert_eq!(h.analytics.kinds(), ["message"]);
    let events = h.analytics.events.lock().expect("events");
    assert!(matches!(&events[0].detail, AnalyticsDetail::Message { context } if context.chat_id == ChatId(999)));
    drop(events);

    assert!(h.restrictions.all().await.is_empty());
    assert!(generator.requests().is_empty());
}

#[tokio::test]
async fn admin_passes_gate_in_any_chat() {
    let h = harness(None, false).await;

    let outcome = h.evaluate(&message(ChatId(999), ADMIN, "just chatting here")).await;

    assert!(matches!(outcome, Outcome::Silence));
}

#[tokio::test]
async fn command_prefix_goes_to_dispatch_before_triggers() {
    let h = harness(None, false).await;
    h.add_trigger("ping", MatchKind::Contains, "ping", Some(CHAT), false).await;

    let outcome = h.evaluate(&message(CHAT, USER, "/ping@parley_bot now")).await;

    let Outcome::Command(command) = outcome else {
        panic!("expected command, got {outcome:?}");
    };
    assert_eq!(command.name, "ping");
    assert_eq!(command.args, "now");
    assert_eq!(h.registry.find_match("ping", CHAT).expect("trigger").usage_count, 0);
}

#[tokio::test]
async fn ban_in_group_asks_the_platform_to_remove_the_member() {
    let h = harness(None, false).await;
    h.restrict(RestrictionKind::Ban, None).await;
    h.restrict(RestrictionKind::Mute, None).await;

    let outcome = h.evaluate(&message(CHAT, USER, "i am back")).await;

    assert!(matches!(outcome, Outcome::Suppressed { kind: RestrictionKind::Ban, enforced: true, .. }));
    assert_eq!(h.effector.calls.lock().expect("calls").as_slice(), ["ban 7 100"]);
}

#[tokio::test]
async fn expired_mute_is_cleared_on_read_and_no_longer_suppresses() {
    let h = harness(None, false).await;
    let issued = Utc::now() - chrono::Duration::hours(3);
    h.restrictions
        .insert_raw(Restriction {
            id: RestrictionId(1),
            user_id: USER,
            chat_id: Some(CHAT),
            issued_by: ADMIN,
            kind: RestrictionKind::Mute,
            reason: "flood".to_string(),
            issued_at: issued,
            expires_at: Some(issued + chrono::Duration::hours(1)),
            is_active: true,
        })
        .await;

    let outcome = h.evaluate(&message(CHAT, USER, "just chatting here")).await;

    assert!(matches!(outcome, Outcome::Silence));
    assert!(!h.restrictions.all().await[0].is_active);
}

#[tokio::test]
async fn reply_to_bot_forwards_earlier_bot_text_and_beats_triggers() {
    let generator = ScriptedGenerator::replying("as I said");
    let h = harness(Some(generator.clone()), false).await;
    h.add_trigger("ping", MatchKind::Contains, "ping", Some(CHAT), false).await;

    let mut ctx = message(CHAT, USER, "ping, really?");
    ctx.reply_to = Some(ReplyRef { message_id: 9, author_id: BOT, text: Some("earlier answer".to_string()) });
    let outcome = h.evaluate(&ctx).await;

    assert!(matches!(outcome, Outcome::RespondWithContext(Reply::Generated(_))));
    assert_eq!(generator.requests()[0].context.as_deref(), Some("earlier answer"));
    assert_eq!(h.registry.find_match("ping", CHAT).expect("trigger").usage_count, 0);
}

#[tokio::test]
async fn generator_failure_degrades_to_fallback_reply() {
    let generator = ScriptedGenerator::failing(CollaboratorError::Unavailable("503".to_string()));
    let h = harness(Some(generator), false).await;

    let outcome = h.evaluate(&message(CHAT, USER, "bot, tell me a joke")).await;

    assert!(matches!(outcome, Outcome::RespondViaGeneration(Reply::Fallback(ref text)) if text == "brain fog, try later"));
    assert_eq!(h.analytics.kinds(), ["message", "outcome"]);
}

#[tokio::test]
async fn missing_generator_answers_with_unavailable_reply() {
    let h = harness(None, false).await;

    let outcome = h.evaluate(&message(CHAT, USER, "bot, tell me a joke")).await;

    assert!(matches!(outcome, Outcome::RespondViaGeneration(Reply::Unavailable(ref text)) if text == "offline"));
}

#[tokio::test(start_paused = true)]
async fn hung_generator_times_out_into_fallback() {
    let generator = ScriptedGenerator::hanging();
    let h = harness(Some(generator), false).await;

    let outcome = h.evaluate(&message(CHAT, USER, "bot, still there")).await;

    assert!(matches!(outcome, Outcome::RespondViaGeneration(Reply::Fallback(_))));
}

#[tokio::test]
async fn cancelled_evaluation_drops_the_reply() {
    let generator = ScriptedGenerator::hanging();
    let h = harness(Some(generator), false).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h.pipeline.evaluate(&message(CHAT, USER, "bot, still there"), &cancel).await;

    assert!(matches!(outcome, Outcome::RespondViaGeneration(Reply::Dropped { reason: "cancelled" })));
    assert!(!outcome.is_response());
    assert_eq!(h.analytics.kinds(), ["message"]);
}

#[tokio::test]
async fn disabled_trigger_module_falls_through_to_mentions() {
    let generator = ScriptedGenerator::replying("pong");
    let h = harness(Some(generator), false).await;
    h.add_trigger("ping", MatchKind::Contains, "ping", Some(CHAT), false).await;
    h.disable("triggers").await;

    let outcome = h.evaluate(&message(CHAT, USER, "ping bot")).await;

    assert!(matches!(outcome, Outcome::RespondViaGeneration(Reply::Generated(_))));
}

#[tokio::test]
async fn disabled_ai_module_keeps_bot_quiet_when_addressed() {
    let generator = ScriptedGenerator::replying("hello");
    let h = harness(Some(generator.clone()), false).await;
    h.disable("ai").await;

    let outcome = h.evaluate(&message(CHAT, USER, "hey bot, what's up?")).await;

    assert!(matches!(outcome, Outcome::Silence));
    assert!(generator.requests().is_empty());
}

#[tokio::test]
async fn autonomous_message_is_deferred_and_then_cooled_down() {
    let h = harness(None, true).await;

    let first = h.evaluate(&message(CHAT, USER, "just chatting here")).await;
    let Outcome::AutonomousMessage(deferred) = first else {
        panic!("expected autonomous message, got {first:?}");
    };
    assert_eq!(deferred.chat_id, CHAT);
    assert_eq!(deferred.text, "so quiet");
    assert_eq!(deferred.delay, Duration::from_secs(5));

    let second = h.evaluate(&message(CHAT, USER, "still chatting")).await;
    assert!(matches!(second, Outcome::Silence));
}

#[tokio::test]
async fn disabled_autonomous_module_stays_silent() {
    let h = harness(None, true).await;
    h.disable("autonomous").await;

    let outcome = h.evaluate(&message(CHAT, USER, "just chatting here")).await;

    assert!(matches!(outcome, Outcome::Silence));
}

#[tokio::test]
async fn global_trigger_wins_over_busier_chat_trigger() {
    let h = harness(None, false).await;
    let at = Utc::now();
    let global = h
        .triggers
        .upsert(
            NewTrigger {
                owner_id: USER,
                chat_id: None,
                name: "greet-global".to_string(),
                match_kind: MatchKind::Contains,
                pattern: "morning".to_string(),
                response: TriggerResponse::text("global"),
                is_global: true,
            },
            at,
        )
        .await
        .expect("global");
    let scoped = h
        .triggers
        .upsert(
            NewTrigger {
                owner_id: USER,
                chat_id: Some(CHAT),
                name: "greet-local".to_string(),
                match_kind: MatchKind::Contains,
                pattern: "morning".to_string(),
                response: TriggerResponse::text("local"),
                is_global: false,
            },
            at,
        )
        .await
        .expect("scoped");
    for _ in 0..3 {
        h.triggers.record_use(global.id, true, at).await.expect("use");
    }
    for _ in 0..10 {
        h.triggers.record_use(scoped.id, true, at).await.expect("use");
    }
    h.registry.reload().await.expect("reload");

    let outcome = h.evaluate(&message(CHAT, USER, "good morning all")).await;

    assert!(matches!(outcome, Outcome::RespondWithTrigger { trigger_id, .. } if trigger_id == global.id));
}

#[tokio::test]
async fn invalid_regex_trigger_never_matches() {
    let h = harness(None, false).await;
    h.triggers
        .upsert(
            NewTrigger {
                owner_id: USER,
                chat_id: Some(CHAT),
                name: "broken".to_string(),
                match_kind: MatchKind::Regex,
                pattern: "([a-z".to_string(),
                response: TriggerResponse::text("never"),
                is_global: false,
            },
            Utc::now(),
        )
        .await
        .expect("raw upsert");
    h.registry.reload().await.expect("reload");

    let outcome = h.evaluate(&message(CHAT, USER, "([a-z")).await;

    assert!(matches!(outcome, Outcome::Silence));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uses_are_all_counted() {
    let h = harness(None, false).await;
    h.add_trigger("ping", MatchKind::Contains, "ping", Some(CHAT), false).await;
    let trigger = h.registry.find_match("ping", CHAT).expect("trigger");

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let registry = Arc::clone(&h.registry);
            tokio::spawn(async move { registry.record_use(trigger.id, i % 4 == 0).await })
        })
        .collect();
    for task in tasks {
        task.await.expect("join").expect("record use");
    }

    let stored = h.triggers.find_by_id(trigger.id).await.expect("read").expect("stored");
    assert_eq!(stored.usage_count, 40);
    assert_eq!(stored.success_count, 10);
    assert_eq!(h.registry.find_match("ping", CHAT).expect("trigger").usage_count, 40);
}
