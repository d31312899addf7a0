use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parley_core::domain::chat::ChatId;
use parley_core::domain::message::DecisionContext;

use crate::handler::MessageHandler;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

type Queues = DashMap<ChatId, mpsc::Sender<DecisionContext>>;

/// One ordered worker per chat. Messages within a chat are handled in arrival
/// order while chats proceed independently, so a slow generation call in one
/// chat never delays another. A worker with nothing to do for the idle timeout
/// exits and is respawned by the chat's next message.
pub struct ChatWorkers {
    handler: Arc<MessageHandler>,
    queues: Arc<Queues>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
    idle_timeout: Duration,
    shutdown: CancellationToken,
}

impl ChatWorkers {
    pub fn new(handler: Arc<MessageHandler>, capacity: usize, shutdown: CancellationToken) -> Self {
        Self {
            handler,
            queues: Arc::new(DashMap::new()),
            tasks: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Queues the message on its chat's worker. A full queue drops the message.
    pub fn dispatch(&self, ctx: DecisionContext) {
        let chat_id = ctx.chat_id;
        if self.shutdown.is_cancelled() {
            debug!(
                event_name = "ingress.workers.shutting_down",
                chat_id = chat_id.0,
                message_id = ctx.message_id,
                "shutdown in progress; message dropped"
            );
            return;
        }

        let mut pending = ctx;
        // A worker that just went idle has closed its queue; retry once on a fresh one.
        for _ in 0..2 {
            let queue =
                self.queues.entry(chat_id).or_insert_with(|| self.spawn_worker(chat_id)).clone();
            match queue.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(ctx)) => {
                    warn!(
                        event_name = "ingress.workers.queue_full",
                        chat_id = chat_id.0,
                        message_id = ctx.message_id,
                        "chat queue full; message dropped"
                    );
                    return;
                }
                Err(TrySendError::Closed(ctx)) => {
                    self.queues.remove_if(&chat_id, |_, queue| queue.is_closed());
                    pending = ctx;
                }
            }
        }

        debug!(
            event_name = "ingress.workers.closed",
            chat_id = chat_id.0,
            message_id = pending.message_id,
            "chat worker stopped; message dropped"
        );
    }

    pub fn active_chats(&self) -> usize {
        self.queues.len()
    }

    /// Worker tasks not yet reaped.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn spawn_worker(&self, chat_id: ChatId) -> mpsc::Sender<DecisionContext> {
        let (queue, receiver) = mpsc::channel(self.capacity);
        let task = tokio::spawn(run_worker(
            chat_id,
            Arc::clone(&self.handler),
            receiver,
            Arc::clone(&self.queues),
            self.idle_timeout,
            self.shutdown.clone(),
        ));
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        queue
    }

    /// Stops accepting messages and waits until every queued message has been
    /// handled. Cancelling the shutdown token first abandons whatever is still
    /// queued.
    pub async fn drain(&self) {
        self.queues.clear();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(error) = task.await {
                warn!(event_name = "ingress.workers.join_failed", error = %error, "chat worker panicked");
            }
        }
    }
}

async fn run_worker(
    chat_id: ChatId,
    handler: Arc<MessageHandler>,
    mut receiver: mpsc::Receiver<DecisionContext>,
    queues: Arc<Queues>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(ctx) => {
                    handler.handle(ctx).await;
                }
                None => break,
            },
            _ = tokio::time::sleep(idle_timeout) => {
                receiver.close();
                while let Some(ctx) = receiver.recv().await {
                    handler.handle(ctx).await;
                }
                queues.remove_if(&chat_id, |_, queue| queue.is_closed());
                debug!(event_name = "ingress.workers.idle", chat_id = chat_id.0, "chat worker idle");
                break;
            }
        }
    }
    debug!(event_name = "ingress.workers.stopped", chat_id = chat_id.0, "chat worker stopped");
}
