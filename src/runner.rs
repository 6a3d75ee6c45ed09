//! Event loop driving a mux from an event source
//!
//! Events for different chats are dispatched concurrently, up to
//! `max_in_flight` at a time. Events for one chat run one after another in
//! arrival order: while a chat has an event in flight, later events for it
//! wait in a per-chat queue owned by the loop.

use crate::error::DispatchError;
use crate::event::{ConversationKey, Event};
use crate::handler::Outcome;
use crate::mux::Mux;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Supplier of inbound events (long polling, webhooks, a test channel)
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is exhausted.
    ///
    /// Must be cancel safe: the runner may drop the future before it
    /// completes, and no event may be lost when it does.
    async fn next_event(&mut self) -> Option<Event>;
}

#[async_trait]
impl EventSource for mpsc::Receiver<Event> {
    async fn next_event(&mut self) -> Option<Event> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for mpsc::UnboundedReceiver<Event> {
    async fn next_event(&mut self) -> Option<Event> {
        self.recv().await
    }
}

/// Dispatch tasks and the chat each one belongs to, so a task that dies
/// still releases its chat
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<Result<Outcome, DispatchError>>,
    owners: HashMap<task::Id, (ConversationKey, Arc<Event>)>,
}

impl InFlight {
    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Called for every event whose dispatch failed
pub type ErrorHook = Arc<dyn Fn(&Event, &DispatchError) + Send + Sync>;

/// Totals for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub claimed: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl RunStats {
    pub fn total(&self) -> u64 {
        self.claimed + self.dropped + self.failed
    }
}

pub struct Runner {
    mux: Arc<Mux>,
    max_in_flight: usize,
    on_error: Option<ErrorHook>,
}

impl Runner {
    pub fn new(mux: Arc<Mux>) -> Self {
        Self {
            mux,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            on_error: None,
        }
    }

    /// Upper bound on events dispatched or queued at once (minimum 1)
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    #[must_use]
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    /// Drain `source` until it is exhausted or `shutdown` fires.
    ///
    /// After shutdown no new events are pulled, but events already received
    /// still run to completion before this returns.
    pub async fn run<S: EventSource>(&self, mut source: S, shutdown: CancellationToken) -> RunStats {
        let mut stats = RunStats::default();
        let mut in_flight = InFlight::default();
        // A chat present here has an event in flight; the queue holds the rest
        let mut busy: HashMap<ConversationKey, VecDeque<Event>> = HashMap::new();
        let mut queued = 0usize;
        let mut pulling = true;

        tracing::info!(max_in_flight = self.max_in_flight, "Runner started");

        loop {
            if !pulling && in_flight.is_empty() {
                break;
            }
            let has_capacity = in_flight.len() + queued < self.max_in_flight;

            tokio::select! {
                biased;

                () = shutdown.cancelled(), if pulling => {
                    tracing::info!(pending = in_flight.len() + queued, "Shutdown requested, draining");
                    pulling = false;
                }

                Some(joined) = in_flight.tasks.join_next_with_id(), if !in_flight.is_empty() => {
                    let id = match &joined {
                        Ok((id, _)) => *id,
                        Err(e) => e.id(),
                    };
                    let Some((key, event)) = in_flight.owners.remove(&id) else {
                        tracing::error!(task = %id, "Finished dispatch task has no owner");
                        continue;
                    };

                    match joined {
                        Ok((_, result)) => self.record(&mut stats, &event, result),
                        Err(e) => {
                            // Actions and predicates are guarded, so this is a handler or
                            // store that panicked outside them
                            stats.failed += 1;
                            tracing::error!(
                                key = %key,
                                update_id = event.update_id,
                                chat_id = event.chat.id,
                                error = %e,
                                "Dispatch task failed"
                            );
                        }
                    }

                    match busy.get_mut(&key).and_then(VecDeque::pop_front) {
                        Some(next) => {
                            queued -= 1;
                            self.spawn(&mut in_flight, key, next);
                        }
                        None => {
                            busy.remove(&key);
                        }
                    }
                }

                next = source.next_event(), if pulling && has_capacity => {
                    let Some(event) = next else {
                        tracing::info!("Event source exhausted");
                        pulling = false;
                        continue;
                    };

                    let key = event.conversation_key();
                    if let Some(queue) = busy.get_mut(&key) {
                        queue.push_back(event);
                        queued += 1;
                    } else {
                        busy.insert(key.clone(), VecDeque::new());
                        self.spawn(&mut in_flight, key, event);
                    }
                }
            }
        }

        tracing::info!(
            claimed = stats.claimed,
            dropped = stats.dropped,
            failed = stats.failed,
            "Runner stopped"
        );
        stats
    }

    fn spawn(&self, in_flight: &mut InFlight, key: ConversationKey, event: Event) {
        let mux = Arc::clone(&self.mux);
        let event = Arc::new(event);
        let task_event = Arc::clone(&event);
        let handle = in_flight
            .tasks
            .spawn(async move { mux.dispatch(&task_event).await });
        in_flight.owners.insert(handle.id(), (key, event));
    }

    fn record(&self, stats: &mut RunStats, event: &Event, result: Result<Outcome, DispatchError>) {
        match result {
            Ok(Outcome::Claimed) => stats.claimed += 1,
            Ok(Outcome::Unclaimed) => stats.dropped += 1,
            Err(e) => {
                stats.failed += 1;
                tracing::error!(
                    handler = %e.handler(),
                    update_id = event.update_id,
                    chat_id = event.chat.id,
                    error = %e,
                    "Dispatch failed"
                );
                if let Some(hook) = &self.on_error {
                    hook(event, &e);
                }
            }
        }
    }
}
