//! Conversation state machine
//!
//! A conversation handler owns a map from state label to an ordered list of
//! transitions, plus an ordered list of fallback transitions that apply in
//! every state. For each event it:
//!
//! 1. locks the conversation key,
//! 2. loads the record (initial record for unseen keys),
//! 3. scans the current state's transitions followed by the fallbacks and
//!    picks the first whose predicate matches,
//! 4. runs the winner's action against a working copy of the record,
//! 5. commits the working copy exactly once if the action succeeded.
//!
//! If nothing matches the handler reports the event as unclaimed and the
//! record is left alone. A state label with no declared transitions only
//! sees the fallbacks.

mod locks;

#[cfg(test)]
mod proptests;

use crate::context::MutationContext;
use crate::error::{ActionError, DispatchError};
use crate::event::{ConversationKey, Event, KeyStrategy};
use crate::handler::{catch_panic, evaluate, Handler, Outcome};
use crate::predicate::Predicate;
use crate::store::{ConversationRecord, ConversationStore, StoreError};
use async_trait::async_trait;
use locks::KeyLocks;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Side effect of a transition, with access to the conversation's record
#[async_trait]
pub trait TransitionAction: Send + Sync {
    async fn run(&self, event: &Event, ctx: &mut MutationContext) -> Result<(), ActionError>;
}

struct FnTransitionAction<F>(F);

#[async_trait]
impl<F> TransitionAction for FnTransitionAction<F>
where
    F: Fn(&Event, &mut MutationContext) -> Result<(), ActionError> + Send + Sync,
{
    async fn run(&self, event: &Event, ctx: &mut MutationContext) -> Result<(), ActionError> {
        (self.0)(event, ctx)
    }
}

/// Predicate-guarded action declared under a state or as a fallback
#[derive(Clone)]
pub struct Transition {
    predicate: Predicate,
    action: Arc<dyn TransitionAction>,
}

impl Transition {
    pub fn new<F>(predicate: Predicate, action: F) -> Self
    where
        F: Fn(&Event, &mut MutationContext) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self::with_action(predicate, FnTransitionAction(action))
    }

    pub fn with_action(predicate: Predicate, action: impl TransitionAction + 'static) -> Self {
        Self {
            predicate,
            action: Arc::new(action),
        }
    }
}

/// Where the winning transition was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    State(usize),
    Fallback(usize),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::State(i) => write!(f, "state#{i}"),
            Origin::Fallback(i) => write!(f, "fallback#{i}"),
        }
    }
}

pub struct ConversationHandler {
    name: String,
    store: Arc<dyn ConversationStore>,
    key_strategy: KeyStrategy,
    states: HashMap<String, Vec<Transition>>,
    fallbacks: Vec<Transition>,
    locks: KeyLocks,
}

pub struct ConversationHandlerBuilder {
    name: String,
    store: Arc<dyn ConversationStore>,
    key_strategy: KeyStrategy,
    states: HashMap<String, Vec<Transition>>,
    fallbacks: Vec<Transition>,
}

impl ConversationHandlerBuilder {
    /// Append transitions to `label`. Order across calls is preserved.
    #[must_use]
    pub fn state(
        mut self,
        label: impl Into<String>,
        transitions: impl IntoIterator<Item = Transition>,
    ) -> Self {
        self.states
            .entry(label.into())
            .or_default()
            .extend(transitions);
        self
    }

    /// Append a fallback transition, checked after the current state's own
    #[must_use]
    pub fn fallback(mut self, transition: Transition) -> Self {
        self.fallbacks.push(transition);
        self
    }

    #[must_use]
    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    pub fn build(self) -> ConversationHandler {
        ConversationHandler {
            name: self.name,
            store: self.store,
            key_strategy: self.key_strategy,
            states: self.states,
            fallbacks: self.fallbacks,
            locks: KeyLocks::new(),
        }
    }
}

impl ConversationHandler {
    pub fn builder(
        name: impl Into<String>,
        store: Arc<dyn ConversationStore>,
    ) -> ConversationHandlerBuilder {
        ConversationHandlerBuilder {
            name: name.into(),
            store,
            key_strategy: KeyStrategy::default(),
            states: HashMap::new(),
            fallbacks: Vec::new(),
        }
    }

    /// Declared state labels, sorted
    pub fn states(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.states.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    pub fn key_strategy(&self) -> KeyStrategy {
        self.key_strategy
    }

    /// Current stored record for `key`
    pub async fn record(&self, key: &ConversationKey) -> Result<ConversationRecord, StoreError> {
        self.store.load(key).await
    }

    /// First transition matching `event` in `state`, then the fallbacks
    fn select(
        &self,
        state: &str,
        event: &Event,
    ) -> Result<Option<(Origin, &Transition)>, DispatchError> {
        let own = self
            .states
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, t)| (Origin::State(i), t));
        let fallbacks = self
            .fallbacks
            .iter()
            .enumerate()
            .map(|(i, t)| (Origin::Fallback(i), t));

        for (origin, transition) in own.chain(fallbacks) {
            if evaluate(&self.name, &transition.predicate, event)? {
                return Ok(Some((origin, transition)));
            }
        }
        Ok(None)
    }

    fn persistence_error(&self, source: StoreError) -> DispatchError {
        DispatchError::Persistence {
            handler: self.name.clone(),
            source,
        }
    }
}

#[async_trait]
impl Handler for ConversationHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<Outcome, DispatchError> {
        let key = self.key_strategy.key_for(event);

        // Load, match, act and commit form one critical section per key
        let _guard = self.locks.lock(&key).await;

        let record = self
            .store
            .load(&key)
            .await
            .map_err(|e| self.persistence_error(e))?;

        let Some((origin, transition)) = self.select(&record.state, event)? else {
            tracing::trace!(
                handler = %self.name,
                key = %key,
                state = %record.state,
                "No transition matched"
            );
            return Ok(Outcome::Unclaimed);
        };

        let from_state = record.state.clone();
        let mut ctx = MutationContext::new(key.clone(), record);

        match catch_panic(transition.action.run(event, &mut ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(DispatchError::Action {
                    handler: self.name.clone(),
                    state: Some(from_state),
                    source,
                });
            }
            Err(message) => {
                return Err(DispatchError::ActionPanicked {
                    handler: self.name.clone(),
                    message,
                });
            }
        }

        let record = ctx.into_record();
        self.store
            .commit(&key, &record)
            .await
            .map_err(|e| self.persistence_error(e))?;

        tracing::debug!(
            handler = %self.name,
            key = %key,
            from = %from_state,
            to = %record.state,
            via = %origin,
            "Conversation advanced"
        );
        Ok(Outcome::Claimed)
    }
}
