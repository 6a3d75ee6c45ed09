//! Handler abstractions
//!
//! The mux only knows the [`Handler`] trait: "do you claim this event?".
//! A [`SimpleHandler`] answers with one predicate test; conversation
//! handlers and nested muxes implement the same trait.

use crate::error::{ActionError, DispatchError};
use crate::event::Event;
use crate::predicate::{Predicate, PredicateError};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Result of offering an event to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler took ownership of the event and processed it
    Claimed,
    /// The handler declined; the mux moves on
    Unclaimed,
}

impl Outcome {
    pub fn is_claimed(self) -> bool {
        self == Outcome::Claimed
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Claim and process the event, or report it as unclaimed
    async fn handle(&self, event: &Event) -> Result<Outcome, DispatchError>;
}

/// Side effect run by a [`SimpleHandler`]
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, event: &Event) -> Result<(), ActionError>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&Event) -> Result<(), ActionError> + Send + Sync,
{
    async fn run(&self, event: &Event) -> Result<(), ActionError> {
        (self.0)(event)
    }
}

/// Stateless (predicate, action) pair
pub struct SimpleHandler {
    name: String,
    predicate: Predicate,
    action: Arc<dyn Action>,
}

impl SimpleHandler {
    pub fn new<F>(name: impl Into<String>, predicate: Predicate, action: F) -> Self
    where
        F: Fn(&Event) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self::with_action(name, predicate, FnAction(action))
    }

    pub fn with_action(
        name: impl Into<String>,
        predicate: Predicate,
        action: impl Action + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate,
            action: Arc::new(action),
        }
    }
}

#[async_trait]
impl Handler for SimpleHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<Outcome, DispatchError> {
        if !evaluate(&self.name, &self.predicate, event)? {
            return Ok(Outcome::Unclaimed);
        }

        match catch_panic(self.action.run(event)).await {
            Ok(Ok(())) => Ok(Outcome::Claimed),
            Ok(Err(source)) => Err(DispatchError::Action {
                handler: self.name.clone(),
                state: None,
                source,
            }),
            Err(message) => Err(DispatchError::ActionPanicked {
                handler: self.name.clone(),
                message,
            }),
        }
    }
}

/// Test a predicate on behalf of `handler`. Recoverable predicate failures
/// count as "no match"; a panicking predicate is a fatal predicate error.
pub(crate) fn evaluate(
    handler: &str,
    predicate: &Predicate,
    event: &Event,
) -> Result<bool, DispatchError> {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| predicate.matches(event)))
        .unwrap_or_else(|payload| {
            Err(PredicateError::fatal(format!(
                "predicate panicked: {}",
                panic_message(&*payload)
            )))
        });

    match outcome {
        Ok(matched) => Ok(matched),
        Err(e) if e.recoverable => {
            tracing::warn!(handler = %handler, error = %e, "Predicate failed, treating as no match");
            Ok(false)
        }
        Err(source) => Err(DispatchError::Predicate {
            handler: handler.to_string(),
            source,
        }),
    }
}

/// Run an action future, turning a panic into an error message
pub(crate) async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(&*payload))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
