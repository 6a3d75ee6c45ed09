//! Dispatcher
//!
//! An ordered registry of handlers. Each event goes to the first handler
//! that claims it; later handlers never see it. Events nobody claims are
//! dropped, which is a normal outcome rather than an error.

use crate::error::DispatchError;
use crate::event::Event;
use crate::handler::{Handler, Outcome};
use async_trait::async_trait;

pub struct Mux {
    name: String,
    handlers: Vec<Box<dyn Handler>>,
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl Mux {
    pub fn new() -> Self {
        Self::named("mux")
    }

    /// A mux with a name, useful when nesting muxes
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Vec::new(),
        }
    }

    /// Append a handler; registration order is match order
    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn add_handler(&mut self, handler: impl Handler + 'static) -> &mut Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Route `event` to the first handler that claims it
    ///
    /// Returns `Outcome::Unclaimed` when every handler declined. Errors stop
    /// the scan: a failing handler is never followed by another one.
    pub async fn dispatch(&self, event: &Event) -> Result<Outcome, DispatchError> {
        for handler in &self.handlers {
            if handler.handle(event).await?.is_claimed() {
                tracing::debug!(
                    mux = %self.name,
                    handler = %handler.name(),
                    update_id = event.update_id,
                    chat_id = event.chat.id,
                    "Event claimed"
                );
                return Ok(Outcome::Claimed);
            }
        }

        tracing::trace!(
            mux = %self.name,
            update_id = event.update_id,
            chat_id = event.chat.id,
            "Event dropped, no handler claimed it"
        );
        Ok(Outcome::Unclaimed)
    }
}

#[async_trait]
impl Handler for Mux {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<Outcome, DispatchError> {
        self.dispatch(event).await
    }
}
