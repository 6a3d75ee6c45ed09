//! Event predicates
//!
//! Predicates are pure functions of an event. They never look at persisted
//! conversation state, so the mux may evaluate them any number of times and
//! in any order.

use crate::event::{ChatKind, Event, MediaKind};
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised by a custom predicate
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PredicateError {
    pub message: String,
    /// Recoverable failures count as "no match" for the transition being
    /// tested; anything else aborts dispatch of the event
    pub recoverable: bool,
}

impl PredicateError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

type PredicateFn = dyn Fn(&Event) -> Result<bool, PredicateError> + Send + Sync;

/// A named user-supplied predicate
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    func: Arc<PredicateFn>,
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomPredicate").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches every event
    Any,
    Not(Box<Predicate>),
    /// Matches when every inner predicate matches (an empty list matches)
    All(Vec<Predicate>),
    /// Matches when at least one inner predicate matches
    AnyOf(Vec<Predicate>),
    /// A command with exactly this name
    IsCommand(String),
    IsAnyCommand,
    /// Non-empty plain text; commands do not count
    HasText,
    TextEquals(String),
    HasMedia,
    HasMediaKind(MediaKind),
    /// Regex over the raw text, commands included
    HasRegex(Regex),
    IsPrivate,
    /// Group or supergroup chat
    IsGroup,
    FromUser(i64),
    Custom(CustomPredicate),
}

impl Predicate {
    pub fn any() -> Self {
        Predicate::Any
    }

    #[allow(clippy::should_implement_trait)] // also available as `!predicate`
    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    pub fn command(name: impl Into<String>) -> Self {
        Predicate::IsCommand(name.into())
    }

    pub fn has_text() -> Self {
        Predicate::HasText
    }

    pub fn text_eq(text: impl Into<String>) -> Self {
        Predicate::TextEquals(text.into())
    }

    pub fn has_media() -> Self {
        Predicate::HasMedia
    }

    pub fn has_photo() -> Self {
        Predicate::HasMediaKind(MediaKind::Photo)
    }

    /// Compile a regex predicate. Pattern errors surface here, never during
    /// dispatch.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::HasRegex(Regex::new(pattern)?))
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Event) -> Result<bool, PredicateError> + Send + Sync + 'static,
    {
        Predicate::Custom(CustomPredicate {
            name: name.into(),
            func: Arc::new(func),
        })
    }

    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All(mut inner) => {
                inner.push(other);
                Predicate::All(inner)
            }
            this => Predicate::All(vec![this, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::AnyOf(mut inner) => {
                inner.push(other);
                Predicate::AnyOf(inner)
            }
            this => Predicate::AnyOf(vec![this, other]),
        }
    }

    /// Evaluate against an event. Combinators short-circuit; a failing inner
    /// predicate fails the whole evaluation.
    pub fn matches(&self, event: &Event) -> Result<bool, PredicateError> {
        let matched = match self {
            Predicate::Any => true,
            Predicate::Not(inner) => !inner.matches(event)?,
            Predicate::All(inner) => {
                for p in inner {
                    if !p.matches(event)? {
                        return Ok(false);
                    }
                }
                true
            }
            Predicate::AnyOf(inner) => {
                for p in inner {
                    if p.matches(event)? {
                        return Ok(true);
                    }
                }
                false
            }
            Predicate::IsCommand(name) => event.command().is_some_and(|c| &c.name == name),
            Predicate::IsAnyCommand => event.command().is_some(),
            Predicate::HasText => event.message_text().is_some_and(|t| !t.is_empty()),
            Predicate::TextEquals(expected) => event.message_text() == Some(expected.as_str()),
            Predicate::HasMedia => event.media().is_some(),
            Predicate::HasMediaKind(kind) => event.media().is_some_and(|m| m.kind == *kind),
            Predicate::HasRegex(re) => event.raw_text().is_some_and(|t| re.is_match(t)),
            Predicate::IsPrivate => event.chat.kind == ChatKind::Private,
            Predicate::IsGroup => {
                matches!(event.chat.kind, ChatKind::Group | ChatKind::Supergroup)
            }
            Predicate::FromUser(id) => event.from.as_ref().is_some_and(|u| u.id == *id),
            Predicate::Custom(custom) => (custom.func)(event)?,
        };
        Ok(matched)
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::User;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_builtin_predicates() {
        let text = Event::text(1, "Paris trip");
        let cmd = Event::text(1, "/add");
        let photo = Event::photo(1, "f1");

        assert!(Predicate::any().matches(&photo).unwrap());

        assert!(Predicate::command("add").matches(&cmd).unwrap());
        assert!(!Predicate::command("cancel").matches(&cmd).unwrap());
        assert!(!Predicate::command("add").matches(&text).unwrap());

        assert!(Predicate::has_text().matches(&text).unwrap());
        assert!(!Predicate::has_text().matches(&cmd).unwrap());
        assert!(!Predicate::has_text().matches(&photo).unwrap());

        assert!(Predicate::has_photo().matches(&photo).unwrap());
        assert!(Predicate::has_media().matches(&photo).unwrap());
        assert!(!Predicate::HasMediaKind(MediaKind::Video).matches(&photo).unwrap());

        assert!(Predicate::text_eq("Paris trip").matches(&text).unwrap());
        assert!(!Predicate::text_eq("Paris").matches(&text).unwrap());
    }

    #[test]
    fn test_regex_sees_command_text() {
        let view = Predicate::regex(r"^/view_(\d+)$").unwrap();
        assert!(view.matches(&Event::text(1, "/view_12")).unwrap());
        assert!(!view.matches(&Event::text(1, "/view_x")).unwrap());
        assert!(!view.matches(&Event::photo(1, "f")).unwrap());

        assert!(Predicate::regex("(").is_err());
    }

    #[test]
    fn test_combinators() {
        let not_cancel = !Predicate::command("cancel");
        assert!(!not_cancel.matches(&Event::text(1, "/cancel")).unwrap());
        assert!(not_cancel.matches(&Event::text(1, "hello")).unwrap());

        let group_text = Predicate::IsGroup.and(Predicate::has_text());
        let event = Event::text(1, "hi").with_chat_kind(ChatKind::Supergroup);
        assert!(group_text.matches(&event).unwrap());
        assert!(!group_text.matches(&Event::text(1, "hi")).unwrap());

        let either = Predicate::has_photo().or(Predicate::FromUser(9));
        let from_nine = Event::text(1, "x").with_sender(User {
            id: 9,
            username: None,
        });
        assert!(either.matches(&from_nine).unwrap());
        assert!(!either.matches(&Event::text(1, "x")).unwrap());

        assert!(Predicate::All(vec![]).matches(&Event::text(1, "x")).unwrap());
        assert!(!Predicate::AnyOf(vec![]).matches(&Event::text(1, "x")).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_later_predicates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let counted = Predicate::custom("counted", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        let p = Predicate::any().or(counted);
        assert!(p.matches(&Event::text(1, "x")).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_custom_errors_propagate() {
        let failing = Predicate::custom("lookup", |_| Err(PredicateError::fatal("backend down")));
        let err = Predicate::not(failing).matches(&Event::text(1, "x")).unwrap_err();
        assert!(!err.recoverable);
        assert_eq!(err.to_string(), "backend down");
    }
}
