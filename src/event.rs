//! Inbound events routed through the mux

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier scoping one independent dialog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a whole chat
    pub fn for_chat(chat_id: i64) -> Self {
        Self(chat_id.to_string())
    }

    /// Key for one sender inside a chat
    pub fn for_chat_user(chat_id: i64, user_id: i64) -> Self {
        Self(format!("{chat_id}:{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// How a conversation handler derives its key from an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// One dialog per chat
    #[default]
    Chat,
    /// One dialog per sender within a chat (falls back to the chat when the
    /// sender is unknown)
    ChatAndUser,
}

impl KeyStrategy {
    pub fn key_for(self, event: &Event) -> ConversationKey {
        match (self, &event.from) {
            (KeyStrategy::ChatAndUser, Some(user)) => {
                ConversationKey::for_chat_user(event.chat.id, user.id)
            }
            _ => event.conversation_key(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    #[default]
    Private,
    Group,
    Supergroup,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub kind: ChatKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// A bot command such as `/view_3 extra args`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command name without the leading slash or `@botname` suffix
    pub name: String,
    pub args: String,
    /// The message text exactly as it was sent
    pub raw: String,
}

impl Command {
    /// Parse a command from message text. Returns `None` unless the text
    /// starts with `/` followed by a non-empty name.
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.strip_prefix('/')?;
        let (head, args) = match body.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (body, ""),
        };
        let name = head.split_once('@').map_or(head, |(name, _bot)| name);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            args: args.to_string(),
            raw: text.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    Document,
    Sticker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    /// Transport file identifiers; photos usually carry several sizes
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Event content, discriminated by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text { text: String },
    Command(Command),
    Media(Media),
}

/// One inbound occurrence. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub update_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub message_id: Option<i64>,
    pub payload: Payload,
}

impl Event {
    pub fn new(chat_id: i64, payload: Payload) -> Self {
        Self {
            update_id: 0,
            chat: Chat {
                id: chat_id,
                kind: ChatKind::Private,
            },
            from: None,
            message_id: None,
            payload,
        }
    }

    /// Text message; text starting with `/` becomes a command
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        let text = text.into();
        let payload = match Command::parse(&text) {
            Some(command) => Payload::Command(command),
            None => Payload::Text { text },
        };
        Self::new(chat_id, payload)
    }

    pub fn photo(chat_id: i64, file_id: impl Into<String>) -> Self {
        Self::new(
            chat_id,
            Payload::Media(Media {
                kind: MediaKind::Photo,
                file_ids: vec![file_id.into()],
                caption: None,
            }),
        )
    }

    pub fn with_update_id(mut self, update_id: i64) -> Self {
        self.update_id = update_id;
        self
    }

    pub fn with_chat_kind(mut self, kind: ChatKind) -> Self {
        self.chat.kind = kind;
        self
    }

    pub fn with_sender(mut self, user: User) -> Self {
        self.from = Some(user);
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Default conversation key: the originating chat
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::for_chat(self.chat.id)
    }

    /// Plain (non-command) text, if any
    pub fn message_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Text as typed by the sender, commands included
    pub fn raw_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text { text } => Some(text),
            Payload::Command(command) => Some(&command.raw),
            Payload::Media(_) => None,
        }
    }

    pub fn command(&self) -> Option<&Command> {
        match &self.payload {
            Payload::Command(command) => Some(command),
            _ => None,
        }
    }

    pub fn media(&self) -> Option<&Media> {
        match &self.payload {
            Payload::Media(media) => Some(media),
            _ => None,
        }
    }
}
