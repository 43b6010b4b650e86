//! Inbound chat events.
//!
//! The transport decodes its wire format into a [`MessageEvent`]; everything
//! downstream of the transport only sees this type.
//!
//! ```text
//! MessageEvent { message_id, sender, chat, message }
//! └── ChatKind::Group { group_id }   → conversation "group:<group_id>"
//! └── ChatKind::Private              → conversation "private:<sender>"
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::Message;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a chat user.
    UserId
);
string_id!(
    /// Identifier of a group chat.
    GroupId
);
string_id!(
    /// Identifier of a conversation: one group, or one private chat with a user.
    ConversationId
);

/// Where a message was posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatKind {
    /// Posted in a group chat.
    Group { group_id: GroupId },
    /// Sent directly to the bot.
    Private,
}

/// A message received by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Transport-assigned message id.
    pub message_id: u64,
    /// Author of the message.
    pub sender: UserId,
    /// Group or private chat.
    pub chat: ChatKind,
    /// Message body.
    pub message: Message,
}

impl MessageEvent {
    /// Creates a group message event with a single text fragment.
    pub fn group(
        message_id: u64,
        group_id: impl Into<GroupId>,
        sender: impl Into<UserId>,
        text: &str,
    ) -> Self {
        Self {
            message_id,
            sender: sender.into(),
            chat: ChatKind::Group {
                group_id: group_id.into(),
            },
            message: Message::from(text),
        }
    }

    /// Creates a private message event with a single text fragment.
    pub fn private(message_id: u64, sender: impl Into<UserId>, text: &str) -> Self {
        Self {
            message_id,
            sender: sender.into(),
            chat: ChatKind::Private,
            message: Message::from(text),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.chat, ChatKind::Group { .. })
    }

    /// Returns the group id for group messages.
    pub fn group_id(&self) -> Option<&GroupId> {
        match &self.chat {
            ChatKind::Group { group_id } => Some(group_id),
            ChatKind::Private => None,
        }
    }

    /// Stable key of the conversation this event belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        match &self.chat {
            ChatKind::Group { group_id } => ConversationId(format!("group:{group_id}")),
            ChatKind::Private => ConversationId(format!("private:{}", self.sender)),
        }
    }

    /// Concatenated text fragments of the message.
    pub fn plain_text(&self) -> String {
        self.message.plain_text()
    }
}
