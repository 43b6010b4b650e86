//! Message fragments.
//!
//! A [`Message`] is an ordered list of [`Fragment`]s. Handlers build replies
//! out of fragments; the reply buffer sends them one by one, preserving order.

use serde::{Deserialize, Serialize};

use crate::event::UserId;

/// Reference to a media item held by the transport (URL, file id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef(pub String);

impl MediaRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The smallest unit of outgoing or incoming content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Fragment {
    /// Plain text.
    Text(String),
    /// An image or other attachment.
    Media(MediaRef),
    /// A mention of a user.
    Mention(UserId),
}

impl Fragment {
    /// Creates a text fragment.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Creates a media fragment.
    pub fn media(reference: impl Into<String>) -> Self {
        Self::Media(MediaRef::new(reference))
    }

    /// Creates a mention fragment.
    pub fn mention(user: impl Into<UserId>) -> Self {
        Self::Mention(user.into())
    }

    /// Returns the text content if this is a text fragment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable rendering used by console transports and logs.
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Media(m) => format!("[media:{}]", m.as_str()),
            Self::Mention(u) => format!("@{u}"),
        }
    }
}

impl From<&str> for Fragment {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for Fragment {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// An ordered sequence of fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message(Vec<Fragment>);

impl Message {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a text fragment.
    pub fn text(mut self, s: impl Into<String>) -> Self {
        self.0.push(Fragment::text(s));
        self
    }

    /// Appends a media fragment.
    pub fn media(mut self, reference: impl Into<String>) -> Self {
        self.0.push(Fragment::media(reference));
        self
    }

    /// Appends a mention fragment.
    pub fn mention(mut self, user: impl Into<UserId>) -> Self {
        self.0.push(Fragment::mention(user));
        self
    }

    pub fn push(&mut self, fragment: Fragment) {
        self.0.push(fragment);
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.0
    }

    pub fn into_fragments(self) -> Vec<Fragment> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenates all text fragments, skipping media and mentions.
    pub fn plain_text(&self) -> String {
        self.0.iter().filter_map(Fragment::as_text).collect()
    }
}

impl From<Vec<Fragment>> for Message {
    fn from(fragments: Vec<Fragment>) -> Self {
        Self(fragments)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self(vec![Fragment::text(s)])
    }
}

impl IntoIterator for Message {
    type Item = Fragment;
    type IntoIter = std::vec::IntoIter<Fragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_skips_non_text() {
        let msg = Message::new()
            .mention("42")
            .text("/puzzle ")
            .media("a.png")
            .text("start");
        assert_eq!(msg.plain_text(), "/puzzle start");
        assert_eq!(msg.fragments().len(), 4);
    }

    #[test]
    fn display_rendering() {
        assert_eq!(Fragment::mention("7").display(), "@7");
        assert_eq!(Fragment::media("x.jpg").display(), "[media:x.jpg]");
    }
}
