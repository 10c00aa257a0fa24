use serde::{Deserialize, Serialize};

pub const GREETING: &str = "Hi, I'm a chatbot who can search the web. How can I help you?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// One message of the visible chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Speaker,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only transcript for one chat session, opened with the greeting.
#[derive(Clone, Debug)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            turns: vec![Turn::assistant(GREETING)],
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn all(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
