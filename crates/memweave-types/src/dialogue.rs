//! Dialogue input types.
//!
//! A [`ReconciliationUnit`] is one user's history: an ordered list of
//! sessions, each an ordered list of turns, plus the date of each session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Speaker of a dialogue turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    System,
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::System => write!(f, "system"),
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: Speaker,
    pub content: String,
}

/// One independent reconciliation unit, read from one JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationUnit {
    #[serde(alias = "question_id")]
    pub unit_id: String,
    #[serde(default, alias = "haystack_sessions")]
    pub sessions: Vec<Vec<DialogueTurn>>,
    /// Raw session dates, e.g. `2023/05/20 (Sat) 02:21`.
    #[serde(default, alias = "haystack_dates")]
    pub session_dates: Vec<String>,
}

/// A user turn and the assistant reply that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueChunk {
    /// Session date as it appeared in the input, if any.
    pub date: Option<String>,
    pub user: String,
    pub assistant: Option<String>,
}

impl DialogueChunk {
    /// Render the chunk as prompt text, prefixed with a bracketed date header.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(date) = &self.date {
            out.push_str(&format!("[{date}]\n"));
        }
        out.push_str(&format!("user: {}", self.user));
        if let Some(reply) = &self.assistant {
            out.push_str(&format!("\nassistant: {reply}"));
        }
        out
    }
}

impl ReconciliationUnit {
    /// Split every session into user/assistant chunks, in order.
    ///
    /// System turns are dropped; an assistant turn with no preceding user
    /// turn is dropped as well.
    pub fn chunks(&self) -> Vec<DialogueChunk> {
        let mut chunks = Vec::new();
        for (idx, session) in self.sessions.iter().enumerate() {
            let date = self.session_dates.get(idx).cloned();
            let mut pending: Option<DialogueChunk> = None;
            for turn in session {
                match turn.role {
                    Speaker::User => {
                        if let Some(chunk) = pending.take() {
                            chunks.push(chunk);
                        }
                        pending = Some(DialogueChunk {
                            date: date.clone(),
                            user: turn.content.clone(),
                            assistant: None,
                        });
                    }
                    Speaker::Assistant => {
                        if let Some(mut chunk) = pending.take() {
                            chunk.assistant = Some(turn.content.clone());
                            chunks.push(chunk);
                        }
                    }
                    Speaker::System => {}
                }
            }
            if let Some(chunk) = pending.take() {
                chunks.push(chunk);
            }
        }
        chunks
    }
}
