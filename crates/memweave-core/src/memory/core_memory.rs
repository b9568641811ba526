//! Core memory: the single evolving profile string for one user.
//!
//! Updated at most once per dialogue turn by one judgment call. A failed
//! call or an empty/sentinel reply keeps the previous snapshot, so a
//! populated profile never regresses to empty.

use std::sync::Arc;

use memweave_types::llm::LlmError;
use memweave_types::memory::{CoreMemorySnapshot, is_empty_profile};

use crate::json_repair::strip_code_fence;
use crate::llm::judgment::JudgmentService;

pub const DEFAULT_MAX_CHARS: usize = 5000;

const CORE_MEMORY_SYSTEM_PROMPT: &str = "\
You maintain the Core Memory of a user: one compact block of plain text that \
summarizes the most important long-term information about them (identity, \
relationships, preferences, plans, health, work).

Merge the new dialogue turn into the existing core memory:
- keep everything still true
- add new durable information
- replace information the turn explicitly corrects
- drop small talk and one-off details

Reply with the complete updated core memory only, no commentary. If the turn \
adds nothing and there is no existing core memory, reply exactly: No core memory yet.";

/// What happened to the profile after one turn.
#[derive(Debug)]
pub enum CoreMemoryUpdate {
    Updated(CoreMemorySnapshot),
    /// The judgment had nothing to add.
    Unchanged,
    /// The call failed; the previous snapshot stands.
    Failed(LlmError),
}

pub struct CoreMemoryUpdater {
    judgment: Arc<JudgmentService>,
    max_chars: usize,
}

impl CoreMemoryUpdater {
    pub fn new(judgment: Arc<JudgmentService>) -> Self {
        Self {
            judgment,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    #[tracing::instrument(
        name = "core_memory.update",
        skip_all,
        fields(previous_len = previous.as_str().len())
    )]
    pub async fn update(&self, turn_text: &str, previous: &CoreMemorySnapshot) -> CoreMemoryUpdate {
        let user = format!(
            "Existing core memory:\n{}\n\nNew dialogue turn:\n{}",
            previous, turn_text
        );

        let reply = match self
            .judgment
            .complete("update_core_memory", Some(CORE_MEMORY_SYSTEM_PROMPT), &user)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "core memory update failed; keeping previous profile");
                return CoreMemoryUpdate::Failed(err);
            }
        };

        let profile = strip_code_fence(&reply).trim().to_string();
        if is_empty_profile(&profile) {
            return CoreMemoryUpdate::Unchanged;
        }
        if profile.chars().count() > self.max_chars {
            tracing::warn!(
                len = profile.chars().count(),
                max_chars = self.max_chars,
                "core memory exceeds configured length"
            );
        }
        if profile == previous.as_str() {
            return CoreMemoryUpdate::Unchanged;
        }
        CoreMemoryUpdate::Updated(CoreMemorySnapshot::new(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::box_provider::BoxLlmProvider;
    use crate::retry::RetryPolicy;
    use crate::testing::ScriptedProvider;
    use memweave_types::memory::EMPTY_CORE_MEMORY;

    fn updater(provider: ScriptedProvider) -> CoreMemoryUpdater {
        let judgment = JudgmentService::new(
            Arc::new(BoxLlmProvider::new(provider)),
            RetryPolicy::immediate(2),
        );
        CoreMemoryUpdater::new(Arc::new(judgment))
    }

    #[tokio::test]
    async fn replaces_profile_with_reply() {
        let updater = updater(ScriptedProvider::new(vec![Ok(
            "Name: Ana. Likes tea.".to_string()
        )]));
        let outcome = updater
            .update("user: I love tea", &CoreMemorySnapshot::default())
            .await;
        match outcome {
            CoreMemoryUpdate::Updated(snapshot) => {
                assert_eq!(snapshot.as_str(), "Name: Ana. Likes tea.")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sentinel_reply_is_unchanged() {
        let updater = updater(ScriptedProvider::new(vec![Ok(EMPTY_CORE_MEMORY.to_string())]));
        let previous = CoreMemorySnapshot::new("Name: Ana");
        assert!(matches!(
            updater.update("user: hello", &previous).await,
            CoreMemoryUpdate::Unchanged
        ));
    }

    #[tokio::test]
    async fn failure_reports_error() {
        let provider = ScriptedProvider::repeating(Err(LlmError::Overloaded("busy".into())));
        let updater = updater(provider);
        assert!(matches!(
            updater.update("user: hello", &CoreMemorySnapshot::new("Name: Ana")).await,
            CoreMemoryUpdate::Failed(LlmError::Overloaded(_))
        ));
    }
}
