//! Fact extraction from one dialogue chunk.
//!
//! One judgment call per chunk. The decoded `facts` array is turned into
//! [`Fact`]s stamped with the date found in the chunk's bracketed header.
//! Any failure after the retry budget yields no facts rather than an error.

use std::sync::{Arc, OnceLock};

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;

use memweave_types::memory::{CoreMemorySnapshot, Fact, UNKNOWN_TIMESTAMP, WorkingMemoryEntry};

use super::working::render_entries;
use crate::llm::judgment::JudgmentService;

pub const FACTS_FIELD: &str = "facts";

const EXTRACTION_PROMPT: &str = r#"You are a Personal Information Organizer. Extract durable facts about the user from the conversation turn: preferences, personal details, relationships, plans, health, work, possessions and notable events.

Rules:
- One atomic fact per entry, phrased about the user (e.g. "Likes green tea").
- Attach supporting details as "Category: Value" strings.
- Ignore greetings, small talk and anything said only by the assistant.
- If nothing is worth remembering, return {"facts": []}.

Reply with JSON only, in this shape:
{"facts": [{"fact": "Likes green tea", "details": ["Category: Beverage preference"]}]}"#;

/// Facts from one chunk plus whether extraction had to give up.
#[derive(Debug, Default)]
pub struct Extraction {
    pub facts: Vec<Fact>,
    pub degraded: bool,
}

pub struct FactExtractor {
    judgment: Arc<JudgmentService>,
}

impl FactExtractor {
    pub fn new(judgment: Arc<JudgmentService>) -> Self {
        Self { judgment }
    }

    fn system_prompt(core: &CoreMemorySnapshot, recent: &[&WorkingMemoryEntry]) -> String {
        format!(
            "{EXTRACTION_PROMPT}\n\nToday's date: {}\n\nCore memory:\n{}\n\nRecent working memory:\n{}",
            Utc::now().format("%Y-%m-%d"),
            core,
            render_entries(recent),
        )
    }

    #[tracing::instrument(
        name = "fact_extractor.extract",
        skip_all,
        fields(chunk_len = chunk.len())
    )]
    pub async fn extract(
        &self,
        chunk: &str,
        core: &CoreMemorySnapshot,
        recent: &[&WorkingMemoryEntry],
    ) -> Extraction {
        let system = Self::system_prompt(core, recent);
        let user = format!("Input:\n{chunk}");

        let value = match self
            .judgment
            .complete_json("extract_facts", Some(&system), &user, FACTS_FIELD)
            .await
        {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "fact extraction failed; continuing with no facts");
                return Extraction {
                    facts: Vec::new(),
                    degraded: true,
                };
            }
        };

        let timestamp = resolve_timestamp(chunk);
        let facts = parse_facts(&value, &timestamp);
        tracing::debug!(count = facts.len(), %timestamp, "facts extracted");
        Extraction {
            facts,
            degraded: false,
        }
    }
}

fn date_header_regex() -> Option<&'static Regex> {
    static HEADER: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER
        .get_or_init(|| Regex::new(r"\[\s*(\d{4})[/-](\d{1,2})[/-](\d{1,2})[^\]\n]*\]").ok())
        .as_ref()
}

/// Date of the first bracketed header in `chunk` as `YYYY-MM-DD`, or
/// [`UNKNOWN_TIMESTAMP`] when there is none or it is not a real date.
pub fn resolve_timestamp(chunk: &str) -> String {
    let Some(caps) = date_header_regex().and_then(|re| re.captures(chunk)) else {
        return UNKNOWN_TIMESTAMP.to_string();
    };
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let date = match (part(1), part(2), part(3)) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y as i32, m, d),
        _ => None,
    };
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string())
}

/// Convert the decoded `facts` array into [`Fact`]s.
///
/// Entries may be plain strings or `{"fact", "details"}` objects; details
/// may be a string list or an object. Empty facts are dropped, and so are
/// `Timestamp:` details since the timestamp is resolved from the chunk.
pub fn parse_facts(value: &Value, timestamp: &str) -> Vec<Fact> {
    let Some(items) = value.get(FACTS_FIELD).and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let (text, details) = match item {
                Value::String(s) => (s.trim().to_string(), Vec::new()),
                Value::Object(obj) => {
                    let text = obj
                        .get("fact")
                        .or_else(|| obj.get("text"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    (text, obj.get("details").map(parse_details).unwrap_or_default())
                }
                _ => return None,
            };
            if text.is_empty() {
                return None;
            }
            Some(Fact::new(text, details, timestamp))
        })
        .collect()
}

fn parse_details(value: &Value) -> Vec<String> {
    let entries: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect(),
        Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}: {}", s.trim()),
                other => format!("{k}: {other}"),
            })
            .collect(),
        Value::String(s) => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter(|d| !d.is_empty() && !d.to_ascii_lowercase().starts_with("timestamp:"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::box_provider::BoxLlmProvider;
    use crate::retry::RetryPolicy;
    use crate::testing::ScriptedProvider;
    use memweave_types::llm::LlmError;
    use serde_json::json;

    fn extractor(provider: ScriptedProvider) -> FactExtractor {
        let judgment = JudgmentService::new(
            Arc::new(BoxLlmProvider::new(provider)),
            RetryPolicy::immediate(3),
        );
        FactExtractor::new(Arc::new(judgment))
    }

    #[test]
    fn resolves_common_headers() {
        assert_eq!(resolve_timestamp("[2023/05/20 (Sat) 02:21]\nuser: hi"), "2023-05-20");
        assert_eq!(resolve_timestamp("[2023-05-20]\nuser: hi"), "2023-05-20");
        assert_eq!(resolve_timestamp("[2023/5/2]\nuser: hi"), "2023-05-02");
        assert_eq!(resolve_timestamp("[2023-05-20T10:00:00Z]\nuser: hi"), "2023-05-20");
    }

    #[test]
    fn missing_or_invalid_header_is_unknown() {
        assert_eq!(resolve_timestamp("user: hi"), UNKNOWN_TIMESTAMP);
        assert_eq!(resolve_timestamp("[2023/02/30]\nuser: hi"), UNKNOWN_TIMESTAMP);
    }

    #[test]
    fn parses_mixed_fact_shapes() {
        let value = json!({"facts": [
            {"fact": "Likes tea", "details": ["Category: Drinks", "Timestamp: 2023-05-20"]},
            {"fact": "Has a dog", "details": {"Name": "Rex"}},
            "Lives in Oslo",
            {"fact": "  ", "details": []},
            42
        ]});
        let facts = parse_facts(&value, "2023-05-20");
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].details, vec!["Category: Drinks"]);
        assert_eq!(facts[1].details, vec!["Name: Rex"]);
        assert_eq!(facts[2].text, "Lives in Oslo");
        assert!(facts.iter().all(|f| f.timestamp == "2023-05-20"));
    }

    #[tokio::test]
    async fn non_informational_chunk_yields_no_facts() {
        let extractor = extractor(ScriptedProvider::new(vec![Ok(r#"{"facts" : []}"#.to_string())]));
        let out = extractor
            .extract("user: hello\nassistant: hi!", &CoreMemorySnapshot::default(), &[])
            .await;
        assert!(out.facts.is_empty());
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn fenced_unquoted_output_is_recovered() {
        let reply = "```json\n{facts: [{fact: User likes tea, details: [Category: Drinks]}]}\n```";
        let extractor = extractor(ScriptedProvider::new(vec![Ok(reply.to_string())]));
        let out = extractor
            .extract(
                "[2023/05/20 (Sat) 02:21]\nuser: I love tea",
                &CoreMemorySnapshot::default(),
                &[],
            )
            .await;
        assert_eq!(out.facts.len(), 1);
        assert_eq!(out.facts[0].text, "User likes tea");
        assert_eq!(out.facts[0].timestamp, "2023-05-20");
    }

    #[tokio::test]
    async fn fails_open_after_budget() {
        let provider = ScriptedProvider::repeating(Err(LlmError::Timeout(10)));
        let calls = provider.call_counter();
        let extractor = extractor(provider);
        let out = extractor
            .extract("user: I love tea", &CoreMemorySnapshot::default(), &[])
            .await;
        assert!(out.facts.is_empty());
        assert!(out.degraded);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
