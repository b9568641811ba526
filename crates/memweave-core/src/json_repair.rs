//! Recovery of structured JSON from untrusted model text.
//!
//! Model responses are supposed to be JSON but routinely arrive wrapped in
//! code fences, surrounded by prose, with unquoted keys or values, missing
//! commas, or truncated before the closing braces. [`decode`] runs a layered
//! recovery that short-circuits on the first success:
//!
//! 1. strip a fenced code block
//! 2. isolate the first top-level object or array (arrays are wrapped as
//!    `{"<field>": [...]}`)
//! 3. strict parse; valid input is returned untouched
//! 4. structural repair: quote bare keys and scalar values, insert missing
//!    commas between adjacent containers, close unbalanced containers
//! 5. strict re-parse, then a JSON5 parse (comments, trailing commas,
//!    single quotes, Python literals), then extraction of the named array
//!    field on its own
//!
//! Every path returns a typed result; nothing here panics on bad input.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use memweave_types::error::MalformedResponse;

/// Array field used when a bare array has to be wrapped into an object.
pub const DEFAULT_ARRAY_FIELD: &str = "facts";

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// Decode model text, wrapping bare arrays under `"facts"`.
pub fn decode(text: &str) -> Result<Value, MalformedResponse> {
    decode_with_field(text, DEFAULT_ARRAY_FIELD)
}

/// Decode model text, using `field` as the array field for wrapping and
/// for the last-resort extraction step.
pub fn decode_with_field(text: &str, field: &str) -> Result<Value, MalformedResponse> {
    let stripped = strip_code_fence(text);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return Err(MalformedResponse::new("response is empty"));
    }

    let candidate = isolate_json(trimmed, field);

    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        return Ok(value);
    }

    let repaired = repair_structure(&candidate);
    if let Some(value) = serde_json::from_str::<Value>(&repaired)
        .ok()
        .filter(is_container)
    {
        tracing::debug!("recovered model JSON after structural repair");
        return Ok(value);
    }

    if let Some(value) = parse_relaxed(&candidate)
        .or_else(|| parse_relaxed(&repaired))
        .filter(is_container)
    {
        tracing::debug!("recovered model JSON with relaxed grammar");
        return Ok(value);
    }

    if let Some(array) = extract_array_field(trimmed, field) {
        tracing::debug!(field, "recovered model JSON from named array field");
        let mut object = Map::new();
        object.insert(field.to_string(), array);
        return Ok(Value::Object(object));
    }

    Err(MalformedResponse::new(format!(
        "no recoverable JSON in {} chars of output",
        text.len()
    )))
}

/// Remove a fenced code block wrapper, returning the fenced body.
///
/// Text without a fence is returned as-is. An opening fence with no closing
/// fence (a truncated response) loses only the opening line.
pub fn strip_code_fence(text: &str) -> &str {
    if let Some(body) = fence_regex()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
    {
        return body.as_str();
    }

    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("```") {
        return match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => "",
        };
    }
    text
}

/// Step 2: pick out the JSON-looking span of the text.
fn isolate_json(text: &str, field: &str) -> String {
    if text.starts_with('{') && text.ends_with('}') {
        return text.to_string();
    }

    let Some(start) = text.find(['{', '[']) else {
        return text.to_string();
    };

    // An unterminated span runs to the end of the text so repair can close it.
    let span = match matching_close(text, start) {
        Some(end) => &text[start..=end],
        None => &text[start..],
    };

    if span.starts_with('[') {
        format!("{{\"{field}\": {span}}}")
    } else {
        span.to_string()
    }
}

/// Index of the bracket closing the one at `open`, skipping string contents.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[open..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// Step 4: structural repair.
///
/// String literals are copied verbatim, so colons and braces inside them
/// never trigger a fix.
fn repair_structure(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut stack: Vec<Container> = Vec::new();
    // Last structural character emitted; 'v' stands for any complete value.
    let mut last: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '"' | '\'' => {
                let end = copy_string(&chars, i, &mut out);
                last = Some('v');
                i = end;
            }
            '{' | '[' => {
                if matches!(last, Some('}') | Some(']') | Some('v')) && !stack.is_empty() {
                    out.push(',');
                }
                stack.push(if ch == '{' {
                    Container::Object
                } else {
                    Container::Array
                });
                out.push(ch);
                last = Some(ch);
                i += 1;
            }
            '}' | ']' => {
                stack.pop();
                out.push(ch);
                last = Some(ch);
                i += 1;
            }
            ',' | ':' => {
                out.push(ch);
                last = Some(ch);
                i += 1;
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            _ => {
                let in_object = stack.last() == Some(&Container::Object);
                let key_position = in_object && matches!(last, Some('{') | Some(','));
                let (token, end, is_key) = read_bare_token(&chars, i, key_position);
                if is_key {
                    out.push_str(&quote(&token));
                } else if is_literal(&token) {
                    out.push_str(&token);
                } else {
                    out.push_str(&quote(&token));
                }
                last = Some('v');
                i = end;
            }
        }
    }

    for container in stack.iter().rev() {
        out.push(match container {
            Container::Object => '}',
            Container::Array => ']',
        });
    }
    out
}

/// Copy a quoted literal starting at `start`; closes it if the text ends first.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote_char = chars[start];
    out.push(quote_char);
    let mut i = start + 1;
    let mut escaped = false;
    while i < chars.len() {
        let ch = chars[i];
        out.push(ch);
        i += 1;
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote_char {
            return i;
        }
    }
    out.push(quote_char);
    i
}

/// Read an unquoted run. Keys stop at `:`; values stop at `,`, `}`, `]` or
/// a line break. Returns the trimmed token, the index after it, and whether
/// it turned out to be a key.
fn read_bare_token(chars: &[char], start: usize, key_position: bool) -> (String, usize, bool) {
    let mut i = start;
    let mut token = String::new();
    while i < chars.len() {
        let ch = chars[i];
        if key_position && ch == ':' {
            return (token.trim().to_string(), i, true);
        }
        if matches!(ch, ',' | '}' | ']' | '\n' | '\r') {
            break;
        }
        token.push(ch);
        i += 1;
    }
    (token.trim().to_string(), i, false)
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn is_literal(token: &str) -> bool {
    matches!(token, "true" | "false" | "null")
        || serde_json::from_str::<Value>(token).is_ok_and(|v| v.is_number())
}

fn quote(token: &str) -> String {
    Value::String(token.to_string()).to_string()
}

fn python_literal_regex() -> Option<&'static Regex> {
    static LITERAL: OnceLock<Option<Regex>> = OnceLock::new();
    LITERAL
        .get_or_init(|| Regex::new(r"([:\[,]\s*)(True|False|None)\b").ok())
        .as_ref()
}

/// Step 5b: relaxed grammar.
///
/// JSON5 covers comments, trailing commas, single-quoted strings and bare
/// keys. Python's `True`, `False` and `None` in value position are rewritten
/// first.
fn parse_relaxed(text: &str) -> Option<Value> {
    let normalized = match python_literal_regex() {
        Some(re) => re.replace_all(text, |caps: &regex::Captures<'_>| {
            let literal = match &caps[2] {
                "True" => "true",
                "False" => "false",
                _ => "null",
            };
            format!("{}{literal}", &caps[1])
        }),
        None => text.into(),
    };
    json5::from_str::<Value>(&normalized).ok()
}

/// Step 5c: find `field: [ ... ]` anywhere and decode only the array.
fn extract_array_field(text: &str, field: &str) -> Option<Value> {
    let pattern = format!(r#"["']?{}["']?\s*:\s*\["#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    let found = re.find(text)?;
    let open = found.end() - 1;
    let span = match matching_close(text, open) {
        Some(end) => &text[open..=end],
        None => &text[open..],
    };

    serde_json::from_str::<Value>(span)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&repair_structure(span)).ok())
        .or_else(|| parse_relaxed(span))
        .filter(Value::is_array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recovers_fenced_unquoted_facts() {
        let text = "```json\n{facts: [{fact: \"User likes tea\", details: []}]}\n```";
        let value = decode(text).unwrap();
        assert_eq!(value["facts"][0]["fact"], "User likes tea");
        assert_eq!(value["facts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn valid_json_is_returned_untouched() {
        let text =
            r#"{"facts": [{"fact": "Meeting at 10:30 {room B}", "details": ["Time: 10:30"]}]}"#;
        let value = decode(text).unwrap();
        assert_eq!(value["facts"][0]["fact"], "Meeting at 10:30 {room B}");
        assert_eq!(value["facts"][0]["details"][0], "Time: 10:30");
    }

    #[test]
    fn bare_array_is_wrapped_under_field() {
        let value =
            decode("Here you go: [{\"fact\": \"User owns a bike\"}] hope it helps").unwrap();
        assert_eq!(value["facts"][0]["fact"], "User owns a bike");

        let value = decode_with_field("[{\"event\": \"ADD\"}]", "memory").unwrap();
        assert_eq!(value["memory"][0]["event"], "ADD");
    }

    #[test]
    fn prose_around_object_is_ignored() {
        let value = decode("Sure! {\"facts\": []} Let me know.").unwrap();
        assert_eq!(value, json!({"facts": []}));
    }

    #[test]
    fn quotes_bare_values_and_keeps_literals() {
        let value = decode("{event: ADD, id: 3, keep: true, note: null}").unwrap();
        assert_eq!(
            value,
            json!({"event": "ADD", "id": 3, "keep": true, "note": null})
        );
    }

    #[test]
    fn inserts_missing_commas_between_objects() {
        let value = decode(r#"{"facts": [{"fact": "a"} {"fact": "b"}]}"#).unwrap();
        assert_eq!(value["facts"].as_array().unwrap().len(), 2);
        assert_eq!(value["facts"][1]["fact"], "b");
    }

    #[test]
    fn closes_truncated_output() {
        let value = decode(
            r#"{"facts": [{"fact": "User runs marathons", "details": ["Sport: running""#,
        )
        .unwrap();
        assert_eq!(value["facts"][0]["fact"], "User runs marathons");
        assert_eq!(value["facts"][0]["details"][0], "Sport: running");
    }

    #[test]
    fn relaxed_grammar_accepts_python_style_output() {
        let text = "{'facts': [{'fact': 'User is vegan', 'confirmed': True,},], // trailing\n}";
        let value = decode(text).unwrap();
        assert_eq!(value["facts"][0]["fact"], "User is vegan");
        assert_eq!(value["facts"][0]["confirmed"], true);
    }

    #[test]
    fn relaxed_grammar_accepts_json5_comments_and_keys() {
        let text = "{facts: [/* first */ {fact: 'Has two dogs', details: [],},]}";
        let value = decode(text).unwrap();
        assert_eq!(value["facts"][0]["fact"], "Has two dogs");
        assert_eq!(value["facts"][0]["details"], json!([]));
    }

    #[test]
    fn python_literals_inside_strings_survive() {
        let text = "{'facts': [{'fact': 'Says True often', 'flag': None}]}";
        let value = decode(text).unwrap();
        assert_eq!(value["facts"][0]["fact"], "Says True often");
        assert_eq!(value["facts"][0]["flag"], Value::Null);
    }

    #[test]
    fn extracts_named_field_from_garbage() {
        let text = concat!(
            r#"{"memory": [{"id": "0", "event": "NONE", "text": "x"}], "#,
            r#""reason": "it's "quoted" badly"}"#
        );
        let value = decode_with_field(text, "memory").unwrap();
        assert_eq!(value["memory"][0]["event"], "NONE");
    }

    #[test]
    fn unrecoverable_text_is_malformed() {
        assert!(decode("").is_err());
        assert!(decode("```\n```").is_err());
        assert!(decode("I could not find any facts, sorry.").is_err());
        assert!(decode("Nothing").is_err());
    }

    #[test]
    fn unterminated_fence_is_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("plain"), "plain");
    }
}
