//! Hand-written scanner recovering tool calls from assistant free text when
//! the finalized message carries no structured tool call.
//!
//! The source grammar is a handful of fixed tags (`read`, `read_file`,
//! `write`, `edit`, `bash`, `grep`) plus nested `<arg_key>/<arg_value>`
//! pairs. Deliberately not a generic HTML/XML parser — a linear scan for
//! the literal open/close tags is simpler to reason about, survives nested
//! `<think>` spans, and cannot backtrack pathologically on adversarial
//! input the way a regex over arbitrary tag soup could.

use serde_json::Value;

use crate::tool::ToolCall;

const RECOGNIZED_TAGS: &[&str] = &["read", "read_file", "write", "edit", "bash", "grep"];

/// The single canonical argument key a bare (no `<arg_key>`) tag body maps
/// onto, keyed by the recognized tag name.
fn default_key(tag: &str) -> &'static str {
    match tag {
        "bash" => "command",
        "grep" => "pattern",
        "write" => "content",
        "edit" => "old_text",
        _ => "path",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    UnclosedTag { tag: String, pos: usize },
    OrphanedClose { tag: String, pos: usize },
    UppercaseVariant { tag: String, pos: usize },
}

pub struct ToolTagParser;

impl ToolTagParser {
    /// Scans `text`, recovering zero or more tool calls in document order.
    /// Returns the calls plus `text` with every consumed tag region
    /// stripped out (surrounding plain text is preserved and concatenated).
    pub fn parse(text: &str) -> (Vec<ToolCall>, String) {
        let mut calls = Vec::new();
        let mut remaining = String::new();
        let mut seq = 0usize;
        let mut cursor = 0usize;
        let bytes = text.as_bytes();

        while cursor < bytes.len() {
            match find_next_open_tag(text, cursor) {
                None => {
                    remaining.push_str(&text[cursor..]);
                    break;
                }
                Some((tag, tag_start, body_start)) => {
                    let close = format!("</{tag}>");
                    match text[body_start..].find(&close) {
                        Some(rel_close) => {
                            remaining.push_str(&text[cursor..tag_start]);
                            let body = &text[body_start..body_start + rel_close];
                            seq += 1;
                            if let Some(call) = build_call(tag, body, seq) {
                                calls.push(call);
                            } else {
                                // Malformed body: keep the raw tag text visible.
                                remaining.push_str(&text[tag_start..body_start + rel_close + close.len()]);
                            }
                            cursor = body_start + rel_close + close.len();
                        }
                        None => {
                            // Unclosed tag: everything from here on is left as text.
                            remaining.push_str(&text[cursor..]);
                            break;
                        }
                    }
                }
            }
        }

        (calls, remaining)
    }

    pub fn extract_calls(text: &str) -> Vec<ToolCall> {
        Self::parse(text).0
    }

    /// Surfaces diagnostics for tracing without attempting to parse: unclosed
    /// tags, orphaned closing tags, and uppercase tag-name variants (the
    /// model emitted `<BASH>` instead of `<bash>`, which this scanner never
    /// recognizes as a call but which is useful to flag).
    pub fn detect_incomplete_tool_calls(text: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut open_stack: Vec<(String, usize)> = Vec::new();
        let mut i = 0usize;
        let bytes = text.as_bytes();

        while i < bytes.len() {
            if bytes[i] == b'<' {
                if let Some(end) = text[i..].find('>') {
                    let raw = &text[i + 1..i + end];
                    let (is_close, name) = if let Some(stripped) = raw.strip_prefix('/') {
                        (true, stripped)
                    } else {
                        (false, raw)
                    };
                    let lower = name.to_lowercase();
                    if RECOGNIZED_TAGS.contains(&lower.as_str()) {
                        if name != lower {
                            diagnostics.push(Diagnostic::UppercaseVariant { tag: name.to_string(), pos: i });
                        }
                        if is_close {
                            if open_stack.iter().any(|(t, _)| t == &lower) {
                                open_stack.retain(|(t, _)| t != &lower);
                            } else {
                                diagnostics.push(Diagnostic::OrphanedClose { tag: lower, pos: i });
                            }
                        } else {
                            open_stack.push((lower, i));
                        }
                    }
                    i += end + 1;
                    continue;
                }
            }
            i += 1;
        }

        for (tag, pos) in open_stack {
            diagnostics.push(Diagnostic::UnclosedTag { tag, pos });
        }
        diagnostics
    }
}

/// Finds the next recognized opening tag at or after `from`, returning
/// `(tag_name, tag_start, body_start)` for the earliest match across all
/// recognized tags.
fn find_next_open_tag(text: &str, from: usize) -> Option<(&'static str, usize, usize)> {
    let mut best: Option<(&'static str, usize, usize)> = None;
    for tag in RECOGNIZED_TAGS {
        let needle = format!("<{tag}>");
        if let Some(rel) = text[from..].find(&needle) {
            let start = from + rel;
            let body_start = start + needle.len();
            if best.map(|(_, s, _)| start < s).unwrap_or(true) {
                best = Some((tag, start, body_start));
            }
        }
    }
    best
}

fn build_call(tag: &str, body: &str, seq: usize) -> Option<ToolCall> {
    let pairs = parse_arg_pairs(body);
    let input = if pairs.is_empty() {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return None;
        }
        let mut obj = serde_json::Map::new();
        obj.insert(default_key(tag).to_string(), Value::String(trimmed.to_string()));
        Value::Object(obj)
    } else {
        let mut obj = serde_json::Map::new();
        for (k, v) in pairs {
            obj.insert(k, Value::String(v));
        }
        Value::Object(obj)
    };

    Some(ToolCall { id: format!("tag_{seq}"), name: tag.to_string(), input })
}

/// Extracts `<arg_key>k</arg_key><arg_value>v</arg_value>` pairs in order of
/// appearance. Unmatched fragments are ignored.
fn parse_arg_pairs(body: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = body;
    loop {
        let Some(key_start) = rest.find("<arg_key>") else { break };
        let after_key_tag = &rest[key_start + "<arg_key>".len()..];
        let Some(key_end) = after_key_tag.find("</arg_key>") else { break };
        let key = after_key_tag[..key_end].trim().to_string();

        let after_key = &after_key_tag[key_end + "</arg_key>".len()..];
        let Some(value_start) = after_key.find("<arg_value>") else { break };
        let after_value_tag = &after_key[value_start + "<arg_value>".len()..];
        let Some(value_end) = after_value_tag.find("</arg_value>") else { break };
        let value = after_value_tag[..value_end].to_string();

        pairs.push((key, value));
        rest = &after_value_tag[value_end + "</arg_value>".len()..];
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_single_bash_call_from_free_text() {
        let text = "<bash>git diff HEAD</bash>";
        let calls = ToolTagParser::extract_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
        assert_eq!(calls[0].input["command"], "git diff HEAD");
    }

    #[test]
    fn surrounding_text_is_preserved_and_tag_is_stripped() {
        let text = "Let me check.<bash>ls -la</bash>Done.";
        let (calls, remaining) = ToolTagParser::parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(remaining, "Let me check.Done.");
    }

    #[test]
    fn arg_key_value_pairs_build_a_keyed_object() {
        let text = "<edit><arg_key>path</arg_key><arg_value>/tmp/a.txt</arg_value>\
                    <arg_key>old_text</arg_key><arg_value>foo</arg_value>\
                    <arg_key>new_text</arg_key><arg_value>bar</arg_value></edit>";
        let calls = ToolTagParser::extract_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "edit");
        assert_eq!(calls[0].input["path"], "/tmp/a.txt");
        assert_eq!(calls[0].input["old_text"], "foo");
        assert_eq!(calls[0].input["new_text"], "bar");
    }

    #[test]
    fn multiple_calls_recovered_in_order() {
        let text = "<read>/tmp/a</read><bash>ls</bash>";
        let calls = ToolTagParser::extract_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "read");
        assert_eq!(calls[1].name, "bash");
    }

    #[test]
    fn unclosed_tag_produces_no_call() {
        let text = "<bash>ls -la";
        let calls = ToolTagParser::extract_calls(text);
        assert!(calls.is_empty());
    }

    #[test]
    fn unclosed_tag_is_flagged_as_a_diagnostic() {
        let text = "<bash>ls -la";
        let diags = ToolTagParser::detect_incomplete_tool_calls(text);
        assert!(diags.iter().any(|d| matches!(d, Diagnostic::UnclosedTag { tag, .. } if tag == "bash")));
    }

    #[test]
    fn orphaned_close_is_flagged() {
        let text = "some text</bash>more text";
        let diags = ToolTagParser::detect_incomplete_tool_calls(text);
        assert!(diags.iter().any(|d| matches!(d, Diagnostic::OrphanedClose { tag, .. } if tag == "bash")));
    }

    #[test]
    fn uppercase_variant_is_flagged_but_not_parsed() {
        let text = "<BASH>ls</BASH>";
        let calls = ToolTagParser::extract_calls(text);
        assert!(calls.is_empty());
        let diags = ToolTagParser::detect_incomplete_tool_calls(text);
        assert!(diags.iter().any(|d| matches!(d, Diagnostic::UppercaseVariant { .. })));
    }

    #[test]
    fn nested_think_span_does_not_confuse_the_scanner() {
        let text = "<think>considering options</think><bash>pwd</bash>";
        let calls = ToolTagParser::extract_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].input["command"], "pwd");
    }

    #[test]
    fn empty_body_produces_no_call() {
        let text = "<bash></bash>";
        let calls = ToolTagParser::extract_calls(text);
        assert!(calls.is_empty());
    }
}
