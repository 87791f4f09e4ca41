//! [`ToolCallNormalizer`]: canonicalizes tool names/arguments before
//! dispatch and infers a real tool from argument shape when the model hands
//! back a generic wrapper name.
//!
//! Grounded in the argument-shape conventions already visible across
//! `tools/bash.rs` (`command`), `tools/file_read.rs` (`path`),
//! `tools/file_write.rs` (`path`+`content`) — the same canonical keys the
//! shape-inference priority (`command>pattern>path+content>path+oldText+newText>path`)
//! resolves against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::tool::ToolCall;

const ALIASES: &[(&str, &str)] = &[
    ("read_file", "read"),
    ("shell", "bash"),
    ("execute", "bash"),
    ("write_file", "write"),
    ("edit_file", "edit"),
    ("grep_search", "grep"),
    ("search", "grep"),
];

const GENERIC_NAMES: &[&str] = &["", "tool", "tool_call", "call_tool", "function", "function_call"];

static ID_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum CoerceError {
    #[error("tool '{tool}' requires argument '{missing}' but it was not present")]
    MissingRequired { tool: String, missing: String },
}

pub struct ToolCallNormalizer;

impl ToolCallNormalizer {
    /// Lowercase/trim the name, apply the alias map, infer a real tool from
    /// argument shape when the name is generic, and ensure a stable,
    /// sanitized id.
    pub fn normalize(call: &mut ToolCall) {
        call.name = call.name.trim().to_lowercase();
        if let Some((_, canon)) = ALIASES.iter().find(|(alias, _)| *alias == call.name) {
            call.name = canon.to_string();
        }

        if GENERIC_NAMES.contains(&call.name.as_str()) {
            Self::unwrap_nested(call);
            if GENERIC_NAMES.contains(&call.name.as_str()) {
                if let Some(inferred) = infer_from_shape(&call.input) {
                    call.name = inferred.to_string();
                }
            }
        }

        Self::ensure_id(call);
    }

    /// Step 2: when the call carries a generic name, look for a nested
    /// `{arguments|args|input: {...}}` envelope and unwrap it; if the inner
    /// object names the real tool via `name|tool|tool_name|function|
    /// function_name`, adopt it.
    fn unwrap_nested(call: &mut ToolCall) {
        let Some(obj) = call.input.as_object() else { return };

        let nested_key = ["arguments", "args", "input"]
            .iter()
            .find(|k| obj.contains_key(**k))
            .copied();

        let hint = ["name", "tool", "tool_name", "function", "function_name"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str));

        if let Some(name) = hint {
            if !name.trim().is_empty() {
                call.name = name.trim().to_lowercase();
            }
        }

        if let Some(key) = nested_key {
            if let Some(inner) = obj.get(key).cloned() {
                call.input = inner;
            }
        }
    }

    /// Step 3: sanitize to `[A-Za-z0-9_-]`, trim to <=64 chars; assign a
    /// fresh id if empty after sanitizing.
    fn ensure_id(call: &mut ToolCall) {
        let sanitized: String = call
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(64)
            .collect();

        call.id = if sanitized.is_empty() {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
            format!("tool_{nanos}_{seq}")
        } else {
            sanitized
        };
    }
}

/// Argument-shape inference priority: `command > pattern > path+content >
/// path+oldText+newText > path`.
fn infer_from_shape(input: &Value) -> Option<&'static str> {
    let obj = input.as_object()?;
    if obj.contains_key("command") {
        return Some("bash");
    }
    if obj.contains_key("pattern") {
        return Some("grep");
    }
    if obj.contains_key("path") && obj.contains_key("content") {
        return Some("write");
    }
    if obj.contains_key("path") && obj.contains_key("old_text") && obj.contains_key("new_text") {
        return Some("edit");
    }
    if obj.contains_key("oldText") && obj.contains_key("newText") && obj.contains_key("path") {
        return Some("edit");
    }
    if obj.contains_key("path") {
        return Some("read");
    }
    None
}

/// Projects `args` onto the canonical key set a tool expects, erroring if a
/// required key is missing.
pub fn coerce_tool_arguments(tool_name: &str, mut args: Value) -> Result<Value, CoerceError> {
    let required: &[&str] = match tool_name {
        "bash" => &["command"],
        "grep" => &["pattern"],
        "read" => &["path"],
        "write" => &["path", "content"],
        "edit" => &["path", "old_text", "new_text"],
        _ => &[],
    };

    if !args.is_object() {
        // A bare scalar was already folded onto a single key by the shape
        // inference above; nothing further to coerce here.
        return Ok(args);
    }

    let obj = args.as_object_mut().expect("checked is_object");
    for key in required {
        if !obj.contains_key(*key) {
            return Err(CoerceError::MissingRequired {
                tool: tool_name.to_string(),
                missing: key.to_string(),
            });
        }
    }
    Ok(args)
}

/// Wraps a bare scalar input (string/number/bool) onto a tool's single
/// canonical argument key. Used when a [`crate::tag_parser::ToolTagParser`]-
/// recovered call carries an unkeyed value instead of an object.
pub fn wrap_bare_input(input: Value, canonical_key: &str) -> Value {
    if input.is_object() {
        return input;
    }
    let mut obj = Map::new();
    obj.insert(canonical_key.to_string(), input);
    Value::Object(obj)
}
