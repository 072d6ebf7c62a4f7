use crate::types::AgentEventType;
use serde_json::Value;

/// One decoded line of the executable's newline-delimited JSON output.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub event_type: AgentEventType,
    pub content: Option<String>,
    pub raw: Value,
}

/// Decodes a single stdout line. Anything that is not a JSON object is
/// ignored so that plain-text chatter never aborts a run.
#[must_use]
pub fn parse_line(line: &str) -> Option<StreamRecord> {
    let raw: Value = serde_json::from_str(line.trim()).ok()?;
    if !raw.is_object() {
        return None;
    }
    Some(classify(raw))
}

#[must_use]
pub fn classify(raw: Value) -> StreamRecord {
    let wire_type = raw.get("type").and_then(Value::as_str).unwrap_or_default();
    let (event_type, content) = match wire_type {
        "assistant" | "response" => (AgentEventType::Response, text_content(&raw)),
        "tool_use" => (AgentEventType::ToolUse, tool_name(&raw)),
        "error" => (AgentEventType::Error, text_content(&raw)),
        _ => (AgentEventType::Info, None),
    };
    StreamRecord {
        event_type,
        content,
        raw,
    }
}

fn text_content(raw: &Value) -> Option<String> {
    if let Some(text) = raw.get("content").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    // Nested form: {"message": {"content": [{"type": "text", "text": "..."}]}}
    let blocks = raw
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_array)?;
    let text = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

fn tool_name(raw: &Value) -> Option<String> {
    ["tool", "name"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
