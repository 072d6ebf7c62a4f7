use crate::error::InboxError;
use serde_json::{json, Value};

#[must_use]
pub fn success_envelope(command: &str, payload: Value) -> Value {
    json!({
        "command": command,
        "status": "ok",
        "payload": payload,
    })
}

#[must_use]
pub fn error_envelope(command: &str, code: &str, message: &str) -> Value {
    json!({
        "command": command,
        "status": "error",
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// One JSON line on stdout per successful command or followed event.
pub fn emit_output(command: &str, payload: Value) {
    println!("{}", success_envelope(command, payload));
}

pub fn emit_error(command: &str, error: &InboxError) {
    eprintln!(
        "{}",
        error_envelope(command, error.code(), &error.to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::{error_envelope, success_envelope};
    use crate::error::{code, InboxError};
    use serde_json::json;

    #[test]
    fn success_wraps_payload_with_command_name() {
        let envelope = success_envelope("enqueue", json!({"item_id": "inb_1"}));
        assert_eq!(envelope["command"], "enqueue");
        assert_eq!(envelope["status"], "ok");
        assert_eq!(envelope["payload"]["item_id"], "inb_1");
    }

    #[test]
    fn error_carries_protocol_code() {
        let error = InboxError::AgentError("Agent not found: agt_x".to_string());
        let envelope = error_envelope("pause", error.code(), &error.to_string());
        assert_eq!(envelope["status"], "error");
        assert_eq!(envelope["error"]["code"], code::CONFLICT);
        assert_eq!(
            envelope["error"]["message"],
            "Agent error: Agent not found: agt_x"
        );
    }
}
