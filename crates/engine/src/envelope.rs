#![forbid(unsafe_code)]

//! The uniform response shape:
//! `{ok, data, next: [{intent, cmd}], warnings: [string], error?}`.
//!
//! `next` entries are executable hints — the intent in words plus the exact
//! CLI command — so agents can chain operations without guessing flags.

use crate::error::EngineError;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Serialize)]
pub struct NextAction {
    pub intent: String,
    pub cmd: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    pub ok: bool,
    pub data: Value,
    pub next: Vec<NextAction>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data,
            next: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn from_error(err: &EngineError) -> Self {
        Self {
            ok: false,
            data: Value::Null,
            next: Vec::new(),
            warnings: Vec::new(),
            error: Some(ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
                details: err.details(),
            }),
        }
    }

    pub fn next(mut self, intent: impl Into<String>, cmd: impl Into<String>) -> Self {
        self.next.push(NextAction {
            intent: intent.into(),
            cmd: cmd.into(),
        });
        self
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn warn_all(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_has_no_error_key() {
        let envelope = Envelope::ok(json!({ "n": 1 }))
            .next("inspect the task", "lodestar task get T1")
            .warn("something advisory");
        let value = envelope.to_value();
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["data"]["n"], json!(1));
        assert_eq!(value["next"][0]["cmd"], json!("lodestar task get T1"));
        assert_eq!(value["warnings"][0], json!("something advisory"));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_envelope_carries_code_and_details() {
        let err = EngineError::TaskNotFound {
            task_id: "T9".to_string(),
        };
        let value = Envelope::from_error(&err).to_value();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["code"], json!("TaskNotFound"));
        assert_eq!(value["error"]["details"]["task_id"], json!("T9"));
    }
}
