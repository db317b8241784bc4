//! Line protocol spoken with the bridge helper process.
//!
//! Every line is one JSON object. The server writes [`CommandEnvelope`]s to
//! the child's stdin; the child writes notifications, diagnostics and
//! replies to its stdout, all discriminated by `"event"`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pairline_core::{ClientError, Notification, PageDiagnostic};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum BridgeCommand {
    Initialize,
    Destroy,
    Logout,
    Send { to: String, text: String },
    Version,
    Diagnostics,
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Destroy => "destroy",
            Self::Logout => "logout",
            Self::Send { .. } => "send",
            Self::Version => "version",
            Self::Diagnostics => "diagnostics",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub command: BridgeCommand,
}

impl CommandEnvelope {
    /// Serialized form, newline terminated.
    pub fn to_line(&self) -> Result<String, ClientError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Answer to a command, matched by `id`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Reply {
    pub fn into_result(self) -> Result<Option<Value>, ClientError> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(ClientError::Rejected(
                self.error.unwrap_or_else(|| "unspecified bridge error".to_string()),
            ))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Reply(Reply),
    Diagnostic(PageDiagnostic),
    Notification(Notification),
}

impl Inbound {
    pub fn decode(line: &str) -> Result<Self, ClientError> {
        let value: Value = serde_json::from_str(line)?;
        match value.get("event").and_then(Value::as_str) {
            Some("reply") => Ok(Self::Reply(serde_json::from_value(value)?)),
            Some("diagnostic") => {
                let data = value
                    .get("data")
                    .cloned()
                    .ok_or_else(|| ClientError::Protocol("diagnostic without data".into()))?;
                Ok(Self::Diagnostic(serde_json::from_value(data)?))
            }
            Some(_) => Ok(Self::Notification(serde_json::from_value(value)?)),
            None => Err(ClientError::Protocol("line has no event field".into())),
        }
    }
}
