use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier correlating an outbound call with its eventual reply.
///
/// `CommandId`s are allocated monotonically and are never reused within a
/// session. A reply carrying an id other than the currently live one is
/// considered out-of-sync and dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    pub fn new(id: u64) -> Self {
        CommandId(id)
    }

    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier of a top-level host window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(String);

impl WindowId {
    pub fn new(id: impl Into<String>) -> Self {
        WindowId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WindowId {
    fn from(s: &str) -> Self {
        WindowId(s.to_string())
    }
}

/// Identifier of a registered execution frame (a browsing context).
///
/// A frame keeps its id for its whole lifetime, even when its process
/// affinity changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(String);

impl FrameId {
    pub fn new(id: impl Into<String>) -> Self {
        FrameId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FrameId {
    fn from(s: &str) -> Self {
        FrameId(s.to_string())
    }
}

impl From<&WindowId> for FrameId {
    fn from(w: &WindowId) -> Self {
        FrameId(w.as_str().to_string())
    }
}

/// Where an outbound [`Call`] is routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallTarget {
    /// Route via the global broadcaster; the frame id is appended to the
    /// message name so only the matching listener picks it up.
    Broadcast { frame_id: FrameId },
    /// Send directly to a specific out-of-process frame.
    Frame { frame_id: FrameId },
}

impl CallTarget {
    pub fn frame_id(&self) -> &FrameId {
        match self {
            CallTarget::Broadcast { frame_id } => frame_id,
            CallTarget::Frame { frame_id } => frame_id,
        }
    }
}

/// A message sent to the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Name of the remote operation.
    pub name: Cow<'static, str>,
    /// Routing target for this call.
    pub target: CallTarget,
    /// JSON payload; the correlation id is mirrored into the payload as
    /// `command_id` for listeners that read it from there.
    pub payload: Value,
    /// Correlation id, if the caller awaits a reply.
    pub command_id: Option<CommandId>,
}

impl Call {
    pub fn broadcast(
        name: impl Into<Cow<'static, str>>,
        frame_id: FrameId,
        payload: Value,
        command_id: Option<CommandId>,
    ) -> Self {
        Call {
            name: name.into(),
            target: CallTarget::Broadcast { frame_id },
            payload,
            command_id,
        }
        .tag()
    }

    pub fn frame(
        name: impl Into<Cow<'static, str>>,
        frame_id: FrameId,
        payload: Value,
        command_id: Option<CommandId>,
    ) -> Self {
        Call {
            name: name.into(),
            target: CallTarget::Frame { frame_id },
            payload,
            command_id,
        }
        .tag()
    }

    fn tag(mut self) -> Self {
        if let (Some(id), Some(obj)) = (self.command_id, self.payload.as_object_mut()) {
            obj.insert("command_id".to_string(), Value::from(id.inner()));
        }
        self
    }
}

/// A message received from the remote side or the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum HostMessage {
    /// The remote operation completed without a value.
    Ok { command_id: CommandId },
    /// The remote operation completed with a value.
    Value { command_id: CommandId, value: Value },
    /// The remote operation failed.
    Error {
        command_id: CommandId,
        error: ErrorPayload,
    },
    /// A content frame announces itself after its listener script loaded.
    Register { window_id: WindowId, remote: bool },
    /// A registered frame finished attaching its message listeners.
    ListenersAttached { listener_id: FrameId },
    /// A modal dialog opened while a call was outstanding.
    DialogOpened {
        window_id: Option<WindowId>,
        tab_modal: bool,
    },
    /// The content side switched frames; carries the frame element reference.
    SwitchedToFrame {
        frame_value: Option<Value>,
        #[serde(default)]
        store_previous: bool,
        #[serde(default)]
        restore_previous: bool,
    },
    /// A log record emitted by the remote side.
    Log { level: String, message: String },
}

/// Structured failure surfaced to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable error kind, e.g. `no such window` or `javascript error`.
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorPayload {
            kind: kind.into(),
            message: message.into(),
            stacktrace: None,
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ErrorPayload {}

/// A command received from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Client-assigned identifier, echoed in the [`Response`].
    pub id: CommandId,
    /// Command name; may be a deprecated alias of a canonical name.
    pub name: String,
    /// Command parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl Command {
    pub fn new(id: CommandId, name: impl Into<String>, parameters: Value) -> Self {
        Command {
            id,
            name: name.into(),
            parameters,
        }
    }
}

/// The response to a [`Command`]; carries either a value or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matching [`Command`] identifier.
    pub id: CommandId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    pub fn ok(id: CommandId, session_id: Option<String>, value: Value) -> Self {
        Response {
            id,
            session_id,
            value: Some(value),
            error: None,
        }
    }

    pub fn fail(id: CommandId, session_id: Option<String>, error: ErrorPayload) -> Self {
        Response {
            id,
            session_id,
            value: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_payload_is_tagged_with_command_id() {
        let call = Call::broadcast(
            "executeScript",
            FrameId::from("7"),
            json!({"script": "return 1"}),
            Some(CommandId::new(42)),
        );
        assert_eq!(call.payload["command_id"], json!(42));
    }

    #[test]
    fn host_message_roundtrip() {
        let msg = HostMessage::Value {
            command_id: CommandId::new(3),
            value: json!({"ELEMENT": "abc"}),
        };
        let s = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<HostMessage>(&s).unwrap(), msg);
    }
}
