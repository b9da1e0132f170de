use thiserror::Error;

use geckoxide_types::ErrorPayload;

pub type Result<T, E = DriverError> = std::result::Result<T, E>;

/// All the ways a command can fail.
///
/// The variants group into the protocol taxonomy surfaced to clients:
/// protocol errors (malformed input), state errors (valid command, wrong
/// state), transport errors (the target frame cannot be reached), script
/// errors and capability errors. [`DriverError::kind`] yields the stable
/// string used in the wire payload.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0}")]
    Protocol(String),
    #[error("unable to locate window: {0}")]
    NoSuchWindow(String),
    #[error("unable to locate frame: {0}")]
    NoSuchFrame(String),
    #[error("unable to locate element: {0}")]
    NoSuchElement(String),
    #[error("{0}")]
    NoAlertOpen(String),
    #[error("{0}")]
    ElementNotVisible(String),
    #[error("{0}")]
    UnsupportedOperation(String),
    #[error("{0}")]
    InvalidState(String),
    /// Sending to the target frame failed outright.
    #[error("failed to send message to frame: {0}")]
    FrameSendFailure(String),
    /// The target frame exists but has not finished initializing.
    #[error("frame not yet initialized: {0}")]
    FrameNotInitialized(String),
    /// The inbound message stream ended.
    #[error("connection to the host was closed")]
    Disconnected,
    /// An exception was thrown by an executed script.
    #[error("{message}")]
    JavaScript {
        message: String,
        function: Option<String>,
        file: Option<String>,
        line: Option<u64>,
        source_snippet: Option<String>,
    },
    #[error("{0}")]
    ScriptTimeout(String),
    #[error("{0}")]
    SessionNotCreated(String),
    /// A failure reported by the remote side, passed through verbatim.
    #[error("{0}")]
    Remote(ErrorPayload),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl DriverError {
    /// Stable error kind for the wire payload.
    pub fn kind(&self) -> &str {
        match self {
            DriverError::Protocol(_) | DriverError::Json(_) => "protocol error",
            DriverError::NoSuchWindow(_) => "no such window",
            DriverError::NoSuchFrame(_) => "no such frame",
            DriverError::NoSuchElement(_) => "no such element",
            DriverError::NoAlertOpen(_) => "no such alert",
            DriverError::ElementNotVisible(_) => "element not visible",
            DriverError::UnsupportedOperation(_) => "unsupported operation",
            DriverError::InvalidState(_) => "invalid state",
            DriverError::FrameSendFailure(_) => "frame send failure",
            DriverError::FrameNotInitialized(_) => "frame not initialized",
            DriverError::Disconnected => "disconnected",
            DriverError::JavaScript { .. } => "javascript error",
            DriverError::ScriptTimeout(_) => "script timeout",
            DriverError::SessionNotCreated(_) => "session not created",
            DriverError::Remote(payload) => &payload.kind,
        }
    }

    /// True for the transport error subkinds, which trigger a fallback to
    /// the global transport target before the error is surfaced.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DriverError::FrameSendFailure(_) | DriverError::FrameNotInitialized(_)
        )
    }

    pub fn into_payload(self) -> ErrorPayload {
        match self {
            DriverError::Remote(payload) => payload,
            DriverError::JavaScript {
                ref message,
                ref function,
                ref file,
                ref line,
                ref source_snippet,
            } => {
                let mut payload = ErrorPayload::new(self.kind(), message.clone());
                let mut ctx = Vec::new();
                if let Some(f) = function {
                    ctx.push(format!("in {f}"));
                }
                if let Some(f) = file {
                    match line {
                        Some(l) => ctx.push(format!("at {f}:{l}")),
                        None => ctx.push(format!("at {f}")),
                    }
                }
                if let Some(src) = source_snippet {
                    ctx.push(src.clone());
                }
                if !ctx.is_empty() {
                    payload.stacktrace = Some(ctx.join("\n"));
                }
                payload
            }
            other => ErrorPayload::new(other.kind(), other.to_string()),
        }
    }
}
