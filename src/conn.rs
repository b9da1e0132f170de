use futures::stream::{Stream, StreamExt};
use thiserror::Error;

use geckoxide_types::{Call, HostMessage};

use crate::error::{DriverError, Result};

/// Why an outbound send was rejected by the transport.
///
/// The two variants are surfaced as distinct transport error kinds so a
/// client can tell "the frame went away" apart from "the frame has not
/// come up yet".
#[derive(Debug, Error)]
pub enum SendError {
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    NotInitialized(String),
}

/// Exchanges messages with the host application.
///
/// The transport is one-way on the send side: replies arrive asynchronously
/// as separately named [`HostMessage`]s on the stream, matched back to their
/// call by `command_id`. Wire framing is the implementor's concern.
pub trait Transport: Stream<Item = HostMessage> + Unpin {
    fn send(&mut self, call: Call) -> Result<(), SendError>;
}

/// The driver's handle on the injected [`Transport`].
pub struct MessageLink {
    transport: Box<dyn Transport>,
}

impl MessageLink {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Send a call, mapping transport rejections to the driver error
    /// taxonomy.
    pub fn send(&mut self, call: Call) -> Result<()> {
        tracing::debug!(name = %call.name, target = ?call.target, "submit call");
        self.transport.send(call).map_err(|err| match err {
            SendError::Failed(msg) => DriverError::FrameSendFailure(msg),
            SendError::NotInitialized(msg) => DriverError::FrameNotInitialized(msg),
        })
    }

    /// Receive the next inbound message; `None` once the stream ends.
    pub async fn recv(&mut self) -> Option<HostMessage> {
        self.transport.next().await
    }
}

impl std::fmt::Debug for MessageLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLink").finish_non_exhaustive()
    }
}
