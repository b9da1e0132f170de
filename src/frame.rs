use fnv::FnvHashMap;

use geckoxide_types::{FrameId, WindowId};

/// Which process a frame's content currently runs in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessAffinity {
    Local,
    Remote,
}

impl ProcessAffinity {
    pub fn from_remote(remote: bool) -> Self {
        if remote {
            ProcessAffinity::Remote
        } else {
            ProcessAffinity::Local
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ProcessAffinity::Remote)
    }
}

/// A known execution frame. The id is stable across affinity changes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub affinity: ProcessAffinity,
    pub parent: WindowId,
}

/// An out-of-process frame the driver is currently talking to directly
/// instead of via the global broadcaster.
#[derive(Debug, Clone)]
pub struct RemoteFrame {
    pub window: WindowId,
    pub frame: FrameId,
    /// The id outbound messages are addressed to. Updated when the frame
    /// re-registers from its new process.
    pub target_frame_id: FrameId,
}

/// Tracks known frames and the active transport target.
///
/// While `current_remote` is set, outbound calls go directly to that frame;
/// otherwise they go through the global broadcaster suffixed with the
/// current browser's frame id.
#[derive(Debug, Default)]
pub struct FrameRegistry {
    frames: FnvHashMap<FrameId, Frame>,
    current_remote: Option<RemoteFrame>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or update a frame observation.
    pub fn record(&mut self, frame: Frame) {
        self.frames.insert(frame.id.clone(), frame);
    }

    pub fn frame(&self, id: &FrameId) -> Option<&Frame> {
        self.frames.get(id)
    }

    pub fn current_remote(&self) -> Option<&RemoteFrame> {
        self.current_remote.as_ref()
    }

    /// Begin addressing an out-of-process frame directly. Returns the
    /// target frame id for the caller to watch for close events.
    pub fn switch_to_remote(&mut self, window: WindowId, frame: FrameId) -> FrameId {
        let target = frame.clone();
        self.current_remote = Some(RemoteFrame {
            window,
            frame,
            target_frame_id: target.clone(),
        });
        target
    }

    /// The remote frame re-registered from a new process; subsequent sends
    /// must use its new target id.
    pub fn update_remote_target(&mut self, target: FrameId) {
        if let Some(remote) = self.current_remote.as_mut() {
            remote.target_frame_id = target;
        }
    }

    /// Fall back to the global broadcaster, returning the frame that was
    /// active so the caller can put its listener to sleep.
    pub fn revert_to_broadcast(&mut self) -> Option<RemoteFrame> {
        self.current_remote.take()
    }

    /// Drop all frames belonging to a closed window.
    pub fn forget_window(&mut self, window: &WindowId) {
        self.frames.retain(|_, f| &f.parent != window);
        if self
            .current_remote
            .as_ref()
            .is_some_and(|r| &r.window == window)
        {
            self.current_remote = None;
        }
    }
}
