use std::collections::VecDeque;

use geckoxide_types::{Call, CommandId, FrameId, WindowId};

/// A content-bound send deferred while a remoteness change is in flight.
///
/// The closure rebuilds the outbound call at flush time against the then
/// live correlation id, so a replayed operation (like the page-load
/// readiness poll) is tagged correctly after the new frame registered.
pub type PendingCommand = Box<dyn FnOnce(Option<CommandId>) -> Call>;

/// Progress of a remoteness change for one browser.
///
/// `Stable` is the normal state. A flip of the process-affinity flag moves
/// to `ChangePending`, during which content-bound commands are queued
/// instead of sent. Once the new frame registers and its listeners attach,
/// the queue drains FIFO (`Draining`) and the browser returns to `Stable`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RemotenessState {
    Stable,
    ChangePending,
    Draining,
}

/// Per-top-level-window bookkeeping: the frames registered under this
/// window, the currently targeted frame, and the pending-command queue
/// bridging remoteness changes.
pub struct Browser {
    window: WindowId,
    known_frames: Vec<FrameId>,
    main_content_id: Option<FrameId>,
    cur_frame_id: Option<FrameId>,
    tab: Option<usize>,
    pending_commands: VecDeque<PendingCommand>,
    /// Readiness re-poll for an in-flight navigation, replayed ahead of the
    /// queue when a remoteness change interrupts the page load.
    navigation_replay: Option<PendingCommand>,
    was_remote: Option<bool>,
    state: RemotenessState,
    /// Outstanding frame registrations expected before this browser is
    /// considered started; used when attaching to a window that already
    /// has content loaded.
    pub frame_regs_pending: usize,
    pub is_new_session: bool,
}

impl Browser {
    pub fn new(window: WindowId, is_new_session: bool) -> Self {
        Self {
            window,
            known_frames: Vec::new(),
            main_content_id: None,
            cur_frame_id: None,
            tab: None,
            pending_commands: VecDeque::new(),
            navigation_replay: None,
            was_remote: None,
            state: RemotenessState::Stable,
            frame_regs_pending: 0,
            is_new_session,
        }
    }

    pub fn window(&self) -> &WindowId {
        &self.window
    }

    pub fn cur_frame_id(&self) -> Option<&FrameId> {
        self.cur_frame_id.as_ref()
    }

    pub fn main_content_id(&self) -> Option<&FrameId> {
        self.main_content_id.as_ref()
    }

    pub fn known_frames(&self) -> &[FrameId] {
        &self.known_frames
    }

    pub fn tab(&self) -> Option<usize> {
        self.tab
    }

    pub fn state(&self) -> RemotenessState {
        self.state
    }

    /// Select a tab, re-seeding remoteness tracking from the observed
    /// affinity of its content.
    pub fn switch_to_tab(&mut self, index: usize, content_id: FrameId, remote: bool) {
        self.tab = Some(index);
        self.cur_frame_id = Some(content_id);
        self.was_remote = Some(remote);
        self.state = RemotenessState::Stable;
    }

    /// Record the tab a registration arrived for without disturbing the
    /// remoteness tracking seeded by that registration.
    pub fn adopt_tab(&mut self, index: usize) {
        self.tab = Some(index);
    }

    /// Park the navigation readiness re-poll; replayed first on flush.
    pub fn set_navigation_replay(&mut self, f: PendingCommand) {
        self.navigation_replay = Some(f);
    }

    /// Compare the observed process affinity against the previous
    /// observation; a flip latches a change in flight until the new frame
    /// finishes registering.
    pub fn observe_remoteness(&mut self, now_remote: bool) -> bool {
        if self.state == RemotenessState::ChangePending {
            return true;
        }
        let flipped = self
            .was_remote
            .map(|prev| prev != now_remote)
            .unwrap_or(false);
        self.was_remote = Some(now_remote);
        if flipped {
            self.state = RemotenessState::ChangePending;
        }
        flipped
    }

    pub fn remoteness_change_in_flight(&self) -> bool {
        self.state == RemotenessState::ChangePending
    }

    /// Record a frame registration. Assigns the current frame on first
    /// sight or when a remoteness change was in flight. Returns whether
    /// this registration completes a remoteness change.
    pub fn register_frame(&mut self, uid: FrameId, is_selected_tab: bool, remote: bool) -> bool {
        let change = self.observe_remoteness(remote);
        if self.cur_frame_id.is_none() || change {
            if is_selected_tab || self.tab.is_none() {
                self.cur_frame_id = Some(uid.clone());
                self.main_content_id = Some(uid.clone());
            }
        }
        // kept for session teardown
        self.known_frames.push(uid);
        change
    }

    /// Run a content-bound send now, or queue it while a remoteness change
    /// is in flight. Returns the built call when it should go out
    /// immediately.
    pub fn execute_when_ready(
        &mut self,
        live_id: Option<CommandId>,
        f: PendingCommand,
    ) -> Option<Call> {
        if self.remoteness_change_in_flight() {
            self.pending_commands.push_back(f);
            None
        } else {
            Some(f(live_id))
        }
    }

    /// Drain the queue after the new frame's listeners attached, in the
    /// original submission order. Clears the in-flight flag first so the
    /// drained sends are not re-queued.
    pub fn flush_pending_commands(&mut self, live_id: Option<CommandId>) -> Vec<Call> {
        if self.state != RemotenessState::ChangePending {
            return Vec::new();
        }
        self.state = RemotenessState::Draining;
        let mut calls = Vec::with_capacity(self.pending_commands.len() + 1);
        if let Some(f) = self.navigation_replay.take() {
            calls.push(f(live_id));
        }
        while let Some(f) = self.pending_commands.pop_front() {
            calls.push(f(live_id));
        }
        self.state = RemotenessState::Stable;
        calls
    }

    /// Queued sends belong to the command that queued them; drop leftovers
    /// once its response went out.
    pub fn clear_pending(&mut self) {
        self.pending_commands.clear();
        self.navigation_replay = None;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_commands.is_empty()
    }
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("window", &self.window)
            .field("cur_frame_id", &self.cur_frame_id)
            .field("main_content_id", &self.main_content_id)
            .field("tab", &self.tab)
            .field("state", &self.state)
            .field("pending", &self.pending_commands.len())
            .field("known_frames", &self.known_frames)
            .finish()
    }
}
