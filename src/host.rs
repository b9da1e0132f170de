use futures::channel::{mpsc, oneshot};
use serde_json::Value;
use thiserror::Error;

use geckoxide_types::{FrameId, WindowId};

/// Failure reported by a host collaborator.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    NotVisible(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Failure(String),
}

/// A tab inside a top-level window.
#[derive(Debug, Clone)]
pub struct TabInfo {
    /// Server-assigned id of the tab's content browser.
    pub content_id: FrameId,
    /// Whether the tab's content currently runs out-of-process.
    pub remote: bool,
}

/// Snapshot of a top-level host window.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub id: WindowId,
    pub name: String,
    /// The `windowtype` attribute of the window document.
    pub kind: String,
    /// Whether the window document has finished loading.
    pub ready: bool,
    pub tabs: Vec<TabInfo>,
    pub selected_tab: usize,
}

impl WindowInfo {
    pub fn selected(&self) -> Option<&TabInfo> {
        self.tabs.get(self.selected_tab)
    }
}

/// A chrome-side frame nested in a window document, addressable by
/// privileged frame switching.
#[derive(Debug, Clone)]
pub struct ChromeFrame {
    pub window: WindowId,
    pub name: Option<String>,
    pub element_id: Option<String>,
}

/// Geometry of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowRect {
    pub x: i64,
    pub y: i64,
    pub width: u64,
    pub height: u64,
}

/// Access to the host application's windows.
///
/// This is the non-owning replacement for direct window references: windows
/// are addressed by id, and [`WindowHost::window`] returns `None` once the
/// underlying window is gone.
pub trait WindowHost {
    fn windows(&self) -> Vec<WindowInfo>;

    fn window(&self, id: &WindowId) -> Option<WindowInfo>;

    /// The window most recently focused, used before a session has a
    /// current browser.
    fn recent_window(&self) -> Option<WindowInfo>;

    fn focus_window(&mut self, id: &WindowId);

    fn select_tab(&mut self, id: &WindowId, index: usize) -> Result<(), HostError>;

    fn close_tab(&mut self, id: &WindowId) -> Result<(), HostError>;

    fn close_window(&mut self, id: &WindowId) -> Result<(), HostError>;

    /// Navigate the window's own document. Only meaningful for privileged
    /// navigation on hosts that allow it.
    fn navigate(&mut self, id: &WindowId, url: &str) -> Result<(), HostError>;

    fn current_url(&self, id: &WindowId) -> Result<String, HostError>;

    fn title(&self, id: &WindowId) -> Result<String, HostError>;

    fn page_source(&self, id: &WindowId) -> Result<String, HostError>;

    fn rect(&self, id: &WindowId) -> Result<WindowRect, HostError>;

    fn move_to(&mut self, id: &WindowId, x: i64, y: i64) -> Result<(), HostError>;

    fn resize_to(&mut self, id: &WindowId, width: u64, height: u64) -> Result<(), HostError>;

    fn maximize(&mut self, id: &WindowId) -> Result<(), HostError>;

    /// Capture the window viewport; the host returns the finished
    /// base64-encoded image.
    fn capture_viewport(&self, id: &WindowId) -> Result<String, HostError>;

    /// Chrome-side frames of the window document, for privileged frame
    /// switching.
    fn chrome_frames(&self, id: &WindowId) -> Vec<ChromeFrame>;
}

/// Opaque reference to an element held by the privileged execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

/// Privileged-scope element and dialog operations.
///
/// These run synchronously against the local execution context; the
/// concrete DOM machinery lives with the host.
pub trait ElementHost {
    fn find_element(
        &self,
        window: &WindowId,
        using: &str,
        value: &str,
        start: Option<&ElementId>,
    ) -> Result<ElementId, HostError>;

    fn find_elements(
        &self,
        window: &WindowId,
        using: &str,
        value: &str,
        start: Option<&ElementId>,
    ) -> Result<Vec<ElementId>, HostError>;

    fn active_element(&self, window: &WindowId) -> Result<ElementId, HostError>;

    fn click(&mut self, window: &WindowId, el: &ElementId) -> Result<(), HostError>;

    fn attribute(
        &self,
        window: &WindowId,
        el: &ElementId,
        name: &str,
    ) -> Result<Option<String>, HostError>;

    fn text(&self, window: &WindowId, el: &ElementId) -> Result<String, HostError>;

    fn tag_name(&self, window: &WindowId, el: &ElementId) -> Result<String, HostError>;

    fn is_displayed(&self, window: &WindowId, el: &ElementId) -> Result<bool, HostError>;

    fn is_enabled(&self, window: &WindowId, el: &ElementId) -> Result<bool, HostError>;

    fn is_selected(&self, window: &WindowId, el: &ElementId) -> Result<bool, HostError>;

    fn css_value(
        &self,
        window: &WindowId,
        el: &ElementId,
        property: &str,
    ) -> Result<String, HostError>;

    fn rect(&self, window: &WindowId, el: &ElementId) -> Result<(i64, i64, u64, u64), HostError>;

    fn send_keys(
        &mut self,
        window: &WindowId,
        el: &ElementId,
        keys: &str,
    ) -> Result<(), HostError>;

    fn clear(&mut self, window: &WindowId, el: &ElementId) -> Result<(), HostError>;

    /// Click the primary button of the modal in `window` (or the current
    /// tab modal when `window` is `None`).
    fn accept_dialog(&mut self, window: Option<&WindowId>) -> Result<(), HostError>;

    fn dismiss_dialog(&mut self, window: Option<&WindowId>) -> Result<(), HostError>;

    fn dialog_text(&self, window: Option<&WindowId>) -> Result<String, HostError>;

    /// Fails with [`HostError::NotVisible`] when the prompt has no text
    /// input.
    fn send_keys_to_dialog(
        &mut self,
        window: Option<&WindowId>,
        keys: &str,
    ) -> Result<(), HostError>;
}

/// Identifier of a script execution scope created by the [`ScriptHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(pub u64);

/// A fault raised inside an executed script.
#[derive(Debug, Clone)]
pub struct ScriptFault {
    pub message: String,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u64>,
    pub source: Option<String>,
}

impl ScriptFault {
    pub fn new(message: impl Into<String>) -> Self {
        ScriptFault {
            message: message.into(),
            function: None,
            file: None,
            line: None,
            source: None,
        }
    }
}

/// Channels a running script can reach to signal completion or liveness.
///
/// `finish` is one-shot: the first use wins. `heartbeat` may fire any number
/// of times and resets the inactivity watchdog.
pub struct CompletionHooks {
    pub finish: oneshot::Sender<Result<Value, ScriptFault>>,
    pub heartbeat: mpsc::Sender<()>,
}

/// Privileged script evaluation.
///
/// The host owns the actual evaluation machinery; the driver manages scope
/// identity, argument binding and completion arbitration.
pub trait ScriptHost {
    fn create_scope(&mut self, window: &WindowId) -> Result<ScopeId, HostError>;

    fn drop_scope(&mut self, scope: ScopeId);

    /// Bind the call arguments into the scope. Rebinding happens on every
    /// call even when the scope is reused.
    fn bind_args(&mut self, scope: ScopeId, args: &[Value]) -> Result<(), HostError>;

    /// Evaluate `script` in `scope`. Returns the completion value of the
    /// evaluated code; asynchronous scripts use `hooks` instead.
    fn eval(
        &mut self,
        scope: ScopeId,
        script: &str,
        hooks: CompletionHooks,
    ) -> Result<Value, ScriptFault>;
}
