use geckoxide_types::WindowId;

use crate::host::{WindowHost, WindowInfo};

/// The modal dialog currently blocking the remote side, if any.
///
/// The dialog never owns its window: it keeps the window id and resolves it
/// through the host on demand, so a window that has since closed simply
/// yields `None`. Tab modals carry no window id at all and are addressed
/// through the current browser.
#[derive(Debug, Clone)]
pub struct ModalDialog {
    window: Option<WindowId>,
}

impl ModalDialog {
    pub fn new(window: Option<WindowId>) -> Self {
        Self { window }
    }

    /// The id of the dialog's window, for hosts that need to address it.
    pub fn window_id(&self) -> Option<&WindowId> {
        self.window.as_ref()
    }

    /// Resolve the dialog's window, `None` once it is gone.
    pub fn window(&self, host: &dyn WindowHost) -> Option<WindowInfo> {
        self.window.as_ref().and_then(|id| host.window(id))
    }
}
