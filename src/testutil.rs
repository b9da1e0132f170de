//! Scripted mocks for the transport and host collaborators.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};

use futures::stream::Stream;
use serde_json::{json, Value};

use geckoxide_types::{Call, FrameId, HostMessage, WindowId};

use crate::conn::{SendError, Transport};
use crate::host::{
    ChromeFrame, CompletionHooks, ElementHost, ElementId, HostError, ScopeId, ScriptFault,
    ScriptHost, TabInfo, WindowHost, WindowInfo, WindowRect,
};

type Responder = Box<dyn FnMut(&Call) -> Vec<HostMessage>>;

/// Channel-less transport double: outbound calls are recorded, inbound
/// messages come from a preloaded queue plus an optional responder invoked
/// per send. The stream ends (instead of pending forever) once the queue
/// runs dry, so a test that would otherwise hang fails loudly.
pub(crate) struct MockTransport {
    pub sent: Rc<RefCell<Vec<Call>>>,
    inbound: Rc<RefCell<VecDeque<HostMessage>>>,
    responder: Option<Responder>,
    fail_sends: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Rc::new(RefCell::new(Vec::new())),
            inbound: Rc::new(RefCell::new(VecDeque::new())),
            responder: None,
            fail_sends: false,
        }
    }

    pub fn push_inbound(&self, msg: HostMessage) {
        self.inbound.borrow_mut().push_back(msg);
    }

    pub fn inbound_handle(&self) -> Rc<RefCell<VecDeque<HostMessage>>> {
        self.inbound.clone()
    }

    pub fn respond_with(mut self, responder: impl FnMut(&Call) -> Vec<HostMessage> + 'static) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }
}

impl Stream for MockTransport {
    type Item = HostMessage;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.inbound.borrow_mut().pop_front())
    }
}

impl Transport for MockTransport {
    fn send(&mut self, call: Call) -> Result<(), SendError> {
        if self.fail_sends {
            return Err(SendError::Failed("mock send failure".to_string()));
        }
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(&call);
            self.inbound.borrow_mut().extend(replies);
        }
        self.sent.borrow_mut().push(call);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockWindow {
    pub info: WindowInfo,
    pub url: String,
    pub title: String,
}

impl MockWindow {
    pub fn content(id: &str, name: &str, tabs: Vec<(&str, bool)>) -> Self {
        MockWindow {
            info: WindowInfo {
                id: WindowId::from(id),
                name: name.to_string(),
                kind: "navigator:browser".to_string(),
                ready: true,
                tabs: tabs
                    .into_iter()
                    .map(|(content_id, remote)| TabInfo {
                        content_id: FrameId::from(content_id),
                        remote,
                    })
                    .collect(),
                selected_tab: 0,
            },
            url: "about:blank".to_string(),
            title: String::new(),
        }
    }
}

/// Window host double backed by a shared vector of windows.
#[derive(Clone)]
pub(crate) struct MockWindowHost {
    pub windows: Rc<RefCell<Vec<MockWindow>>>,
}

impl MockWindowHost {
    pub fn with_windows(windows: Vec<MockWindow>) -> Self {
        Self {
            windows: Rc::new(RefCell::new(windows)),
        }
    }

    fn get(&self, id: &WindowId) -> Option<MockWindow> {
        self.windows
            .borrow()
            .iter()
            .find(|w| &w.info.id == id)
            .cloned()
    }
}

impl WindowHost for MockWindowHost {
    fn windows(&self) -> Vec<WindowInfo> {
        self.windows.borrow().iter().map(|w| w.info.clone()).collect()
    }

    fn window(&self, id: &WindowId) -> Option<WindowInfo> {
        self.get(id).map(|w| w.info)
    }

    fn recent_window(&self) -> Option<WindowInfo> {
        self.windows.borrow().first().map(|w| w.info.clone())
    }

    fn focus_window(&mut self, _id: &WindowId) {}

    fn select_tab(&mut self, id: &WindowId, index: usize) -> Result<(), HostError> {
        let mut windows = self.windows.borrow_mut();
        let win = windows
            .iter_mut()
            .find(|w| &w.info.id == id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        if index >= win.info.tabs.len() {
            return Err(HostError::NotFound(format!("tab {index}")));
        }
        win.info.selected_tab = index;
        Ok(())
    }

    fn close_tab(&mut self, id: &WindowId) -> Result<(), HostError> {
        let mut windows = self.windows.borrow_mut();
        if let Some(win) = windows.iter_mut().find(|w| &w.info.id == id) {
            if !win.info.tabs.is_empty() {
                let selected = win.info.selected_tab;
                win.info.tabs.remove(selected);
                win.info.selected_tab = 0;
            }
        }
        Ok(())
    }

    fn close_window(&mut self, id: &WindowId) -> Result<(), HostError> {
        self.windows.borrow_mut().retain(|w| &w.info.id != id);
        Ok(())
    }

    fn navigate(&mut self, id: &WindowId, url: &str) -> Result<(), HostError> {
        let mut windows = self.windows.borrow_mut();
        let win = windows
            .iter_mut()
            .find(|w| &w.info.id == id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))?;
        win.url = url.to_string();
        Ok(())
    }

    fn current_url(&self, id: &WindowId) -> Result<String, HostError> {
        self.get(id)
            .map(|w| w.url)
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    fn title(&self, id: &WindowId) -> Result<String, HostError> {
        self.get(id)
            .map(|w| w.title)
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    fn page_source(&self, id: &WindowId) -> Result<String, HostError> {
        self.get(id)
            .map(|_| "<window/>".to_string())
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    fn rect(&self, id: &WindowId) -> Result<WindowRect, HostError> {
        self.get(id)
            .map(|_| WindowRect {
                x: 0,
                y: 0,
                width: 1280,
                height: 1024,
            })
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    fn move_to(&mut self, _id: &WindowId, _x: i64, _y: i64) -> Result<(), HostError> {
        Ok(())
    }

    fn resize_to(&mut self, _id: &WindowId, _width: u64, _height: u64) -> Result<(), HostError> {
        Ok(())
    }

    fn maximize(&mut self, _id: &WindowId) -> Result<(), HostError> {
        Ok(())
    }

    fn capture_viewport(&self, id: &WindowId) -> Result<String, HostError> {
        self.get(id)
            .map(|_| "aVZCT1J3MEtHZ28=".to_string())
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }

    fn chrome_frames(&self, _id: &WindowId) -> Vec<ChromeFrame> {
        Vec::new()
    }
}

/// Element host double recording dialog interactions.
#[derive(Clone, Default)]
pub(crate) struct MockElementHost {
    pub dialog_actions: Rc<RefCell<Vec<String>>>,
    pub dialog_text: Rc<RefCell<String>>,
}

impl MockElementHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ElementHost for MockElementHost {
    fn find_element(
        &self,
        _window: &WindowId,
        _using: &str,
        value: &str,
        _start: Option<&ElementId>,
    ) -> Result<ElementId, HostError> {
        Ok(ElementId(format!("el-{value}")))
    }

    fn find_elements(
        &self,
        window: &WindowId,
        using: &str,
        value: &str,
        start: Option<&ElementId>,
    ) -> Result<Vec<ElementId>, HostError> {
        Ok(vec![self.find_element(window, using, value, start)?])
    }

    fn active_element(&self, _window: &WindowId) -> Result<ElementId, HostError> {
        Ok(ElementId("el-active".to_string()))
    }

    fn click(&mut self, _window: &WindowId, _el: &ElementId) -> Result<(), HostError> {
        Ok(())
    }

    fn attribute(
        &self,
        _window: &WindowId,
        _el: &ElementId,
        name: &str,
    ) -> Result<Option<String>, HostError> {
        Ok(Some(format!("attr-{name}")))
    }

    fn text(&self, _window: &WindowId, _el: &ElementId) -> Result<String, HostError> {
        Ok("text".to_string())
    }

    fn tag_name(&self, _window: &WindowId, _el: &ElementId) -> Result<String, HostError> {
        Ok("div".to_string())
    }

    fn is_displayed(&self, _window: &WindowId, _el: &ElementId) -> Result<bool, HostError> {
        Ok(true)
    }

    fn is_enabled(&self, _window: &WindowId, _el: &ElementId) -> Result<bool, HostError> {
        Ok(true)
    }

    fn is_selected(&self, _window: &WindowId, _el: &ElementId) -> Result<bool, HostError> {
        Ok(false)
    }

    fn css_value(
        &self,
        _window: &WindowId,
        _el: &ElementId,
        _property: &str,
    ) -> Result<String, HostError> {
        Ok("block".to_string())
    }

    fn rect(
        &self,
        _window: &WindowId,
        _el: &ElementId,
    ) -> Result<(i64, i64, u64, u64), HostError> {
        Ok((0, 0, 100, 40))
    }

    fn send_keys(
        &mut self,
        _window: &WindowId,
        _el: &ElementId,
        _keys: &str,
    ) -> Result<(), HostError> {
        Ok(())
    }

    fn clear(&mut self, _window: &WindowId, _el: &ElementId) -> Result<(), HostError> {
        Ok(())
    }

    fn accept_dialog(&mut self, _window: Option<&WindowId>) -> Result<(), HostError> {
        self.dialog_actions.borrow_mut().push("accept".to_string());
        Ok(())
    }

    fn dismiss_dialog(&mut self, _window: Option<&WindowId>) -> Result<(), HostError> {
        self.dialog_actions.borrow_mut().push("dismiss".to_string());
        Ok(())
    }

    fn dialog_text(&self, _window: Option<&WindowId>) -> Result<String, HostError> {
        Ok(self.dialog_text.borrow().clone())
    }

    fn send_keys_to_dialog(
        &mut self,
        _window: Option<&WindowId>,
        keys: &str,
    ) -> Result<(), HostError> {
        self.dialog_actions
            .borrow_mut()
            .push(format!("keys:{keys}"));
        Ok(())
    }
}

enum EvalBehavior {
    Return(Value),
    Finish(Value),
    Fault(String),
    Hang,
    Capture,
}

/// Script host double with a canned evaluation behavior. `Capture` parks
/// the completion hooks in a shared slot so a test can play the script's
/// part concurrently.
pub(crate) struct MockScriptHost {
    behavior: EvalBehavior,
    next_scope: u64,
    pub hooks: Rc<RefCell<Option<CompletionHooks>>>,
    pub bound_args: Rc<RefCell<Vec<Value>>>,
    pub dropped_scopes: Rc<RefCell<Vec<ScopeId>>>,
    // keeps hang-mode hooks alive so the wait times out instead of erroring
    parked: Vec<CompletionHooks>,
}

impl MockScriptHost {
    fn with(behavior: EvalBehavior) -> Self {
        Self {
            behavior,
            next_scope: 0,
            hooks: Rc::new(RefCell::new(None)),
            bound_args: Rc::new(RefCell::new(Vec::new())),
            dropped_scopes: Rc::new(RefCell::new(Vec::new())),
            parked: Vec::new(),
        }
    }

    pub fn returning(value: Value) -> Self {
        Self::with(EvalBehavior::Return(value))
    }

    pub fn finishing_with(value: Value) -> Self {
        Self::with(EvalBehavior::Finish(value))
    }

    pub fn faulting(message: &str) -> Self {
        Self::with(EvalBehavior::Fault(message.to_string()))
    }

    pub fn hanging() -> Self {
        Self::with(EvalBehavior::Hang)
    }

    pub fn capturing() -> Self {
        Self::with(EvalBehavior::Capture)
    }
}

impl ScriptHost for MockScriptHost {
    fn create_scope(&mut self, _window: &WindowId) -> Result<ScopeId, HostError> {
        self.next_scope += 1;
        Ok(ScopeId(self.next_scope))
    }

    fn drop_scope(&mut self, scope: ScopeId) {
        self.dropped_scopes.borrow_mut().push(scope);
    }

    fn bind_args(&mut self, _scope: ScopeId, args: &[Value]) -> Result<(), HostError> {
        *self.bound_args.borrow_mut() = args.to_vec();
        Ok(())
    }

    fn eval(
        &mut self,
        _scope: ScopeId,
        _script: &str,
        hooks: CompletionHooks,
    ) -> Result<Value, ScriptFault> {
        match &self.behavior {
            EvalBehavior::Return(value) => Ok(value.clone()),
            EvalBehavior::Finish(value) => {
                let _ = hooks.finish.send(Ok(value.clone()));
                Ok(json!(null))
            }
            EvalBehavior::Fault(message) => Err(ScriptFault::new(message.clone())),
            EvalBehavior::Hang => {
                self.parked.push(hooks);
                Ok(json!(null))
            }
            EvalBehavior::Capture => {
                *self.hooks.borrow_mut() = Some(hooks);
                Ok(json!(null))
            }
        }
    }
}
