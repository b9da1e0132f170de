//! The top-level session state machine.
//!
//! The driver owns the current execution context, the registered browsers
//! and frames, the timeouts, and the modal-dialog bookkeeping. Incoming
//! commands resolve through a static name table (including deprecated
//! aliases) and run to completion one at a time; a handler that suspends
//! on a proxied call keeps routing inbound host messages for exactly that
//! command while it waits.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fnv::FnvHashMap;
use futures::channel::oneshot;
use futures::future::{self, Either};
use futures::pin_mut;
use futures_timer::Delay;
use serde_json::{json, Value};
use uuid::Uuid;

use geckoxide_types::{Call, Command, CommandId, FrameId, HostMessage, Response, WindowId};

use crate::browser::{Browser, PendingCommand};
use crate::capabilities::{self, Capabilities};
use crate::conn::MessageLink;
use crate::context::Context;
use crate::error::{DriverError, Result};
use crate::frame::{Frame, FrameRegistry, ProcessAffinity};
use crate::host::{ElementId, HostError};
use crate::modal::ModalDialog;
use crate::proxy::RemoteProxy;
use crate::runtime::DriverRuntime;
use crate::sandbox::{self, ExecuteOpts, Sandbox};

mod dispatch;

pub use dispatch::{resolve, Cmd};

/// Script timeout applied to fresh sessions.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed interval for readiness polling (window startup, page loads).
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SessionState {
    NoSession,
    Starting,
    Active,
    TearingDown,
}

#[derive(Debug, Clone)]
struct Session {
    id: String,
    capabilities: Capabilities,
}

#[derive(Debug, Clone)]
struct LogEntry {
    level: String,
    message: String,
    at: u128,
}

/// Drives one automation session against the host application.
pub struct Driver {
    runtime: DriverRuntime,
    conn: MessageLink,
    listener: RemoteProxy,
    registry: FrameRegistry,

    state: SessionState,
    session: Option<Session>,
    context: Context,

    browsers: FnvHashMap<WindowId, Browser>,
    cur_browser: Option<WindowId>,
    /// Topmost chrome window.
    main_frame: Option<WindowId>,
    /// Chrome-side frame that currently has focus, if any.
    cur_chrome_frame: Option<WindowId>,
    main_content_frame_id: Option<FrameId>,

    script_timeout: Duration,
    search_timeout: Option<Duration>,
    page_timeout: Option<Duration>,

    sandbox: Option<Sandbox>,
    dialog: Option<ModalDialog>,
    current_frame_element: Option<Value>,
    previous_frame_element: Option<Value>,

    imported_chrome: Vec<String>,
    imported_content: Vec<String>,
    logs: Vec<LogEntry>,
    test_name: Option<String>,

    reg_waiter: Option<oneshot::Sender<()>>,
    listening_waiter: Option<oneshot::Sender<()>>,
    new_session_command_id: Option<CommandId>,
}

enum Step<T> {
    Done(std::result::Result<T, oneshot::Canceled>),
    Msg(Option<HostMessage>),
}

impl Driver {
    pub fn new(runtime: DriverRuntime, conn: MessageLink) -> Self {
        Self {
            runtime,
            conn,
            listener: RemoteProxy::new(),
            registry: FrameRegistry::new(),
            state: SessionState::NoSession,
            session: None,
            context: Context::default(),
            browsers: Default::default(),
            cur_browser: None,
            main_frame: None,
            cur_chrome_frame: None,
            main_content_frame_id: None,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            search_timeout: None,
            page_timeout: None,
            sandbox: None,
            dialog: None,
            current_frame_element: None,
            previous_frame_element: None,
            imported_chrome: Vec::new(),
            imported_content: Vec::new(),
            logs: Vec::new(),
            test_name: None,
            reg_waiter: None,
            listening_waiter: None,
            new_session_command_id: None,
        }
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn has_dialog(&self) -> bool {
        self.dialog.is_some()
    }

    pub fn current_window(&self) -> Option<&WindowId> {
        self.cur_browser.as_ref()
    }

    /// Name set by `setTestName`, surfaced to privileged test harnesses.
    pub fn test_name(&self) -> Option<&str> {
        self.test_name.as_deref()
    }

    /// Process one client command to completion.
    ///
    /// Every command resolves exactly once, either with a value or with a
    /// structured error; handler failures never escape as panics into the
    /// dispatch loop. A transport failure falls the session back to the
    /// global transport target before the error is surfaced, so subsequent
    /// commands stay usable.
    pub async fn dispatch(&mut self, cmd: Command) -> Response {
        tracing::debug!(id = %cmd.id, name = %cmd.name, "dispatch");
        let result = match dispatch::resolve(&cmd.name) {
            Some(op) => self.run(op, cmd.parameters, cmd.id).await,
            None => Err(DriverError::Protocol(format!(
                "Unrecognised command: {}",
                cmd.name
            ))),
        };

        // deferred sends belong to the command that queued them
        if let Some(cur) = self.cur_browser.clone() {
            if let Some(browser) = self.browsers.get_mut(&cur) {
                browser.clear_pending();
            }
        }

        let session_id = self.session.as_ref().map(|s| s.id.clone());
        match result {
            Ok(value) => Response::ok(cmd.id, session_id, value),
            Err(err) => {
                if err.is_transport() {
                    self.switch_to_global_target(false);
                }
                tracing::debug!(id = %cmd.id, kind = err.kind(), "command failed");
                Response::fail(cmd.id, session_id, err.into_payload())
            }
        }
    }

    async fn run(&mut self, op: Cmd, params: Value, cmd_id: CommandId) -> Result<Value> {
        if op != Cmd::NewSession && self.state != SessionState::Active {
            return Err(DriverError::InvalidState("no session is active".into()));
        }

        match op {
            Cmd::NewSession => self.new_session(params, cmd_id).await,
            Cmd::GetSessionCapabilities => self.get_session_capabilities(),
            Cmd::DeleteSession => {
                self.session_tear_down();
                Ok(Value::Null)
            }
            Cmd::SetContext => self.set_context(&params),
            Cmd::GetContext => Ok(json!(self.context.as_str())),
            Cmd::SetScriptTimeout => {
                self.script_timeout = param_ms(&params, "ms")?;
                Ok(Value::Null)
            }
            Cmd::SetSearchTimeout => {
                self.search_timeout = Some(param_ms(&params, "ms")?);
                Ok(Value::Null)
            }
            Cmd::Timeouts => self.timeouts(&params),
            Cmd::Log => self.log(&params),
            Cmd::GetLogs => Ok(self.get_logs()),
            Cmd::SetTestName => self.set_test_name(params).await,
            Cmd::ExecuteScript => self.execute(params, false).await,
            Cmd::ExecuteAsyncScript => self.execute_async(params, false).await,
            Cmd::ExecuteJsScript => self.execute_js_script(params).await,
            Cmd::ImportScript => self.import_script(params).await,
            Cmd::ClearImportedScripts => self.clear_imported_scripts(),
            Cmd::Get => self.get(params).await,
            Cmd::GetCurrentUrl => self.get_current_url().await,
            Cmd::GoBack => self.listener_value("goBack", vec![]).await,
            Cmd::GoForward => self.listener_value("goForward", vec![]).await,
            Cmd::Refresh => self.listener_value("refresh", vec![]).await,
            Cmd::GetTitle => self.get_title().await,
            Cmd::GetWindowType => self.get_window_type(),
            Cmd::GetPageSource => self.get_page_source().await,
            Cmd::GetAppCacheStatus => self.listener_value("getAppCacheStatus", vec![]).await,
            Cmd::GetWindowHandle => self.get_window_handle(),
            Cmd::GetWindowHandles => self.get_window_handles(),
            Cmd::GetChromeWindowHandle => self.get_chrome_window_handle(),
            Cmd::GetChromeWindowHandles => self.get_chrome_window_handles(),
            Cmd::SwitchToWindow => self.switch_to_window(params).await,
            Cmd::SwitchToFrame => self.switch_to_frame(params).await,
            Cmd::GetActiveFrame => self.get_active_frame(),
            Cmd::GetWindowSize => self.get_window_size(),
            Cmd::SetWindowSize => self.set_window_size(&params),
            Cmd::GetWindowPosition => self.get_window_position(),
            Cmd::SetWindowPosition => self.set_window_position(&params),
            Cmd::MaximizeWindow => self.maximize_window(),
            Cmd::Close => self.close().await,
            Cmd::CloseChromeWindow => self.close_chrome_window().await,
            Cmd::FindElement => self.find_element(params, false).await,
            Cmd::FindElements => self.find_elements(params, false).await,
            Cmd::FindChildElement => self.find_element(params, true).await,
            Cmd::FindChildElements => self.find_elements(params, true).await,
            Cmd::GetActiveElement => self.get_active_element().await,
            Cmd::ClickElement => self.click_element(params).await,
            Cmd::GetElementAttribute => self.get_element_attribute(params).await,
            Cmd::GetElementText => self.get_element_text(params).await,
            Cmd::GetElementTagName => self.get_element_tag_name(params).await,
            Cmd::IsElementDisplayed => self.is_element_displayed(params).await,
            Cmd::GetElementValueOfCssProperty => self.get_element_css_value(params).await,
            Cmd::SubmitElement => self.submit_element(params).await,
            Cmd::GetElementRect => self.get_element_rect(params).await,
            Cmd::GetElementLocation => self.get_element_location(params).await,
            Cmd::IsElementEnabled => self.is_element_enabled(params).await,
            Cmd::IsElementSelected => self.is_element_selected(params).await,
            Cmd::SendKeysToElement => self.send_keys_to_element(params).await,
            Cmd::ClearElement => self.clear_element(params).await,
            Cmd::SingleTap => self.content_only("singleTap", params).await,
            Cmd::ActionChain => self.content_only("actionChain", params).await,
            Cmd::MultiAction => self.content_only("multiAction", params).await,
            Cmd::AddCookie => {
                let cookie = params.get("cookie").cloned().unwrap_or(Value::Null);
                self.listener_value("addCookie", vec![json!({ "cookie": cookie })])
                    .await
            }
            Cmd::GetCookies => self.listener_value("getCookies", vec![]).await,
            Cmd::DeleteCookie => {
                let name = param_str(&params, "name")?;
                self.listener_value("deleteCookie", vec![json!({ "name": name })])
                    .await
            }
            Cmd::DeleteAllCookies => self.listener_value("deleteAllCookies", vec![]).await,
            Cmd::DismissDialog => self.dismiss_dialog(),
            Cmd::AcceptDialog => self.accept_dialog(),
            Cmd::GetTextFromDialog => self.get_text_from_dialog(),
            Cmd::SendKeysToDialog => self.send_keys_to_dialog(&params),
            Cmd::TakeScreenshot => self.take_screenshot(params).await,
        }
    }

    // ------------------------------------------------------------------
    // session lifecycle

    async fn new_session(&mut self, params: Value, cmd_id: CommandId) -> Result<Value> {
        if self.state != SessionState::NoSession {
            return Err(DriverError::InvalidState("Session already running".into()));
        }
        self.state = SessionState::Starting;
        match self.start_session(params, cmd_id).await {
            Ok(caps) => {
                self.state = SessionState::Active;
                Ok(caps)
            }
            Err(err) => {
                self.state = SessionState::NoSession;
                self.session = None;
                Err(err)
            }
        }
    }

    async fn start_session(&mut self, params: Value, cmd_id: CommandId) -> Result<Value> {
        let session_id = params
            .get("sessionId")
            .or_else(|| params.get("session_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let requested = params
            .get("capabilities")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let caps = capabilities::merge(&self.runtime.default_capabilities(), &requested)?;
        self.session = Some(Session {
            id: session_id,
            capabilities: caps.clone(),
        });
        self.script_timeout = DEFAULT_SCRIPT_TIMEOUT;
        self.new_session_command_id = Some(cmd_id);

        // the host window may still be coming up; poll until it is usable
        let window = loop {
            if self.runtime.is_ready() {
                if let Some(win) = self.runtime.windows.recent_window() {
                    if win.ready {
                        break win;
                    }
                }
            }
            Delay::new(POLL_INTERVAL).await;
        };

        let register = self.registration_promise();
        let listening = self.listening_promise();
        self.start_browser(window.id, true);
        self.switch_to_global_target(true);

        self.drive(register).await?;
        self.drive(listening).await?;

        Ok(Value::Object(caps))
    }

    fn get_session_capabilities(&self) -> Result<Value> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| DriverError::InvalidState("no session is active".into()))?;
        Ok(Value::Object(session.capabilities.clone()))
    }

    /// Tear the session down: tell every known frame in every browser to
    /// drop its session state, revert the transport to the global target,
    /// and reset all per-session pointers.
    fn session_tear_down(&mut self) {
        self.state = SessionState::TearingDown;

        let mut goodbyes = Vec::new();
        for browser in self.browsers.values() {
            for frame in browser.known_frames() {
                goodbyes.push(Call::broadcast("deleteSession", frame.clone(), json!({}), None));
            }
        }
        for call in goodbyes {
            if let Err(err) = self.conn.send(call) {
                tracing::warn!("failed to notify frame of session teardown: {err}");
            }
        }

        self.switch_to_global_target(true);

        if let Some(main) = self.main_frame.clone() {
            self.runtime.windows.focus_window(&main);
        }
        if let Some(sandbox) = self.sandbox.take() {
            self.runtime.scripts.drop_scope(sandbox.scope);
        }

        self.browsers.clear();
        self.cur_browser = None;
        self.main_frame = None;
        self.cur_chrome_frame = None;
        self.main_content_frame_id = None;
        self.registry = FrameRegistry::new();
        self.dialog = None;
        self.current_frame_element = None;
        self.previous_frame_element = None;
        self.imported_chrome.clear();
        self.imported_content.clear();
        self.context = Context::default();
        self.session = None;
        self.reg_waiter = None;
        self.listening_waiter = None;
        self.new_session_command_id = None;
        self.state = SessionState::NoSession;
    }

    fn start_browser(&mut self, window: WindowId, is_new_session: bool) {
        self.main_frame = Some(window.clone());
        self.cur_chrome_frame = None;
        let mut browser = Browser::new(window.clone(), is_new_session);
        if !is_new_session {
            // frames already loaded in this window will each re-register
            if let Some(info) = self.runtime.windows.window(&window) {
                browser.frame_regs_pending = info.tabs.len();
            }
        }
        self.browsers.insert(window.clone(), browser);
        self.cur_browser = Some(window);
    }

    // ------------------------------------------------------------------
    // message routing

    /// Route one inbound host message. Called between suspension points
    /// while a command is waiting on a reply or a registration handshake.
    fn route(&mut self, msg: HostMessage) -> Result<()> {
        match msg {
            HostMessage::Ok { command_id } => self.listener.resolve_ok(command_id),
            HostMessage::Value { command_id, value } => {
                self.listener.resolve_value(command_id, value)
            }
            HostMessage::Error { command_id, error } => {
                self.listener.resolve_error(command_id, error)
            }
            HostMessage::DialogOpened {
                window_id,
                tab_modal,
            } => {
                let window = if tab_modal { None } else { window_id };
                self.dialog = Some(ModalDialog::new(window));
                // the remote side cannot answer while blocked on the
                // dialog; resolve the outstanding call right away
                self.listener.on_dialog();
            }
            HostMessage::Register { window_id, remote } => {
                self.on_register(window_id, remote)?;
            }
            HostMessage::ListenersAttached { listener_id } => {
                self.on_listeners_attached(listener_id)?;
            }
            HostMessage::SwitchedToFrame {
                frame_value,
                store_previous,
                restore_previous,
            } => {
                if restore_previous {
                    self.current_frame_element = self.previous_frame_element.take();
                } else {
                    if store_previous {
                        self.previous_frame_element = self.current_frame_element.clone();
                    }
                    self.current_frame_element = frame_value;
                }
            }
            HostMessage::Log { level, message } => {
                tracing::info!(%level, "listener: {message}");
                self.push_log(level, message);
            }
        }
        Ok(())
    }

    fn on_register(&mut self, window_id: WindowId, remote: bool) -> Result<()> {
        let uid = FrameId::from(&window_id);

        if self.registry.current_remote().is_some()
            && self.runtime.windows.window(&window_id).is_none()
        {
            // a frame registering from another process carries a window id
            // that means nothing to us; it is the out-of-process frame we
            // switched to, announcing where replies must now be sent
            self.registry.update_remote_target(uid.clone());
        }

        // the top-level window owning the registering content, when known
        let owner = self
            .runtime
            .windows
            .windows()
            .into_iter()
            .find(|w| w.tabs.iter().any(|t| t.content_id == uid))
            .map(|w| w.id);
        self.registry.record(Frame {
            id: uid.clone(),
            affinity: ProcessAffinity::from_remote(remote),
            parent: owner.unwrap_or_else(|| window_id.clone()),
        });

        let Some(cur) = self.cur_browser.clone() else {
            return Ok(());
        };

        let browser_window = self.runtime.windows.window(&cur);
        let is_selected = browser_window
            .as_ref()
            .and_then(|w| w.selected())
            .map(|tab| tab.content_id == uid)
            .unwrap_or(false);
        let selected_index = browser_window.as_ref().map(|w| w.selected_tab);

        let (null_previous, now_has_frame, regs_done, is_new_session, main_content) = {
            let browser = self
                .browsers
                .get_mut(&cur)
                .expect("current browser is tracked");
            let null_previous = browser.cur_frame_id().is_none();
            if browser.tab().is_none() {
                if let Some(index) = selected_index {
                    browser.adopt_tab(index);
                }
            }
            browser.register_frame(uid.clone(), is_selected, remote);
            if browser.frame_regs_pending > 0 {
                browser.frame_regs_pending -= 1;
            }
            (
                null_previous,
                browser.cur_frame_id().is_some(),
                browser.frame_regs_pending == 0,
                browser.is_new_session,
                browser.main_content_id().cloned(),
            )
        };

        if self.main_content_frame_id.is_none() {
            self.main_content_frame_id = main_content;
        }

        if null_previous && now_has_frame {
            let ack_id = self.new_session_command_id;
            let values = self.session_bootstrap_values();
            self.send_async("newSession", values, ack_id)?;
            if is_new_session {
                self.new_session_command_id = None;
            }
        }

        if regs_done {
            if let Some(tx) = self.reg_waiter.take() {
                let _ = tx.send(());
            }
        }
        Ok(())
    }

    fn on_listeners_attached(&mut self, listener_id: FrameId) -> Result<()> {
        let matches_current = self
            .cur_browser
            .as_ref()
            .and_then(|cur| self.browsers.get(cur))
            .and_then(|b| b.cur_frame_id())
            == Some(&listener_id);

        if matches_current {
            // after a remoteness change the fresh listener needs the
            // session bootstrap again before queued work resumes
            let values = self.session_bootstrap_values();
            self.send_async("newSession", values, None)?;

            let live = self.listener.current_command_id();
            let cur = self.cur_browser.clone().expect("checked above");
            let flushed = self
                .browsers
                .get_mut(&cur)
                .expect("current browser is tracked")
                .flush_pending_commands(live);
            for call in flushed {
                self.conn.send(call)?;
            }
        }

        if let Some(tx) = self.listening_waiter.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn session_bootstrap_values(&self) -> Value {
        let raises = self
            .session
            .as_ref()
            .and_then(|s| s.capabilities.get("raisesAccessibilityExceptions"))
            .cloned()
            .unwrap_or(json!(false));
        json!({ "raisesAccessibilityExceptions": raises })
    }

    fn registration_promise(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.reg_waiter = Some(tx);
        rx
    }

    fn listening_promise(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.listening_waiter = Some(tx);
        rx
    }

    /// Await `rx` while routing inbound host messages; the single
    /// suspension primitive every waiting handler goes through.
    async fn drive<T>(&mut self, mut rx: oneshot::Receiver<T>) -> Result<T> {
        loop {
            let step = {
                let next = self.conn.recv();
                pin_mut!(next);
                match future::select(&mut rx, next).await {
                    Either::Left((outcome, _)) => Step::Done(outcome),
                    Either::Right((msg, _)) => Step::Msg(msg),
                }
            };
            match step {
                Step::Done(Ok(value)) => return Ok(value),
                Step::Done(Err(_)) => return Err(DriverError::Disconnected),
                Step::Msg(Some(msg)) => self.route(msg)?,
                Step::Msg(None) => return Err(DriverError::Disconnected),
            }
        }
    }

    // ------------------------------------------------------------------
    // outbound plumbing

    /// Send to the content side: directly when an out-of-process frame is
    /// the active target, otherwise via the global broadcaster — deferred
    /// if a remoteness change is in flight.
    fn send_async(
        &mut self,
        name: &'static str,
        payload: Value,
        cmd_id: Option<CommandId>,
    ) -> Result<()> {
        if let Some(remote) = self.registry.current_remote() {
            let call = Call::frame(name, remote.target_frame_id.clone(), payload, cmd_id);
            return self.conn.send(call);
        }

        let cur = self
            .cur_browser
            .clone()
            .ok_or_else(|| DriverError::NoSuchWindow("no current browser".into()))?;
        // compare the tab's process affinity against the last observation;
        // a flip means the replacement frame has not registered yet and
        // this send must wait for it
        let observed = self
            .runtime
            .windows
            .window(&cur)
            .and_then(|w| w.selected().map(|t| t.remote));
        let browser = self
            .browsers
            .get_mut(&cur)
            .expect("current browser is tracked");
        if let Some(now_remote) = observed {
            browser.observe_remoteness(now_remote);
        }
        // a null current frame means top level; fall back to the default
        // content frame
        let frame = browser
            .cur_frame_id()
            .cloned()
            .or_else(|| self.main_content_frame_id.clone())
            .unwrap_or_else(|| FrameId::from(""));
        let live = self.listener.current_command_id();
        let deferred: PendingCommand =
            Box::new(move |_live| Call::broadcast(name, frame, payload, cmd_id));
        if let Some(call) = browser.execute_when_ready(live, deferred) {
            self.conn.send(call)?;
        }
        Ok(())
    }

    /// Proxy a named call to the managed context and await its outcome.
    async fn listener_call(
        &mut self,
        name: &'static str,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        let (id, rx) = self.listener.prepare(None);
        let payload = RemoteProxy::collapse_args(args);
        self.send_async(name, payload, Some(id))?;
        self.drive(rx).await?
    }

    async fn listener_value(&mut self, name: &'static str, args: Vec<Value>) -> Result<Value> {
        Ok(self
            .listener_call(name, args)
            .await?
            .unwrap_or(Value::Null))
    }

    /// Revert the transport to the global broadcaster, putting the remote
    /// frame's listener to sleep when asked to.
    fn switch_to_global_target(&mut self, send_sleep: bool) {
        if let Some(remote) = self.registry.revert_to_broadcast() {
            if send_sleep {
                let call = Call::frame("sleepSession", remote.target_frame_id, json!({}), None);
                if let Err(err) = self.conn.send(call) {
                    tracing::warn!("failed to put remote frame to sleep: {err}");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // windows and frames

    fn current_window_id(&self) -> Result<WindowId> {
        if let Some(frame) = &self.cur_chrome_frame {
            return Ok(frame.clone());
        }
        if let Some(cur) = &self.cur_browser {
            return Ok(cur.clone());
        }
        self.runtime
            .windows
            .recent_window()
            .map(|w| w.id)
            .ok_or_else(|| DriverError::NoSuchWindow("no window is available".into()))
    }

    fn cur_browser(&self) -> Result<&Browser> {
        self.cur_browser
            .as_ref()
            .and_then(|c| self.browsers.get(c))
            .ok_or_else(|| DriverError::NoSuchWindow("no current browser".into()))
    }

    fn get_window_handle(&self) -> Result<Value> {
        let browser = self.cur_browser()?;
        match browser.cur_frame_id() {
            Some(id) => Ok(json!(id.as_str())),
            None => Ok(json!(browser.window().as_str())),
        }
    }

    fn get_window_handles(&self) -> Result<Value> {
        let mut handles = Vec::new();
        for win in self.runtime.windows.windows() {
            if win.tabs.is_empty() {
                handles.push(json!(win.id.as_str()));
            } else {
                for tab in &win.tabs {
                    handles.push(json!(tab.content_id.as_str()));
                }
            }
        }
        Ok(Value::Array(handles))
    }

    fn get_chrome_window_handle(&self) -> Result<Value> {
        let browser = self.cur_browser()?;
        Ok(json!(browser.window().as_str()))
    }

    fn get_chrome_window_handles(&self) -> Result<Value> {
        Ok(Value::Array(
            self.runtime
                .windows
                .windows()
                .into_iter()
                .map(|w| json!(w.id.as_str()))
                .collect(),
        ))
    }

    async fn switch_to_window(&mut self, params: Value) -> Result<Value> {
        let name = param_str(&params, "name")?;

        let mut found: Option<(WindowId, Option<(usize, FrameId, bool)>)> = None;
        'windows: for win in self.runtime.windows.windows() {
            if !win.tabs.is_empty() {
                for (index, tab) in win.tabs.iter().enumerate() {
                    if name == win.name
                        || name == tab.content_id.as_str()
                        || name == win.id.as_str()
                    {
                        found = Some((
                            win.id.clone(),
                            Some((index, tab.content_id.clone(), tab.remote)),
                        ));
                        break 'windows;
                    }
                }
            } else if name == win.name || name == win.id.as_str() {
                found = Some((win.id.clone(), None));
                break 'windows;
            }
        }

        let Some((window, tab)) = found else {
            return Err(DriverError::NoSuchWindow(name));
        };

        // switching windows invalidates a sandbox held for reuse
        if let Some(sandbox) = self.sandbox.take() {
            self.runtime.scripts.drop_scope(sandbox.scope);
        }

        if !self.browsers.contains_key(&window) {
            let waiters = tab
                .is_some()
                .then(|| (self.registration_promise(), self.listening_promise()));
            self.start_browser(window, false);
            if let Some((register, listening)) = waiters {
                self.drive(register).await?;
                self.drive(listening).await?;
            }
        } else {
            self.cur_browser = Some(window.clone());
            if let Some((index, content_id, remote)) = tab {
                self.runtime
                    .windows
                    .select_tab(&window, index)
                    .map_err(window_err)?;
                self.browsers
                    .get_mut(&window)
                    .expect("checked above")
                    .switch_to_tab(index, content_id, remote);
            }
        }
        Ok(Value::Null)
    }

    async fn switch_to_frame(&mut self, params: Value) -> Result<Value> {
        let id = params.get("id").cloned().filter(|v| !v.is_null());
        let element = params
            .get("element")
            .and_then(Value::as_str)
            .map(str::to_string);
        let focus = params
            .get("focus")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if self.context == Context::Privileged {
            if id.is_none() && element.is_none() {
                self.cur_chrome_frame = None;
                if focus {
                    if let Some(main) = self.main_frame.clone() {
                        self.runtime.windows.focus_window(&main);
                    }
                }
                return Ok(Value::Null);
            }

            let cur_win = self.current_window_id()?;
            let frames = self.runtime.windows.chrome_frames(&cur_win);
            let target = if let Some(el) = element {
                frames
                    .iter()
                    .find(|f| f.element_id.as_deref() == Some(el.as_str()))
                    .map(|f| f.window.clone())
            } else {
                match &id {
                    Some(Value::String(s)) => frames
                        .iter()
                        // name takes precedence over the element id
                        .find(|f| f.name.as_deref() == Some(s.as_str()))
                        .or_else(|| {
                            frames
                                .iter()
                                .find(|f| f.element_id.as_deref() == Some(s.as_str()))
                        })
                        .map(|f| f.window.clone()),
                    Some(v) => v
                        .as_u64()
                        .and_then(|n| frames.get(n as usize))
                        .map(|f| f.window.clone()),
                    None => None,
                }
            };

            let Some(win) = target else {
                return Err(DriverError::NoSuchFrame(
                    id.map(|v| v.to_string()).unwrap_or_default(),
                ));
            };
            if focus {
                self.runtime.windows.focus_window(&win);
            }
            self.cur_chrome_frame = Some(win);
            return Ok(Value::Null);
        }

        if id.is_none() && element.is_none() && self.registry.current_remote().is_some() {
            // heading back to the top level from a remote frame: revert to
            // the global broadcaster first so the reply routes correctly
            self.switch_to_global_target(true);
        }

        let res = self.listener_call("switchToFrame", vec![params.clone()]).await?;
        if let Some(result) = res {
            let win = result
                .get("win")
                .and_then(value_as_id_string)
                .map(|s| WindowId::new(s));
            let frame = result
                .get("frame")
                .and_then(value_as_id_string)
                .map(FrameId::new);
            if let (Some(win), Some(frame)) = (win, frame) {
                // the frame lives in another process; future sends go to it
                // directly, once it has registered and attached listeners
                let register = self.registration_promise();
                let listening = self.listening_promise();
                self.registry.switch_to_remote(win, frame);
                self.drive(register).await?;
                self.drive(listening).await?;
            }
        }
        Ok(Value::Null)
    }

    fn get_active_frame(&self) -> Result<Value> {
        match self.context {
            Context::Privileged => Ok(self
                .cur_chrome_frame
                .as_ref()
                .map(|w| json!(w.as_str()))
                .unwrap_or(Value::Null)),
            Context::Managed => Ok(self
                .current_frame_element
                .clone()
                .unwrap_or(Value::Null)),
        }
    }

    fn get_window_type(&self) -> Result<Value> {
        let win = self.current_window_info()?;
        Ok(json!(win.kind))
    }

    fn current_window_info(&self) -> Result<crate::host::WindowInfo> {
        let id = self.current_window_id()?;
        self.runtime
            .windows
            .window(&id)
            .ok_or_else(|| DriverError::NoSuchWindow(id.to_string()))
    }

    fn get_window_size(&self) -> Result<Value> {
        let id = self.current_window_id()?;
        let rect = self.runtime.windows.rect(&id).map_err(window_err)?;
        Ok(json!({ "width": rect.width, "height": rect.height }))
    }

    fn set_window_size(&mut self, params: &Value) -> Result<Value> {
        let width = param_u64(params, "width")?;
        let height = param_u64(params, "height")?;
        let id = self.current_window_id()?;
        self.runtime
            .windows
            .resize_to(&id, width, height)
            .map_err(window_err)?;
        Ok(Value::Null)
    }

    fn get_window_position(&self) -> Result<Value> {
        let id = self.current_window_id()?;
        let rect = self.runtime.windows.rect(&id).map_err(window_err)?;
        Ok(json!({ "x": rect.x, "y": rect.y }))
    }

    fn set_window_position(&mut self, params: &Value) -> Result<Value> {
        let x = param_i64(params, "x")?;
        let y = param_i64(params, "y")?;
        let id = self.current_window_id()?;
        self.runtime
            .windows
            .move_to(&id, x, y)
            .map_err(window_err)?;
        Ok(Value::Null)
    }

    fn maximize_window(&mut self) -> Result<Value> {
        let id = self.current_window_id()?;
        self.runtime.windows.maximize(&id).map_err(window_err)?;
        Ok(Value::Null)
    }

    /// Close the current window or tab, ending the session when it is the
    /// last one.
    async fn close(&mut self) -> Result<Value> {
        let windows = self.runtime.windows.windows();
        let nwins: usize = windows
            .iter()
            .map(|w| if w.tabs.is_empty() { 1 } else { w.tabs.len() })
            .sum();
        if nwins <= 1 {
            self.session_tear_down();
            return Ok(Value::Null);
        }

        let id = self.current_window_id()?;
        let has_tab = self.cur_browser().map(|b| b.tab().is_some()).unwrap_or(false);
        let closed = if has_tab {
            self.runtime.windows.close_tab(&id)
        } else {
            self.runtime.windows.close_window(&id)
        };
        closed.map_err(|e| DriverError::InvalidState(format!("Could not close window: {e}")))?;
        Ok(Value::Null)
    }

    async fn close_chrome_window(&mut self) -> Result<Value> {
        let nwins = self.runtime.windows.windows().len();
        if nwins <= 1 {
            self.session_tear_down();
            return Ok(Value::Null);
        }
        let id = self.current_window_id()?;
        self.registry.forget_window(&id);
        self.runtime
            .windows
            .close_window(&id)
            .map_err(|e| DriverError::InvalidState(format!("Could not close window: {e}")))?;
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // navigation

    async fn get(&mut self, params: Value) -> Result<Value> {
        let url = param_str(&params, "url")?;
        match self.context {
            Context::Managed => {
                let page_timeout = self.page_timeout.map(|d| d.as_millis() as u64);
                {
                    // if a remoteness change interrupts the load, the new
                    // frame must resume polling for readiness; park the
                    // re-poll for the flush to replay
                    let cur = self
                        .cur_browser
                        .clone()
                        .ok_or_else(|| DriverError::NoSuchWindow("no current browser".into()))?;
                    let browser = self
                        .browsers
                        .get_mut(&cur)
                        .expect("current browser is tracked");
                    let frame = browser
                        .cur_frame_id()
                        .cloned()
                        .unwrap_or_else(|| FrameId::from(""));
                    let replay_url = url.clone();
                    browser.set_navigation_replay(Box::new(move |live| {
                        Call::broadcast(
                            "pollForReadyState",
                            frame,
                            json!({ "url": replay_url, "pageTimeout": page_timeout }),
                            live,
                        )
                    }));
                }
                self.listener_call(
                    "get",
                    vec![json!({ "url": url, "pageTimeout": page_timeout })],
                )
                .await?;
                Ok(Value::Null)
            }
            Context::Privileged => {
                let id = self.current_window_id()?;
                self.runtime
                    .windows
                    .navigate(&id, &url)
                    .map_err(window_err)?;
                self.page_load_wait().await?;
                Ok(Value::Null)
            }
        }
    }

    async fn page_load_wait(&mut self) -> Result<()> {
        let start = Instant::now();
        loop {
            let win = self.current_window_info()?;
            if win.ready {
                return Ok(());
            }
            if let Some(timeout) = self.page_timeout {
                if start.elapsed() > timeout {
                    return Err(DriverError::InvalidState("Error loading page".into()));
                }
            }
            Delay::new(POLL_INTERVAL).await;
        }
    }

    async fn get_current_url(&mut self) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let id = self.current_window_id()?;
                let url = self.runtime.windows.current_url(&id).map_err(window_err)?;
                Ok(json!(url))
            }
            Context::Managed => self.listener_value("getCurrentUrl", vec![]).await,
        }
    }

    async fn get_title(&mut self) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let id = self.current_window_id()?;
                let title = self.runtime.windows.title(&id).map_err(window_err)?;
                Ok(json!(title))
            }
            Context::Managed => self.listener_value("getTitle", vec![]).await,
        }
    }

    async fn get_page_source(&mut self) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let id = self.current_window_id()?;
                let source = self.runtime.windows.page_source(&id).map_err(window_err)?;
                Ok(json!(source))
            }
            Context::Managed => self.listener_value("getPageSource", vec![]).await,
        }
    }

    // ------------------------------------------------------------------
    // scripts

    async fn execute(&mut self, params: Value, direct_inject: bool) -> Result<Value> {
        let sp = ScriptParams::from(&params, self.script_timeout)?;

        if self.context == Context::Managed {
            let payload = json!({
                "script": sp.script,
                "args": sp.args,
                "newSandbox": sp.new_sandbox,
                "timeout": sp.timeout.as_millis() as u64,
                "filename": sp.filename,
                "line": sp.line,
            });
            return self.listener_value("executeScript", vec![payload]).await;
        }

        self.execute_privileged(
            sp,
            ExecuteOpts {
                direct_inject,
                async_mode: false,
                timeout: self.script_timeout,
                inactivity_timeout: None,
            },
        )
        .await
    }

    async fn execute_async(&mut self, params: Value, direct_inject: bool) -> Result<Value> {
        let sp = ScriptParams::from(&params, self.script_timeout)?;

        if self.context == Context::Managed {
            let payload = json!({
                "script": sp.script,
                "args": sp.args,
                "newSandbox": sp.new_sandbox,
                "timeout": sp.timeout.as_millis() as u64,
                "inactivityTimeout": sp.inactivity_timeout.map(|d| d.as_millis() as u64),
                "filename": sp.filename,
                "line": sp.line,
            });
            return self
                .listener_value("executeAsyncScript", vec![payload])
                .await;
        }

        let opts = ExecuteOpts {
            direct_inject,
            async_mode: true,
            timeout: sp.timeout,
            inactivity_timeout: sp.inactivity_timeout,
        };
        self.execute_privileged(sp, opts).await
    }

    async fn execute_js_script(&mut self, params: Value) -> Result<Value> {
        let is_async = params
            .get("async")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match self.context {
            Context::Privileged => {
                if is_async {
                    self.execute_async(params, true).await
                } else {
                    self.execute(params, true).await
                }
            }
            Context::Managed => {
                let sp = ScriptParams::from(&params, self.script_timeout)?;
                let payload = json!({
                    "script": sp.script,
                    "args": sp.args,
                    "newSandbox": sp.new_sandbox,
                    "async": is_async,
                    "timeout": sp.timeout.as_millis() as u64,
                    "inactivityTimeout": sp.inactivity_timeout.map(|d| d.as_millis() as u64),
                    "filename": sp.filename,
                    "line": sp.line,
                });
                self.listener_value("executeJSScript", vec![payload]).await
            }
        }
    }

    async fn execute_privileged(&mut self, sp: ScriptParams, opts: ExecuteOpts) -> Result<Value> {
        let window = self.current_window_id()?;
        let sandbox = Sandbox::obtain(
            &mut *self.runtime.scripts,
            self.sandbox.take(),
            &window,
            sp.new_sandbox,
        )?;
        self.sandbox = Some(sandbox.clone());

        let mut opts = opts;
        opts.timeout = sp.timeout;

        let source = if self.imported_chrome.is_empty() {
            sp.script
        } else {
            format!("{}\n{}", self.imported_chrome.join("\n"), sp.script)
        };

        sandbox::execute(
            &mut *self.runtime.scripts,
            &sandbox,
            &source,
            &sp.args,
            opts,
        )
        .await
    }

    async fn import_script(&mut self, params: Value) -> Result<Value> {
        let script = param_str(&params, "script")?;
        let store = match self.context {
            Context::Privileged => &mut self.imported_chrome,
            Context::Managed => &mut self.imported_content,
        };
        if store.contains(&script) {
            return Ok(Value::Null);
        }
        store.push(script.clone());
        if self.context == Context::Managed {
            self.listener_call("importScript", vec![json!({ "script": script })])
                .await?;
        }
        Ok(Value::Null)
    }

    fn clear_imported_scripts(&mut self) -> Result<Value> {
        match self.context {
            Context::Privileged => self.imported_chrome.clear(),
            Context::Managed => self.imported_content.clear(),
        }
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // elements

    async fn find_element(&mut self, params: Value, child: bool) -> Result<Value> {
        let using = param_str(&params, "using")?;
        let value = param_str(&params, "value")?;
        let start_key = if child { "id" } else { "element" };
        let start = params
            .get(start_key)
            .and_then(Value::as_str)
            .map(|s| ElementId(s.to_string()));

        match self.context {
            Context::Privileged => {
                let win = self.current_window_id()?;
                let el = self
                    .runtime
                    .elements
                    .find_element(&win, &using, &value, start.as_ref())
                    .map_err(element_err)?;
                Ok(json!(el.0))
            }
            Context::Managed => {
                let payload = json!({
                    "using": using,
                    "value": value,
                    "element": start.map(|e| e.0),
                    "searchTimeout": self.search_timeout.map(|d| d.as_millis() as u64),
                });
                self.listener_value("findElementContent", vec![payload]).await
            }
        }
    }

    async fn find_elements(&mut self, params: Value, child: bool) -> Result<Value> {
        let using = param_str(&params, "using")?;
        let value = param_str(&params, "value")?;
        let start_key = if child { "id" } else { "element" };
        let start = params
            .get(start_key)
            .and_then(Value::as_str)
            .map(|s| ElementId(s.to_string()));

        match self.context {
            Context::Privileged => {
                let win = self.current_window_id()?;
                let els = self
                    .runtime
                    .elements
                    .find_elements(&win, &using, &value, start.as_ref())
                    .map_err(element_err)?;
                Ok(Value::Array(els.into_iter().map(|e| json!(e.0)).collect()))
            }
            Context::Managed => {
                let payload = json!({
                    "using": using,
                    "value": value,
                    "element": start.map(|e| e.0),
                    "searchTimeout": self.search_timeout.map(|d| d.as_millis() as u64),
                });
                self.listener_value("findElementsContent", vec![payload]).await
            }
        }
    }

    async fn get_active_element(&mut self) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let win = self.current_window_id()?;
                let el = self
                    .runtime
                    .elements
                    .active_element(&win)
                    .map_err(element_err)?;
                Ok(json!(el.0))
            }
            Context::Managed => self.listener_value("getActiveElement", vec![]).await,
        }
    }

    async fn click_element(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                self.runtime
                    .elements
                    .click(&win, &el)
                    .map_err(element_err)?;
                Ok(Value::Null)
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("clickElement", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn get_element_attribute(&mut self, params: Value) -> Result<Value> {
        let name = param_str(&params, "name")?;
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let attr = self
                    .runtime
                    .elements
                    .attribute(&win, &el, &name)
                    .map_err(element_err)?;
                Ok(attr.map(|v| json!(v)).unwrap_or(Value::Null))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value(
                    "getElementAttribute",
                    vec![json!({ "id": id, "name": name })],
                )
                .await
            }
        }
    }

    async fn get_element_text(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let text = self
                    .runtime
                    .elements
                    .text(&win, &el)
                    .map_err(element_err)?;
                Ok(json!(text))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("getElementText", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn get_element_tag_name(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let tag = self
                    .runtime
                    .elements
                    .tag_name(&win, &el)
                    .map_err(element_err)?;
                Ok(json!(tag))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("getElementTagName", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn is_element_displayed(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let displayed = self
                    .runtime
                    .elements
                    .is_displayed(&win, &el)
                    .map_err(element_err)?;
                Ok(json!(displayed))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("isElementDisplayed", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn get_element_css_value(&mut self, params: Value) -> Result<Value> {
        let property = param_str(&params, "propertyName")?;
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let value = self
                    .runtime
                    .elements
                    .css_value(&win, &el, &property)
                    .map_err(element_err)?;
                Ok(json!(value))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value(
                    "getElementValueOfCssProperty",
                    vec![json!({ "id": id, "propertyName": property })],
                )
                .await
            }
        }
    }

    async fn submit_element(&mut self, params: Value) -> Result<Value> {
        let id = param_str(&params, "id")?;
        match self.context {
            Context::Privileged => Err(DriverError::UnsupportedOperation(
                "Command 'submitElement' is not available in chrome context".into(),
            )),
            Context::Managed => {
                self.listener_value("submitElement", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn get_element_rect(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let (x, y, width, height) = self
                    .runtime
                    .elements
                    .rect(&win, &el)
                    .map_err(element_err)?;
                Ok(json!({ "x": x, "y": y, "width": width, "height": height }))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("getElementRect", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn get_element_location(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let (x, y, _, _) = self
                    .runtime
                    .elements
                    .rect(&win, &el)
                    .map_err(element_err)?;
                Ok(json!({ "x": x, "y": y }))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("getElementLocation", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn is_element_enabled(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let enabled = self
                    .runtime
                    .elements
                    .is_enabled(&win, &el)
                    .map_err(element_err)?;
                Ok(json!(enabled))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("isElementEnabled", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn is_element_selected(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                let selected = self
                    .runtime
                    .elements
                    .is_selected(&win, &el)
                    .map_err(element_err)?;
                Ok(json!(selected))
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("isElementSelected", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    async fn send_keys_to_element(&mut self, params: Value) -> Result<Value> {
        let keys = keys_param(&params)?;
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                self.runtime
                    .elements
                    .send_keys(&win, &el, &keys)
                    .map_err(element_err)?;
                Ok(Value::Null)
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value(
                    "sendKeysToElement",
                    vec![json!({ "id": id, "value": keys })],
                )
                .await
            }
        }
    }

    async fn clear_element(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let (win, el) = self.window_and_element(&params)?;
                self.runtime
                    .elements
                    .clear(&win, &el)
                    .map_err(element_err)?;
                Ok(Value::Null)
            }
            Context::Managed => {
                let id = param_str(&params, "id")?;
                self.listener_value("clearElement", vec![json!({ "id": id })])
                    .await
            }
        }
    }

    /// Pass an interaction command through to the managed context; these
    /// have no privileged counterpart.
    async fn content_only(&mut self, name: &'static str, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => Err(DriverError::UnsupportedOperation(format!(
                "Command '{name}' is not available in chrome context"
            ))),
            Context::Managed => self.listener_value(name, vec![params]).await,
        }
    }

    fn window_and_element(&self, params: &Value) -> Result<(WindowId, ElementId)> {
        let win = self.current_window_id()?;
        let el = ElementId(param_str(params, "id")?);
        Ok((win, el))
    }

    // ------------------------------------------------------------------
    // dialogs

    fn require_dialog(&self, action: &str) -> Result<ModalDialog> {
        self.dialog.clone().ok_or_else(|| {
            DriverError::NoAlertOpen(format!(
                "No tab modal was open when attempting to {action}"
            ))
        })
    }

    fn accept_dialog(&mut self) -> Result<Value> {
        let dialog = self.require_dialog("accept the dialog")?;
        self.runtime
            .elements
            .accept_dialog(dialog.window_id())
            .map_err(element_err)?;
        self.dialog = None;
        Ok(Value::Null)
    }

    fn dismiss_dialog(&mut self) -> Result<Value> {
        let dialog = self.require_dialog("dismiss the dialog")?;
        self.runtime
            .elements
            .dismiss_dialog(dialog.window_id())
            .map_err(element_err)?;
        self.dialog = None;
        Ok(Value::Null)
    }

    fn get_text_from_dialog(&mut self) -> Result<Value> {
        let dialog = self.require_dialog("get the dialog text")?;
        let text = self
            .runtime
            .elements
            .dialog_text(dialog.window_id())
            .map_err(element_err)?;
        Ok(json!(text))
    }

    fn send_keys_to_dialog(&mut self, params: &Value) -> Result<Value> {
        let dialog = self.require_dialog("send keys to a dialog")?;
        let keys = keys_param(params)?;
        self.runtime
            .elements
            .send_keys_to_dialog(dialog.window_id(), &keys)
            .map_err(element_err)?;
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // misc

    fn set_context(&mut self, params: &Value) -> Result<Value> {
        let value = param_str(params, "value")?;
        self.context = value.parse()?;
        Ok(Value::Null)
    }

    fn timeouts(&mut self, params: &Value) -> Result<Value> {
        // validate before touching any state
        let ms = param_ms(params, "ms")?;
        match params.get("type").and_then(Value::as_str) {
            Some("implicit") => self.search_timeout = Some(ms),
            Some("script") => self.script_timeout = ms,
            _ => self.page_timeout = Some(ms),
        }
        Ok(Value::Null)
    }

    fn log(&mut self, params: &Value) -> Result<Value> {
        let message = param_str(params, "value")?;
        let level = params
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or("INFO")
            .to_string();
        self.push_log(level, message);
        Ok(Value::Null)
    }

    fn push_log(&mut self, level: String, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            at: epoch_ms(),
        });
    }

    fn get_logs(&self) -> Value {
        Value::Array(
            self.logs
                .iter()
                .map(|e| json!([e.level, e.message, e.at.to_string()]))
                .collect(),
        )
    }

    async fn set_test_name(&mut self, params: Value) -> Result<Value> {
        let name = param_str(&params, "value")?;
        self.test_name = Some(name.clone());
        if self.context == Context::Managed {
            self.listener_call("setTestName", vec![json!({ "value": name })])
                .await?;
        }
        Ok(Value::Null)
    }

    async fn take_screenshot(&mut self, params: Value) -> Result<Value> {
        match self.context {
            Context::Privileged => {
                let id = self.current_window_id()?;
                let data = self
                    .runtime
                    .windows
                    .capture_viewport(&id)
                    .map_err(window_err)?;
                Ok(json!(data))
            }
            Context::Managed => {
                let payload = json!({
                    "id": params.get("id"),
                    "highlights": params.get("highlights"),
                    "full": params.get("full"),
                });
                self.listener_value("takeScreenshot", vec![payload]).await
            }
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("session", &self.session.as_ref().map(|s| &s.id))
            .field("cur_browser", &self.cur_browser)
            .finish_non_exhaustive()
    }
}

/// Script execution parameters shared by the execute family of commands.
struct ScriptParams {
    script: String,
    args: Vec<Value>,
    new_sandbox: bool,
    timeout: Duration,
    inactivity_timeout: Option<Duration>,
    filename: Value,
    line: Value,
}

impl ScriptParams {
    fn from(params: &Value, default_timeout: Duration) -> Result<Self> {
        Ok(ScriptParams {
            script: param_str(params, "script")?,
            args: params
                .get("args")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            new_sandbox: params
                .get("newSandbox")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            timeout: params
                .get("scriptTimeout")
                .and_then(Value::as_u64)
                .map(Duration::from_millis)
                .unwrap_or(default_timeout),
            inactivity_timeout: params
                .get("inactivityTimeout")
                .and_then(Value::as_u64)
                .map(Duration::from_millis),
            filename: params.get("filename").cloned().unwrap_or(Value::Null),
            line: params.get("line").cloned().unwrap_or(Value::Null),
        })
    }
}

fn param_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DriverError::Protocol(format!("Expected parameter: {key}")))
}

fn param_ms(params: &Value, key: &str) -> Result<Duration> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .ok_or_else(|| DriverError::Protocol("Not a Number".into()))
}

fn param_u64(params: &Value, key: &str) -> Result<u64> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| DriverError::Protocol("Not a Number".into()))
}

fn param_i64(params: &Value, key: &str) -> Result<i64> {
    params
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| DriverError::Protocol("Not a Number".into()))
}

/// Keys may arrive as a single string or a sequence of key chunks.
fn keys_param(params: &Value) -> Result<String> {
    match params.get("value") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Array(parts)) => Ok(parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat()),
        _ => Err(DriverError::Protocol("Expected parameter: value".into())),
    }
}

fn value_as_id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn window_err(err: HostError) -> DriverError {
    match err {
        HostError::NotFound(msg) => DriverError::NoSuchWindow(msg),
        HostError::NotVisible(msg) => DriverError::ElementNotVisible(msg),
        HostError::Unsupported(msg) => DriverError::UnsupportedOperation(msg),
        HostError::Failure(msg) => DriverError::InvalidState(msg),
    }
}

fn element_err(err: HostError) -> DriverError {
    match err {
        HostError::NotFound(msg) => DriverError::NoSuchElement(msg),
        HostError::NotVisible(msg) => DriverError::ElementNotVisible(msg),
        HostError::Unsupported(msg) => DriverError::UnsupportedOperation(msg),
        HostError::Failure(msg) => DriverError::InvalidState(msg),
    }
}

fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ServerInfo;
    use crate::testutil::{
        MockElementHost, MockScriptHost, MockTransport, MockWindow, MockWindowHost,
    };
    use futures::executor::block_on;

    fn fixture(transport: MockTransport) -> (Driver, MockWindowHost, MockElementHost) {
        let windows = MockWindowHost::with_windows(vec![MockWindow::content(
            "w1",
            "main",
            vec![("t1", true)],
        )]);
        let elements = MockElementHost::new();
        let mut runtime = DriverRuntime::new(
            Box::new(windows.clone()),
            Box::new(elements.clone()),
            Box::new(MockScriptHost::returning(json!(null))),
            ServerInfo::default(),
        );
        runtime.mark_ready();
        let driver = Driver::new(runtime, MessageLink::new(Box::new(transport)));
        (driver, windows, elements)
    }

    fn preload_registration(transport: &MockTransport, content_id: &str) {
        transport.push_inbound(HostMessage::Register {
            window_id: WindowId::from(content_id),
            remote: true,
        });
        transport.push_inbound(HostMessage::ListenersAttached {
            listener_id: FrameId::from(content_id),
        });
    }

    fn cmd(id: u64, name: &str, params: Value) -> Command {
        Command::new(CommandId::new(id), name, params)
    }

    fn boot(driver: &mut Driver) {
        let resp = block_on(driver.dispatch(cmd(1, "newSession", json!({}))));
        assert!(resp.is_ok(), "session start failed: {:?}", resp.error);
    }

    #[test]
    fn new_session_negotiates_and_returns_capabilities() {
        let transport = MockTransport::new();
        let sent = transport.sent.clone();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);

        let resp = block_on(driver.dispatch(cmd(
            1,
            "newSession",
            json!({"sessionId": "sess-1", "capabilities": {"foo": "x"}}),
        )));
        assert!(resp.is_ok(), "{:?}", resp.error);
        assert_eq!(resp.session_id.as_deref(), Some("sess-1"));
        let caps = resp.value.unwrap();
        assert_eq!(caps["foo"], json!("x"));
        assert_eq!(caps["browserName"], json!("Firefox"));

        // the listener was told about the new session
        assert!(sent
            .borrow()
            .iter()
            .any(|c| c.name == "newSession"));

        // negotiated capabilities are immutable and round-trip
        let resp = block_on(driver.dispatch(cmd(2, "getSessionCapabilities", json!({}))));
        let caps = resp.value.unwrap();
        assert_eq!(caps["foo"], json!("x"));
        assert_eq!(caps["takesScreenshot"], json!(true));
    }

    #[test]
    fn second_new_session_is_rejected() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);

        let resp = block_on(driver.dispatch(cmd(2, "newSession", json!({}))));
        let error = resp.error.unwrap();
        assert!(error.message.contains("Session already running"));
    }

    #[test]
    fn required_capability_mismatch_fails_session_creation() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);

        let resp = block_on(driver.dispatch(cmd(
            1,
            "newSession",
            json!({"capabilities": {"requiredCapabilities": {"browserName": "Other", "takesScreenshot": false}}}),
        )));
        let error = resp.error.unwrap();
        assert_eq!(error.kind, "session not created");
        // both mismatches are reported, not just the first
        assert!(error.message.contains("browserName"));
        assert!(error.message.contains("takesScreenshot"));
        assert_eq!(driver.session_id(), None);
    }

    #[test]
    fn bogus_context_is_rejected_and_leaves_context_unchanged() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);

        let resp =
            block_on(driver.dispatch(cmd(2, "setContext", json!({"value": "content"}))));
        assert!(resp.is_ok());

        let resp = block_on(driver.dispatch(cmd(3, "setContext", json!({"value": "bogus"}))));
        let error = resp.error.unwrap();
        assert_eq!(error.kind, "protocol error");
        assert_eq!(driver.context(), Context::Managed);

        let resp = block_on(driver.dispatch(cmd(4, "getContext", json!({}))));
        assert_eq!(resp.value.unwrap(), json!("content"));
    }

    #[test]
    fn stale_replies_are_discarded() {
        let transport = MockTransport::new().respond_with(|call| {
            if call.name == "executeScript" {
                let id = call.command_id.unwrap();
                vec![
                    HostMessage::Value {
                        command_id: CommandId::new(id.inner() + 1000),
                        value: json!("stale"),
                    },
                    HostMessage::Value {
                        command_id: id,
                        value: json!("fresh"),
                    },
                ]
            } else {
                Vec::new()
            }
        });
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);

        let resp = block_on(driver.dispatch(cmd(
            2,
            "executeScript",
            json!({"script": "return document.title;"}),
        )));
        assert_eq!(resp.value.unwrap(), json!("fresh"));
    }

    #[test]
    fn dialog_interrupt_resolves_call_and_accept_clears_it_once() {
        let transport = MockTransport::new().respond_with(|call| {
            if call.name == "executeAsyncScript" {
                vec![HostMessage::DialogOpened {
                    window_id: None,
                    tab_modal: true,
                }]
            } else {
                Vec::new()
            }
        });
        preload_registration(&transport, "t1");
        let (mut driver, _, elements) = fixture(transport);
        boot(&mut driver);

        // the pending call resolves without a script result
        let resp = block_on(driver.dispatch(cmd(
            2,
            "executeAsyncScript",
            json!({"script": "window.alert('hi');"}),
        )));
        assert!(resp.is_ok());
        assert_eq!(resp.value.unwrap(), Value::Null);
        assert!(driver.has_dialog());

        let resp = block_on(driver.dispatch(cmd(3, "acceptDialog", json!({}))));
        assert!(resp.is_ok());
        assert_eq!(elements.dialog_actions.borrow().as_slice(), ["accept"]);
        assert!(!driver.has_dialog());

        let resp = block_on(driver.dispatch(cmd(4, "acceptDialog", json!({}))));
        assert_eq!(resp.error.unwrap().kind, "no such alert");
    }

    #[test]
    fn content_commands_queue_through_a_remoteness_change() {
        let transport = MockTransport::new().respond_with(|call| {
            if call.name == "getCurrentUrl" {
                vec![HostMessage::Value {
                    command_id: call.command_id.unwrap(),
                    value: json!("https://example.org/"),
                }]
            } else {
                Vec::new()
            }
        });
        let sent = transport.sent.clone();
        let inbound = transport.inbound_handle();
        preload_registration(&transport, "t1");
        let (mut driver, windows, _) = fixture(transport);
        boot(&mut driver);
        let sent_before = sent.borrow().len();

        // the tab's content moves back into the parent process; the frame
        // keeps its id but must re-register from the new process
        windows.windows.borrow_mut()[0].info.tabs[0].remote = false;
        inbound.borrow_mut().push_back(HostMessage::Register {
            window_id: WindowId::from("t1"),
            remote: false,
        });
        inbound.borrow_mut().push_back(HostMessage::ListenersAttached {
            listener_id: FrameId::from("t1"),
        });

        let resp = block_on(driver.dispatch(cmd(2, "getCurrentUrl", json!({}))));
        assert_eq!(resp.value.unwrap(), json!("https://example.org/"));

        // the command was deferred, then flushed ahead of the session
        // bootstrap that the re-registration triggers
        let names: Vec<String> = sent.borrow()[sent_before..]
            .iter()
            .map(|c| c.name.to_string())
            .collect();
        assert_eq!(names, ["getCurrentUrl", "newSession"]);
    }

    #[test]
    fn switch_to_unknown_window_leaves_state_untouched() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);

        let resp = block_on(driver.dispatch(cmd(
            2,
            "switchToWindow",
            json!({"name": "nonexistent"}),
        )));
        assert_eq!(resp.error.unwrap().kind, "no such window");
        assert_eq!(driver.current_window(), Some(&WindowId::from("w1")));
    }

    #[test]
    fn switch_to_window_registers_unseen_windows() {
        let transport = MockTransport::new();
        let inbound = transport.inbound_handle();
        preload_registration(&transport, "t1");
        let (mut driver, windows, _) = fixture(transport);
        boot(&mut driver);

        windows
            .windows
            .borrow_mut()
            .push(MockWindow::content("w2", "popup", vec![("t2", true)]));
        inbound.borrow_mut().push_back(HostMessage::Register {
            window_id: WindowId::from("t2"),
            remote: true,
        });
        inbound.borrow_mut().push_back(HostMessage::ListenersAttached {
            listener_id: FrameId::from("t2"),
        });

        let resp = block_on(driver.dispatch(cmd(2, "switchToWindow", json!({"name": "w2"}))));
        assert!(resp.is_ok(), "{:?}", resp.error);
        assert_eq!(driver.current_window(), Some(&WindowId::from("w2")));
    }

    #[test]
    fn transport_failure_surfaces_as_a_transport_error() {
        let transport = MockTransport::new().failing_sends();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);

        let resp = block_on(driver.dispatch(cmd(1, "newSession", json!({}))));
        assert_eq!(resp.error.unwrap().kind, "frame send failure");
        assert_eq!(driver.session_id(), None);
    }

    #[test]
    fn unknown_commands_are_protocol_errors() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);

        let resp = block_on(driver.dispatch(cmd(2, "warpTenEngage", json!({}))));
        let error = resp.error.unwrap();
        assert_eq!(error.kind, "protocol error");
        assert!(error.message.contains("warpTenEngage"));
    }

    #[test]
    fn privileged_handlers_use_the_local_context() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);
        block_on(driver.dispatch(cmd(2, "setContext", json!({"value": "chrome"}))));

        let resp = block_on(driver.dispatch(cmd(
            3,
            "findElement",
            json!({"using": "id", "value": "button"}),
        )));
        assert_eq!(resp.value.unwrap(), json!("el-button"));

        let resp = block_on(driver.dispatch(cmd(4, "getCurrentUrl", json!({}))));
        assert_eq!(resp.value.unwrap(), json!("about:blank"));

        let resp = block_on(driver.dispatch(cmd(5, "takeScreenshot", json!({}))));
        assert!(resp.value.unwrap().as_str().unwrap().len() > 4);

        // interaction atoms only exist in the managed context
        let resp = block_on(driver.dispatch(cmd(6, "singleTap", json!({"id": "el-1"}))));
        assert_eq!(resp.error.unwrap().kind, "unsupported operation");
    }

    #[test]
    fn non_numeric_timeouts_are_rejected() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);

        let resp = block_on(driver.dispatch(cmd(
            2,
            "timeouts",
            json!({"type": "script", "ms": "soon"}),
        )));
        let error = resp.error.unwrap();
        assert_eq!(error.kind, "protocol error");
        assert!(error.message.contains("Not a Number"));

        let resp = block_on(driver.dispatch(cmd(
            3,
            "timeouts",
            json!({"type": "script", "ms": 5000}),
        )));
        assert!(resp.is_ok());
    }

    #[test]
    fn delete_session_resets_driver_state() {
        let transport = MockTransport::new();
        let sent = transport.sent.clone();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);
        block_on(driver.dispatch(cmd(2, "setContext", json!({"value": "chrome"}))));

        let resp = block_on(driver.dispatch(cmd(3, "deleteSession", json!({}))));
        assert!(resp.is_ok());
        assert_eq!(driver.session_id(), None);
        assert_eq!(driver.context(), Context::Managed);
        assert_eq!(driver.current_window(), None);
        assert!(sent.borrow().iter().any(|c| c.name == "deleteSession"));

        // the session is gone; subsequent commands are invalid
        let resp = block_on(driver.dispatch(cmd(4, "getContext", json!({}))));
        assert_eq!(resp.error.unwrap().kind, "invalid state");
    }

    #[test]
    fn window_handles_enumerate_tabs_and_windows() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, windows, _) = fixture(transport);
        boot(&mut driver);
        windows
            .windows
            .borrow_mut()
            .push(MockWindow::content("w2", "popup", vec![("t2", false)]));

        let resp = block_on(driver.dispatch(cmd(2, "getWindowHandles", json!({}))));
        assert_eq!(resp.value.unwrap(), json!(["t1", "t2"]));

        let resp = block_on(driver.dispatch(cmd(3, "getChromeWindowHandles", json!({}))));
        assert_eq!(resp.value.unwrap(), json!(["w1", "w2"]));

        let resp = block_on(driver.dispatch(cmd(4, "getWindowHandle", json!({}))));
        assert_eq!(resp.value.unwrap(), json!("t1"));
    }

    #[test]
    fn closing_the_last_window_ends_the_session() {
        let transport = MockTransport::new();
        preload_registration(&transport, "t1");
        let (mut driver, _, _) = fixture(transport);
        boot(&mut driver);

        let resp = block_on(driver.dispatch(cmd(2, "close", json!({}))));
        assert!(resp.is_ok());
        assert_eq!(driver.session_id(), None);
    }
}
