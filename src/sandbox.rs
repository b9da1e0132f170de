use std::time::Duration;

use futures::channel::{mpsc, oneshot};
use futures::{Future, StreamExt};
use futures_timer::Delay;
use pin_project_lite::pin_project;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};

use geckoxide_types::WindowId;

use crate::error::{DriverError, Result};
use crate::host::{CompletionHooks, ScopeId, ScriptFault, ScriptHost};

/// A reusable privileged script-execution scope.
///
/// The scope persists across calls until it is explicitly invalidated: the
/// client requests a fresh sandbox, or the current window changes (scope
/// identity is bound to a window). Reuse skips scope setup but arguments
/// and completion hooks are rebound on every call.
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub scope: ScopeId,
    pub window: WindowId,
}

impl Sandbox {
    /// Reuse `current` when it belongs to `window` and the caller did not
    /// ask for a fresh one; otherwise create a new scope.
    pub fn obtain(
        scripts: &mut dyn ScriptHost,
        current: Option<Sandbox>,
        window: &WindowId,
        new_sandbox: bool,
    ) -> Result<Sandbox> {
        if let Some(sandbox) = current {
            if !new_sandbox && &sandbox.window == window {
                return Ok(sandbox);
            }
            scripts.drop_scope(sandbox.scope);
        }
        let scope = scripts
            .create_scope(window)
            .map_err(|e| DriverError::InvalidState(e.to_string()))?;
        Ok(Sandbox {
            scope,
            window: window.clone(),
        })
    }
}

/// How a script is executed.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteOpts {
    /// Run the script verbatim instead of wrapping it as a function body.
    /// Direct-injected scripts signal completion explicitly.
    pub direct_inject: bool,
    /// Install a completion callback and wait for it (or a timeout)
    /// instead of taking the evaluation result.
    pub async_mode: bool,
    pub timeout: Duration,
    /// Optional watchdog reset by the script's heartbeat calls.
    pub inactivity_timeout: Option<Duration>,
}

/// Execute a script in the given sandbox and wait for its outcome.
///
/// Exactly one outcome is honored: explicit completion, an error raised
/// inside the script, the script timeout, or the inactivity timeout —
/// whichever fires first. All losing timers are dropped with the wait.
pub async fn execute(
    scripts: &mut dyn ScriptHost,
    sandbox: &Sandbox,
    script: &str,
    args: &[Value],
    opts: ExecuteOpts,
) -> Result<Value> {
    if opts.direct_inject && opts.async_mode && opts.timeout.is_zero() {
        return Err(DriverError::ScriptTimeout("Please set a timeout".into()));
    }

    scripts
        .bind_args(sandbox.scope, args)
        .map_err(|e| DriverError::InvalidState(e.to_string()))?;

    let (finish_tx, finish_rx) = oneshot::channel();
    let (heartbeat_tx, heartbeat_rx) = mpsc::channel(32);
    let hooks = CompletionHooks {
        finish: finish_tx,
        heartbeat: heartbeat_tx,
    };

    let source = if opts.direct_inject {
        script.to_string()
    } else if opts.async_mode {
        wrap_async(script)
    } else {
        wrap_sync(script)
    };

    let returned = scripts
        .eval(sandbox.scope, &source, hooks)
        .map_err(DriverError::from)?;

    if !opts.async_mode {
        return finish_sync(opts, returned, finish_rx);
    }

    ScriptWait {
        finish: finish_rx,
        heartbeat: heartbeat_rx,
        timeout: Delay::new(opts.timeout),
        inactivity: opts.inactivity_timeout.map(Delay::new),
        inactivity_dur: opts.inactivity_timeout,
    }
    .await
}

fn finish_sync(
    opts: ExecuteOpts,
    returned: Value,
    mut finish_rx: oneshot::Receiver<std::result::Result<Value, ScriptFault>>,
) -> Result<Value> {
    if opts.direct_inject {
        // directly injected scripts must have called the completion
        // primitive by the time evaluation returns
        match finish_rx.try_recv() {
            Ok(Some(Ok(value))) => Ok(value),
            Ok(Some(Err(fault))) => Err(fault.into()),
            _ => Err(DriverError::Protocol("finish() not called".into())),
        }
    } else {
        Ok(returned)
    }
}

/// Function-body mode: the script becomes the body of a function invoked
/// with the bound arguments.
fn wrap_sync(script: &str) -> String {
    format!("let func = function() {{ {script} }}; func.apply(null, __driverParams);")
}

/// Asynchronous function-body mode: the completion callback is appended to
/// the arguments and aliased for scripts that call it by name.
fn wrap_async(script: &str) -> String {
    format!(
        "__driverParams.push(returnFunc);\
         let scriptFinished = returnFunc;\
         let __driverFunc = function() {{ {script} }};\
         __driverFunc.apply(null, __driverParams);"
    )
}

impl From<ScriptFault> for DriverError {
    fn from(fault: ScriptFault) -> Self {
        DriverError::JavaScript {
            message: fault.message,
            function: fault.function,
            file: fault.file,
            line: fault.line,
            source_snippet: fault.source,
        }
    }
}

pin_project! {
    /// Races script completion against the watchdog timers.
    struct ScriptWait {
        #[pin]
        finish: oneshot::Receiver<std::result::Result<Value, ScriptFault>>,
        heartbeat: mpsc::Receiver<()>,
        #[pin]
        timeout: Delay,
        #[pin]
        inactivity: Option<Delay>,
        inactivity_dur: Option<Duration>,
    }
}

impl Future for ScriptWait {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        // every heartbeat pushes the inactivity deadline out again
        while let Poll::Ready(Some(())) = this.heartbeat.poll_next_unpin(cx) {
            if let (Some(delay), Some(dur)) =
                (this.inactivity.as_mut().as_pin_mut(), *this.inactivity_dur)
            {
                delay.get_mut().reset(dur);
            }
        }

        match this.finish.poll(cx) {
            Poll::Ready(Ok(Ok(value))) => return Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(fault))) => return Poll::Ready(Err(fault.into())),
            Poll::Ready(Err(_)) => {
                return Poll::Ready(Err(DriverError::JavaScript {
                    message: "script scope dropped before completion".into(),
                    function: None,
                    file: None,
                    line: None,
                    source_snippet: None,
                }))
            }
            Poll::Pending => {}
        }

        if this.timeout.poll(cx).is_ready() {
            return Poll::Ready(Err(DriverError::ScriptTimeout("timed out".into())));
        }

        if let Some(delay) = this.inactivity.as_pin_mut() {
            if delay.poll(cx).is_ready() {
                return Poll::Ready(Err(DriverError::ScriptTimeout(
                    "timed out due to inactivity".into(),
                )));
            }
        }

        Poll::Pending
    }
}
