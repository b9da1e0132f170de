use futures::channel::oneshot;
use serde_json::Value;

use geckoxide_types::{CommandId, ErrorPayload};

use crate::error::{DriverError, Result};

/// How a proxied call ended: `Ok(None)` for a bare acknowledgement (or a
/// dialog interrupt), `Ok(Some(value))` for a value reply, `Err` for a
/// remote failure.
pub type CallOutcome = Result<Option<Value>>;

/// Correlates calls proxied to the managed execution context with their
/// replies.
///
/// At most one correlation is live at a time. Each call installs three
/// mutually exclusive one-shot outcomes (`ok`, `value`, `error`) scoped to
/// the live command id; a reply tagged with any other id is logged and
/// dropped, never redelivered to a later correlation. A modal dialog
/// interrupt cancels the outstanding listeners and resolves the pending
/// call without a remote answer, since the remote side cannot reply while
/// blocked on the dialog.
#[derive(Debug, Default)]
pub struct RemoteProxy {
    next_id: u64,
    cur_cmd_id: Option<CommandId>,
    pending: Option<oneshot::Sender<CallOutcome>>,
}

impl RemoteProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next correlation id. Ids are monotonic and never
    /// reused within a session.
    pub fn next_command_id(&mut self) -> CommandId {
        self.next_id += 1;
        CommandId::new(self.next_id)
    }

    /// The id of the call currently awaiting a reply, if any.
    pub fn current_command_id(&self) -> Option<CommandId> {
        self.cur_cmd_id
    }

    /// Install the reply listeners for a new call and return its
    /// correlation id together with the receiving end of the outcome.
    ///
    /// `reuse` lets a caller resume an existing correlation, which is how
    /// replayed commands keep their original id after a remoteness change.
    /// A still-pending previous correlation is superseded; its receiver
    /// observes cancellation.
    pub fn prepare(&mut self, reuse: Option<CommandId>) -> (CommandId, oneshot::Receiver<CallOutcome>) {
        let id = reuse.unwrap_or_else(|| self.next_command_id());
        let (tx, rx) = oneshot::channel();
        if self.pending.replace(tx).is_some() {
            tracing::warn!(command_id = %id, "superseding unresolved correlation");
        }
        self.cur_cmd_id = Some(id);
        (id, rx)
    }

    pub fn is_out_of_sync(&self, id: CommandId) -> bool {
        self.cur_cmd_id != Some(id)
    }

    /// Resolve the live call with a bare acknowledgement.
    pub fn resolve_ok(&mut self, id: CommandId) {
        self.resolve(id, Ok(None));
    }

    /// Resolve the live call with a value.
    pub fn resolve_value(&mut self, id: CommandId, value: Value) {
        self.resolve(id, Ok(Some(value)));
    }

    /// Reject the live call with the remote error payload.
    pub fn resolve_error(&mut self, id: CommandId, error: ErrorPayload) {
        self.resolve(id, Err(DriverError::Remote(error)));
    }

    fn resolve(&mut self, id: CommandId, outcome: CallOutcome) {
        if self.is_out_of_sync(id) {
            tracing::warn!(
                command_id = %id,
                live = ?self.cur_cmd_id,
                "skipping out-of-sync reply from listener"
            );
            return;
        }
        self.cur_cmd_id = None;
        if let Some(tx) = self.pending.take() {
            let _ = tx.send(outcome);
        }
    }

    /// A modal dialog opened: cancel the outstanding listeners and resolve
    /// the pending call immediately, without a remote answer.
    pub fn on_dialog(&mut self) {
        self.cancel();
        if let Some(tx) = self.pending.take() {
            let _ = tx.send(Ok(None));
        }
    }

    /// Drop the live correlation without resolving it.
    pub fn cancel(&mut self) {
        self.cur_cmd_id = None;
    }

    /// Collapse an argument sequence for the wire: a single non-null
    /// object argument is passed bare, anything else as an array. The
    /// specialisation keeps compatibility with listeners that expect a
    /// structured message object.
    pub fn collapse_args(args: Vec<Value>) -> Value {
        if args.len() == 1 && args[0].is_object() {
            args.into_iter().next().unwrap()
        } else {
            Value::Array(args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stale_reply_does_not_resolve_the_live_call() {
        let mut proxy = RemoteProxy::new();
        let (live, mut rx) = proxy.prepare(None);

        proxy.resolve_value(CommandId::new(999), json!("stale"));
        assert!(rx.try_recv().unwrap().is_none());

        proxy.resolve_value(live, json!("fresh"));
        let outcome = rx.try_recv().unwrap().unwrap();
        assert_eq!(outcome.unwrap(), Some(json!("fresh")));
    }

    #[test]
    fn ids_are_monotonic() {
        let mut proxy = RemoteProxy::new();
        let a = proxy.next_command_id();
        let b = proxy.next_command_id();
        assert!(b > a);
    }

    #[test]
    fn dialog_interrupt_resolves_without_a_value() {
        let mut proxy = RemoteProxy::new();
        let (_id, mut rx) = proxy.prepare(None);
        proxy.on_dialog();
        let outcome = rx.try_recv().unwrap().unwrap();
        assert_eq!(outcome.unwrap(), None);
        assert_eq!(proxy.current_command_id(), None);
    }

    #[test]
    fn reply_after_dialog_is_dropped() {
        let mut proxy = RemoteProxy::new();
        let (id, mut rx) = proxy.prepare(None);
        proxy.on_dialog();
        rx.try_recv().unwrap();
        // the remote side answers later, once the dialog is gone
        proxy.resolve_ok(id);
        assert_eq!(proxy.current_command_id(), None);
    }

    #[test]
    fn argument_collapsing() {
        assert_eq!(
            RemoteProxy::collapse_args(vec![json!({"a": 1})]),
            json!({"a": 1})
        );
        assert_eq!(
            RemoteProxy::collapse_args(vec![json!(null)]),
            json!([null])
        );
        assert_eq!(
            RemoteProxy::collapse_args(vec![json!({"a": 1}), json!(2)]),
            json!([{"a": 1}, 2])
        );
        assert_eq!(RemoteProxy::collapse_args(vec![]), json!([]));
    }
}
