//! Pending call bookkeeping: request ids, reply matching and close handling.

use cockpit_dbus_core::{CallId, CallIdAllocator, DbusError, Problem};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Signature and flags the peer attached to a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    pub signature: Option<String>,
    pub flags: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub args: Vec<Value>,
    pub options: ReplyOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Resolved,
    Rejected,
}

const PENDING: u8 = 0;
const RESOLVED: u8 = 1;
const REJECTED: u8 = 2;

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new(state: u8) -> Self {
        SharedState(Arc::new(AtomicU8::new(state)))
    }

    fn settle(&self, outcome: &Result<Reply, DbusError>) {
        let state = if outcome.is_ok() { RESOLVED } else { REJECTED };
        self.0.store(state, Ordering::Release);
    }

    fn get(&self) -> CallState {
        match self.0.load(Ordering::Acquire) {
            PENDING => CallState::Pending,
            RESOLVED => CallState::Resolved,
            _ => CallState::Rejected,
        }
    }
}

pub(crate) type Completion = Box<dyn FnOnce(Result<Reply, DbusError>) + Send>;

struct Record {
    state: SharedState,
    complete: Completion,
}

impl Record {
    fn finish(self, outcome: Result<Reply, DbusError>) {
        self.state.settle(&outcome);
        (self.complete)(outcome);
    }
}

/// Outstanding requests plus the close reason, guarded together so that a
/// request can never be registered after the client has closed.
#[derive(Default)]
pub(crate) struct Dispatcher {
    ids: CallIdAllocator,
    pending: HashMap<CallId, Record>,
    closed: Option<DbusError>,
}

/// What to do once the dispatcher lock is released.
pub(crate) enum Registered {
    Sent(CallId),
    Refused(Completion, DbusError),
}

impl Dispatcher {
    pub fn closed(&self) -> Option<&DbusError> {
        self.closed.as_ref()
    }

    /// Register a request; refused if the dispatcher is already closed.
    fn register(&mut self, state: SharedState, complete: Completion) -> Registered {
        if let Some(err) = &self.closed {
            state.settle(&Err(err.clone()));
            return Registered::Refused(complete, err.clone());
        }
        let id = self.ids.allocate();
        self.pending.insert(id, Record { state, complete });
        Registered::Sent(id)
    }

    pub fn register_callback(&mut self, complete: Completion) -> Registered {
        self.register(SharedState::new(PENDING), complete)
    }

    /// Register a request whose outcome is delivered through a [`PendingCall`].
    pub fn register_call(&mut self) -> (Registered, PendingCall) {
        let (tx, rx) = oneshot::channel();
        let state = SharedState::new(PENDING);
        let registered = self.register(
            state.clone(),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );
        let id = match &registered {
            Registered::Sent(id) => Some(*id),
            Registered::Refused(..) => None,
        };
        let call = PendingCall {
            id,
            state,
            rx: Some(rx),
            ready: None,
        };
        (registered, call)
    }

    /// Take the record for `id`; the caller settles it outside the lock.
    pub fn take(&mut self, id: CallId) -> Option<Settle> {
        self.pending.remove(&id).map(Settle)
    }

    /// Mark closed and hand back every outstanding record.
    pub fn close(&mut self, err: DbusError) -> Option<Vec<Settle>> {
        if self.closed.is_some() {
            return None;
        }
        self.closed = Some(err);
        Some(self.pending.drain().map(|(_, record)| Settle(record)).collect())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// A taken record, settled once the dispatcher lock is dropped.
pub(crate) struct Settle(Record);

impl Settle {
    pub fn finish(self, outcome: Result<Reply, DbusError>) {
        self.0.finish(outcome)
    }
}

/// An in-flight method call.
///
/// Resolves with the reply or the error; `state()` can be inspected at any time.
pub struct PendingCall {
    id: Option<CallId>,
    state: SharedState,
    rx: Option<oneshot::Receiver<Result<Reply, DbusError>>>,
    ready: Option<Result<Reply, DbusError>>,
}

impl PendingCall {
    /// A call that failed before it was sent.
    pub(crate) fn failed(err: DbusError) -> Self {
        PendingCall {
            id: None,
            state: SharedState::new(REJECTED),
            rx: None,
            ready: Some(Err(err)),
        }
    }

    /// The request id, if the call reached the transport.
    pub fn id(&self) -> Option<CallId> {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state.get()
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Future for PendingCall {
    type Output = Result<Reply, DbusError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.ready.take() {
            return Poll::Ready(outcome);
        }
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Err(DbusError::closed(Problem::Disconnected)));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => {
                self.rx = None;
                Poll::Ready(outcome)
            }
            Poll::Ready(Err(_)) => {
                self.rx = None;
                Poll::Ready(Err(DbusError::closed(Problem::Disconnected)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(value: Value) -> Result<Reply, DbusError> {
        Ok(Reply {
            args: vec![value],
            options: ReplyOptions::default(),
        })
    }

    #[tokio::test]
    async fn test_reply_matched_by_id() {
        let mut dispatcher = Dispatcher::default();
        let (first, call_a) = dispatcher.register_call();
        let (second, call_b) = dispatcher.register_call();
        let (Registered::Sent(a), Registered::Sent(b)) = (first, second) else {
            panic!("calls should be registered");
        };
        assert_ne!(a, b);
        assert_eq!(call_a.id(), Some(a));

        dispatcher.take(b).unwrap().finish(reply(json!("b")));
        dispatcher.take(a).unwrap().finish(reply(json!("a")));
        assert!(dispatcher.take(a).is_none());

        assert_eq!(call_a.state(), CallState::Resolved);
        assert_eq!(call_a.await.unwrap().args, vec![json!("a")]);
        assert_eq!(call_b.await.unwrap().args, vec![json!("b")]);
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_later_calls() {
        let mut dispatcher = Dispatcher::default();
        let (_, call) = dispatcher.register_call();
        assert_eq!(call.state(), CallState::Pending);

        let err = DbusError::closed(Problem::from("blah-blah"));
        for settle in dispatcher.close(err.clone()).unwrap() {
            settle.finish(Err(err.clone()));
        }
        assert!(dispatcher.close(err.clone()).is_none());

        assert_eq!(call.state(), CallState::Rejected);
        assert_eq!(call.await.unwrap_err(), err);

        let (registered, late) = dispatcher.register_call();
        assert!(matches!(registered, Registered::Refused(..)));
        assert_eq!(late.state(), CallState::Rejected);
        assert_eq!(late.id(), None);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_call_is_immediately_rejected() {
        let call = PendingCall::failed(DbusError::protocol("object path is invalid"));
        assert_eq!(call.state(), CallState::Rejected);
        let err = call.await.unwrap_err();
        assert_eq!(err.problem_code(), Some(&Problem::ProtocolError));
    }
}
