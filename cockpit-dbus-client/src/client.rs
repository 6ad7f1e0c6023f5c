// D-Bus JSON protocol client
// One client owns one transport. A connection task writes queued frames and
// applies incoming ones in sequence order: cache updates, signal handlers and
// proxy events for a frame all happen before the next frame is looked at, so
// a reply never overtakes the notify and signal frames that preceded it.

use crate::cache::ObjectCache;
use crate::config::{ClientConfig, DbusOptions};
use crate::dispatch::{Completion, Dispatcher, PendingCall, Registered, Reply, ReplyOptions};
use crate::router::{Route, SignalRouter};
use cockpit_dbus_core::{
    validate_call, CallOptions, DbusError, Frame, InterfaceInfo, MatchRule, Message, MetaData,
    NotifyDiff, Problem, Properties, Sequencer, SignalMessage, WatchSelector,
};
use cockpit_dbus_transport::DbusTransport;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

/// Receives every applied notify diff, synchronously, in frame order.
pub(crate) trait CacheListener: Send + Sync {
    fn on_notify(&self, diff: &NotifyDiff);
}

/// Contents of the `ready` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    pub unique_name: Option<String>,
}

pub(crate) struct ClientInner {
    name: Option<String>,
    options: DbusOptions,
    pub(crate) config: ClientConfig,
    outgoing: mpsc::UnboundedSender<Message>,
    dispatcher: Mutex<Dispatcher>,
    router: SignalRouter,
    cache: RwLock<ObjectCache>,
    // held across cache write and listener fan-out; listeners may notify again
    applying: ReentrantMutex<()>,
    meta: DashMap<String, InterfaceInfo>,
    listeners: Mutex<Vec<Weak<dyn CacheListener>>>,
    notify_tx: broadcast::Sender<Arc<NotifyDiff>>,
    meta_tx: broadcast::Sender<Arc<MetaData>>,
    ready_tx: watch::Sender<Option<ReadyInfo>>,
    owner_tx: watch::Sender<Option<String>>,
    closed_tx: watch::Sender<Option<DbusError>>,
}

impl ClientInner {
    fn send(&self, frame: Frame) {
        trace!(kind = frame.kind(), "queueing frame");
        if self.outgoing.send(Message::new(frame)).is_err() {
            debug!("connection task gone, frame dropped");
        }
    }

    fn is_closed(&self) -> bool {
        self.dispatcher.lock().closed().is_some()
    }

    /// Mark the client closed and reject everything outstanding.
    /// Returns false if it was already closed.
    fn shutdown(&self, err: DbusError) -> bool {
        let Some(outstanding) = self.dispatcher.lock().close(err.clone()) else {
            return false;
        };
        info!(error = %err, outstanding = outstanding.len(), "client closed");
        for settle in outstanding {
            settle.finish(Err(err.clone()));
        }
        self.router.clear();
        self.closed_tx.send_replace(Some(err));
        true
    }

    fn settle(&self, id: cockpit_dbus_core::CallId, outcome: Result<Reply, DbusError>) {
        let settle = self.dispatcher.lock().take(id);
        match settle {
            Some(settle) => settle.finish(outcome),
            None => warn!(%id, "reply for unknown call"),
        }
    }

    fn apply_notify(&self, diff: NotifyDiff) {
        let _applying = self.applying.lock();
        self.cache.write().apply(&diff);
        let diff = Arc::new(diff);
        let _ = self.notify_tx.send(diff.clone());

        let listeners: Vec<Arc<dyn CacheListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_notify(&diff);
        }
    }

    fn apply_meta(&self, meta: MetaData) {
        for (iface, info) in &meta {
            self.meta.insert(iface.clone(), info.clone());
        }
        let _ = self.meta_tx.send(Arc::new(meta));
    }

    fn handle(&self, msg: Message) {
        debug!(kind = msg.frame.kind(), seq = ?msg.seq, "received frame");
        match msg.frame {
            Frame::Ready { unique_name } => {
                self.ready_tx.send_replace(Some(ReadyInfo { unique_name }));
            }
            Frame::Owner(owner) => {
                self.owner_tx.send_replace(owner);
            }
            Frame::Reply {
                id,
                args,
                signature,
                flags,
            } => self.settle(
                id,
                Ok(Reply {
                    args,
                    options: ReplyOptions { signature, flags },
                }),
            ),
            Frame::Error { id, name, message } => {
                self.settle(id, Err(DbusError::remote(name, message)))
            }
            Frame::Signal(signal) => {
                self.router.dispatch(&signal);
            }
            Frame::Notify(diff) => self.apply_notify(diff),
            Frame::Meta(meta) => self.apply_meta(meta),
            Frame::Close { problem, message } => {
                let problem = problem.unwrap_or(Problem::Disconnected);
                let message = message.unwrap_or_else(|| problem.describe());
                self.shutdown(DbusError::problem(problem, message));
            }
            other => warn!(kind = other.kind(), "unexpected frame from bridge"),
        }
    }
}

/// Handle to one connection; cheap to clone.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    /// Open a client over `transport`. Must be called within a tokio runtime.
    pub fn new<T>(transport: T, name: Option<&str>, options: DbusOptions) -> Self
    where
        T: DbusTransport + 'static,
    {
        Self::with_config(transport, name, options, ClientConfig::default())
    }

    pub fn with_config<T>(
        transport: T,
        name: Option<&str>,
        options: DbusOptions,
        config: ClientConfig,
    ) -> Self
    where
        T: DbusTransport + 'static,
    {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let capacity = config.event_capacity.max(1);
        let inner = Arc::new(ClientInner {
            name: name.map(str::to_string),
            options: options.clone(),
            config,
            outgoing,
            dispatcher: Mutex::new(Dispatcher::default()),
            router: SignalRouter::default(),
            cache: RwLock::new(ObjectCache::new()),
            applying: ReentrantMutex::new(()),
            meta: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            notify_tx: broadcast::channel(capacity).0,
            meta_tx: broadcast::channel(capacity).0,
            ready_tx: watch::channel(None).0,
            owner_tx: watch::channel(None).0,
            closed_tx: watch::channel(None).0,
        });

        let mut open = options;
        open.name = name.map(str::to_string);
        inner.send(Frame::Open(open));

        let sequencer = Sequencer::starting_at(1).with_max_held(inner.config.sequence_limit);
        tokio::spawn(run_connection(Arc::downgrade(&inner), transport, queue, sequencer));
        Client { inner }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn options(&self) -> &DbusOptions {
        &self.inner.options
    }

    /// Send a method call. Structural problems (path, interface, member,
    /// signature and flags syntax) reject without touching the transport.
    pub fn start_call(
        &self,
        path: &str,
        iface: &str,
        member: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> PendingCall {
        if let Some(err) = self.close_reason() {
            return PendingCall::failed(err);
        }
        if let Err(err) = validate_call(path, iface, member, &options) {
            debug!(error = %err, "call rejected before sending");
            return PendingCall::failed(err);
        }

        let (registered, call) = self.inner.dispatcher.lock().register_call();
        match registered {
            Registered::Sent(id) => self.inner.send(Frame::Call {
                id,
                path: path.to_string(),
                interface: iface.to_string(),
                member: member.to_string(),
                args,
                signature: options.signature,
                flags: options.flags,
            }),
            Registered::Refused(complete, err) => complete(Err(err)),
        }
        call
    }

    pub async fn call(
        &self,
        path: &str,
        iface: &str,
        member: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Reply, DbusError> {
        self.start_call(path, iface, member, args, options).await
    }

    /// Invoke `handler` for every signal matching `rule`.
    pub fn subscribe<F>(&self, rule: MatchRule, handler: F) -> Result<Subscription, DbusError>
    where
        F: Fn(&SignalMessage) + Send + Sync + 'static,
    {
        rule.validate()?;
        if let Some(err) = self.close_reason() {
            return Err(err);
        }
        let route = self.inner.router.add(rule.clone(), Box::new(handler));
        self.inner.send(Frame::AddMatch(rule));
        Ok(Subscription {
            route,
            client: Arc::downgrade(&self.inner),
        })
    }

    /// Watch part of the object tree. Resolves once the initial contents
    /// have been applied to the cache and published as notify events.
    pub async fn watch(&self, selector: impl Into<WatchSelector>) -> Result<Watch, DbusError> {
        let (tx, rx) = oneshot::channel();
        let watch = self.start_watch(selector.into(), move |outcome| {
            let _ = tx.send(outcome);
        })?;
        match rx.await {
            Ok(Ok(())) => Ok(watch),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DbusError::closed(Problem::Disconnected)),
        }
    }

    /// Send a `watch` and run `on_done` when its reply has been applied.
    pub(crate) fn start_watch<F>(
        &self,
        selector: WatchSelector,
        on_done: F,
    ) -> Result<Watch, DbusError>
    where
        F: FnOnce(Result<(), DbusError>) + Send + 'static,
    {
        selector.validate()?;
        let complete: Completion = Box::new(move |outcome| on_done(outcome.map(|_| ())));
        let registered = self.inner.dispatcher.lock().register_callback(complete);
        match registered {
            Registered::Sent(id) => {
                self.inner.send(Frame::Watch {
                    id,
                    selector: selector.clone(),
                });
                Ok(Watch {
                    selector,
                    client: Arc::downgrade(&self.inner),
                    active: AtomicBool::new(true),
                })
            }
            Registered::Refused(complete, err) => {
                complete(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Inject a diff into the cache as if the bridge had sent it.
    pub fn notify(&self, diff: NotifyDiff) {
        self.inner.apply_notify(diff);
    }

    /// Inject interface descriptions as if the bridge had sent them.
    pub fn meta(&self, meta: MetaData) {
        self.inner.apply_meta(meta);
    }

    /// Applied notify diffs, in order.
    pub fn notifications(&self) -> broadcast::Receiver<Arc<NotifyDiff>> {
        self.inner.notify_tx.subscribe()
    }

    pub fn meta_events(&self) -> broadcast::Receiver<Arc<MetaData>> {
        self.inner.meta_tx.subscribe()
    }

    pub fn interface_info(&self, iface: &str) -> Option<InterfaceInfo> {
        self.inner.meta.get(iface).map(|info| info.value().clone())
    }

    /// Cached properties of `iface` at `path`.
    pub fn cached(&self, path: &str, iface: &str) -> Option<Properties> {
        self.inner.cache.read().get(path, iface).cloned()
    }

    pub fn snapshot(&self) -> ObjectCache {
        self.inner.cache.read().clone()
    }

    /// Current owner of the bus name, as last reported by the bridge.
    pub fn owner(&self) -> watch::Receiver<Option<String>> {
        self.inner.owner_tx.subscribe()
    }

    /// Wait for the bridge to accept the `open`.
    pub async fn ready(&self) -> Result<ReadyInfo, DbusError> {
        let mut ready = self.inner.ready_tx.subscribe();
        let mut closed = self.inner.closed_tx.subscribe();
        tokio::select! {
            biased;
            info = ready.wait_for(Option::is_some) => {
                info.map(|v| v.clone())
                    .ok()
                    .flatten()
                    .ok_or_else(|| DbusError::closed(Problem::Disconnected))
            }
            err = closed.wait_for(Option::is_some) => {
                Err(err
                    .map(|v| v.clone())
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| DbusError::closed(Problem::Disconnected)))
            }
        }
    }

    /// Resolves with the close reason once the client has closed.
    pub async fn closed(&self) -> DbusError {
        let mut closed = self.inner.closed_tx.subscribe();
        closed
            .wait_for(Option::is_some)
            .await
            .map(|v| v.clone())
            .ok()
            .flatten()
            .unwrap_or_else(|| DbusError::closed(Problem::Disconnected))
    }

    pub fn close_reason(&self) -> Option<DbusError> {
        self.inner.dispatcher.lock().closed().cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Close the client; `None` closes with `disconnected`.
    pub fn close(&self, problem: Option<Problem>) {
        let problem = problem.unwrap_or(Problem::Disconnected);
        if self.inner.shutdown(DbusError::closed(problem.clone())) {
            self.inner.send(Frame::Close {
                problem: Some(problem),
                message: None,
            });
        }
    }

    /// Register `listener` once `seed` has read the cache, with no notify
    /// applied in between.
    pub(crate) fn add_listener(
        &self,
        listener: Weak<dyn CacheListener>,
        seed: impl FnOnce(&ObjectCache),
    ) {
        let _applying = self.inner.applying.lock();
        seed(&self.inner.cache.read());
        self.inner.listeners.lock().push(listener);
    }
}

/// An active signal subscription.
///
/// Dropping the handle leaves the subscription in place; call
/// [`Subscription::remove`] to stop deliveries.
pub struct Subscription {
    route: Arc<Route>,
    client: Weak<ClientInner>,
}

impl Subscription {
    pub fn rule(&self) -> &MatchRule {
        &self.route.rule
    }

    pub fn is_active(&self) -> bool {
        self.route.is_active()
    }

    /// Stop deliveries. Idempotent; no handler call starts after this returns.
    pub fn remove(&self) {
        if !self.route.deactivate() {
            return;
        }
        if let Some(inner) = self.client.upgrade() {
            inner.router.remove(&self.route);
            if !inner.is_closed() {
                inner.send(Frame::RemoveMatch(self.route.rule.clone()));
            }
        }
    }
}

/// A registered watch on the bridge.
pub struct Watch {
    selector: WatchSelector,
    client: Weak<ClientInner>,
    active: AtomicBool,
}

impl Watch {
    pub fn selector(&self) -> &WatchSelector {
        &self.selector
    }

    /// Send `unwatch`. Cached data stays; it just stops being updated.
    pub fn remove(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.client.upgrade() {
            if !inner.is_closed() {
                inner.send(Frame::Unwatch(self.selector.clone()));
            }
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch").field("selector", &self.selector).finish()
    }
}

async fn run_connection<T>(
    client: Weak<ClientInner>,
    transport: T,
    mut queue: mpsc::UnboundedReceiver<Message>,
    mut sequencer: Sequencer,
) where
    T: DbusTransport + 'static,
{

    loop {
        tokio::select! {
            outgoing = queue.recv() => {
                let Some(msg) = outgoing else {
                    debug!("all client handles dropped");
                    break;
                };
                let closing = matches!(msg.frame, Frame::Close { .. });
                if let Err(e) = transport.send(msg).await {
                    warn!(error = %e, "transport send failed");
                    if let Some(inner) = client.upgrade() {
                        inner.shutdown(DbusError::closed(Problem::Disconnected));
                    }
                    break;
                }
                if closing {
                    break;
                }
            }
            incoming = transport.recv() => {
                let Some(inner) = client.upgrade() else {
                    break;
                };
                match incoming {
                    Ok(Some(msg)) => {
                        match sequencer.push(msg) {
                            Ok(ready) => {
                                for msg in ready {
                                    inner.handle(msg);
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "bridge frames out of sequence");
                                inner.shutdown(DbusError::problem(
                                    Problem::ProtocolError,
                                    e.to_string(),
                                ));
                                let _ = transport
                                    .send(Message::new(Frame::Close {
                                        problem: Some(Problem::ProtocolError),
                                        message: None,
                                    }))
                                    .await;
                            }
                        }
                        if inner.is_closed() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("transport closed by peer");
                        inner.shutdown(DbusError::closed(Problem::Disconnected));
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport receive failed");
                        inner.shutdown(DbusError::closed(Problem::Disconnected));
                        break;
                    }
                }
            }
        }
    }

    // flush a close frame queued by a local close before the bridge's own close arrived
    while let Ok(msg) = queue.try_recv() {
        if matches!(msg.frame, Frame::Close { .. }) {
            let _ = transport.send(msg).await;
        }
    }
    if let Err(e) = transport.close().await {
        debug!(error = %e, "transport close failed");
    }
}
