//! One client connection.
//!
//! Frames from the client are handled one at a time. Everything sent back
//! goes through the session outbox, which stamps consecutive `seq` numbers,
//! so frames produced by a call always precede that call's reply.

use crate::bus::Bus;
use crate::error::BridgeError;
use cockpit_dbus_core::error::names as errors;
use cockpit_dbus_core::message::native_byte_order;
use cockpit_dbus_core::names::is_bus_name;
use cockpit_dbus_core::{
    validate_call, CallId, CallOptions, DbusError, Frame, MatchRule, Message, MetaData,
    NotifyDiff, OpenOptions, Problem, SignalMessage, WatchSelector,
};
use cockpit_dbus_transport::DbusTransport;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

struct SessionState {
    outbox: Option<mpsc::UnboundedSender<Message>>,
    next_seq: u64,
    opened: Option<OpenOptions>,
    watches: Vec<WatchSelector>,
    matches: Vec<MatchRule>,
    described: HashSet<String>,
}

impl SessionState {
    fn push(&mut self, frame: Frame) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(seq, kind = frame.kind(), "queueing frame");
        if outbox.send(Message::sequenced(seq, frame)).is_err() {
            self.outbox = None;
        }
    }

    /// Queue `diff`, preceded by a `meta` frame for interfaces this
    /// connection has not been told about yet.
    fn push_notify(&mut self, diff: NotifyDiff, bus: &Bus) {
        let mut meta = MetaData::new();
        for (_, iface, props) in diff.iter() {
            if props.is_none() || self.described.contains(iface) {
                continue;
            }
            if let Some(info) = bus.interface_info(iface) {
                meta.insert(iface.to_string(), info);
            }
        }
        if !meta.is_empty() {
            self.described.extend(meta.keys().cloned());
            self.push(Frame::Meta(meta));
        }
        self.push(Frame::Notify(diff));
    }

    fn close(&mut self, problem: Option<Problem>, message: Option<String>) {
        if problem.is_some() {
            self.push(Frame::Close { problem, message });
        }
        self.outbox = None;
    }
}

pub(crate) struct SessionShared {
    id: Uuid,
    unique_name: String,
    state: Mutex<SessionState>,
    shutdown: Notify,
}

impl SessionShared {
    fn new(unique_name: String, outbox: mpsc::UnboundedSender<Message>) -> Self {
        SessionShared {
            id: Uuid::new_v4(),
            unique_name,
            state: Mutex::new(SessionState {
                outbox: Some(outbox),
                next_seq: 1,
                opened: None,
                watches: Vec::new(),
                matches: Vec::new(),
                described: HashSet::new(),
            }),
            shutdown: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// Forward the parts of `diff` this session watches.
    pub(crate) fn deliver_notify(&self, diff: &NotifyDiff, bus: &Bus) {
        let mut state = self.state.lock();
        if state.opened.is_none() || state.watches.is_empty() {
            return;
        }
        let mut filtered = NotifyDiff::new();
        for (path, iface, props) in diff.iter() {
            if !state.watches.iter().any(|w| w.covers(path, iface)) {
                continue;
            }
            match props {
                Some(props) => filtered.set_properties(path, iface, props.clone()),
                None => filtered.remove_interface(path, iface),
            }
        }
        if !filtered.is_empty() {
            state.push_notify(filtered, bus);
        }
    }

    pub(crate) fn deliver_signal(&self, signal: &SignalMessage) {
        let mut state = self.state.lock();
        if state.opened.is_some() && state.matches.iter().any(|rule| rule.matches(signal)) {
            state.push(Frame::Signal(signal.clone()));
        }
    }

    pub(crate) fn owner_changed(&self, name: &str, owner: Option<&str>) {
        let mut state = self.state.lock();
        let Some(opened) = &state.opened else {
            return;
        };
        if opened.name.as_deref() != Some(name) {
            return;
        }
        let track = opened.track;
        state.push(Frame::Owner(owner.map(str::to_string)));
        if owner.is_none() && track {
            info!(session = %self.id, name, "tracked name lost its owner");
            state.close(Some(Problem::Disconnected), None);
            self.shutdown.notify_one();
        }
    }

    async fn serve<T>(&self, bus: &Arc<Bus>, transport: &T) -> Result<(), BridgeError>
    where
        T: DbusTransport + ?Sized,
    {
        loop {
            let incoming = tokio::select! {
                _ = self.shutdown.notified() => return Ok(()),
                incoming = transport.recv() => incoming?,
            };
            let Some(msg) = incoming else {
                debug!(session = %self.id, "peer hung up");
                return Ok(());
            };
            if !self.handle(bus, msg.frame).await? {
                return Ok(());
            }
        }
    }

    /// Returns false once the client has asked to close.
    async fn handle(&self, bus: &Arc<Bus>, frame: Frame) -> Result<bool, BridgeError> {
        debug!(session = %self.id, kind = frame.kind(), "received frame");
        match frame {
            Frame::Open(options) => self.open(bus, options)?,
            Frame::Close { .. } => return Ok(false),
            frame if self.state.lock().opened.is_none() => {
                return Err(BridgeError::Protocol(format!(
                    "received {} before open",
                    frame.kind()
                )));
            }
            Frame::Call {
                id,
                path,
                interface,
                member,
                args,
                signature,
                flags,
            } => {
                let options = CallOptions { signature, flags };
                validate_call(&path, &interface, &member, &options)?;
                let outcome = match self.check_owner(bus) {
                    Ok(()) => {
                        bus.call(
                            &self.unique_name,
                            &path,
                            &interface,
                            &member,
                            args,
                            options.signature.as_deref(),
                        )
                        .await
                    }
                    Err(err) => Err(err),
                };
                let reply = reply_frame(id, outcome, &options);
                self.state.lock().push(reply);
            }
            Frame::AddMatch(rule) => {
                rule.validate()?;
                self.state.lock().matches.push(rule);
            }
            Frame::RemoveMatch(rule) => {
                let mut state = self.state.lock();
                if let Some(pos) = state.matches.iter().position(|r| *r == rule) {
                    state.matches.remove(pos);
                }
            }
            Frame::Watch { id, selector } => {
                selector.validate()?;
                bus.snapshot(&selector, |diff| {
                    let mut state = self.state.lock();
                    state.watches.push(selector.clone());
                    if !diff.is_empty() {
                        state.push_notify(diff, bus);
                    }
                    state.push(Frame::Reply {
                        id,
                        args: Vec::new(),
                        signature: None,
                        flags: None,
                    });
                });
            }
            Frame::Unwatch(selector) => {
                let mut state = self.state.lock();
                if let Some(pos) = state.watches.iter().position(|w| *w == selector) {
                    state.watches.remove(pos);
                }
            }
            other => {
                return Err(BridgeError::Protocol(format!(
                    "unexpected {} frame from client",
                    other.kind()
                )));
            }
        }
        Ok(true)
    }

    fn open(&self, bus: &Bus, options: OpenOptions) -> Result<(), BridgeError> {
        if let Some(name) = &options.name {
            if !is_bus_name(name) {
                return Err(BridgeError::Protocol(format!(
                    "bad \"name\" option in open: {}",
                    name
                )));
            }
        }
        match options.bus.as_deref() {
            None | Some("session") | Some("system") | Some("user") | Some("internal") => {}
            Some(other) => {
                return Err(BridgeError::Protocol(format!(
                    "bad \"bus\" option in open: {}",
                    other
                )))
            }
        }
        match options.superuser.as_deref() {
            None | Some("try") => {}
            Some("require") if bus.allow_superuser() => {}
            Some("require") => {
                return Err(BridgeError::AccessDenied(
                    "superuser access is not available".to_string(),
                ))
            }
            Some(other) => {
                return Err(BridgeError::Protocol(format!(
                    "bad \"superuser\" option in open: {}",
                    other
                )))
            }
        }

        let mut state = self.state.lock();
        if state.opened.is_some() {
            return Err(BridgeError::Protocol("channel is already open".to_string()));
        }
        info!(session = %self.id, name = ?options.name, "session opened");
        let name = options.name.clone();
        state.opened = Some(options);
        state.push(Frame::Ready {
            unique_name: Some(self.unique_name.clone()),
        });
        if let Some(name) = name {
            state.push(Frame::Owner(bus.owner_of(&name)));
        }
        Ok(())
    }

    /// Calls on a connection opened for a name fail while nobody owns it.
    fn check_owner(&self, bus: &Bus) -> Result<(), DbusError> {
        let name = self
            .state
            .lock()
            .opened
            .as_ref()
            .and_then(|opened| opened.name.clone());
        match name {
            Some(name) if bus.owner_of(&name).is_none() => Err(DbusError::remote(
                errors::SERVICE_UNKNOWN,
                format!("The name {} was not provided by any .service files", name),
            )),
            _ => Ok(()),
        }
    }

    fn close(&self, problem: Option<Problem>, message: Option<String>) {
        self.state.lock().close(problem, message);
    }
}

fn reply_frame(
    id: CallId,
    outcome: Result<(Vec<Value>, String), DbusError>,
    options: &CallOptions,
) -> Frame {
    match outcome {
        Ok((args, out_signature)) => Frame::Reply {
            id,
            args,
            signature: options.signature.as_ref().map(|_| out_signature),
            flags: options
                .flags
                .as_ref()
                .map(|_| native_byte_order().to_string()),
        },
        Err(DbusError::Remote { name, message }) => Frame::Error { id, name, message },
        Err(err) => Frame::Error {
            id,
            name: errors::FAILED.to_string(),
            message: err.message().to_string(),
        },
    }
}

async fn write_outbox<T>(transport: Arc<T>, mut outbox: mpsc::UnboundedReceiver<Message>)
where
    T: DbusTransport + 'static,
{
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = transport.send(msg).await {
            debug!(error = %e, "session transport send failed");
            break;
        }
    }
}

pub(crate) async fn run<T>(bus: Arc<Bus>, transport: T)
where
    T: DbusTransport + 'static,
{
    let transport = Arc::new(transport);
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Arc::new(SessionShared::new(bus.allocate_unique_name(), tx));
    bus.add_session(session.clone());
    info!(session = %session.id, unique_name = %session.unique_name, "session started");

    let writer = tokio::spawn(write_outbox(transport.clone(), rx));

    // interface panics surface here as a JoinError
    let served = tokio::spawn({
        let bus = bus.clone();
        let session = session.clone();
        let transport = transport.clone();
        async move { session.serve(&bus, &*transport).await }
    })
    .await;

    match served {
        Ok(Ok(())) => session.close(None, None),
        Ok(Err(e)) => {
            warn!(session = %session.id, error = %e, "closing session");
            session.close(Some(e.problem()), Some(e.to_string()));
        }
        Err(e) => {
            error!(session = %session.id, error = %e, "session handler failed");
            session.close(Some(Problem::InternalError), Some(e.to_string()));
        }
    }
    bus.remove_session(session.id);

    let _ = writer.await;
    if let Err(e) = transport.close().await {
        debug!(error = %e, "session transport close failed");
    }
    info!(session = %session.id, "session ended");
}
