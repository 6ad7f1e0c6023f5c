use cockpit_dbus_bridge::test_service::{self, FROBBER_IFACE, FROBBER_PATH, TEST_BUS_NAME};
use cockpit_dbus_bridge::{builtin, init_test_logging, BridgeConfig, Bus};
use cockpit_dbus_core::error::names as errors;
use cockpit_dbus_core::{
    CallId, Frame, MatchRule, Message, OpenOptions, Problem, WatchSelector,
};
use cockpit_dbus_transport::{DbusTransport, MemoryTransport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn test_bus() -> Arc<Bus> {
    init_test_logging();
    let bus = Bus::new();
    test_service::install(&bus, &[]).unwrap();
    bus
}

async fn next(transport: &MemoryTransport) -> Message {
    timeout(Duration::from_secs(5), transport.recv())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .expect("transport closed")
}

/// Connect, open and consume the `ready` (and `owner`, for named opens).
async fn open(bus: &Arc<Bus>, options: OpenOptions) -> MemoryTransport {
    let transport = bus.connect();
    let named = options.name.is_some();
    transport.send(Message::new(Frame::Open(options))).await.unwrap();
    assert!(matches!(next(&transport).await.frame, Frame::Ready { .. }));
    if named {
        assert!(matches!(next(&transport).await.frame, Frame::Owner(_)));
    }
    transport
}

async fn send(transport: &MemoryTransport, frame: Frame) {
    transport.send(Message::new(frame)).await.unwrap();
}

fn call(id: u64, path: &str, iface: &str, member: &str, args: Vec<Value>) -> Frame {
    Frame::Call {
        id: CallId::new(id),
        path: path.to_string(),
        interface: iface.to_string(),
        member: member.to_string(),
        args,
        signature: None,
        flags: None,
    }
}

#[tokio::test]
async fn test_open_reports_ready_and_owner() {
    println!("🧪 Testing open handshake");
    let bus = test_bus();
    let transport = bus.connect();
    send(
        &transport,
        Frame::Open(OpenOptions {
            name: Some(TEST_BUS_NAME.to_string()),
            ..Default::default()
        }),
    )
    .await;

    let ready = next(&transport).await;
    assert_eq!(ready.seq, Some(1));
    let Frame::Ready { unique_name } = ready.frame else {
        panic!("expected ready");
    };
    assert!(unique_name.unwrap().starts_with(":1."));

    let owner = next(&transport).await;
    assert_eq!(owner.seq, Some(2));
    assert_eq!(owner.frame, Frame::Owner(bus.owner_of(TEST_BUS_NAME)));
    println!("✅ Open handshake works");
}

#[tokio::test]
async fn test_watch_sends_meta_then_snapshot_then_reply() {
    let bus = test_bus();
    let transport = open(&bus, OpenOptions::default()).await;
    send(
        &transport,
        Frame::Watch {
            id: CallId::new(1),
            selector: WatchSelector::path(FROBBER_PATH),
        },
    )
    .await;

    let Frame::Meta(meta) = next(&transport).await.frame else {
        panic!("expected meta first");
    };
    assert!(meta[FROBBER_IFACE].methods.contains_key("HelloWorld"));

    let Frame::Notify(diff) = next(&transport).await.frame else {
        panic!("expected snapshot notify");
    };
    let props = diff.get(FROBBER_PATH, FROBBER_IFACE).unwrap().unwrap();
    assert_eq!(props.len(), 18);
    assert_eq!(props["y"], json!(42));

    let reply = next(&transport).await.frame;
    assert!(matches!(reply, Frame::Reply { id, .. } if id == CallId::new(1)));

    // a second watch on the same scope repeats the snapshot but not the meta
    send(
        &transport,
        Frame::Watch {
            id: CallId::new(2),
            selector: WatchSelector::namespace("/otree"),
        },
    )
    .await;
    assert!(matches!(next(&transport).await.frame, Frame::Notify(_)));
    assert!(matches!(next(&transport).await.frame, Frame::Reply { .. }));
}

#[tokio::test]
async fn test_call_effects_precede_reply() {
    println!("🧪 Testing barrier ordering");
    let bus = test_bus();
    let transport = open(&bus, OpenOptions::default()).await;
    send(
        &transport,
        Frame::Watch {
            id: CallId::new(1),
            selector: WatchSelector::path(FROBBER_PATH),
        },
    )
    .await;
    for _ in 0..3 {
        next(&transport).await;
    }

    send(&transport, call(2, FROBBER_PATH, FROBBER_IFACE, "RequestPropertyMods", vec![])).await;
    let first = next(&transport).await;
    let second = next(&transport).await;
    let reply = next(&transport).await;

    let Frame::Notify(y) = first.frame else {
        panic!("expected notify for y");
    };
    assert_eq!(y.get(FROBBER_PATH, FROBBER_IFACE).unwrap().unwrap()["y"], json!(43));
    let Frame::Notify(i) = second.frame else {
        panic!("expected notify for i");
    };
    assert_eq!(i.get(FROBBER_PATH, FROBBER_IFACE).unwrap().unwrap()["i"], json!(1));
    assert!(matches!(reply.frame, Frame::Reply { id, .. } if id == CallId::new(2)));
    assert!(first.seq < second.seq && second.seq < reply.seq);
    println!("✅ Notifications precede the reply");
}

#[tokio::test]
async fn test_signals_follow_match_rules() {
    let bus = test_bus();
    let watcher = open(&bus, OpenOptions::default()).await;
    let bystander = open(&bus, OpenOptions::default()).await;
    send(&watcher, Frame::AddMatch(MatchRule::new().interface(FROBBER_IFACE))).await;
    send(&bystander, Frame::AddMatch(MatchRule::new().path("/elsewhere"))).await;

    let emit = call(1, FROBBER_PATH, FROBBER_IFACE, "RequestSignalEmission", vec![json!(0)]);
    send(&watcher, emit).await;
    let Frame::Signal(signal) = next(&watcher).await.frame else {
        panic!("expected signal before reply");
    };
    assert_eq!(signal.member, "TestSignal");
    assert_eq!(signal.args[0], json!(43));
    assert_eq!(signal.args[3], json!({"first": [42, 42], "second": [43, 43]}));
    assert!(matches!(next(&watcher).await.frame, Frame::Reply { .. }));

    send(&bystander, call(7, FROBBER_PATH, FROBBER_IFACE, "HelloWorld", vec![json!("x")])).await;
    let frame = next(&bystander).await.frame;
    assert!(matches!(frame, Frame::Reply { id, .. } if id == CallId::new(7)));
}

#[tokio::test]
async fn test_reply_carries_signature_and_flags_when_asked() {
    let bus = test_bus();
    let transport = open(&bus, OpenOptions::default()).await;
    send(
        &transport,
        Frame::Call {
            id: CallId::new(1),
            path: FROBBER_PATH.to_string(),
            interface: FROBBER_IFACE.to_string(),
            member: "HelloWorld".to_string(),
            args: vec![json!("Bridge")],
            signature: Some("s".to_string()),
            flags: Some("".to_string()),
        },
    )
    .await;
    let Frame::Reply { args, signature, flags, .. } = next(&transport).await.frame else {
        panic!("expected reply");
    };
    assert_eq!(args, vec![json!("Word! You said `Bridge'. I'm Skeleton, btw!")]);
    assert_eq!(signature.as_deref(), Some("s"));
    let flags = flags.unwrap();
    assert!(flags == "<" || flags == ">");
}

#[tokio::test]
async fn test_remote_errors() {
    let bus = test_bus();
    let transport = open(&bus, OpenOptions::default()).await;

    send(&transport, call(1, FROBBER_PATH, FROBBER_IFACE, "UnknownBlahMethod", vec![])).await;
    let Frame::Error { name, .. } = next(&transport).await.frame else {
        panic!("expected error");
    };
    assert_eq!(name, errors::UNKNOWN_METHOD);

    send(&transport, call(2, FROBBER_PATH, FROBBER_IFACE, "HelloWorld", vec![json!(5)])).await;
    let Frame::Error { name, .. } = next(&transport).await.frame else {
        panic!("expected error");
    };
    assert_eq!(name, errors::INVALID_ARGS);

    send(&transport, call(3, FROBBER_PATH, FROBBER_IFACE, "HelloWorld", vec![json!("Yo")])).await;
    let Frame::Error { name, message, .. } = next(&transport).await.frame else {
        panic!("expected error");
    };
    assert_eq!(name, test_service::ERROR_FAILED);
    assert_eq!(message, "Yo is not a proper greeting");

    send(
        &transport,
        Frame::Call {
            id: CallId::new(4),
            path: FROBBER_PATH.to_string(),
            interface: FROBBER_IFACE.to_string(),
            member: "HelloWorld".to_string(),
            args: vec![json!(1)],
            signature: Some("i".to_string()),
            flags: None,
        },
    )
    .await;
    let Frame::Error { name, .. } = next(&transport).await.frame else {
        panic!("expected error");
    };
    assert_eq!(name, errors::INVALID_ARGS);
}

#[tokio::test]
async fn test_properties_set_notifies_and_signals() {
    let bus = test_bus();
    let transport = open(&bus, OpenOptions::default()).await;
    send(&transport, Frame::AddMatch(MatchRule::new().interface(builtin::PROPERTIES))).await;
    send(
        &transport,
        Frame::Watch {
            id: CallId::new(1),
            selector: WatchSelector::path(FROBBER_PATH),
        },
    )
    .await;
    for _ in 0..3 {
        next(&transport).await;
    }

    send(
        &transport,
        call(
            2,
            FROBBER_PATH,
            builtin::PROPERTIES,
            "Set",
            vec![json!(FROBBER_IFACE), json!("s"), json!({"t": "s", "v": "hello"})],
        ),
    )
    .await;
    let Frame::Notify(diff) = next(&transport).await.frame else {
        panic!("expected notify");
    };
    assert_eq!(diff.get(FROBBER_PATH, FROBBER_IFACE).unwrap().unwrap()["s"], json!("hello"));
    let Frame::Signal(signal) = next(&transport).await.frame else {
        panic!("expected PropertiesChanged");
    };
    assert_eq!(signal.member, "PropertiesChanged");
    assert_eq!(signal.args[0], json!(FROBBER_IFACE));
    assert_eq!(signal.args[1]["s"], json!({"t": "s", "v": "hello"}));
    assert!(matches!(next(&transport).await.frame, Frame::Reply { .. }));
}

#[tokio::test]
async fn test_invalid_call_closes_with_protocol_error() {
    let bus = test_bus();
    let transport = open(&bus, OpenOptions::default()).await;
    send(&transport, call(1, "invalid/path", FROBBER_IFACE, "HelloWorld", vec![])).await;
    let Frame::Close { problem, .. } = next(&transport).await.frame else {
        panic!("expected close");
    };
    assert_eq!(problem, Some(Problem::ProtocolError));
    let end = timeout(Duration::from_secs(5), transport.recv()).await.unwrap().unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_frames_before_open_are_rejected() {
    let bus = test_bus();
    let transport = bus.connect();
    send(&transport, call(1, FROBBER_PATH, FROBBER_IFACE, "HelloWorld", vec![json!("x")])).await;
    let Frame::Close { problem, .. } = next(&transport).await.frame else {
        panic!("expected close");
    };
    assert_eq!(problem, Some(Problem::ProtocolError));
}

#[tokio::test]
async fn test_superuser_require() {
    let options = OpenOptions {
        superuser: Some("require".to_string()),
        ..Default::default()
    };

    let denied = Bus::new();
    let transport = denied.connect();
    send(&transport, Frame::Open(options.clone())).await;
    let Frame::Close { problem, .. } = next(&transport).await.frame else {
        panic!("expected close");
    };
    assert_eq!(problem, Some(Problem::AccessDenied));

    let config = BridgeConfig {
        allow_superuser: true,
        ..Default::default()
    };
    let allowed = Bus::with_config(&config);
    let transport = allowed.connect();
    send(&transport, Frame::Open(options)).await;
    assert!(matches!(next(&transport).await.frame, Frame::Ready { .. }));
}

#[tokio::test]
async fn test_tracked_name_loss_closes_session() {
    println!("🧪 Testing owner tracking");
    let bus = test_bus();
    bus.request_name("org.example", ":1.99").unwrap();
    let transport = open(
        &bus,
        OpenOptions {
            name: Some("org.example".to_string()),
            track: true,
            ..Default::default()
        },
    )
    .await;

    assert!(bus.release_name("org.example"));
    assert_eq!(next(&transport).await.frame, Frame::Owner(None));
    let Frame::Close { problem, .. } = next(&transport).await.frame else {
        panic!("expected close");
    };
    assert_eq!(problem, Some(Problem::Disconnected));
    println!("✅ Losing a tracked name closes the session");
}

#[tokio::test]
async fn test_calls_to_unowned_name_fail() {
    let bus = test_bus();
    let transport = open(
        &bus,
        OpenOptions {
            name: Some("org.nobody".to_string()),
            ..Default::default()
        },
    )
    .await;
    send(&transport, call(1, FROBBER_PATH, FROBBER_IFACE, "HelloWorld", vec![json!("x")])).await;
    let Frame::Error { name, .. } = next(&transport).await.frame else {
        panic!("expected error");
    };
    assert_eq!(name, errors::SERVICE_UNKNOWN);

    // ownership appearing later is announced
    bus.request_name("org.nobody", ":1.42").unwrap();
    assert_eq!(next(&transport).await.frame, Frame::Owner(Some(":1.42".to_string())));
}

#[tokio::test]
async fn test_session_removed_after_close() {
    let bus = test_bus();
    let transport = open(&bus, OpenOptions::default()).await;
    assert_eq!(bus.session_count(), 1);
    send(
        &transport,
        Frame::Close {
            problem: None,
            message: None,
        },
    )
    .await;
    let end = timeout(Duration::from_secs(5), transport.recv()).await.unwrap().unwrap();
    assert!(end.is_none());
    assert_eq!(bus.session_count(), 0);
}
