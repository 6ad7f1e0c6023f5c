// Transport compliance tests
// Every transport must deliver frames in order and report the peer closing

use bytes::BytesMut;
use cockpit_dbus_core::{CallId, Frame, Message, NotifyDiff};
use cockpit_dbus_transport::{
    CodecError, DbusTransport, FramedTransport, LengthPrefixedCodec, MemoryTransport,
    NewlineDelimitedCodec,
};
use serde_json::json;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

fn burst() -> Vec<Message> {
    let mut diff = NotifyDiff::new();
    diff.set_property("/otree/frobber", "com.redhat.Cockpit.DBusTests.Frobber", "y", json!(43));
    vec![
        Message::sequenced(1, Frame::Ready { unique_name: Some(":1.0".into()) }),
        Message::sequenced(2, Frame::Notify(diff)),
        Message::sequenced(
            3,
            Frame::Reply {
                id: CallId::new(1),
                args: vec![],
                signature: Some("".into()),
                flags: Some("<".into()),
            },
        ),
    ]
}

async fn check_ordered_delivery(a: &dyn DbusTransport, b: &dyn DbusTransport) {
    for msg in burst() {
        a.send(msg).await.expect("Should send frame");
    }
    for expected in burst() {
        let got = b.recv().await.expect("Should receive").expect("Should not be closed");
        assert_eq!(got, expected);
    }
    a.close().await.expect("Should close");
    assert!(b.recv().await.expect("Clean end of stream").is_none());
}

#[cfg(test)]
mod transport_protocol_tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_compliance() {
        println!("🧪 Testing in-memory transport");
        let (a, b) = MemoryTransport::pair();
        check_ordered_delivery(&a, &b).await;
        println!("✅ In-memory transport verified");
    }

    #[tokio::test]
    async fn test_newline_transport_compliance() {
        println!("🧪 Testing newline-delimited stream transport");
        let (left, right) = tokio::io::duplex(64 * 1024);
        let a = FramedTransport::newline_delimited(left);
        let b = FramedTransport::newline_delimited(right);
        check_ordered_delivery(&a, &b).await;
        println!("✅ Newline-delimited transport verified");
    }

    #[tokio::test]
    async fn test_length_prefixed_transport_compliance() {
        println!("🧪 Testing length-prefixed stream transport");
        let (left, right) = tokio::io::duplex(64 * 1024);
        let a = FramedTransport::length_prefixed(left);
        let b = FramedTransport::length_prefixed(right);
        check_ordered_delivery(&a, &b).await;
        println!("✅ Length-prefixed transport verified");
    }

    #[tokio::test]
    async fn test_concurrent_send_while_receiving() {
        let (a, b) = MemoryTransport::pair();
        let a = Arc::new(a);

        let waiter = {
            let a = a.clone();
            tokio::spawn(async move { a.recv().await })
        };
        a.send(Message::new(Frame::Owner(None))).await.unwrap();
        assert!(b.recv().await.unwrap().is_some());

        b.send(Message::sequenced(1, Frame::Owner(None))).await.unwrap();
        let got = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(got.seq, Some(1));
    }
}

#[cfg(test)]
mod codec_tests {
    use super::*;

    #[test]
    fn test_codecs_agree_on_content() {
        for msg in burst() {
            let mut lp = LengthPrefixedCodec::new();
            let mut buf = BytesMut::new();
            lp.encode(msg.clone(), &mut buf).unwrap();
            assert_eq!(lp.decode(&mut buf).unwrap(), Some(msg.clone()));

            let mut nl = NewlineDelimitedCodec::new();
            let mut buf = BytesMut::new();
            nl.encode(msg.clone(), &mut buf).unwrap();
            assert_eq!(nl.decode(&mut buf).unwrap(), Some(msg));
        }
    }

    #[test]
    fn test_line_too_long() {
        let mut codec = NewlineDelimitedCodec::with_max_line_length(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::LineTooLong(_))));
    }
}
