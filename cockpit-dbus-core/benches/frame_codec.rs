use cockpit_dbus_core::codec::{decode_frame, encode_frame};
use cockpit_dbus_core::{CallId, Frame, FrameFormat, Message, NotifyDiff, Sequencer};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::hint::black_box;

const FROBBER: &str = "com.redhat.Cockpit.DBusTests.Frobber";

fn sample_messages() -> Vec<Message> {
    let mut diff = NotifyDiff::new();
    for name in ["y", "b", "n", "q", "i", "u", "x", "t", "d", "s"] {
        diff.set_property("/otree/frobber", FROBBER, name, json!(0));
    }

    vec![
        Message::new(Frame::Call {
            id: CallId::new(1),
            path: "/otree/frobber".into(),
            interface: FROBBER.into(),
            member: "HelloWorld".into(),
            args: vec![json!("Browser-side JS")],
            signature: Some("s".into()),
            flags: None,
        }),
        Message::sequenced(
            2,
            Frame::Reply {
                id: CallId::new(1),
                args: vec![json!("Word! You said `Browser-side JS'. I'm Skeleton, btw!")],
                signature: Some("s".into()),
                flags: Some("<".into()),
            },
        ),
        Message::sequenced(3, Frame::Notify(diff)),
    ]
}

fn bench_frame_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encoding");

    for format in [FrameFormat::NewlineDelimited, FrameFormat::LengthPrefixed] {
        for (i, message) in sample_messages().iter().enumerate() {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}/encode", format), i),
                message,
                |b, message| b.iter(|| black_box(encode_frame(message, format).unwrap())),
            );

            let bytes = encode_frame(message, format).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}/decode", format), i),
                &bytes,
                |b, bytes| b.iter(|| black_box(decode_frame(bytes, format).unwrap())),
            );
        }
    }

    group.finish();
}

fn bench_sequencer(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequencer");

    for size in [10u64, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("reversed", size), &size, |b, &size| {
            b.iter(|| {
                let mut seq = Sequencer::starting_at(1);
                let mut released = 0;
                for n in (1..=size).rev() {
                    released += seq
                        .push(Message::sequenced(n, Frame::Owner(None)))
                        .map_or(0, |ready| ready.len());
                }
                black_box(released)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_encoding, bench_sequencer);
criterion_main!(benches);
