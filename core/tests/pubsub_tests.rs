mod common;

use bytes::Bytes;
use fifomq::{fetch, publish, Channel, FifomqError, HeaderValue, Headers};

#[test]
fn basic_delivery_and_at_most_once() {
    common::init_storage_root();
    let mut channel = Channel::new("t1.news.sports").unwrap();
    channel.open().unwrap();

    let delivered = publish("t1.news.sports", &b"hi"[..], None).unwrap();
    assert_eq!(delivered, 1);

    let message = fetch(&mut channel).unwrap().expect("one message queued");
    assert_eq!(message.content, Bytes::from_static(b"hi"));
    assert_eq!(message.topic, "t1.news.sports");
    assert!(message.timestamp > 0);

    assert!(fetch(&mut channel).unwrap().is_none());
    channel.close();
}

#[test]
fn single_word_wildcard_delivery() {
    common::init_storage_root();
    let mut channel = Channel::new("t2.news.=").unwrap();
    channel.open().unwrap();

    assert_eq!(publish("t2.news.sports", &b"a"[..], None).unwrap(), 1);
    assert_eq!(publish("t2.news.tech", &b"b"[..], None).unwrap(), 1);
    assert_eq!(publish("t2.news", &b"c"[..], None).unwrap(), 0);
    assert_eq!(publish("t2.news.tech.2025", &b"d"[..], None).unwrap(), 0);

    let first = fetch(&mut channel).unwrap().unwrap();
    let second = fetch(&mut channel).unwrap().unwrap();
    assert_eq!(first.topic, "t2.news.sports");
    assert_eq!(second.topic, "t2.news.tech");
    assert!(fetch(&mut channel).unwrap().is_none());
    channel.close();
}

#[test]
fn multi_word_wildcard_delivery() {
    common::init_storage_root();
    let mut channel = Channel::new("t3.logs.+").unwrap();
    channel.open().unwrap();

    assert_eq!(publish("t3.logs.error", &b"1"[..], None).unwrap(), 1);
    assert_eq!(publish("t3.logs.app.error", &b"2"[..], None).unwrap(), 1);
    assert_eq!(publish("t3.logs", &b"3"[..], None).unwrap(), 0);
    assert_eq!(publish("t3.logs.a.b.c", &b"4"[..], None).unwrap(), 1);

    let topics: Vec<String> = std::iter::from_fn(|| fetch(&mut channel).unwrap())
        .map(|m| m.topic)
        .collect();
    assert_eq!(topics, ["t3.logs.error", "t3.logs.app.error", "t3.logs.a.b.c"]);
    channel.close();
}

#[test]
fn fan_out_counts_every_matching_channel() {
    common::init_storage_root();
    let mut channels: Vec<Channel> = (0..3)
        .map(|_| {
            let mut c = Channel::new("t4.evt").unwrap();
            c.open().unwrap();
            c
        })
        .collect();

    assert_eq!(publish("t4.evt", &b"x"[..], None).unwrap(), 3);

    for channel in &mut channels {
        let message = fetch(channel).unwrap().expect("fan-out copy");
        assert_eq!(message.content, Bytes::from_static(b"x"));
        assert!(fetch(channel).unwrap().is_none());
    }
    for channel in &mut channels {
        channel.close();
    }
}

#[test]
fn headers_round_trip_with_variant_types() {
    common::init_storage_root();
    let mut channel = Channel::new("t5.headers").unwrap();
    channel.open().unwrap();

    let mut headers = Headers::new();
    headers.insert("p".into(), HeaderValue::from("high"));
    headers.insert("n".into(), HeaderValue::from(7i64));
    headers.insert("r".into(), HeaderValue::from(0.5));
    headers.insert("ok".into(), HeaderValue::from(true));
    headers.insert("none".into(), HeaderValue::Null);

    publish("t5.headers", &b"payload"[..], Some(headers.clone())).unwrap();
    let message = fetch(&mut channel).unwrap().unwrap();
    assert_eq!(message.headers, headers);
    channel.close();
}

#[test]
fn publish_rejects_invalid_topics_without_side_effects() {
    common::init_storage_root();
    let mut channel = Channel::new("t6.guard").unwrap();
    channel.open().unwrap();

    let err = publish("a.=.b", &b"x"[..], None).unwrap_err();
    assert!(matches!(err, FifomqError::InvalidTopic(_)));

    // Nothing reached the open channel.
    assert!(fetch(&mut channel).unwrap().is_none());
    channel.close();
}

#[test]
fn empty_content_is_delivered_intact() {
    common::init_storage_root();
    let mut channel = Channel::new("t7.empty").unwrap();
    channel.open().unwrap();

    assert_eq!(publish("t7.empty", Bytes::new(), None).unwrap(), 1);
    let message = fetch(&mut channel).unwrap().unwrap();
    assert!(message.content.is_empty());
    channel.close();
}

#[test]
fn large_content_is_delivered_intact() {
    common::init_storage_root();
    let mut channel = Channel::new("t8.large").unwrap();
    channel.open().unwrap();

    let body = vec![0x5Au8; 1024 * 1024];
    assert_eq!(publish("t8.large", body.clone(), None).unwrap(), 1);
    let message = fetch(&mut channel).unwrap().unwrap();
    assert_eq!(message.content, Bytes::from(body));
    channel.close();
}

#[test]
fn messages_arrive_in_publish_order() {
    common::init_storage_root();
    let mut channel = Channel::new("t9.order").unwrap();
    channel.open().unwrap();

    for i in 0..50u32 {
        publish("t9.order", format!("msg-{i}"), None).unwrap();
    }
    for i in 0..50u32 {
        let message = fetch(&mut channel).unwrap().expect("in-order message");
        assert_eq!(message.content, Bytes::from(format!("msg-{i}")));
    }
    assert!(fetch(&mut channel).unwrap().is_none());
    channel.close();
}

#[test]
fn identical_patterns_receive_independent_copies() {
    common::init_storage_root();
    let mut a = Channel::new("t10.iso.=").unwrap();
    let mut b = Channel::new("t10.iso.=").unwrap();
    a.open().unwrap();
    b.open().unwrap();

    assert_eq!(publish("t10.iso.one", &b"copy"[..], None).unwrap(), 2);

    let from_a = fetch(&mut a).unwrap().unwrap();
    let from_b = fetch(&mut b).unwrap().unwrap();
    assert_eq!(from_a, from_b);
    assert!(fetch(&mut a).unwrap().is_none());
    assert!(fetch(&mut b).unwrap().is_none());
    a.close();
    b.close();
}

#[test]
fn round_trip_preserves_identity_fields() {
    common::init_storage_root();
    let mut channel = Channel::new("t11.identity").unwrap();
    channel.open().unwrap();

    publish("t11.identity", &b"fingerprint"[..], None).unwrap();
    let message = fetch(&mut channel).unwrap().unwrap();
    assert_eq!(message.topic, "t11.identity");
    assert_eq!(message.content, Bytes::from_static(b"fingerprint"));
    assert!(message.id >> 20 > 0);
    channel.close();
}

#[test]
fn full_queue_drops_overflow_deliveries_without_error() {
    common::init_storage_root();
    let mut channel = Channel::new("t12.flood").unwrap();
    channel.open().unwrap();

    // A FIFO holds 64 KiB by default, i.e. space for a few thousand 17-byte
    // tokens. Publish until the queue rejects one; that publish must report
    // zero deliveries instead of failing.
    let mut accepted = 0usize;
    let mut saw_overflow = false;
    for _ in 0..6000 {
        match publish("t12.flood", &b"burst"[..], None).unwrap() {
            1 => accepted += 1,
            0 => {
                saw_overflow = true;
                break;
            }
            n => panic!("unexpected delivery count {n}"),
        }
    }
    assert!(saw_overflow, "queue never filled up");
    assert!(accepted > 100);

    // Every accepted message is still fetchable, in order; the overflow one
    // left no payload behind.
    for _ in 0..accepted {
        assert!(fetch(&mut channel).unwrap().is_some());
    }
    assert!(fetch(&mut channel).unwrap().is_none());
    let leftovers = std::fs::read_dir(channel.directory())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            name != "queue" && name != "pattern"
        })
        .count();
    assert_eq!(leftovers, 0);
    channel.close();
}
