mod common;

use std::fs;
use std::os::unix::fs::FileTypeExt;

use fifomq::{fetch, publish, Channel, ChannelState, FifomqError};

#[test]
fn lifecycle_creates_and_removes_the_directory() {
    common::init_storage_root();
    let mut channel = Channel::new("ch1.lifecycle.=").unwrap();
    assert_eq!(channel.state(), ChannelState::Constructed);
    assert!(!channel.directory().exists());

    channel.open().unwrap();
    assert_eq!(channel.state(), ChannelState::Open);
    let dir = channel.directory().to_path_buf();
    assert!(dir.is_dir());
    assert!(fs::metadata(dir.join("queue")).unwrap().file_type().is_fifo());
    assert_eq!(fs::read_to_string(dir.join("pattern")).unwrap(), "ch1.lifecycle.=");

    channel.close();
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(!dir.exists());
}

#[test]
fn close_purges_pending_payloads() {
    common::init_storage_root();
    let mut channel = Channel::new("ch2.pending").unwrap();
    channel.open().unwrap();
    let dir = channel.directory().to_path_buf();

    publish("ch2.pending", &b"never fetched"[..], None).unwrap();
    publish("ch2.pending", &b"also never"[..], None).unwrap();
    let payloads = fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != "queue" && e.file_name() != "pattern")
        .count();
    assert_eq!(payloads, 2);

    channel.close();
    assert!(!dir.exists());
}

#[test]
fn dropping_an_open_channel_cleans_up() {
    common::init_storage_root();
    let dir = {
        let mut channel = Channel::new("ch3.dropped").unwrap();
        channel.open().unwrap();
        channel.directory().to_path_buf()
    };
    assert!(!dir.exists());
}

#[test]
fn dropping_a_constructed_channel_leaves_nothing() {
    common::init_storage_root();
    let dir = {
        let channel = Channel::new("ch4.unopened").unwrap();
        channel.directory().to_path_buf()
    };
    assert!(!dir.exists());
}

#[test]
fn channels_with_the_same_pattern_are_independent() {
    common::init_storage_root();
    let mut a = Channel::new("ch5.same").unwrap();
    let mut b = Channel::new("ch5.same").unwrap();
    a.open().unwrap();
    b.open().unwrap();
    assert_ne!(a.directory(), b.directory());

    publish("ch5.same", &b"both"[..], None).unwrap();
    // Closing one channel must not disturb the other's pending delivery.
    a.close();
    let message = fetch(&mut b).unwrap().expect("b still has its copy");
    assert_eq!(&message.content[..], b"both");
    b.close();
}

#[test]
fn operations_on_a_closed_channel_fail_with_channel_not_open() {
    common::init_storage_root();
    let mut channel = Channel::new("ch6.terminal").unwrap();
    channel.open().unwrap();
    channel.close();
    channel.close(); // double close is a no-op

    let err = fetch(&mut channel).unwrap_err();
    assert!(matches!(err, FifomqError::ChannelNotOpen));
}
