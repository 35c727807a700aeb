//! Protocol-level tests against a scripted transport.
//!
//! The mock records every frame the engine sends and plays back a scripted
//! sequence of replies and timeouts, so every byte on the wire can be
//! asserted without a server.

#![allow(clippy::unwrap_used)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::io::SeekFrom;
use std::rc::Rc;
use std::time::Duration;

use tnfs_client::{
    Client, Config, DirOptions, Error, OpenFlags, Recv, SortOptions, Status, Transport,
};

#[derive(Clone, Default)]
struct MockTransport {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    sent: Vec<Vec<u8>>,
    script: VecDeque<Step>,
    timeout: Option<Duration>,
}

enum Step {
    Reply(Vec<u8>),
    Timeout,
}

impl MockTransport {
    fn expect_reply(&self, bytes: impl Into<Vec<u8>>) {
        self.inner
            .borrow_mut()
            .script
            .push_back(Step::Reply(bytes.into()));
    }

    fn expect_timeout(&self) {
        self.inner.borrow_mut().script.push_back(Step::Timeout);
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().sent.clone()
    }

    fn sent_count(&self) -> usize {
        self.inner.borrow().sent.len()
    }

    fn timeout(&self) -> Option<Duration> {
        self.inner.borrow().timeout
    }
}

impl Transport for MockTransport {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.inner.borrow_mut().sent.push(frame.to_vec());

        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Recv> {
        // An empty script behaves like a silent server.
        match self.inner.borrow_mut().script.pop_front() {
            Some(Step::Reply(bytes)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);

                Ok(Recv::Data(bytes.len()))
            }
            Some(Step::Timeout) | None => Ok(Recv::Timeout),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.inner.borrow_mut().timeout = Some(timeout);

        Ok(())
    }
}

fn reply(session_id: u16, request_id: u8, opcode: u8, tail: &[u8]) -> Vec<u8> {
    let [s0, s1] = session_id.to_le_bytes();

    let mut frame = vec![s0, s1, request_id, opcode];
    frame.extend_from_slice(tail);

    frame
}

fn connected() -> (MockTransport, Client<MockTransport>) {
    let mock = MockTransport::default();
    let client = Client::with_transport(mock.clone(), Config::default()).unwrap();

    (mock, client)
}

/// Mounts "/" with a reply assigning session id 0x1234 and a 1000 ms retry
/// time, so subsequent frames carry the session id of the worked examples.
fn mounted() -> (MockTransport, Client<MockTransport>) {
    let (mock, mut client) = connected();

    mock.expect_reply([0x34, 0x12, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE8, 0x03]);
    client.mount("/", "", "").unwrap();

    (mock, client)
}

#[test]
fn request_id_increments_between_frames() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x13, &[0x00]));
    mock.expect_reply(reply(0, 1, 0x13, &[0x00]));

    client.mkdir("/a").unwrap();
    client.mkdir("/b").unwrap();

    let sent = mock.sent();
    assert_eq!(&sent[0][..4], &[0x00, 0x00, 0x00, 0x13]);
    assert_eq!(&sent[1][..4], &[0x00, 0x00, 0x01, 0x13]);
}

#[test]
fn mount_composes_the_documented_frame() {
    let (mock, mut client) = connected();

    mock.expect_reply([0x34, 0x12, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE8, 0x03]);
    client.mount("/", "", "").unwrap();

    // Protocol version 1.2 (minor first), then dir, user and password.
    assert_eq!(
        mock.sent()[0],
        vec![0x00, 0x00, 0x00, 0x00, 0x02, 0x01, 0x2F, 0x00, 0x00, 0x00]
    );
    assert_eq!(client.session_id(), 0x1234);
    assert!(client.is_mounted());

    // The server's 0x03E8 minimum retry time becomes the receive deadline.
    assert_eq!(mock.timeout(), Some(Duration::from_millis(1000)));
}

#[test]
fn mount_adopts_the_assigned_session_id() {
    let (mock, mut client) = connected();

    mock.expect_reply([0xAB, 0xCD, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    client.mount("/", "", "").unwrap();

    assert_eq!(client.session_id(), 0xCDAB);

    // A zero retry time is clamped to the 100 ms floor.
    assert_eq!(mock.timeout(), Some(Duration::from_millis(100)));

    mock.expect_reply(reply(0xCDAB, 1, 0x01, &[0x00]));
    client.umount().unwrap();

    assert_eq!(&mock.sent()[1][..4], &[0xAB, 0xCD, 0x01, 0x01]);
    assert!(!client.is_mounted());
}

#[test]
fn fifth_attempt_can_still_succeed() {
    let (mock, mut client) = connected();

    for _ in 0..4 {
        mock.expect_timeout();
    }
    mock.expect_reply(reply(0, 0, 0x14, &[0x00]));

    client.rmdir("/x").unwrap();

    assert_eq!(mock.sent_count(), 5);
}

#[test]
fn exhausted_retries_poison_the_session() {
    let (mock, mut client) = connected();

    for _ in 0..5 {
        mock.expect_timeout();
    }

    let err = client.rmdir("/x").unwrap_err();

    assert!(matches!(err, Error::Exhausted { attempts: 5 }));
    assert_eq!(err.status(), Some(Status::Eproto));
    assert_eq!(Status::Eproto.as_byte(), 0x1B);
    assert_eq!(mock.sent_count(), 5);

    // Every retransmission is byte-identical, request id included.
    let sent = mock.sent();
    assert!(sent.iter().all(|frame| *frame == sent[0]));

    // The session accepts nothing further.
    assert!(matches!(client.mkdir("/y"), Err(Error::SessionDead)));
    assert_eq!(mock.sent_count(), 5);
}

#[test]
fn mismatched_reply_counts_as_a_timeout() {
    let (mock, mut client) = connected();

    // Wrong request id first, then the real answer.
    mock.expect_reply(reply(0, 7, 0x13, &[0x00]));
    mock.expect_reply(reply(0, 0, 0x13, &[0x00]));

    client.mkdir("/a").unwrap();

    assert_eq!(mock.sent_count(), 2);
}

#[test]
fn truncated_reply_counts_as_a_timeout() {
    let (mock, mut client) = connected();

    // A bare header without a status byte carries no usable answer.
    mock.expect_reply([0x00, 0x00, 0x00, 0x13]);
    mock.expect_reply(reply(0, 0, 0x13, &[0x00]));

    client.mkdir("/a").unwrap();

    assert_eq!(mock.sent_count(), 2);
}

#[test]
fn open_and_read_match_the_documented_frames() {
    let (mock, mut client) = mounted();

    mock.expect_reply(reply(0x1234, 1, 0x29, &[0x00, 0x07]));

    let handle = client.open("a.txt", OpenFlags::RDONLY, 0).unwrap();

    assert_eq!(handle.raw(), 7);
    assert_eq!(
        mock.sent()[1],
        vec![0x34, 0x12, 0x01, 0x29, 0x01, 0x00, 0x00, 0x00, 0x61, 0x2E, 0x74, 0x78, 0x74, 0x00]
    );

    mock.expect_reply(reply(0x1234, 2, 0x21, &[0x00, 0x04, 0x00, 0x41, 0x42, 0x43, 0x44]));

    let mut buf = [0u8; 4];
    let read = client.read(handle, &mut buf).unwrap();

    assert_eq!(read, 4);
    assert_eq!(&buf, b"ABCD");
    assert_eq!(
        mock.sent()[2],
        vec![0x34, 0x12, 0x02, 0x21, 0x07, 0x04, 0x00]
    );
}

#[test]
fn read_at_end_of_file_returns_zero() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x29, &[0x00, 0x02]));
    mock.expect_reply(reply(0, 1, 0x21, &[0x21]));

    let handle = client.open("f", OpenFlags::RDONLY, 0).unwrap();
    let mut buf = [0u8; 16];

    assert_eq!(client.read(handle, &mut buf).unwrap(), 0);
}

#[test]
fn write_reports_the_accepted_count() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x29, &[0x00, 0x02]));
    mock.expect_reply(reply(0, 1, 0x22, &[0x00, 0x03, 0x00]));

    let handle = client
        .open("f", OpenFlags::WRONLY | OpenFlags::CREATE, 0o644)
        .unwrap();

    assert_eq!(client.write(handle, b"abc").unwrap(), 3);
    assert_eq!(
        mock.sent()[1],
        vec![0x00, 0x00, 0x01, 0x22, 0x02, 0x03, 0x00, b'a', b'b', b'c']
    );
}

#[test]
fn seek_encodes_handle_whence_and_offset_little_endian() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x29, &[0x00, 0x03]));
    mock.expect_reply(reply(0, 1, 0x25, &[0x00]));

    let handle = client.open("a.bin", OpenFlags::RDWR, 0).unwrap();
    client.seek(handle, SeekFrom::Start(0x1122_3344)).unwrap();

    let frame = &mock.sent()[1];

    assert_eq!(frame.len(), 10);
    assert_eq!(&frame[4..10], &[0x03, 0x00, 0x44, 0x33, 0x22, 0x11]);
}

#[test]
fn unlink_on_a_missing_file_reports_enoent() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x26, &[0x02]));

    let err = client.unlink("/nope").unwrap_err();

    assert!(matches!(err, Error::Server(Status::Enoent)));
    assert_eq!(err.status().unwrap().as_byte(), 0x02);
    assert_eq!(err.to_string(), "No such file or directory");
}

#[test]
fn eof_outside_directory_and_file_reads_is_a_violation() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x13, &[0x21]));

    let err = client.mkdir("/a").unwrap_err();

    assert!(matches!(err, Error::UnexpectedEof { opcode: 0x13 }));
}

#[test]
fn opendirx_composes_the_documented_frame() {
    let (mock, mut client) = mounted();

    mock.expect_reply(reply(0x1234, 1, 0x17, &[0x00, 0x05, 0x03, 0x00]));

    let dir = client
        .opendirx("/", "", DirOptions::default(), SortOptions::default())
        .unwrap();

    assert_eq!(dir.handle().raw(), 5);
    assert_eq!(dir.total_entries(), 3);
    assert_eq!(
        mock.sent()[1],
        vec![0x34, 0x12, 0x01, 0x17, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2F, 0x00]
    );

    mock.expect_reply(reply(0x1234, 2, 0x12, &[0x00]));
    dir.close().unwrap();
}

fn entry_record(flags: u8, size: u32, mtime: u32, ctime: u32, name: &str) -> Vec<u8> {
    let mut record = vec![flags];
    record.extend_from_slice(&size.to_le_bytes());
    record.extend_from_slice(&mtime.to_le_bytes());
    record.extend_from_slice(&ctime.to_le_bytes());
    record.extend_from_slice(name.as_bytes());
    record.push(0);

    record
}

fn readdirx_reply(request_id: u8, dirstatus: u8, dirpos: u16, entries: &[Vec<u8>]) -> Vec<u8> {
    let mut frame = reply(0, request_id, 0x18, &[0x00, entries.len() as u8, dirstatus]);
    frame.extend_from_slice(&dirpos.to_le_bytes());

    for entry in entries {
        frame.extend_from_slice(entry);
    }

    frame
}

#[test]
fn pagination_streams_two_batches_in_two_round_trips() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x17, &[0x00, 0x05, 100, 0x00]));

    let first: Vec<_> = (0..58)
        .map(|i| entry_record(0, i, 1000 + i, 2000 + i, &format!("entry{i:03}")))
        .collect();
    let second: Vec<_> = (58..100)
        .map(|i| entry_record(0, i, 1000 + i, 2000 + i, &format!("entry{i:03}")))
        .collect();

    mock.expect_reply(readdirx_reply(1, 0x00, 0, &first));
    mock.expect_reply(readdirx_reply(2, 0x01, 58, &second));

    let mut dir = client
        .opendirx("/", "", DirOptions::default(), SortOptions::default())
        .unwrap();

    assert_eq!(dir.total_entries(), 100);

    let mut names = Vec::new();
    while let Some(entry) = dir.next().unwrap() {
        assert_eq!(entry.size(), names.len() as u32);
        names.push(entry.name().into_owned());
    }

    assert_eq!(names.len(), 100);
    assert_eq!(names[0], "entry000");
    assert_eq!(names[57], "entry057");
    assert_eq!(names[58], "entry058");
    assert_eq!(names[99], "entry099");

    // The end was reached with exactly two READDIRX exchanges, and the
    // engine asked for the configured batch size each time.
    let readdirx_frames: Vec<_> = mock.sent().into_iter().filter(|f| f[3] == 0x18).collect();
    assert_eq!(readdirx_frames.len(), 2);
    assert!(readdirx_frames.iter().all(|f| f[5] == 58));

    // Draining past the end stays at the end without extra traffic.
    let before = mock.sent_count();
    assert!(dir.next().unwrap().is_none());
    assert_eq!(mock.sent_count(), before);

    mock.expect_reply(reply(0, 3, 0x12, &[0x00]));
    dir.close().unwrap();
}

#[test]
fn readdirx_answered_with_eof_ends_the_stream() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x17, &[0x00, 0x05, 0x00, 0x00]));
    mock.expect_reply(reply(0, 1, 0x18, &[0x21]));

    let mut dir = client
        .opendirx("/empty", "", DirOptions::default(), SortOptions::default())
        .unwrap();

    assert!(dir.next().unwrap().is_none());

    mock.expect_reply(reply(0, 2, 0x12, &[0x00]));
    dir.close().unwrap();
}

#[test]
fn classic_readdir_yields_names_then_none() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x10, &[0x00, 0x04]));
    mock.expect_reply(reply(0, 1, 0x11, &[0x00, b'f', b'o', b'o', 0x00]));
    mock.expect_reply(reply(0, 2, 0x11, &[0x21]));
    mock.expect_reply(reply(0, 3, 0x12, &[0x00]));

    let handle = client.opendir("/").unwrap();

    assert_eq!(handle.raw(), 4);
    assert_eq!(client.readdir(handle).unwrap().as_deref(), Some("foo"));
    assert_eq!(client.readdir(handle).unwrap(), None);

    client.closedir(handle).unwrap();
}

#[test]
fn telldir_and_seekdir_round_the_position_through_the_wire() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x10, &[0x00, 0x04]));
    mock.expect_reply(reply(0, 1, 0x15, &[0x00, 0x2A, 0x00, 0x00, 0x00]));
    mock.expect_reply(reply(0, 2, 0x16, &[0x00]));

    let handle = client.opendir("/").unwrap();

    assert_eq!(client.telldir(handle).unwrap(), 42);

    client.seekdir(handle, 2).unwrap();

    let frame = &mock.sent()[2];
    assert_eq!(&frame[4..9], &[0x04, 0x02, 0x00, 0x00, 0x00]);
}

#[test]
fn stat_parses_the_fixed_fields_and_owner_strings() {
    let (mock, mut client) = connected();

    let mut tail = vec![0x00];
    tail.extend_from_slice(&0o644u16.to_le_bytes());
    tail.extend_from_slice(&1000u16.to_le_bytes());
    tail.extend_from_slice(&100u16.to_le_bytes());
    tail.extend_from_slice(&74u32.to_le_bytes());
    tail.extend_from_slice(&1_600_000_000u32.to_le_bytes());
    tail.extend_from_slice(&1_600_000_001u32.to_le_bytes());
    tail.extend_from_slice(&1_600_000_002u32.to_le_bytes());
    tail.extend_from_slice(b"user\0group\0");

    mock.expect_reply(reply(0, 0, 0x24, &tail));

    let stat = client.stat("Message.txt").unwrap();

    assert_eq!(stat.mode, 0o644);
    assert_eq!(stat.uid, 1000);
    assert_eq!(stat.gid, 100);
    assert_eq!(stat.size, 74);
    assert_eq!(stat.atime, 1_600_000_000);
    assert_eq!(stat.mtime, 1_600_000_001);
    assert_eq!(stat.ctime, 1_600_000_002);
    assert_eq!(stat.uid_name, "user");
    assert_eq!(stat.gid_name, "group");
}

#[test]
fn volume_stats_decode_kilobyte_counts() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x30, &[0x00, 0x00, 0x04, 0x00, 0x00]));
    mock.expect_reply(reply(0, 1, 0x31, &[0x00, 0x00, 0x02, 0x00, 0x00]));

    assert_eq!(client.size_kb().unwrap(), 1024);
    assert_eq!(client.free_kb().unwrap(), 512);
}

#[test]
fn dropping_a_remote_file_sends_close() {
    let (mock, mut client) = connected();

    mock.expect_reply(reply(0, 0, 0x29, &[0x00, 0x09]));
    mock.expect_reply(reply(0, 1, 0x23, &[0x00]));

    {
        let _file = client.open_file("f", OpenFlags::RDONLY, 0).unwrap();
    }

    let sent = mock.sent();
    assert_eq!(sent[1][3], 0x23);
    assert_eq!(sent[1][4], 0x09);
}

#[test]
fn over_long_paths_never_reach_the_wire() {
    let (mock, mut client) = connected();

    let long = "a".repeat(256);
    let result = client.mkdir(&long);

    assert!(matches!(result, Err(Error::PathTooLong { max: 256 })));
    assert_eq!(mock.sent_count(), 0);
}

#[test]
fn batch_and_buffer_sizes_are_validated_together() {
    let config = Config {
        buffer_size: 8192,
        ..Default::default()
    };

    let result = Client::with_transport(MockTransport::default(), config);

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
