mod common;

use aio_core::Port;
use common::{channel, expect, loopback_pair, SinkEvent};

const CLIENT_ID: u32 = 101;
const SERVER_ID: u32 = 102;

/// Bytes sent on one side of a pair arrive byte-for-byte identical on the
/// other.
#[test]
fn small_message_round_trips() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();
    let (client, server) = loopback_pair(&port, &tx, &rx);

    let payload = b"hello from the worker thread".to_vec();
    client.send(vec![payload.clone()]);
    expect(&rx, CLIENT_ID, SinkEvent::Sent);

    server.recv(vec![0u8; payload.len()]);
    expect(&rx, SERVER_ID, SinkEvent::Received);
    assert_eq!(server.take_received().unwrap(), payload);

    port.term();
}

/// A 1 MiB send arrives as 256 exactly-4096-byte `received` callbacks
/// through the batch buffer.
#[test]
fn one_mib_arrives_as_4096_byte_chunks() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();
    let (client, server) = loopback_pair(&port, &tx, &rx);

    let payload: Vec<u8> = (0..1_048_576usize).map(|i| (i % 251) as u8).collect();
    client.send(vec![payload.clone()]);

    let mut received = Vec::with_capacity(payload.len());
    let mut chunks = 0u32;

    while received.len() < payload.len() {
        server.recv(vec![0u8; 4096]);
        expect(&rx, SERVER_ID, SinkEvent::Received);
        let chunk = server.take_received().expect("completed recv leaves a buffer");
        assert_eq!(chunk.len(), 4096);
        received.extend_from_slice(&chunk);
        chunks += 1;
    }

    expect(&rx, CLIENT_ID, SinkEvent::Sent);

    assert_eq!(chunks, 256);
    assert_eq!(received, payload);

    port.term();
}

/// A zero-length iov completes immediately with no bytes transferred, and
/// a zero-length `recv` completes immediately too.
#[test]
fn zero_length_send_and_recv_complete_immediately() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();
    let (client, server) = loopback_pair(&port, &tx, &rx);

    client.send(vec![Vec::new(), Vec::new()]);
    expect(&rx, CLIENT_ID, SinkEvent::Sent);

    server.recv(Vec::new());
    expect(&rx, SERVER_ID, SinkEvent::Received);
    assert_eq!(server.take_received().unwrap(), Vec::<u8>::new());

    port.term();
}
