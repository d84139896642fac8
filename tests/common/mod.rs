use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aio_core::{Port, Sink, Usock};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Connected,
    Accepted(RawFd),
    Sent,
    Received,
    Err(i32),
    Timeout,
    Event,
    Closed,
}

/// Forwards every completion to a channel tagged with `id`, so a test can
/// tell which handle a given callback belongs to.
pub struct ChannelSink {
    id: u32,
    tx: Mutex<Sender<(u32, SinkEvent)>>,
}

impl ChannelSink {
    pub fn new(id: u32, tx: Sender<(u32, SinkEvent)>) -> Arc<ChannelSink> {
        Arc::new(ChannelSink { id, tx: Mutex::new(tx) })
    }

    fn push(&self, event: SinkEvent) {
        let _ = self.tx.lock().unwrap().send((self.id, event));
    }
}

impl Sink for ChannelSink {
    fn connected(&self) {
        self.push(SinkEvent::Connected);
    }

    fn accepted(&self, fd: RawFd) {
        self.push(SinkEvent::Accepted(fd));
    }

    fn sent(&self) {
        self.push(SinkEvent::Sent);
    }

    fn received(&self) {
        self.push(SinkEvent::Received);
    }

    fn err(&self, code: i32) {
        self.push(SinkEvent::Err(code));
    }

    fn timeout(&self) {
        self.push(SinkEvent::Timeout);
    }

    fn event(&self) {
        self.push(SinkEvent::Event);
    }

    fn closed(&self) {
        self.push(SinkEvent::Closed);
    }
}

pub fn channel() -> (Sender<(u32, SinkEvent)>, Receiver<(u32, SinkEvent)>) {
    mpsc::channel()
}

/// Wait for `(id, event)` to arrive, tolerating unrelated events from other
/// tagged handles landing first (sink callbacks from independent usocks
/// interleave freely).
pub fn expect(rx: &Receiver<(u32, SinkEvent)>, id: u32, event: SinkEvent) {
    let deadline = std::time::Instant::now() + WAIT;

    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            panic!("timed out waiting for ({id}, {event:?})");
        }

        match rx.recv_timeout(remaining) {
            Ok(got) if got == (id, event.clone()) => return,
            Ok(_other) => continue,
            Err(e) => panic!("channel error waiting for ({id}, {event:?}): {e}"),
        }
    }
}

/// Bring up a connected loopback pair: `a` dials a listener wrapped in
/// `b_listener`, `b` is the socket `accepted` hands back as a child of
/// `b_listener`. Blocks until both `connected` and `accepted` land.
pub fn loopback_pair(
    port: &Port,
    tx: &Sender<(u32, SinkEvent)>,
    rx: &Receiver<(u32, SinkEvent)>,
) -> (Usock, Usock) {
    const LISTENER_ID: u32 = 100;
    const CLIENT_ID: u32 = 101;
    const SERVER_ID: u32 = 102;

    let listener = Usock::init(
        port,
        libc::AF_INET,
        libc::SOCK_STREAM,
        0,
        -1,
        -1,
        ChannelSink::new(LISTENER_ID, tx.clone()),
    )
    .expect("create listener");

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    listener.bind(addr).expect("bind");
    listener.listen(128).expect("listen");
    let bound = listener.local_addr().expect("local_addr");
    listener.accept();

    let client = Usock::init(
        port,
        libc::AF_INET,
        libc::SOCK_STREAM,
        0,
        -1,
        -1,
        ChannelSink::new(CLIENT_ID, tx.clone()),
    )
    .expect("create client");
    client.connect(bound);

    let mut client_fd = None;
    let mut accepted_fd = None;

    for _ in 0..2 {
        match rx.recv_timeout(WAIT).expect("timed out bringing up pair") {
            (CLIENT_ID, SinkEvent::Connected) => client_fd = Some(()),
            (LISTENER_ID, SinkEvent::Accepted(fd)) => accepted_fd = Some(fd),
            other => panic!("unexpected event while pairing: {other:?}"),
        }
    }

    client_fd.expect("client never connected");
    let fd = accepted_fd.expect("listener never accepted");

    let server = Usock::init_child(&listener, fd, ChannelSink::new(SERVER_ID, tx.clone()))
        .expect("wrap accepted child");

    (client, server)
}
