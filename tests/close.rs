mod common;

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aio_core::{Port, Usock};
use common::{channel, expect, ChannelSink, SinkEvent};

/// A `close` from a thread other than the worker still fires `closed`
/// within one wake-cycle, and the descriptor is actually released
/// (verified by observing the kernel hand the same fd number back out to
/// the next socket created).
#[test]
fn cross_thread_close_releases_the_descriptor() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();

    let usock = Usock::init(
        &port,
        libc::AF_INET,
        libc::SOCK_STREAM,
        0,
        -1,
        -1,
        ChannelSink::new(1, tx.clone()),
    )
    .unwrap();

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    usock.bind(addr).unwrap();
    usock.listen(16).unwrap();

    let fd_before = usock.as_raw_fd();

    let usock = Arc::new(usock);
    let closer = {
        let usock = usock.clone();
        thread::spawn(move || usock.close())
    };
    closer.join().unwrap();

    expect(&rx, 1, SinkEvent::Closed);

    // `teardown` has already run by the time `closed` fires; the kernel
    // should be free to hand the same descriptor number back out.
    let reused = Usock::init(
        &port,
        libc::AF_INET,
        libc::SOCK_STREAM,
        0,
        -1,
        -1,
        ChannelSink::new(2, tx),
    )
    .unwrap();

    assert_eq!(reused.as_raw_fd(), fd_before);

    // No stray events should arrive for the closed handle once `closed`
    // has fired.
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    port.term();
}
