mod common;

use std::thread;
use std::time::Duration;

use aio_core::{Event, Port};
use common::{channel, ChannelSink, SinkEvent};

/// `event.signal()` from N threads yields exactly N `event` callbacks.
#[test]
fn signal_from_many_threads_yields_matching_callbacks() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();

    let event = Event::init(&port, ChannelSink::new(1, tx));
    let event = std::sync::Arc::new(event);

    const THREADS: usize = 16;
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let event = event.clone();
            thread::spawn(move || event.signal())
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for _ in 0..THREADS {
        let (id, ev) = rx.recv_timeout(Duration::from_secs(5)).expect("missing event callback");
        assert_eq!(id, 1);
        assert_eq!(ev, SinkEvent::Event);
    }

    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err(), "extra event callback delivered");

    port.term();
}
