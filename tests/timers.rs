mod common;

use std::time::Duration;

use aio_core::{Port, Timer};
use common::{channel, ChannelSink, SinkEvent};

/// Timers started at 30/10/20 ms, in that order, fire in deadline order
/// (10, 20, 30).
#[test]
fn timers_fire_in_deadline_order() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();

    const T30: u32 = 1;
    const T10: u32 = 2;
    const T20: u32 = 3;

    let timer_30 = Timer::init(&port, ChannelSink::new(T30, tx.clone()));
    let timer_10 = Timer::init(&port, ChannelSink::new(T10, tx.clone()));
    let timer_20 = Timer::init(&port, ChannelSink::new(T20, tx.clone()));

    timer_30.start(30);
    timer_10.start(10);
    timer_20.start(20);

    let order: Vec<u32> = (0..3)
        .map(|_| {
            let (id, event) = rx.recv_timeout(Duration::from_secs(5)).expect("timer did not fire");
            assert_eq!(event, SinkEvent::Timeout);
            id
        })
        .collect();

    assert_eq!(order, vec![T10, T20, T30]);

    drop((timer_30, timer_10, timer_20));
    port.term();
}

/// A `stop` call before the deadline prevents the callback from firing.
#[test]
fn stopped_timer_never_fires() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();

    let timer = Timer::init(&port, ChannelSink::new(1, tx));
    timer.start(20);
    timer.stop();

    match rx.recv_timeout(Duration::from_millis(100)) {
        Err(_) => {}
        Ok(event) => panic!("stopped timer fired: {event:?}"),
    }

    drop(timer);
    port.term();
}
