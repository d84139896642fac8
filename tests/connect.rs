mod common;

use aio_core::Port;
use common::{channel, loopback_pair};

/// Connect-success end to end: connecting a client to a listening server
/// yields a matched `connected`/`accepted` pair.
#[test]
fn connect_and_accept() {
    let _ = env_logger::try_init();
    let port = Port::init().unwrap();
    let (tx, rx) = channel();

    let (client, server) = loopback_pair(&port, &tx, &rx);

    drop(client);
    drop(server);
    port.term();
}
