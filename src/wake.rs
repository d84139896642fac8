use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::sys::eventfd::EventFd;

/// The single cross-thread wake channel.
///
/// Every producer that needs to pull the worker thread out of
/// [`Epoll::wait`](crate::sys::epoll::Epoll::wait) — pushing an operation,
/// pushing an event, or arming/disarming a timer from outside the worker —
/// shares one `WakeChannel` rather than owning a private eventfd. Repeated
/// `signal()` calls before the worker drains the channel coalesce into a
/// single wakeup, which is the point of using an eventfd counter instead of
/// a pipe.
#[derive(Debug, Clone)]
pub struct WakeChannel {
    inner: Arc<EventFd>,
}

impl WakeChannel {
    pub fn new() -> io::Result<WakeChannel> {
        Ok(WakeChannel {
            inner: Arc::new(EventFd::new()?),
        })
    }

    /// Pulse the channel. Safe to call from any thread; a write while the
    /// worker hasn't yet drained a prior pulse just bumps the counter.
    pub fn signal(&self) -> io::Result<()> {
        match self.inner.write(1) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drain the counter once the worker has woken up and is about to
    /// service whatever queues/timers prompted the pulse.
    pub fn drain(&self) -> io::Result<()> {
        match self.inner.read() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for WakeChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}
