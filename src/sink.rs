use std::os::unix::io::RawFd;

/// Polymorphic completion callback set.
///
/// A handle's owner implements only the completions it cares about; every
/// method has a no-op default, since any one of them may never be reached
/// by a given handle. The core holds a handle's sink as a single
/// `Mutex<Arc<dyn Sink>>`, so an owner may rebind it atomically during a
/// protocol state transition.
///
/// All methods run on the worker thread while it holds the port's `sync`
/// guard; a sink must not block or re-enter the port that is calling it.
pub trait Sink: Send + Sync {
    /// A `connect` succeeded (immediately or after OUT-readiness resolved).
    fn connected(&self) {}

    /// `accept` produced a new connection; `newfd` is the raw accepted
    /// descriptor, to be wrapped via `Usock::init_child`.
    fn accepted(&self, newfd: RawFd) {
        let _ = newfd;
    }

    /// A `send` fully drained its iov.
    fn sent(&self) {}

    /// A `recv` fully satisfied its requested length.
    fn received(&self) {}

    /// A synchronous or worker-discovered error, normalized to a `libc`
    /// errno (`ECONNRESET` for the unified "connection reset" class).
    fn err(&self, code: i32) {
        let _ = code;
    }

    /// A scheduled `Timer` expired.
    fn timeout(&self) {}

    /// An `Event` was signaled.
    fn event(&self) {}

    /// Final teardown of a usock completed; no further sink calls follow.
    fn closed(&self) {}
}
