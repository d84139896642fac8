use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::timer::TimerInner;
use crate::usock::UsockInner;

/// A single completion to deliver through a usock's sink. Routed through
/// the operation queue when the initiating call is not on the worker
/// thread, since every sink callback must run on the worker while it
/// holds the port's `sync` guard — an external thread cannot fire one
/// inline even when its outcome (e.g. an immediate `connect`) is already
/// known.
pub enum Completion {
    Connected,
    Accepted(RawFd),
    Sent,
    Received,
    Err(i32),
}

pub const OP_ADD: u8 = 0b0001;
pub const OP_REMOVE: u8 = 0b0010;
pub const OP_SET_IN: u8 = 0b0100;
pub const OP_SET_OUT: u8 = 0b1000;

pub const OP_TIMER_START: u8 = 0b0001;
pub const OP_TIMER_STOP: u8 = 0b0010;

/// A request forwarded to the worker thread by a non-worker caller.
///
/// An `AtomicU8` opcode bitmask (see [`EnqueueGuard::try_mark`]) guards a
/// cheap `Arc`-clone push per usock/timer, coalescing repeated requests of
/// the same kind into a single queue slot rather than growing the queue
/// unbounded under a hot caller. `TimerStart` carries no payload — the
/// requested duration lives on `TimerInner` itself (see `Timer::start`),
/// so coalescing two `start` calls can never lose the second one's
/// duration. Timer start/stop share the same queue as usock operations
/// since timer-set mutation is, like poller mutation, worker-exclusive.
pub enum OpRequest {
    Add(Arc<UsockInner>),
    Remove(Arc<UsockInner>),
    SetIn(Arc<UsockInner>),
    SetOut(Arc<UsockInner>),
    TimerStart(Arc<TimerInner>),
    TimerStop(Arc<TimerInner>),
    Fire(Arc<UsockInner>, Completion),
}

/// Per-usock/timer double-enqueue guard.
#[derive(Debug, Default)]
pub struct EnqueueGuard(AtomicU8);

impl EnqueueGuard {
    pub const fn new() -> EnqueueGuard {
        EnqueueGuard(AtomicU8::new(0))
    }

    /// Attempt to mark `bit` as pending. Returns `true` if it was not
    /// already pending (the caller should push the request), `false` if a
    /// request for this opcode is already enqueued.
    pub fn try_mark(&self, bit: u8) -> bool {
        self.0.fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    /// Clear `bit` once the worker has drained and processed that opcode.
    pub fn clear(&self, bit: u8) {
        self.0.fetch_and(!bit, Ordering::AcqRel);
    }
}
