use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::op::{EnqueueGuard, OpRequest, OP_TIMER_START, OP_TIMER_STOP};
use crate::port::{Port, PortInner};
use crate::sink::Sink;
use crate::token::Token;

/// Thin front-end to the timer set, bound to a sink.
pub struct Timer(Arc<TimerInner>);

pub(crate) struct TimerInner {
    pub(crate) token: Token,
    pub(crate) port: Arc<PortInner>,
    pub(crate) sink: Mutex<Arc<dyn Sink>>,
    active: AtomicBool,
    /// Milliseconds requested by the most recent `start` call. The worker
    /// reads this at drain time rather than trusting a duration carried in
    /// the enqueued request, since a second `start` before the first is
    /// drained coalesces into the same `TimerStart` request (via `guard`)
    /// and must not lose the newer duration.
    requested_ms: AtomicU64,
    guard: EnqueueGuard,
}

impl Timer {
    pub fn init(port: &Port, sink: Arc<dyn Sink>) -> Timer {
        let inner = Arc::new(TimerInner {
            token: port.inner().next_handle_token(),
            port: port.inner().clone(),
            sink: Mutex::new(sink),
            active: AtomicBool::new(false),
            requested_ms: AtomicU64::new(0),
            guard: EnqueueGuard::new(),
        });

        Timer(inner)
    }

    pub fn set_sink(&self, sink: Arc<dyn Sink>) {
        *self.0.sink.lock().unwrap() = sink;
    }

    /// Start (or restart) the timer so it fires `ms` milliseconds from now.
    pub fn start(&self, ms: u64) {
        self.0.requested_ms.store(ms, Ordering::SeqCst);
        self.0.active.store(true, Ordering::SeqCst);

        if self.0.guard.try_mark(OP_TIMER_START) {
            self.0.port.enqueue_op(OpRequest::TimerStart(self.0.clone()));
        }
    }

    /// Cancel a scheduled timer; a no-op if inactive.
    pub fn stop(&self) {
        if !self.0.active.swap(false, Ordering::SeqCst) {
            return;
        }

        if self.0.guard.try_mark(OP_TIMER_STOP) {
            self.0.port.enqueue_op(OpRequest::TimerStop(self.0.clone()));
        }
    }

    /// Tear down the timer; equivalent to `stop` since a `Timer` holds no
    /// other worker-side resources to release.
    pub fn term(&self) {
        self.stop();
    }
}

impl TimerInner {
    pub(crate) fn requested(&self) -> Duration {
        Duration::from_millis(self.requested_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn clear_start(&self) {
        self.guard.clear(OP_TIMER_START);
    }

    pub(crate) fn clear_stop(&self) {
        self.guard.clear(OP_TIMER_STOP);
    }
}
