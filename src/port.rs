use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::config::EVENTS_CAPACITY;
use crate::event::EventInner;
use crate::op::OpRequest;
use crate::opqueue::OpQueue;
use crate::poller::Poller;
use crate::ready::Ready;
use crate::timer::TimerInner;
use crate::timer_set::TimerSet;
use crate::token::Token;
use crate::usock::UsockInner;
use crate::wake::WakeChannel;

/// The completion port: binds the poller, timer set, wake channel and the
/// two FIFO queues together, and owns the worker thread.
#[derive(Clone)]
pub struct Port(Arc<PortInner>);

pub(crate) struct PortInner {
    op_queue: OpQueue<OpRequest>,
    events_sync: Mutex<VecDeque<Arc<EventInner>>>,
    wake: WakeChannel,
    wake_token: Token,
    stop: AtomicBool,
    /// Pure synchronization handle: the worker holds this for the
    /// non-blocking portion of every loop iteration and releases it only
    /// while parked in `poller.wait`. The poller, timer set and usock
    /// registry themselves are *not* wrapped in this mutex — only the
    /// worker thread ever touches them, so they live as a plain local
    /// (`WorkerState`) inside the worker's own stack frame rather than
    /// behind a lock that thread would have to re-acquire reentrantly when
    /// a sink callback calls back into the core. See DESIGN.md for the
    /// full reasoning.
    sync: Mutex<()>,
    worker_thread_id: Mutex<Option<ThreadId>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_token: AtomicUsize,
}

/// RAII guard returned by [`Port::lock`]; dropping it unlocks.
pub struct PortLock<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

struct WorkerState {
    poller: Poller,
    timers: TimerSet,
    registry: HashMap<Token, Arc<UsockInner>>,
    timer_owners: HashMap<Token, Arc<TimerInner>>,
}

impl Port {
    /// Create the worker thread and its readiness poller, timer set and
    /// wake channel.
    pub fn init() -> io::Result<Port> {
        let wake = WakeChannel::new()?;

        let inner = Arc::new(PortInner {
            op_queue: OpQueue::unbounded(),
            events_sync: Mutex::new(VecDeque::new()),
            wake,
            wake_token: Token(usize::MAX),
            stop: AtomicBool::new(false),
            sync: Mutex::new(()),
            worker_thread_id: Mutex::new(None),
            worker: Mutex::new(None),
            next_token: AtomicUsize::new(0),
        });

        let spawned = inner.clone();
        let handle = thread::Builder::new()
            .name("aio-core-worker".to_owned())
            .spawn(move || worker_loop(spawned))?;

        *inner.worker.lock().unwrap() = Some(handle);

        Ok(Port(inner))
    }

    /// Sets the stop flag, pulses wake, then joins the worker thread.
    pub fn term(&self) {
        self.0.stop.store(true, Ordering::SeqCst);
        let _ = self.0.wake.signal();

        if let Some(handle) = self.0.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Block the worker out of its next non-waiting phase, for higher-level
    /// FSMs that need to synchronize with it.
    pub fn lock(&self) -> PortLock<'_> {
        PortLock(self.0.sync.lock().unwrap())
    }

    pub(crate) fn inner(&self) -> &Arc<PortInner> {
        &self.0
    }

    pub(crate) fn push_event(&self, item: Arc<EventInner>) {
        self.0.push_event(item);
    }
}

impl PortInner {
    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker_thread_id
            .lock()
            .unwrap()
            .map_or(false, |id| id == thread::current().id())
    }

    /// Allocate a fresh `Token` for a usock registration or a timer
    /// handle. Usock tokens and timer tokens share one namespace but index
    /// distinct maps, so this is safe to share.
    pub(crate) fn next_handle_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Enqueue an operation request and pulse wake iff the caller is not
    /// the worker thread. A push made *by* the worker thread (reentrant,
    /// from inside a sink callback) is picked up by the trailing drain at
    /// the end of the current loop iteration instead.
    pub(crate) fn enqueue_op(&self, op: OpRequest) {
        if self.op_queue.push(op).is_ok() && !self.is_worker_thread() {
            let _ = self.wake.signal();
        }
    }

    pub(crate) fn push_event(&self, item: Arc<EventInner>) {
        self.events_sync.lock().unwrap().push_back(item);

        if !self.is_worker_thread() {
            let _ = self.wake.signal();
        }
    }
}

fn worker_loop(inner: Arc<PortInner>) {
    *inner.worker_thread_id.lock().unwrap() = Some(thread::current().id());

    let mut ws = WorkerState {
        poller: Poller::new(EVENTS_CAPACITY).expect("failed to create epoll instance"),
        timers: TimerSet::new(),
        registry: HashMap::new(),
        timer_owners: HashMap::new(),
    };

    ws.poller
        .add_with_interest(inner.wake.as_raw_fd(), inner.wake_token, Ready::readable())
        .expect("failed to register wake channel with poller");

    loop {
        let timeout_ms = ws.timers.timeout();
        let timeout = if timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        };

        trace!("worker parking in poller.wait(timeout={timeout_ms})");

        loop {
            match ws.poller.wait(timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("poller.wait failed: {e}");
                    break;
                }
            }
        }

        let _guard = inner.sync.lock().unwrap();

        if inner.stop.load(Ordering::SeqCst) {
            drop(_guard);
            teardown_all(&mut ws);
            break;
        }

        drain_ops(&inner, &mut ws);

        while let Some(token) = ws.timers.event() {
            if let Some(timer) = ws.timer_owners.remove(&token) {
                debug!("timer {token:?} fired");
                timer.sink.lock().unwrap().timeout();
            }
        }

        let ready: Vec<(Ready, Token)> = ws.poller.events().collect();
        for (_readiness, token) in ready {
            if token == inner.wake_token {
                let _ = inner.wake.drain();
                continue;
            }

            let Some(usock) = ws.registry.get(&token).cloned() else {
                continue;
            };

            usock.dispatch_ready(&mut ws.poller);
        }

        drain_events(&inner);

        // Reentrant pushes made by sink callbacks above (e.g. a `received`
        // handler calling `usock.send` on another usock) land in the same
        // op queue without a self-wake; flush them now so they don't wait
        // for the next wake-cycle.
        drain_ops(&inner, &mut ws);
    }
}

fn drain_ops(inner: &Arc<PortInner>, ws: &mut WorkerState) {
    while let Ok(op) = inner.op_queue.pop() {
        match op {
            OpRequest::Add(usock) => {
                let token = inner.next_handle_token();
                if let Err(e) = ws.poller.add(usock.raw_fd(), token) {
                    warn!("poller.add failed: {e}");
                    usock.clear_add();
                    continue;
                }
                usock.set_token(token);
                ws.registry.insert(token, usock.clone());
                usock.clear_add();
            }
            OpRequest::Remove(usock) => {
                if let Some(token) = usock.take_token() {
                    let _ = ws.poller.remove(token);
                    ws.registry.remove(&token);
                }
                usock.clear_remove();
                usock.teardown();
            }
            OpRequest::SetIn(usock) => {
                if let Some(token) = usock.token() {
                    let _ = ws.poller.set_in(token);
                }
                usock.clear_set_in();
            }
            OpRequest::SetOut(usock) => {
                if let Some(token) = usock.token() {
                    let _ = ws.poller.set_out(token);
                }
                usock.clear_set_out();
            }
            OpRequest::TimerStart(timer) => {
                let deadline = std::time::Instant::now() + timer.requested();
                let was_first = ws.timers.add(deadline, timer.token);
                ws.timer_owners.insert(timer.token, timer.clone());
                timer.clear_start();
                let _ = was_first;
            }
            OpRequest::TimerStop(timer) => {
                ws.timers.remove(timer.token);
                ws.timer_owners.remove(&timer.token);
                timer.clear_stop();
            }
            OpRequest::Fire(usock, completion) => {
                usock.fire(completion);
            }
        }
    }
}

fn drain_events(inner: &Arc<PortInner>) {
    let items: Vec<_> = {
        let mut q = inner.events_sync.lock().unwrap();
        q.drain(..).collect()
    };

    for item in items {
        item.sink.lock().unwrap().event();
    }
}

fn teardown_all(ws: &mut WorkerState) {
    for (_, usock) in ws.registry.drain() {
        usock.teardown();
    }
}
