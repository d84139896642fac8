use std::collections::VecDeque;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::sync::{Arc, Mutex, Weak};

use libc::c_int;
use log::debug;

use crate::config::{DEFAULT_BATCH_SIZE, MAX_IOVCNT};
use crate::op::{Completion, OpRequest, OP_ADD, OP_REMOVE, OP_SET_IN, OP_SET_OUT};
use crate::op::EnqueueGuard;
use crate::poller::Poller;
use crate::port::{Port, PortInner};
use crate::sink::Sink;
use crate::sys::socket::{ConnectResult, IoResult, Socket};
use crate::token::Token;

/// Non-blocking stream socket with batch-buffered receive.
///
/// A cheap `Clone`-able handle over the shared [`UsockInner`]; the owner
/// may hold several of these (e.g. one per FSM state) without copying the
/// underlying descriptor or buffers.
#[derive(Clone)]
pub struct Usock(Arc<UsockInner>);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum InState {
    Idle,
    AcceptInProgress,
    ReceiveInProgress,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum OutState {
    Idle,
    ConnectInProgress,
    SendInProgress,
}

struct Inbound {
    state: InState,
    batch: Option<Vec<u8>>,
    batch_pos: usize,
    batch_len: usize,
    batch_size: usize,
    target: Vec<u8>,
    filled: usize,
    completed: Option<Vec<u8>>,
}

impl Inbound {
    fn new(batch_size: usize) -> Inbound {
        Inbound {
            state: InState::Idle,
            batch: None,
            batch_pos: 0,
            batch_len: 0,
            batch_size,
            target: Vec::new(),
            filled: 0,
            completed: None,
        }
    }
}

struct Outbound {
    state: OutState,
    iov: VecDeque<Vec<u8>>,
    front_offset: usize,
}

impl Outbound {
    fn new() -> Outbound {
        Outbound {
            state: OutState::Idle,
            iov: VecDeque::new(),
            front_offset: 0,
        }
    }
}

enum SendAttempt {
    Done,
    WouldBlock,
    Reset,
}

enum RecvAttempt {
    Done,
    Pending,
    Reset,
}

/// The shared usock state. Reachable from any thread (operations may be
/// invoked off the worker thread), but the descriptor and per-usock
/// sub-state are each behind their own small mutex rather than the port's
/// `sync` guard, since that guard is only needed for poller/timer
/// mutation, which a usock never performs directly (see `port.rs`).
pub(crate) struct UsockInner {
    fd: Mutex<Option<Socket>>,
    domain: c_int,
    ty: c_int,
    protocol: c_int,
    token: Mutex<Option<Token>>,
    guard: EnqueueGuard,
    sink: Mutex<Arc<dyn Sink>>,
    port: Arc<PortInner>,
    inbound: Mutex<Inbound>,
    outbound: Mutex<Outbound>,
    self_weak: Weak<UsockInner>,
}

impl Usock {
    /// Create the kernel descriptor with the usual kernel-facing options
    /// (close-on-exec, non-blocking, buffer sizes, Nagle/dual stack
    /// tuning), in the *unregistered* state.
    pub fn init(
        port: &Port,
        domain: i32,
        ty: i32,
        protocol: i32,
        sndbuf: i32,
        rcvbuf: i32,
        sink: Arc<dyn Sink>,
    ) -> io::Result<Usock> {
        let fd = Socket::new(domain, ty, protocol)?;

        if sndbuf >= 0 {
            fd.set_sndbuf(sndbuf)?;
        }
        if rcvbuf >= 0 {
            fd.set_rcvbuf(rcvbuf)?;
        }
        if ty == libc::SOCK_STREAM {
            let _ = fd.set_nodelay(true);
            let _ = fd.set_quickack(true);
        }
        if domain == libc::AF_INET6 {
            let _ = fd.set_v6only(false);
        }

        Ok(Usock::from_socket(port.inner().clone(), fd, domain, ty, protocol, sink))
    }

    /// Wrap a descriptor handed back by a parent usock's `accepted`
    /// completion, using the caller-supplied `protocol` for the child
    /// rather than silently resetting it to zero.
    pub fn init_child(parent: &Usock, accepted_fd: RawFd, sink: Arc<dyn Sink>) -> io::Result<Usock> {
        let fd = unsafe { Socket::from_raw_fd(accepted_fd) };

        if parent.0.ty == libc::SOCK_STREAM {
            let _ = fd.set_nodelay(true);
        }

        Ok(Usock::from_socket(
            parent.0.port.clone(),
            fd,
            parent.0.domain,
            parent.0.ty,
            parent.0.protocol,
            sink,
        ))
    }

    fn from_socket(
        port: Arc<PortInner>,
        fd: Socket,
        domain: c_int,
        ty: c_int,
        protocol: c_int,
        sink: Arc<dyn Sink>,
    ) -> Usock {
        let inner = Arc::new_cyclic(|weak| UsockInner {
            fd: Mutex::new(Some(fd)),
            domain,
            ty,
            protocol,
            token: Mutex::new(None),
            guard: EnqueueGuard::new(),
            sink: Mutex::new(sink),
            port,
            inbound: Mutex::new(Inbound::new(DEFAULT_BATCH_SIZE)),
            outbound: Mutex::new(Outbound::new()),
            self_weak: weak.clone(),
        });

        Usock(inner)
    }

    pub fn set_sink(&self, sink: Arc<dyn Sink>) {
        *self.0.sink.lock().unwrap() = sink;
    }

    /// Request a `REMOVE`, registered or not — `drain_ops` tears down
    /// unregistered usocks too (it just skips the poller deregistration),
    /// so `closed` always fires on the worker thread under the port's
    /// `sync` guard, never inline on whatever thread called `close`. The
    /// worker's trailing per-iteration drain (see `port.rs`) keeps a
    /// worker-thread-originated close effectively synchronous without this
    /// call re-entering a held lock.
    pub fn close(&self) {
        if self.0.guard.try_mark(OP_REMOVE) {
            self.0.port.enqueue_op(OpRequest::Remove(self.0.arc_self()));
        }
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<()> {
        self.0.with_fd(|fd| fd.bind(&addr))
    }

    /// The address the kernel bound this socket to; useful after binding
    /// to port 0 to discover the port the OS picked.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.with_fd(|fd| fd.local_addr())
    }

    /// Kernel `listen`, then register with the poller.
    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        self.0.with_fd(|fd| fd.listen(backlog))?;
        self.0.register();
        Ok(())
    }

    /// Non-blocking connect. Outcome (`connected`/`err`) or the pending
    /// transition to OUT-armed is always delivered through the sink, never
    /// as a return value.
    pub fn connect(&self, addr: SocketAddr) {
        {
            let out = self.0.outbound.lock().unwrap();
            assert_eq!(out.state, OutState::Idle, "connect: outbound operation already in progress");
        }

        match self.0.with_fd(|fd| fd.connect(&addr)) {
            Ok(ConnectResult::Connected) => {
                self.0.register();
                self.0.complete(Completion::Connected);
            }
            Ok(ConnectResult::InProgress) => {
                self.0.outbound.lock().unwrap().state = OutState::ConnectInProgress;
                self.0.register();
                self.0.arm_out();
            }
            Err(e) => {
                self.0.complete(Completion::Err(normalize_errno(&e)));
            }
        }
    }

    /// Require inbound idle, arm IN.
    pub fn accept(&self) {
        {
            let mut inb = self.0.inbound.lock().unwrap();
            assert_eq!(inb.state, InState::Idle, "accept: inbound operation already in progress");
            inb.state = InState::AcceptInProgress;
        }
        self.0.arm_in();
    }

    /// Copy `bufs` (non-empty entries only, capped at `MAX_IOVCNT`) into
    /// the usock's internal iov and attempt a send once.
    pub fn send(&self, bufs: Vec<Vec<u8>>) {
        assert!(bufs.len() <= MAX_IOVCNT, "send: iovcnt exceeds MAX_IOVCNT");

        {
            let mut out = self.0.outbound.lock().unwrap();
            assert_eq!(out.state, OutState::Idle, "send: outbound operation already in progress");
            out.iov = bufs.into_iter().filter(|b| !b.is_empty()).collect();
            out.front_offset = 0;
        }

        match self.0.attempt_send() {
            SendAttempt::Done => {
                self.0.outbound.lock().unwrap().state = OutState::Idle;
                self.0.complete(Completion::Sent);
            }
            SendAttempt::Reset => {
                let mut out = self.0.outbound.lock().unwrap();
                out.state = OutState::Idle;
                out.iov.clear();
                drop(out);
                self.0.complete(Completion::Err(libc::ECONNRESET));
            }
            SendAttempt::WouldBlock => {
                self.0.outbound.lock().unwrap().state = OutState::SendInProgress;
                self.0.arm_out();
            }
        }
    }

    /// `buf` is the caller's owned, exactly-sized receive buffer.
    /// Ownership transfers to the usock until the completion fires;
    /// retrieve the filled buffer with [`Usock::take_received`] from
    /// within the `received`/`err` sink callback.
    pub fn recv(&self, buf: Vec<u8>) {
        let want = buf.len();

        {
            let mut inb = self.0.inbound.lock().unwrap();
            assert_eq!(inb.state, InState::Idle, "recv: inbound operation already in progress");
            inb.target = buf;
            inb.filled = 0;
        }

        if want == 0 {
            self.0.inbound.lock().unwrap().completed = Some(Vec::new());
            self.0.complete(Completion::Received);
            return;
        }

        match self.0.attempt_recv() {
            RecvAttempt::Done => {
                let buf = {
                    let mut inb = self.0.inbound.lock().unwrap();
                    inb.state = InState::Idle;
                    std::mem::take(&mut inb.target)
                };
                self.0.inbound.lock().unwrap().completed = Some(buf);
                self.0.complete(Completion::Received);
            }
            RecvAttempt::Reset => {
                let mut inb = self.0.inbound.lock().unwrap();
                inb.state = InState::Idle;
                inb.target.clear();
                drop(inb);
                self.0.complete(Completion::Err(libc::ECONNRESET));
            }
            RecvAttempt::Pending => {
                self.0.inbound.lock().unwrap().state = InState::ReceiveInProgress;
                self.0.arm_in();
            }
        }
    }

    /// Retrieve the buffer a completed `recv` filled. Valid to call from
    /// within the `received` sink callback that reported the completion.
    pub fn take_received(&self) -> Option<Vec<u8>> {
        self.0.inbound.lock().unwrap().completed.take()
    }
}

impl UsockInner {
    fn arc_self(&self) -> Arc<UsockInner> {
        self.self_weak
            .upgrade()
            .expect("usock operation invoked after its last handle was dropped")
    }

    fn register(&self) {
        if self.guard.try_mark(OP_ADD) {
            self.port.enqueue_op(OpRequest::Add(self.arc_self()));
        }
    }

    fn arm_in(&self) {
        if self.guard.try_mark(OP_SET_IN) {
            self.port.enqueue_op(OpRequest::SetIn(self.arc_self()));
        }
    }

    fn arm_out(&self) {
        if self.guard.try_mark(OP_SET_OUT) {
            self.port.enqueue_op(OpRequest::SetOut(self.arc_self()));
        }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.lock().unwrap().as_ref().map_or(-1, |fd| fd.as_raw_fd())
    }

    /// Run `f` against the live descriptor, or fail with `EBADF` if
    /// `teardown` has already taken it.
    fn with_fd<T>(&self, f: impl FnOnce(&Socket) -> io::Result<T>) -> io::Result<T> {
        match self.fd.lock().unwrap().as_ref() {
            Some(fd) => f(fd),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    pub(crate) fn token(&self) -> Option<Token> {
        *self.token.lock().unwrap()
    }

    pub(crate) fn set_token(&self, token: Token) {
        *self.token.lock().unwrap() = Some(token);
    }

    pub(crate) fn take_token(&self) -> Option<Token> {
        self.token.lock().unwrap().take()
    }

    pub(crate) fn clear_add(&self) {
        self.guard.clear(OP_ADD);
    }

    pub(crate) fn clear_remove(&self) {
        self.guard.clear(OP_REMOVE);
    }

    pub(crate) fn clear_set_in(&self) {
        self.guard.clear(OP_SET_IN);
    }

    pub(crate) fn clear_set_out(&self) {
        self.guard.clear(OP_SET_OUT);
    }

    /// Deliver a completion. On the worker thread this runs inline,
    /// relying on the dispatch loop's still-live `sync` guard up the call
    /// stack; otherwise it is forwarded for the worker to fire.
    fn complete(&self, completion: Completion) {
        if self.port.is_worker_thread() {
            self.fire(completion);
        } else {
            self.port.enqueue_op(OpRequest::Fire(self.arc_self(), completion));
        }
    }

    pub(crate) fn fire(&self, completion: Completion) {
        let sink = self.sink.lock().unwrap().clone();
        match completion {
            Completion::Connected => sink.connected(),
            Completion::Accepted(fd) => sink.accepted(fd),
            Completion::Sent => sink.sent(),
            Completion::Received => sink.received(),
            Completion::Err(code) => sink.err(code),
        }
    }

    /// Close the descriptor, drop the batch buffer, fire `closed` exactly
    /// once. Only ever called on the worker thread. Taking the `Socket`
    /// out of its `Mutex` (rather than relying on the last `Arc<UsockInner>`
    /// going away) is what makes the `close(2)` happen right here instead
    /// of whenever the caller's last handle eventually drops.
    pub(crate) fn teardown(&self) {
        let batch_size = self.inbound.lock().unwrap().batch_size;
        *self.inbound.lock().unwrap() = Inbound::new(batch_size);
        *self.outbound.lock().unwrap() = Outbound::new();
        self.fd.lock().unwrap().take();
        self.sink.lock().unwrap().closed();
    }

    /// Dispatch a readiness event by the usock's current sub-state. Runs
    /// only from the worker's own call frame, so `poller` can be touched
    /// directly to disarm on completion.
    pub(crate) fn dispatch_ready(self: &Arc<Self>, poller: &mut Poller) {
        let out_state = self.outbound.lock().unwrap().state;
        match out_state {
            OutState::ConnectInProgress => self.resume_connect(poller),
            OutState::SendInProgress => self.resume_send(poller),
            OutState::Idle => {}
        }

        let in_state = self.inbound.lock().unwrap().state;
        match in_state {
            InState::AcceptInProgress => self.resume_accept(poller),
            InState::ReceiveInProgress => self.resume_recv(poller),
            InState::Idle => {}
        }
    }

    fn resume_connect(self: &Arc<Self>, poller: &mut Poller) {
        let err = self.with_fd(|fd| fd.take_error());

        self.outbound.lock().unwrap().state = OutState::Idle;
        if let Some(token) = self.token() {
            let _ = poller.reset_out(token);
        }

        match err {
            Ok(None) => self.complete(Completion::Connected),
            Ok(Some(e)) => self.complete(Completion::Err(normalize_errno(&e))),
            Err(e) => self.complete(Completion::Err(normalize_errno(&e))),
        }
    }

    fn resume_send(self: &Arc<Self>, poller: &mut Poller) {
        match self.attempt_send() {
            SendAttempt::Done => {
                self.outbound.lock().unwrap().state = OutState::Idle;
                if let Some(token) = self.token() {
                    let _ = poller.reset_out(token);
                }
                self.complete(Completion::Sent);
            }
            SendAttempt::Reset => {
                let mut out = self.outbound.lock().unwrap();
                out.state = OutState::Idle;
                out.iov.clear();
                drop(out);
                if let Some(token) = self.token() {
                    let _ = poller.reset_out(token);
                }
                self.complete(Completion::Err(libc::ECONNRESET));
            }
            SendAttempt::WouldBlock => {}
        }
    }

    fn resume_recv(self: &Arc<Self>, poller: &mut Poller) {
        match self.attempt_recv() {
            RecvAttempt::Done => {
                let buf = {
                    let mut inb = self.inbound.lock().unwrap();
                    inb.state = InState::Idle;
                    std::mem::take(&mut inb.target)
                };
                self.inbound.lock().unwrap().completed = Some(buf);
                if let Some(token) = self.token() {
                    let _ = poller.reset_in(token);
                }
                self.complete(Completion::Received);
            }
            RecvAttempt::Reset => {
                let mut inb = self.inbound.lock().unwrap();
                inb.state = InState::Idle;
                inb.target.clear();
                drop(inb);
                if let Some(token) = self.token() {
                    let _ = poller.reset_in(token);
                }
                self.complete(Completion::Err(libc::ECONNRESET));
            }
            RecvAttempt::Pending => {}
        }
    }

    fn resume_accept(self: &Arc<Self>, poller: &mut Poller) {
        match self.with_fd(|fd| fd.accept()) {
            Ok(Some(child)) => {
                self.inbound.lock().unwrap().state = InState::Idle;
                if let Some(token) = self.token() {
                    let _ = poller.reset_in(token);
                }
                self.complete(Completion::Accepted(child.into_raw_fd()));
            }
            Ok(None) => {}
            Err(e) if is_accept_transient(&e) => {
                debug!("transient accept error, retrying: {e}");
            }
            Err(e) => {
                self.inbound.lock().unwrap().state = InState::Idle;
                if let Some(token) = self.token() {
                    let _ = poller.reset_in(token);
                }
                self.complete(Completion::Err(normalize_errno(&e)));
            }
        }
    }

    /// Attempt `sendmsg` once against the current iov.
    fn attempt_send(&self) -> SendAttempt {
        let mut out = self.outbound.lock().unwrap();

        if out.iov.is_empty() {
            return SendAttempt::Done;
        }

        let front_offset = out.front_offset;
        let slices: Vec<IoSlice<'_>> = out
            .iov
            .iter()
            .enumerate()
            .map(|(i, b)| if i == 0 { IoSlice::new(&b[front_offset..]) } else { IoSlice::new(b) })
            .collect();

        match self.with_fd(|fd| fd.send_vectored(&slices)) {
            Ok(IoResult::Done(n)) => {
                advance_iov(&mut out.iov, &mut out.front_offset, n);
                if out.iov.is_empty() {
                    SendAttempt::Done
                } else {
                    SendAttempt::WouldBlock
                }
            }
            Ok(IoResult::WouldBlock) => SendAttempt::WouldBlock,
            Ok(IoResult::Reset) | Err(_) => SendAttempt::Reset,
        }
    }

    /// Batch-buffer-first receive: drain any leftover batch bytes first,
    /// then either read straight into the caller's buffer or refill the
    /// batch buffer, whichever the remaining need calls for.
    fn attempt_recv(&self) -> RecvAttempt {
        let mut inb = self.inbound.lock().unwrap();

        if inb.batch_pos < inb.batch_len {
            let avail = inb.batch_len - inb.batch_pos;
            let need = inb.target.len() - inb.filled;
            let take = avail.min(need);

            if take > 0 {
                let chunk = inb.batch.as_ref().unwrap()[inb.batch_pos..inb.batch_pos + take].to_vec();
                let filled = inb.filled;
                inb.target[filled..filled + take].copy_from_slice(&chunk);
                inb.filled += take;
                inb.batch_pos += take;
            }
        }

        if inb.filled == inb.target.len() {
            return RecvAttempt::Done;
        }

        let remaining = inb.target.len() - inb.filled;

        if remaining > inb.batch_size {
            let filled = inb.filled;
            match self.with_fd(|fd| fd.recv(&mut inb.target[filled..])) {
                Ok(IoResult::Done(n)) => {
                    inb.filled += n;
                    if inb.filled == inb.target.len() {
                        RecvAttempt::Done
                    } else {
                        RecvAttempt::Pending
                    }
                }
                Ok(IoResult::WouldBlock) => RecvAttempt::Pending,
                Ok(IoResult::Reset) | Err(_) => RecvAttempt::Reset,
            }
        } else {
            let batch_size = inb.batch_size;
            let batch = inb.batch.get_or_insert_with(|| vec![0u8; batch_size]);
            match self.with_fd(|fd| fd.recv(batch)) {
                Ok(IoResult::Done(n)) => {
                    inb.batch_len = n;
                    inb.batch_pos = 0;
                    let take = n.min(remaining);
                    let chunk = inb.batch.as_ref().unwrap()[..take].to_vec();
                    let filled = inb.filled;
                    inb.target[filled..filled + take].copy_from_slice(&chunk);
                    inb.filled += take;
                    inb.batch_pos += take;
                    if inb.filled == inb.target.len() {
                        RecvAttempt::Done
                    } else {
                        RecvAttempt::Pending
                    }
                }
                Ok(IoResult::WouldBlock) => RecvAttempt::Pending,
                Ok(IoResult::Reset) | Err(_) => RecvAttempt::Reset,
            }
        }
    }
}

fn advance_iov(iov: &mut VecDeque<Vec<u8>>, front_offset: &mut usize, mut n: usize) {
    while n > 0 {
        let Some(front) = iov.front() else { break };
        let remaining = front.len() - *front_offset;

        if n < remaining {
            *front_offset += n;
            n = 0;
        } else {
            n -= remaining;
            iov.pop_front();
            *front_offset = 0;
        }
    }
}

/// Transient accept-path errors, silently retried.
fn is_accept_transient(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::ECONNABORTED)
            | Some(libc::EPROTO)
            | Some(libc::ENOBUFS)
            | Some(libc::ENOMEM)
            | Some(libc::EMFILE)
            | Some(libc::ENFILE)
    )
}

fn normalize_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

impl AsRawFd for Usock {
    fn as_raw_fd(&self) -> RawFd {
        self.0.raw_fd()
    }
}
