//! Crate-wide tuning constants. No file-based configuration layer is
//! in scope; these are the only knobs the core exposes, and `Usock::init`
//! takes the buffer sizes as explicit overrides rather than reading them
//! from here.

/// Size of a usock's lazily-allocated receive batch buffer.
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Maximum scatter/gather entries accepted by a single `send`.
pub const MAX_IOVCNT: usize = 64;

/// Sentinel for "leave the kernel's default `SO_SNDBUF`/`SO_RCVBUF`".
pub const LEAVE_BUFSIZE_DEFAULT: i32 = -1;

/// `Events` capacity the worker allocates its `epoll_wait` buffer to.
pub const EVENTS_CAPACITY: usize = 1024;
