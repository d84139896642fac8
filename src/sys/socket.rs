use std::io::{self, Error, ErrorKind, IoSlice};
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use libc::{c_int, c_void, sockaddr, socklen_t, MSG_PEEK, SOCK_CLOEXEC, SOCK_NONBLOCK};

use super::commom::{FromInner, IntoInner};
use super::fd::FileDesc;

pub fn setsockopt<T>(sock: &Socket, level: c_int, opt: c_int, payload: T) -> io::Result<()> {
    let payload = &payload as *const T as *const c_void;
    syscall!(setsockopt(
        sock.as_raw_fd(),
        level,
        opt,
        payload,
        mem::size_of::<T>() as socklen_t
    ))?;
    Ok(())
}

pub fn getsockopt<T: Copy>(sock: &Socket, level: c_int, opt: c_int) -> io::Result<T> {
    let mut slot: T = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<T>() as socklen_t;
    syscall!(getsockopt(
        sock.as_raw_fd(),
        level,
        opt,
        &mut slot as *mut _ as *mut _,
        &mut len
    ))?;
    assert_eq!(len as usize, mem::size_of::<T>());
    Ok(slot)
}

impl FromInner<libc::sockaddr_in> for SocketAddrV4 {
    fn from_inner(addr: libc::sockaddr_in) -> SocketAddrV4 {
        SocketAddrV4::new(
            std::net::Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
            u16::from_be(addr.sin_port),
        )
    }
}

impl FromInner<libc::sockaddr_in6> for SocketAddrV6 {
    fn from_inner(addr: libc::sockaddr_in6) -> SocketAddrV6 {
        SocketAddrV6::new(
            std::net::Ipv6Addr::from(addr.sin6_addr.s6_addr),
            u16::from_be(addr.sin6_port),
            u32::from_be(addr.sin6_flowinfo),
            addr.sin6_scope_id,
        )
    }
}

impl IntoInner<(*const sockaddr, socklen_t)> for &SocketAddr {
    fn into_inner(self) -> (*const sockaddr, socklen_t) {
        match *self {
            SocketAddr::V4(ref a) => (a as *const _ as *const _, mem::size_of_val(a) as socklen_t),
            SocketAddr::V6(ref a) => (a as *const _ as *const _, mem::size_of_val(a) as socklen_t),
        }
    }
}

pub fn sockaddr_to_addr(storage: &libc::sockaddr_storage, len: usize) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            assert!(len >= mem::size_of::<libc::sockaddr_in>());
            Ok(SocketAddr::V4(FromInner::from_inner(unsafe {
                *(storage as *const _ as *const libc::sockaddr_in)
            })))
        }
        libc::AF_INET6 => {
            assert!(len >= mem::size_of::<libc::sockaddr_in6>());
            Ok(SocketAddr::V6(FromInner::from_inner(unsafe {
                *(storage as *const _ as *const libc::sockaddr_in6)
            })))
        }
        _ => Err(Error::new(ErrorKind::InvalidInput, "unsupported address family")),
    }
}

/// A non-blocking, close-on-exec kernel stream socket.
///
/// `Socket` is the substrate `Usock` is built on: it performs the raw
/// syscalls and classifies their errno into the would-block / reset
/// taxonomy the core cares about, but holds no readiness or sub-state of
/// its own — that belongs to the usock layer.
#[derive(Debug)]
pub struct Socket(FileDesc);

/// Outcome of a non-blocking `connect(2)` attempt.
pub enum ConnectResult {
    Connected,
    InProgress,
}

/// Outcome of a single `send`/`recv` attempt.
pub enum IoResult {
    Done(usize),
    WouldBlock,
    Reset,
}

impl Socket {
    pub fn new(domain: c_int, ty: c_int, protocol: c_int) -> io::Result<Socket> {
        let fd = match syscall!(socket(domain, ty | SOCK_CLOEXEC | SOCK_NONBLOCK, protocol)) {
            Ok(fd) => fd,
            Err(ref e) if e.raw_os_error() == Some(libc::EINVAL) => {
                // Kernel predates SOCK_CLOEXEC/SOCK_NONBLOCK flags on socket(2).
                let fd = syscall!(socket(domain, ty, protocol))?;
                let sock = Socket(unsafe { FileDesc::new(fd) });
                sock.set_nonblocking(true)?;
                return Ok(sock);
            }
            Err(e) => return Err(e),
        };

        Ok(Socket(unsafe { FileDesc::new(fd) }))
    }

    pub fn bind(&self, addr: &SocketAddr) -> io::Result<()> {
        self.set_reuseaddr(true)?;
        let (addrp, len) = addr.into_inner();
        syscall!(bind(self.as_raw_fd(), addrp, len))?;
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        syscall!(listen(self.as_raw_fd(), backlog))?;
        Ok(())
    }

    /// Initiate a non-blocking `connect(2)`. `EINPROGRESS` is reported as
    /// [`ConnectResult::InProgress`], not an error: the caller arms OUT
    /// readiness on the poller and resolves the outcome via `take_error`
    /// once it fires.
    pub fn connect(&self, addr: &SocketAddr) -> io::Result<ConnectResult> {
        let (addrp, len) = addr.into_inner();

        match syscall!(connect(self.as_raw_fd(), addrp, len)) {
            Ok(_) => Ok(ConnectResult::Connected),
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                Ok(ConnectResult::InProgress)
            }
            Err(e) => Err(e),
        }
    }

    /// Non-blocking `accept4(2)`. Returns `None` on `EAGAIN`/`EWOULDBLOCK`.
    pub fn accept(&self) -> io::Result<Option<Socket>> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&storage) as socklen_t;

        match syscall!(accept4(
            self.as_raw_fd(),
            &mut storage as *mut _ as *mut sockaddr,
            &mut len,
            SOCK_CLOEXEC | SOCK_NONBLOCK
        )) {
            Ok(fd) => Ok(Some(Socket(unsafe { FileDesc::new(fd) }))),
            Err(ref e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.raw_os_error() == Some(libc::EAGAIN) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Scatter/gather send with `MSG_NOSIGNAL`, so a reset peer surfaces as
    /// an errno instead of `SIGPIPE`.
    pub fn send_vectored(&self, iov: &[IoSlice<'_>]) -> io::Result<IoResult> {
        let msg = libc::msghdr {
            msg_name: std::ptr::null_mut(),
            msg_namelen: 0,
            msg_iov: iov.as_ptr() as *mut libc::iovec,
            msg_iovlen: iov.len() as _,
            msg_control: std::ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };

        match syscall!(sendmsg(self.as_raw_fd(), &msg, libc::MSG_NOSIGNAL)) {
            Ok(n) => Ok(IoResult::Done(n as usize)),
            Err(e) => Ok(classify_write_error(&e)),
        }
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<IoResult> {
        match syscall!(recv(self.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len(), 0)) {
            Ok(0) if !buf.is_empty() => Ok(IoResult::Reset),
            Ok(n) => Ok(IoResult::Done(n as usize)),
            Err(e) => Ok(classify_read_error(&e)),
        }
    }

    pub fn peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = syscall!(recv(
            self.as_raw_fd(),
            buf.as_mut_ptr() as *mut c_void,
            buf.len(),
            MSG_PEEK
        ))?;
        Ok(n as usize)
    }

    pub fn set_reuseaddr(&self, val: bool) -> io::Result<()> {
        setsockopt(self, libc::SOL_SOCKET, libc::SO_REUSEADDR, val as c_int)
    }

    pub fn set_sndbuf(&self, bytes: i32) -> io::Result<()> {
        setsockopt(self, libc::SOL_SOCKET, libc::SO_SNDBUF, bytes)
    }

    pub fn set_rcvbuf(&self, bytes: i32) -> io::Result<()> {
        setsockopt(self, libc::SOL_SOCKET, libc::SO_RCVBUF, bytes)
    }

    pub fn set_nodelay(&self, val: bool) -> io::Result<()> {
        setsockopt(self, libc::IPPROTO_TCP, libc::TCP_NODELAY, val as c_int)
    }

    /// Best-effort; not every kernel build supports `TCP_QUICKACK`.
    pub fn set_quickack(&self, val: bool) -> io::Result<()> {
        setsockopt(self, libc::IPPROTO_TCP, libc::TCP_QUICKACK, val as c_int)
    }

    pub fn set_v6only(&self, val: bool) -> io::Result<()> {
        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, val as c_int)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let mut flag = nonblocking as c_int;
        syscall!(ioctl(self.as_raw_fd(), libc::FIONBIO, &mut flag)).map(|_| ())
    }

    /// Reads and clears `SO_ERROR`; this is how a connect-in-progress
    /// usock discovers the outcome once OUT-readiness fires.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        let raw: c_int = getsockopt(self, libc::SOL_SOCKET, libc::SO_ERROR)?;
        if raw == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(raw)))
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sockname(|storage, len| unsafe { libc::getsockname(self.as_raw_fd(), storage, len) })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sockname(|storage, len| unsafe { libc::getpeername(self.as_raw_fd(), storage, len) })
    }

    pub fn try_clone(&self) -> io::Result<Socket> {
        Ok(Socket(self.0.try_clone()?))
    }
}

fn sockname<F>(f: F) -> io::Result<SocketAddr>
where
    F: FnOnce(*mut sockaddr, *mut socklen_t) -> c_int,
{
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of_val(&storage) as socklen_t;
        if f(&mut storage as *mut _ as *mut _, &mut len) == -1 {
            return Err(io::Error::last_os_error());
        }
        sockaddr_to_addr(&storage, len as usize)
    }
}

/// Normalizes a failed send into the would-block / reset taxonomy.
fn classify_write_error(e: &io::Error) -> IoResult {
    match e.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => IoResult::WouldBlock,
        _ => IoResult::Reset,
    }
}

/// Normalizes a failed recv into the would-block / reset taxonomy.
fn classify_read_error(e: &io::Error) -> IoResult {
    match e.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => IoResult::WouldBlock,
        _ => IoResult::Reset,
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Socket(FileDesc::new(fd))
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.0.into_raw_fd()
    }
}
