use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::ready::Ready;
use crate::sys::epoll::{Epoll, Events};
use crate::token::Token;

/// The readiness poller.
///
/// A thin, stateful wrapper over [`Epoll`]: edge-triggered `epoll_ctl` only
/// ever sees a fd's *complete* interest set, so the poller keeps a small
/// per-token registry recording what's currently armed and recomputes the
/// full set on every `set_in`/`reset_in`/`set_out`/`reset_out`.
pub struct Poller {
    epoll: Epoll,
    armed: HashMap<Token, (RawFd, Ready)>,
    events: Events,
}

impl Poller {
    pub fn new(events_capacity: usize) -> io::Result<Poller> {
        Ok(Poller {
            epoll: Epoll::new()?,
            armed: HashMap::new(),
            events: Events::with_capacity(events_capacity),
        })
    }

    /// Register `fd` under `token` with neither IN nor OUT armed.
    pub fn add(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        self.add_with_interest(fd, token, Ready::empty())
    }

    /// Register `fd` under `token` with a starting interest set. Used for
    /// the wake channel, which is always armed readable and never rearmed.
    pub fn add_with_interest(&mut self, fd: RawFd, token: Token, interest: Ready) -> io::Result<()> {
        self.epoll.add(fd, token, interest)?;
        self.armed.insert(token, (fd, interest));
        Ok(())
    }

    /// Detach `token`; after this its readiness is never reported again.
    pub fn remove(&mut self, token: Token) -> io::Result<()> {
        if let Some((fd, _)) = self.armed.remove(&token) {
            self.epoll.delete(fd)?;
        }
        Ok(())
    }

    pub fn set_in(&mut self, token: Token) -> io::Result<()> {
        self.rearm(token, |r| r.insert(Ready::readable()))
    }

    pub fn reset_in(&mut self, token: Token) -> io::Result<()> {
        self.rearm(token, |r| r.remove(Ready::readable()))
    }

    pub fn set_out(&mut self, token: Token) -> io::Result<()> {
        self.rearm(token, |r| r.insert(Ready::writable()))
    }

    pub fn reset_out(&mut self, token: Token) -> io::Result<()> {
        self.rearm(token, |r| r.remove(Ready::writable()))
    }

    fn rearm(&mut self, token: Token, f: impl FnOnce(&mut Ready)) -> io::Result<()> {
        if let Some((fd, ready)) = self.armed.get_mut(&token) {
            f(ready);
            self.epoll.modify(*fd, token, *ready)?;
        }
        Ok(())
    }

    /// Block up to `timeout` for any armed interest, restarting
    /// transparently on signal interruption.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.epoll.wait(&mut self.events, timeout)
    }

    /// Non-blocking drain of the readiness batch filled by the last `wait`.
    pub fn events(&self) -> impl Iterator<Item = (Ready, Token)> + '_ {
        (0..self.events.len()).filter_map(move |i| {
            self.events.get(i).map(|e| (e.readiness(), e.token()))
        })
    }
}
