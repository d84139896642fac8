//! A single-worker-thread asynchronous I/O core: an epoll-backed
//! completion port underlying a scalability-protocol messaging library.
//!
//! The core owns one OS thread (the "worker") that multiplexes readiness
//! events, fires timers and ferries completions out to application code
//! through a [`Sink`] callback, the same way nanomsg's `nn_worker` backs
//! its transport FSMs. Everything above the line — protocol semantics,
//! the public messaging API, config parsing — is out of scope here; this
//! crate is the plumbing those layers are built on.
//!
//! ## Usage
//!
//! First, add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! aio-core = "0.1"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use aio_core::{Port, Sink, Usock};
//!
//! struct EchoSink;
//!
//! impl Sink for EchoSink {
//!     fn connected(&self) {
//!         println!("connected");
//!     }
//! }
//!
//! let port = Port::init().unwrap();
//! let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
//! let usock = Usock::init(&port, libc::AF_INET, libc::SOCK_STREAM, 0, -1, -1, Arc::new(EchoSink)).unwrap();
//! usock.connect(addr);
//! ```

mod config;
mod event;
mod op;
mod opqueue;
mod poller;
mod port;
mod ready;
mod sink;
mod sys;
mod timer;
mod timer_set;
mod token;
mod usock;
mod wake;

pub use event::Event;
pub use port::{Port, PortLock};
pub use ready::Ready;
pub use sink::Sink;
pub use timer::Timer;
pub use token::Token;
pub use usock::Usock;
