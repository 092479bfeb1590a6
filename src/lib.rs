//! # quern
//!
//! The network-entry layer of a work-queue broker server: listening
//! endpoints (unix-domain and TCP, freshly bound or inherited from a
//! supervisor via socket activation) and the single reactor loop that
//! turns socket readiness and protocol deadlines into dispatched
//! callbacks.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐    ┌──────────────────┐    ┌───────────────┐
//! │ activation │───▶│ listener factory │───▶│    Server     │
//! │  (probe)   │    │ (local / inet)   │    │  (context)    │
//! └────────────┘    └──────────────────┘    └───────┬───────┘
//!                                                   │ serve()
//!                                                   ▼
//!                     deadlines ◀──────────  ┌───────────────┐
//!                     (protocol)             │    Reactor    │
//!                     accepts   ◀──────────  │ (mio::Poll)   │
//!                     (handler)              └───────────────┘
//! ```
//!
//! Startup flows left to right once; after that everything cycles inside
//! the reactor: compute the next protocol deadline, block on readiness up
//! to that deadline, dispatch exactly one ready handler, repeat.
//!
//! The whole layer is single-threaded and cooperative. The only suspension
//! point is the poll; handlers run to completion on the same thread, so
//! the server state needs no locks. The protocol engine, wire parsing, and
//! connection handling are collaborators behind the [`DeadlineSource`],
//! [`AcceptHandler`], and [`ConnOrder`] interfaces.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use quern::{
//!     AcceptHandler, DeadlineSource, Readiness, Reactor, Server, ServerConfig, SocketKind,
//! };
//! use quern::conns::ConnOrder;
//! use std::time::Duration;
//!
//! struct Idle;
//! impl DeadlineSource for Idle {
//!     fn next_deadline(&mut self) -> Option<Duration> {
//!         None // nothing pending, wait is unbounded
//!     }
//! }
//!
//! struct DropAll;
//! impl AcceptHandler<()> for DropAll {
//!     fn on_accept(
//!         &mut self,
//!         kind: SocketKind,
//!         server: &mut Server<()>,
//!         _reactor: &mut Reactor<Server<()>>,
//!         _ready: Readiness,
//!     ) {
//!         if kind == SocketKind::Inet {
//!             let _ = server.inet_mut().unwrap().accept();
//!         }
//!     }
//! }
//!
//! struct NoOrder;
//! impl ConnOrder<()> for NoOrder {
//!     fn less(&self, _: &(), _: &()) -> bool { false }
//!     fn record(&self, _: &mut (), _: usize) {}
//! }
//!
//! fn main() -> quern::Result<()> {
//!     let config = ServerConfig::builder().host("127.0.0.1").port(11300).build();
//!     let server = Server::new(config, Box::new(NoOrder))?;
//!     server.serve(Idle, DropAll) // never returns
//! }
//! ```

pub mod activation;
pub mod config;
pub mod conns;
pub mod error;
pub mod event;
pub mod listener;
pub mod reactor;
pub mod server;

pub use activation::SocketKind;
pub use config::ServerConfig;
pub use conns::{ConnHeap, ConnOrder};
pub use error::{BrokerError, Result};
pub use event::Readiness;
pub use reactor::{Reactor, ReadyHandler};
pub use server::{AcceptHandler, DeadlineSource, Server};

/// Commonly used types and traits in one import.
pub mod prelude {
    pub use crate::activation::SocketKind;
    pub use crate::config::ServerConfig;
    pub use crate::conns::{ConnHeap, ConnOrder};
    pub use crate::error::{BrokerError, Result};
    pub use crate::event::Readiness;
    pub use crate::reactor::{Reactor, ReadyHandler};
    pub use crate::server::{AcceptHandler, DeadlineSource, Server};
}
