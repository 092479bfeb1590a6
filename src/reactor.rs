//! Single-threaded, deadline-bounded reactor.
//!
//! ```text
//!   serve loop                     Reactor
//!   ──────────                     ───────
//!   deadline = protocol.tick() ──▶ turn(ctx, deadline)
//!                                    │ poll (≤ one ready source)
//!                                    ▼
//!                                  handlers[token].on_ready(ctx, …)
//! ```
//!
//! One thread of control: it is either running a handler or blocked in the
//! poll. Handlers therefore need no locks and no `Send` bound, and they may
//! mutate the reactor itself (register an accepted connection, update
//! interest, deregister) because the dispatched handler is lifted out of
//! the table for the duration of its call.
//!
//! The event buffer has capacity one: each wait reports at most one ready
//! descriptor, and fairness across many simultaneously-ready descriptors
//! is the kernel's responsibility, not this loop's.

use std::collections::HashMap;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

use crate::error::{BrokerError, Result};
use crate::event::Readiness;

/// A readiness callback bound to one registered descriptor.
///
/// `C` is the context threaded through dispatch (the [`Server`] for the
/// broker's own handlers). The reactor is passed back in so the handler
/// can register connections it accepts.
///
/// [`Server`]: crate::server::Server
pub trait ReadyHandler<C> {
    fn on_ready(&mut self, ctx: &mut C, reactor: &mut Reactor<C>, ready: Readiness);
}

// None marks a handler currently lifted out for dispatch; the entry itself
// disappearing means the handler deregistered while running.
type HandlerSlot<C> = Option<Box<dyn ReadyHandler<C>>>;

pub struct Reactor<C: 'static> {
    poll: Poll,
    events: Events,
    handlers: HashMap<Token, HandlerSlot<C>>,
}

impl<C: 'static> Reactor<C> {
    pub fn new() -> Result<Self> {
        let poll = Poll::new().map_err(|e| BrokerError::io("initializing poll", e))?;
        Ok(Self {
            poll,
            events: Events::with_capacity(1),
            handlers: HashMap::new(),
        })
    }

    /// Register a descriptor for `interest` and bind `handler` to it.
    pub fn register<S>(
        &mut self,
        source: &mut S,
        token: Token,
        interest: Interest,
        handler: impl ReadyHandler<C> + 'static,
    ) -> Result<()>
    where
        S: Source + ?Sized,
    {
        source
            .register(self.poll.registry(), token, interest)
            .map_err(|e| BrokerError::io("registering event source", e))?;
        self.handlers.insert(token, Some(Box::new(handler)));
        Ok(())
    }

    /// Update the event interest of an already-registered descriptor.
    pub fn reregister<S>(&mut self, source: &mut S, token: Token, interest: Interest) -> Result<()>
    where
        S: Source + ?Sized,
    {
        source
            .reregister(self.poll.registry(), token, interest)
            .map_err(|e| BrokerError::io("updating event interest", e))
    }

    pub fn deregister<S>(&mut self, source: &mut S, token: Token) -> Result<()>
    where
        S: Source + ?Sized,
    {
        source
            .deregister(self.poll.registry())
            .map_err(|e| BrokerError::io("deregistering event source", e))?;
        self.handlers.remove(&token);
        Ok(())
    }

    /// One loop iteration: block until a descriptor is ready or `timeout`
    /// lapses (`None` blocks indefinitely), then dispatch at most one
    /// handler. Returns whether anything was dispatched. An error from the
    /// wait itself has no recovery path here; the caller decides how to
    /// die.
    pub fn turn(&mut self, ctx: &mut C, timeout: Option<Duration>) -> Result<bool> {
        self.poll
            .poll(&mut self.events, timeout)
            .map_err(|e| BrokerError::io("waiting for readiness", e))?;

        let ready = self
            .events
            .iter()
            .next()
            .map(|ev| (ev.token(), Readiness::from(ev)));
        let Some((token, readiness)) = ready else {
            return Ok(false);
        };

        let lifted = self.handlers.get_mut(&token).and_then(|slot| slot.take());
        if let Some(mut handler) = lifted {
            handler.on_ready(ctx, self, readiness);
            // Put the handler back unless it deregistered or replaced
            // itself while running.
            if let Some(slot) = self.handlers.get_mut(&token) {
                if slot.is_none() {
                    *slot = Some(handler);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Instant;

    const TURN_TIMEOUT: Duration = Duration::from_millis(100);

    struct RecordReady(Token);

    impl ReadyHandler<Vec<(Token, Readiness)>> for RecordReady {
        fn on_ready(
            &mut self,
            ctx: &mut Vec<(Token, Readiness)>,
            _reactor: &mut Reactor<Vec<(Token, Readiness)>>,
            ready: Readiness,
        ) {
            ctx.push((self.0, ready));
        }
    }

    #[test]
    fn deadline_bounded_wait() {
        let mut reactor: Reactor<Vec<(Token, Readiness)>> = Reactor::new().unwrap();
        let mut fired = Vec::new();

        let deadline = Duration::from_millis(60);
        let start = Instant::now();
        let dispatched = reactor.turn(&mut fired, Some(deadline)).unwrap();
        let elapsed = start.elapsed();

        assert!(!dispatched);
        assert!(fired.is_empty());
        assert!(elapsed >= Duration::from_millis(50), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "blocked for {elapsed:?}");
    }

    #[test]
    fn zero_deadline_returns_immediately() {
        let mut reactor: Reactor<Vec<(Token, Readiness)>> = Reactor::new().unwrap();
        let mut fired = Vec::new();
        let start = Instant::now();
        assert!(!reactor.turn(&mut fired, Some(Duration::ZERO)).unwrap());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn dispatches_exactly_the_ready_handler() {
        let mut reactor = Reactor::new().unwrap();
        let mut fired: Vec<(Token, Readiness)> = Vec::new();

        let mut quiet = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut busy = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        reactor
            .register(&mut quiet, Token(1), Interest::READABLE, RecordReady(Token(1)))
            .unwrap();
        reactor
            .register(&mut busy, Token(2), Interest::READABLE, RecordReady(Token(2)))
            .unwrap();

        let _conn = TcpStream::connect(busy.local_addr().unwrap()).unwrap();

        let mut dispatched = false;
        for _ in 0..50 {
            if reactor.turn(&mut fired, Some(TURN_TIMEOUT)).unwrap() {
                dispatched = true;
                break;
            }
        }
        assert!(dispatched);
        assert_eq!(fired.len(), 1, "one ready descriptor, one dispatch");
        assert_eq!(fired[0].0, Token(2));
        assert!(fired[0].1.is_readable());
    }

    struct Ctx {
        listener: Option<mio::net::TcpListener>,
        count: usize,
    }

    struct DeregisterOnReady(Token);

    impl ReadyHandler<Ctx> for DeregisterOnReady {
        fn on_ready(&mut self, ctx: &mut Ctx, reactor: &mut Reactor<Ctx>, _ready: Readiness) {
            ctx.count += 1;
            if let Some(mut listener) = ctx.listener.take() {
                reactor.deregister(&mut listener, self.0).unwrap();
            }
        }
    }

    #[test]
    fn handler_may_deregister_itself_during_dispatch() {
        let mut reactor = Reactor::new().unwrap();
        let mut listener = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        reactor
            .register(&mut listener, Token(7), Interest::READABLE, DeregisterOnReady(Token(7)))
            .unwrap();
        let mut ctx = Ctx {
            listener: Some(listener),
            count: 0,
        };

        let _conn = TcpStream::connect(addr).unwrap();
        let mut dispatched = false;
        for _ in 0..50 {
            if reactor.turn(&mut ctx, Some(TURN_TIMEOUT)).unwrap() {
                dispatched = true;
                break;
            }
        }
        assert!(dispatched);
        assert_eq!(ctx.count, 1);
        assert!(reactor.handlers.is_empty(), "deregistered handler must not be re-armed");
    }
}
