//! Minimal broker shell over the network-entry layer: a one-second
//! heartbeat deadline and an accept handler that echoes bytes back on
//! both endpoints.
//!
//! ```sh
//! cargo run --example broker
//! printf 'hello\n' | nc 127.0.0.1 11300
//! ```
//!
//! With socket activation (the listener is inherited instead of bound):
//!
//! ```sh
//! systemfd -s tcp::11300 -- cargo run --example broker
//! ```

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use mio::{Interest, Token};
use quern::server::FIRST_CONN_TOKEN;
use quern::{
    AcceptHandler, ConnOrder, DeadlineSource, Readiness, Reactor, Server, ServerConfig, SocketKind,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// The demo protocol has no timers; it just asks to be woken every second.
struct Heartbeat;

impl DeadlineSource for Heartbeat {
    fn next_deadline(&mut self) -> Option<Duration> {
        debug!("tick");
        Some(Duration::from_secs(1))
    }
}

/// The demo keeps nothing in the connection heap.
struct NoOrder;

impl ConnOrder<()> for NoOrder {
    fn less(&self, _: &(), _: &()) -> bool {
        false
    }

    fn record(&self, _: &mut (), _: usize) {}
}

/// One echo connection, registered with the reactor for read interest.
struct EchoConn<S> {
    stream: Rc<RefCell<S>>,
    token: Token,
}

impl<S> quern::ReadyHandler<Server<()>> for EchoConn<S>
where
    S: Read + Write + mio::event::Source + 'static,
{
    fn on_ready(&mut self, _server: &mut Server<()>, reactor: &mut Reactor<Server<()>>, ready: Readiness) {
        let mut stream = self.stream.borrow_mut();
        if ready.is_hangup() {
            let _ = reactor.deregister(&mut *stream, self.token);
            return;
        }
        if !ready.is_readable() {
            return;
        }
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    info!(token = self.token.0, "client disconnected");
                    let _ = reactor.deregister(&mut *stream, self.token);
                    return;
                }
                Ok(n) => {
                    if let Err(e) = stream.write_all(&buf[..n]) {
                        warn!(error = %e, "echo write failed");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "read failed");
                    let _ = reactor.deregister(&mut *stream, self.token);
                    return;
                }
            }
        }
    }
}

/// Shared accept handler: drains the ready listener and registers each
/// accepted connection as an [`EchoConn`].
struct EchoAcceptor {
    next_token: usize,
}

impl EchoAcceptor {
    fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn adopt<S>(&mut self, reactor: &mut Reactor<Server<()>>, stream: S)
    where
        S: Read + Write + mio::event::Source + 'static,
    {
        let token = self.next_token();
        let stream = Rc::new(RefCell::new(stream));
        let handler = EchoConn {
            stream: Rc::clone(&stream),
            token,
        };
        if let Err(e) = reactor.register(&mut *stream.borrow_mut(), token, Interest::READABLE, handler)
        {
            warn!(error = %e, "could not register connection");
        };
    }
}

impl AcceptHandler<()> for EchoAcceptor {
    fn on_accept(
        &mut self,
        kind: SocketKind,
        server: &mut Server<()>,
        reactor: &mut Reactor<Server<()>>,
        _ready: Readiness,
    ) {
        loop {
            let result = match kind {
                SocketKind::Inet => server
                    .inet_mut()
                    .expect("inet endpoint fired")
                    .accept()
                    .map(|(stream, addr)| {
                        info!(%addr, "accepted");
                        self.adopt(reactor, stream);
                    }),
                SocketKind::Local => server
                    .local_mut()
                    .expect("local endpoint fired")
                    .accept()
                    .map(|(stream, _)| {
                        info!("accepted (local)");
                        self.adopt(reactor, stream);
                    }),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let socket_path = std::env::temp_dir().join("quern-broker.sock");
    let config = ServerConfig::builder()
        .host("127.0.0.1")
        .port(11300)
        .socket_path(socket_path)
        .build();

    let server: Server<()> = Server::new(config, Box::new(NoOrder))?;
    server.serve(
        Heartbeat,
        EchoAcceptor {
            next_token: FIRST_CONN_TOKEN.0,
        },
    )
}
