//! Server context, accept glue, and the serve loop.
//!
//! [`Server`] is the root context object: it owns the two listening
//! endpoints and the connection heap for the process lifetime, and is
//! threaded by reference through every dispatched handler. It is an
//! explicit value, not a process-wide singleton, so tests can run several
//! independent instances.
//!
//! The serve loop preserves the broker's fail-fast policy: there is no
//! graceful shutdown path, and a broken readiness mechanism terminates the
//! process with a distinct exit status for init/wait failures versus
//! listener registration failures.

use std::cell::RefCell;
use std::process;
use std::rc::Rc;
use std::time::Duration;

use mio::net::{TcpListener, UnixListener};
use mio::{Interest, Token};
use tracing::{error, info};

use crate::activation::SocketKind;
use crate::config::ServerConfig;
use crate::conns::{ConnHeap, ConnOrder};
use crate::error::Result;
use crate::event::Readiness;
use crate::listener;
use crate::reactor::{Reactor, ReadyHandler};

/// Token of the local (unix-domain) listening socket.
pub const LOCAL_TOKEN: Token = Token(0);
/// Token of the inet listening socket.
pub const INET_TOKEN: Token = Token(1);
/// First token free for the accept handler's connections.
pub const FIRST_CONN_TOKEN: Token = Token(2);

/// Exit status when the readiness mechanism cannot be initialized or the
/// wait itself fails.
const EXIT_POLL: i32 = 1;
/// Exit status when read interest cannot be armed on a configured listener.
const EXIT_REGISTER: i32 = 2;

/// The protocol collaborator's timing interface.
pub trait DeadlineSource {
    /// Expire anything already due and report the time until the next
    /// protocol deadline (connection timeout, reservation expiry, …).
    /// `None` means nothing is pending and the wait is unbounded;
    /// `Some(ZERO)` means something is due right now.
    fn next_deadline(&mut self) -> Option<Duration>;
}

/// The shared accept interface: a listening socket became readable, so
/// perform the OS-level accept and take ownership of the connection.
/// `kind` names which endpoint fired.
pub trait AcceptHandler<C> {
    fn on_accept(
        &mut self,
        kind: SocketKind,
        server: &mut Server<C>,
        reactor: &mut Reactor<Server<C>>,
        ready: Readiness,
    );
}

/// Root state of the broker's network entry layer.
///
/// At most one local and one inet endpoint exist per server, held here for
/// the process lifetime. Accepted connections are owned by the accept
/// handler, not by this layer; the heap only orders them.
pub struct Server<C: 'static> {
    config: ServerConfig,
    local: Option<UnixListener>,
    inet: Option<TcpListener>,
    conns: ConnHeap<C>,
}

impl<C: 'static> Server<C> {
    /// Build the configured endpoints. The local endpoint is created only
    /// when a socket path is configured; the inet endpoint unless disabled.
    /// Failure to produce any configured endpoint fails construction.
    pub fn new(config: ServerConfig, order: Box<dyn ConnOrder<C>>) -> Result<Self> {
        let local = match &config.socket_path {
            Some(path) => Some(listener::make_local_listener(path)?),
            None => None,
        };
        let inet = if config.inet {
            Some(listener::make_inet_listener(&config.host, config.port)?)
        } else {
            None
        };
        Ok(Self {
            config,
            local,
            inet,
            conns: ConnHeap::new(order),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn local(&self) -> Option<&UnixListener> {
        self.local.as_ref()
    }

    pub fn local_mut(&mut self) -> Option<&mut UnixListener> {
        self.local.as_mut()
    }

    pub fn inet(&self) -> Option<&TcpListener> {
        self.inet.as_ref()
    }

    pub fn inet_mut(&mut self) -> Option<&mut TcpListener> {
        self.inet.as_mut()
    }

    pub fn conns(&self) -> &ConnHeap<C> {
        &self.conns
    }

    pub fn conns_mut(&mut self) -> &mut ConnHeap<C> {
        &mut self.conns
    }

    /// Run the reactor loop forever.
    ///
    /// Each iteration asks `protocol` for the next deadline, blocks at most
    /// that long for readiness, and dispatches at most one ready handler.
    /// There is no exit other than process termination: a failure of the
    /// readiness mechanism logs and exits, deliberately leaving restart to
    /// the supervisor.
    pub fn serve(
        mut self,
        mut protocol: impl DeadlineSource,
        acceptor: impl AcceptHandler<C> + 'static,
    ) -> ! {
        let mut reactor = match Reactor::new() {
            Ok(reactor) => reactor,
            Err(e) => {
                error!(error = %e, "cannot initialize readiness multiplexer");
                process::exit(EXIT_POLL);
            }
        };

        let acceptor = Rc::new(RefCell::new(acceptor));

        if let Some(local) = self.local.as_mut() {
            let glue = LocalAccept {
                acceptor: Rc::clone(&acceptor),
            };
            if let Err(e) = reactor.register(local, LOCAL_TOKEN, Interest::READABLE, glue) {
                error!(error = %e, "cannot watch local listener");
                process::exit(EXIT_REGISTER);
            }
            if let Some(path) = &self.config.socket_path {
                info!(path = %path.display(), "listening (local)");
            }
        }

        if let Some(inet) = self.inet.as_mut() {
            let glue = InetAccept {
                acceptor: Rc::clone(&acceptor),
            };
            if let Err(e) = reactor.register(inet, INET_TOKEN, Interest::READABLE, glue) {
                error!(error = %e, "cannot watch inet listener");
                process::exit(EXIT_REGISTER);
            }
            // Address formatting is advisory: fall back to the configured
            // host/port when the OS cannot report the bound address.
            match inet.local_addr() {
                Ok(addr) => info!(%addr, "listening (inet)"),
                Err(_) => {
                    info!(host = %self.config.host, port = self.config.port, "listening (inet)")
                }
            }
        }

        loop {
            let period = protocol.next_deadline();
            if let Err(e) = reactor.turn(&mut self, period) {
                error!(error = %e, "readiness wait failed");
                process::exit(EXIT_POLL);
            }
        }
    }
}

/// Accept glue for the local endpoint: names which listener fired, nothing
/// more, so the shared accept handler stays ignorant of the server layout.
struct LocalAccept<A> {
    acceptor: Rc<RefCell<A>>,
}

impl<C: 'static, A: AcceptHandler<C>> ReadyHandler<Server<C>> for LocalAccept<A> {
    fn on_ready(&mut self, server: &mut Server<C>, reactor: &mut Reactor<Server<C>>, ready: Readiness) {
        self.acceptor
            .borrow_mut()
            .on_accept(SocketKind::Local, server, reactor, ready);
    }
}

/// Accept glue for the inet endpoint.
struct InetAccept<A> {
    acceptor: Rc<RefCell<A>>,
}

impl<C: 'static, A: AcceptHandler<C>> ReadyHandler<Server<C>> for InetAccept<A> {
    fn on_ready(&mut self, server: &mut Server<C>, reactor: &mut Reactor<Server<C>>, ready: Readiness) {
        self.acceptor
            .borrow_mut()
            .on_accept(SocketKind::Inet, server, reactor, ready);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    struct NoOrder;

    impl ConnOrder<()> for NoOrder {
        fn less(&self, _: &(), _: &()) -> bool {
            false
        }

        fn record(&self, _: &mut (), _: usize) {}
    }

    fn local_only_config(tag: &str) -> ServerConfig {
        let path = std::env::temp_dir().join(format!("quern-srv-{}-{}.sock", tag, std::process::id()));
        let _ = std::fs::remove_file(&path);
        ServerConfig::builder()
            .socket_path(path)
            .inet(false)
            .build()
    }

    #[test]
    fn builds_both_endpoints() {
        let path = std::env::temp_dir().join(format!("quern-srv-both-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let config = ServerConfig::builder()
            .host("127.0.0.1")
            .port(0)
            .socket_path(&path)
            .build();

        let server: Server<()> = Server::new(config, Box::new(NoOrder)).unwrap();
        assert!(server.local().is_some());
        assert!(server.inet().is_some());
        assert!(server.conns().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn endpoints_follow_configuration() {
        let server: Server<()> = Server::new(local_only_config("cfg"), Box::new(NoOrder)).unwrap();
        assert!(server.local().is_some());
        assert!(server.inet().is_none());
        let _ = std::fs::remove_file(server.config().socket_path.as_ref().unwrap());
    }

    #[test]
    fn occupied_path_fails_construction() {
        let path = std::env::temp_dir().join(format!("quern-srv-occ-{}", std::process::id()));
        std::fs::write(&path, b"keep").unwrap();
        let config = ServerConfig::builder()
            .socket_path(&path)
            .inet(false)
            .build();
        assert!(Server::<()>::new(config, Box::new(NoOrder)).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[derive(Default)]
    struct CountingAcceptor {
        local: usize,
        inet: usize,
    }

    impl AcceptHandler<()> for Rc<RefCell<CountingAcceptor>> {
        fn on_accept(
            &mut self,
            kind: SocketKind,
            server: &mut Server<()>,
            _reactor: &mut Reactor<Server<()>>,
            ready: Readiness,
        ) {
            assert!(ready.is_readable());
            let mut counts = self.borrow_mut();
            match kind {
                SocketKind::Local => counts.local += 1,
                SocketKind::Inet => {
                    counts.inet += 1;
                    // Drain the pending connection through the accessor.
                    server.inet_mut().unwrap().accept().unwrap();
                }
            }
        }
    }

    #[test]
    fn accept_glue_names_the_endpoint_that_fired() {
        let config = ServerConfig::builder().host("127.0.0.1").port(0).build();
        let mut server: Server<()> = Server::new(config, Box::new(NoOrder)).unwrap();
        let addr = server.inet().unwrap().local_addr().unwrap();

        let mut reactor: Reactor<Server<()>> = Reactor::new().unwrap();
        let counts = Rc::new(RefCell::new(CountingAcceptor::default()));
        let glue = InetAccept {
            acceptor: Rc::new(RefCell::new(Rc::clone(&counts))),
        };
        reactor
            .register(server.inet_mut().unwrap(), INET_TOKEN, Interest::READABLE, glue)
            .unwrap();

        let _conn = TcpStream::connect(addr).unwrap();
        let mut dispatched = false;
        for _ in 0..50 {
            if reactor
                .turn(&mut server, Some(Duration::from_millis(100)))
                .unwrap()
            {
                dispatched = true;
                break;
            }
        }
        assert!(dispatched);
        assert_eq!(counts.borrow().inet, 1);
        assert_eq!(counts.borrow().local, 0);
    }
}
