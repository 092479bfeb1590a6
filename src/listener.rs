//! Listener factory for the broker's two endpoints.
//!
//! Both constructors defer to the socket-activation probe first; a fresh
//! socket is created only when the supervisor advertised nothing. Freshly
//! created descriptors are configured here; inherited ones are returned
//! untouched.
//!
//! One bad resolved candidate is logged and skipped; exhausting every
//! candidate is an error the caller treats as startup-fatal. Descriptors are held as
//! [`socket2::Socket`] until fully set up, so every early return drops
//! (closes) the partial descriptor.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::time::Duration;

use mio::net::{TcpListener, UnixListener};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

use crate::activation::{self, SocketKind};
use crate::error::{BrokerError, Result};

/// Completed-connection queue depth, for both endpoint kinds.
pub const LISTEN_BACKLOG: i32 = 1024;

/// Produce the unix-domain listener for `path`.
///
/// A stale socket file left by a previous run is removed and replaced.
/// Any other kind of file at `path` fails the call without modifying it.
pub fn make_local_listener(path: &Path) -> Result<UnixListener> {
    if let Some(fd) = activation::inherited_listener(SocketKind::Local)? {
        debug!(path = %path.display(), "using inherited local listener");
        return Ok(UnixListener::from_std(
            std::os::unix::net::UnixListener::from(fd),
        ));
    }

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            warn!(path = %path.display(), "removing stale local socket to replace it");
            std::fs::remove_file(path)
                .map_err(|e| BrokerError::io("removing stale socket", e))?;
        }
        Ok(_) => {
            return Err(BrokerError::PathOccupied {
                path: path.to_path_buf(),
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(BrokerError::io("inspecting socket path", e)),
    }

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
        .map_err(|e| BrokerError::io("creating unix socket", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| BrokerError::io("setting non-blocking", e))?;
    let addr =
        SockAddr::unix(path).map_err(|e| BrokerError::io("encoding socket path", e))?;
    debug!(path = %path.display(), "bind");
    socket
        .bind(&addr)
        .map_err(|e| BrokerError::io("binding unix socket", e))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| BrokerError::io("listening on unix socket", e))?;

    Ok(UnixListener::from_std(socket.into()))
}

/// Produce the TCP listener for `host:port`.
///
/// Resolution order is preserved; the first candidate address that
/// survives create/configure/bind/listen wins.
pub fn make_inet_listener(host: &str, port: u16) -> Result<TcpListener> {
    if let Some(fd) = activation::inherited_listener(SocketKind::Inet)? {
        debug!(host, port, "using inherited inet listener");
        return Ok(TcpListener::from_std(std::net::TcpListener::from(fd)));
    }

    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|e| BrokerError::Resolve {
            host: host.to_string(),
            port,
            source: e,
        })?;

    bind_first_candidate(candidates).ok_or(BrokerError::NoUsableAddress {
        host: host.to_string(),
        port,
    })
}

/// One-pass fallback over resolved candidates. A failure on one candidate
/// closes its descriptor (drop) and advances to the next; no retry.
fn bind_first_candidate(candidates: impl IntoIterator<Item = SocketAddr>) -> Option<TcpListener> {
    for addr in candidates {
        match bind_candidate(addr) {
            Ok(socket) => {
                debug!(%addr, "bind");
                return Some(TcpListener::from_std(socket.into()));
            }
            Err(e) => {
                warn!(%addr, error = %e, "skipping candidate address");
            }
        }
    }
    None
}

fn bind_candidate(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    // Immediate rebind across restarts.
    socket.set_reuse_address(true)?;
    // Detect dead peers.
    socket.set_keepalive(true)?;
    // Reset on close instead of lingering; reclaims descriptors under churn.
    socket.set_linger(Some(Duration::ZERO))?;
    // Request/response traffic; don't coalesce small writes.
    socket.set_nodelay(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;

    fn scratch_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("quern-{}-{}.sock", tag, std::process::id()))
    }

    #[test]
    fn non_socket_path_is_left_untouched() {
        let path = scratch_path("regular");
        std::fs::write(&path, b"user data, do not delete").unwrap();

        let err = make_local_listener(&path).unwrap_err();
        assert!(matches!(err, BrokerError::PathOccupied { .. }));

        let mut contents = String::new();
        std::fs::File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "user data, do not delete");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn stale_socket_is_replaced() {
        let path = scratch_path("stale");
        let _ = std::fs::remove_file(&path);
        // Leave a socket file behind with no listener attached to it.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let _listener = make_local_listener(&path).expect("stale socket should be replaced");
        assert!(std::fs::symlink_metadata(&path)
            .unwrap()
            .file_type()
            .is_socket());
        // The new listener actually answers.
        UnixStream::connect(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn fresh_local_listener_on_empty_path() {
        let path = scratch_path("fresh");
        let _ = std::fs::remove_file(&path);
        let _listener = make_local_listener(&path).unwrap();
        UnixStream::connect(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn candidate_fallback_skips_occupied_addresses() {
        let busy1 = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let busy2 = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let free_port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let candidates = vec![
            busy1.local_addr().unwrap(),
            busy2.local_addr().unwrap(),
            SocketAddr::from(([127, 0, 0, 1], free_port)),
        ];

        let listener = bind_first_candidate(candidates).expect("third candidate is free");
        assert_eq!(listener.local_addr().unwrap().port(), free_port);
    }

    #[test]
    fn exhausted_candidates_is_an_error() {
        let busy = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = busy.local_addr().unwrap().port();

        assert!(bind_first_candidate(vec![busy.local_addr().unwrap()]).is_none());

        let err = make_inet_listener("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, BrokerError::NoUsableAddress { .. }));
    }

    #[test]
    fn inet_listener_on_ephemeral_port() {
        let listener = make_inet_listener("127.0.0.1", 0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
