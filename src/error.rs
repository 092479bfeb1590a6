//! Error types for listener setup and the reactor loop.
//!
//! Severity policy:
//! - per-candidate and per-inherited-fd failures are logged and skipped
//!   inside the listener factory, they never surface here;
//! - exhausting every fallback (activation, then every resolved address)
//!   returns one of these errors and the caller treats it as startup-fatal;
//! - failures of the readiness mechanism itself terminate the process
//!   (see [`Server::serve`](crate::server::Server::serve)).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::activation::SocketKind;

/// Result type for broker network-entry operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// An OS-level operation failed outside any skip-and-continue path.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Name/service resolution produced no candidates at all.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Every resolved candidate failed at create/configure/bind/listen.
    #[error("no resolved address for {host}:{port} accepted a listener")]
    NoUsableAddress { host: String, port: u16 },

    /// The configured unix socket path names something that is not a socket.
    #[error("{} exists and is not a socket", .path.display())]
    PathOccupied { path: PathBuf },

    /// The supervisor advertised inherited descriptors, but none of them
    /// validated as a listening stream socket of the requested family.
    /// Distinct from the none-advertised case: falling through to a fresh
    /// bind here would race the supervisor for the same port.
    #[error("none of the inherited descriptors is a usable {kind} listener")]
    UnusableInherited { kind: SocketKind },
}

impl BrokerError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        BrokerError::Io {
            context: context.into(),
            source,
        }
    }
}
