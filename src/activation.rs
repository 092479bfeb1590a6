//! Socket-activation probe.
//!
//! A supervisor (systemd, or anything speaking the same contract) may hand
//! this process pre-opened, pre-configured listening sockets: `LISTEN_PID`
//! names the intended recipient, `LISTEN_FDS` the count, and the
//! descriptors are numbered contiguously from [`LISTEN_FDS_START`].
//! Inheriting a listener this way avoids the bind race during zero-downtime
//! restarts.
//!
//! The probe distinguishes three outcomes the caller must not collapse:
//!
//! - `Ok(None)` — nothing advertised; create a fresh listener;
//! - `Ok(Some(fd))` — a descriptor validated as a listening stream socket
//!   of the requested family; use it as-is;
//! - `Err(UnusableInherited)` — activation was attempted but no advertised
//!   descriptor is usable; binding a fresh listener now would duplicate the
//!   supervisor's socket, so the caller must fail.
//!
//! Inherited descriptors are never reconfigured here: their options were
//! set by the supervisor and are trusted as-is.

use std::env;
use std::fmt;
use std::io;
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};

use socket2::{Domain, SockRef, Type};
use tracing::warn;

use crate::error::{BrokerError, Result};

/// First descriptor number a supervisor passes down (0-2 are stdio).
pub const LISTEN_FDS_START: RawFd = 3;

/// The broker listens on at most one local and one inet endpoint, so only
/// the first two inherited descriptors are meaningful.
const LISTEN_FDS_MAX: usize = 2;

/// Which endpoint family an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Unix-domain stream socket.
    Local,
    /// Internet (IPv4 or IPv6) stream socket.
    Inet,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKind::Local => f.write_str("local"),
            SocketKind::Inet => f.write_str("inet"),
        }
    }
}

/// Look for an inherited listening socket of the given kind.
///
/// Scans the advertised descriptors in order and returns the first one
/// that validates. A descriptor that fails introspection is logged and
/// skipped; the next one is tried.
pub fn inherited_listener(kind: SocketKind) -> Result<Option<OwnedFd>> {
    let mut count = advertised_fd_count();
    if count == 0 {
        return Ok(None);
    }
    if count > LISTEN_FDS_MAX {
        warn!(
            count,
            "inherited more than {LISTEN_FDS_MAX} listen sockets, ignoring all but the first {LISTEN_FDS_MAX}"
        );
        count = LISTEN_FDS_MAX;
    }

    for n in 0..count {
        let fd = LISTEN_FDS_START + n as RawFd;
        match validates(fd, kind) {
            Ok(true) => return Ok(Some(unsafe { OwnedFd::from_raw_fd(fd) })),
            Ok(false) => {}
            Err(e) => {
                warn!(fd, kind = %kind, error = %e, "could not introspect inherited descriptor");
            }
        }
    }
    Err(BrokerError::UnusableInherited { kind })
}

/// Number of inherited descriptors advertised for this process.
fn advertised_fd_count() -> usize {
    parse_listen_env(
        env::var("LISTEN_PID").ok().as_deref(),
        env::var("LISTEN_FDS").ok().as_deref(),
        std::process::id(),
    )
}

/// `LISTEN_PID` must name this exact process; an advertisement addressed
/// to another pid (or malformed) counts as no advertisement at all.
fn parse_listen_env(pid: Option<&str>, fds: Option<&str>, own_pid: u32) -> usize {
    let Some(pid) = pid.and_then(|p| p.trim().parse::<u32>().ok()) else {
        return 0;
    };
    if pid != own_pid {
        return 0;
    }
    fds.and_then(|n| n.trim().parse::<usize>().ok()).unwrap_or(0)
}

/// Is `fd` a listening stream socket of the requested family?
fn validates(fd: RawFd, kind: SocketKind) -> io::Result<bool> {
    // Not ours to close yet; ownership is taken only for the fd we return.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let sock = SockRef::from(&borrowed);

    if sock.r#type()? != Type::STREAM {
        return Ok(false);
    }
    let family_ok = match kind {
        SocketKind::Local => sock.domain()? == Domain::UNIX,
        SocketKind::Inet => {
            let domain = sock.domain()?;
            domain == Domain::IPV4 || domain == Domain::IPV6
        }
    };
    if !family_ok {
        return Ok(false);
    }
    is_listening(fd)
}

/// `SO_ACCEPTCONN`: whether `listen(2)` has been called on the socket.
/// socket2 does not expose this option, so query it directly.
fn is_listening(fd: RawFd) -> io::Result<bool> {
    let mut val: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ACCEPTCONN,
            &mut val as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(val != 0)
}
