use std::fmt;

use mio::event::Event;

/// Readiness mask delivered to a handler: which of read/write/hangup a
/// descriptor became ready for in this reactor iteration.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    readable: bool,
    writable: bool,
    hangup: bool,
}

impl Readiness {
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Peer hangup or socket error; connection handlers use this to tear
    /// down without attempting a read first.
    pub fn is_hangup(&self) -> bool {
        self.hangup
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("hangup", &self.hangup)
            .finish()
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_read_closed() || event.is_error(),
        }
    }
}
