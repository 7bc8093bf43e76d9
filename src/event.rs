use mio::{event::Event, Token};
use std::fmt;

/// Readiness snapshot copied out of a mio::event::Event so the loop can
/// release the borrow on its event buffer before dispatching.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    closed: bool,
    error: bool,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("token", &self.token)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("closed", &self.closed)
            .field("error", &self.error)
            .finish()
    }
}

impl Readiness {
    pub fn token(&self) -> Token {
        self.token
    }

    /// Readable, or the peer hung up its write side (a read will see EOF).
    pub fn is_readable(&self) -> bool {
        self.readable || self.closed
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_error(&self) -> bool {
        self.error
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_read_closed(),
            error: event.is_error(),
        }
    }
}

#[cfg(test)]
impl Readiness {
    pub(crate) fn synthetic(token: Token, readable: bool, writable: bool) -> Self {
        Self {
            token,
            readable,
            writable,
            closed: false,
            error: false,
        }
    }
}
