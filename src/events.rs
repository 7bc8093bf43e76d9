use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{action::Action, conn::Conn, server::Server};

/// Callbacks the loops invoke. Every method has a no-op default.
///
/// All callbacks for connections owned by one loop run sequentially on that
/// loop's thread. With more than one loop, callbacks for different
/// connections may run in parallel, hence the `Send + Sync` bound.
pub trait Events: Send + Sync + 'static {
    /// Called once before any connection is accepted. Returning
    /// [`Action::Shutdown`] aborts startup.
    fn serving(&self, server: &Server) -> Action {
        let _ = server;
        Action::None
    }

    /// Called once for every accepted connection, before it is registered for
    /// reads. Returned bytes are the first bytes the peer receives.
    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        let _ = conn;
        (Vec::new(), Action::None)
    }

    /// Called exactly once when a connection that was opened goes away. The
    /// connection can no longer be written to; only `Shutdown` has an effect.
    fn closed(&self, conn: &mut Conn) -> Action {
        let _ = conn;
        Action::None
    }

    /// Called with exactly the bytes produced by one read.
    fn data(&self, conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        let _ = (conn, input);
        (Vec::new(), Action::None)
    }

    /// Called when a loop's ticker fires, first at loop start.
    ///
    /// By default every loop has its own ticker, so with N loops this runs N
    /// times per period, possibly in parallel. Work that must happen once per
    /// period should turn off
    /// [`tick_every_loop`](crate::ServerConfig::tick_every_loop), which
    /// leaves only loop 0 ticking.
    ///
    /// `Some(Duration::ZERO)` asks for another tick as soon as possible,
    /// `Some(d)` for one no earlier than `now + d`. `None` stops ticking.
    fn tick(&self, now: Instant) -> (Option<Duration>, Action) {
        let _ = now;
        (None, Action::None)
    }

    /// Called right before every socket write.
    fn pre_write(&self) {}
}

impl<T: Events> Events for Arc<T> {
    fn serving(&self, server: &Server) -> Action {
        (**self).serving(server)
    }

    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        (**self).opened(conn)
    }

    fn closed(&self, conn: &mut Conn) -> Action {
        (**self).closed(conn)
    }

    fn data(&self, conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        (**self).data(conn, input)
    }

    fn tick(&self, now: Instant) -> (Option<Duration>, Action) {
        (**self).tick(now)
    }

    fn pre_write(&self) {
        (**self).pre_write()
    }
}
