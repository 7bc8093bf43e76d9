use std::{io, sync::Arc, time::Duration};

use mio::{event::Source, Events, Interest, Poll, Token, Waker};

use crate::event::Readiness;

/// Token reserved for the loop's waker. Connection tokens are slab keys and
/// listener tokens start at `LISTENER_TOKEN_OFFSET`, so neither reaches it.
pub const WAKER_TOKEN: Token = Token(usize::MAX);

/// One readiness multiplexer per loop, plus the waker other threads use to
/// interrupt its wait.
pub struct PollHandle {
    poller: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl PollHandle {
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let poller = Poll::new()?;
        let waker = Waker::new(poller.registry(), WAKER_TOKEN)?;
        Ok(PollHandle {
            poller,
            events: Events::with_capacity(events_capacity.max(1)),
            waker: Arc::new(waker),
        })
    }

    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    pub fn register<S>(&self, src: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        src.register(self.poller.registry(), token, interest)
    }

    pub fn reregister<S>(&self, src: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        src.reregister(self.poller.registry(), token, interest)
    }

    pub fn deregister<S>(&self, src: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        src.deregister(self.poller.registry())
    }

    /// Wait for readiness and copy it into `ready`. The waker token only
    /// ends the wait and never appears in `ready`; an interrupted wait
    /// returns with `ready` empty.
    pub fn poll(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        ready.clear();
        match self.poller.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        ready.extend(
            self.events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .map(Readiness::from),
        );
        Ok(())
    }
}
