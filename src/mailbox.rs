//! Cross-thread command queue of a loop.
//!
//! Any thread may push commands; only the owning loop pops them. Pushing from
//! a thread other than the owner wakes the loop's poller so the command is
//! applied on its next cycle. Pushes from the owning loop skip the wake-up
//! since the loop drains its mailbox after every callback anyway.

use std::{
    cell::Cell,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_queue::SegQueue;
use mio::{net::TcpStream, Waker};

use crate::conn::ConnId;

static NEXT_MAILBOX_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_MAILBOX: Cell<usize> = Cell::new(0);
}

/// A socket accepted by another loop, handed over for ownership.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub id: ConnId,
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

#[derive(Debug)]
pub enum Command {
    Attach(Accepted),
    Write { key: usize, id: ConnId, data: Vec<u8> },
    Close { key: usize, id: ConnId },
}

pub struct Mailbox {
    id: usize,
    queue: SegQueue<Command>,
    waker: Arc<Waker>,
    load: AtomicUsize,
}

impl Mailbox {
    pub fn new(waker: Arc<Waker>) -> Self {
        Self {
            id: NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed),
            queue: SegQueue::new(),
            waker,
            load: AtomicUsize::new(0),
        }
    }

    /// Mark the calling thread as the loop that owns this mailbox.
    pub fn enter(&self) {
        CURRENT_MAILBOX.with(|current| current.set(self.id));
    }

    pub fn is_current(&self) -> bool {
        CURRENT_MAILBOX.with(|current| current.get() == self.id)
    }

    pub fn send(&self, command: Command) {
        self.queue.push(command);
        if !self.is_current() {
            // A failed wake only delays the command until the next poll.
            let _ = self.wake();
        }
    }

    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    pub fn recv(&self) -> Option<Command> {
        self.queue.pop()
    }

    /// Connections owned or about to be owned by this loop.
    pub fn load(&self) -> usize {
        self.load.load(Ordering::Acquire)
    }

    pub fn add_load(&self) {
        self.load.fetch_add(1, Ordering::AcqRel);
    }

    pub fn sub_load(&self) {
        let _ = self
            .load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}
