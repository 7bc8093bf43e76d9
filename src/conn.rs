//! Connection views handed to callbacks.
//!
//! [`Conn`] is the loop-local view: it is only ever touched by the loop that
//! owns the socket, so writes go straight into its outbound queue.
//! [`ConnHandle`] is the thread-safe handle that may be retained anywhere;
//! everything it does is routed through the owning loop's mailbox.

use std::{
    any::Any,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    buffer::OutQueue,
    mailbox::{Command, Mailbox},
};

/// Unique identifier of a connection within one server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub fn new(id: u64) -> Self {
        ConnId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Shared {
    id: ConnId,
    key: usize,
    local: SocketAddr,
    remote: SocketAddr,
    closed: AtomicBool,
    mailbox: Arc<Mailbox>,
}

/// Cloneable, thread-safe reference to a connection.
///
/// Writes and closes are queued to the loop that owns the connection and
/// applied on its next cycle. Once the connection is closed every call is a
/// silent no-op, so handles may outlive the connection they point to.
#[derive(Clone)]
pub struct ConnHandle {
    shared: Arc<Shared>,
}

impl ConnHandle {
    pub(crate) fn new(
        id: ConnId,
        key: usize,
        local: SocketAddr,
        remote: SocketAddr,
        mailbox: Arc<Mailbox>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                key,
                local,
                remote,
                closed: AtomicBool::new(false),
                mailbox,
            }),
        }
    }

    pub fn id(&self) -> ConnId {
        self.shared.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Queue `data` for the connection. Empty input is ignored.
    pub fn write(&self, data: &[u8]) {
        if data.is_empty() || self.is_closed() {
            return;
        }
        self.shared.mailbox.send(Command::Write {
            key: self.shared.key,
            id: self.shared.id,
            data: data.to_vec(),
        });
    }

    /// Ask the owning loop to close the connection.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.shared.mailbox.send(Command::Close {
            key: self.shared.key,
            id: self.shared.id,
        });
    }

    pub(crate) fn mark_closed(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("id", &self.shared.id)
            .field("local", &self.shared.local)
            .field("remote", &self.shared.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection as seen from inside a callback on its own loop.
pub struct Conn {
    handle: ConnHandle,
    context: Option<Box<dyn Any + Send>>,
    pub(crate) out: OutQueue,
    pub(crate) close_requested: bool,
    pub(crate) open: bool,
}

impl Conn {
    pub(crate) fn new(handle: ConnHandle) -> Self {
        Self {
            handle,
            context: None,
            out: OutQueue::new(),
            close_requested: false,
            open: true,
        }
    }

    pub fn id(&self) -> ConnId {
        self.handle.id()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.handle.remote_addr()
    }

    /// A handle that can be stored and used from any thread.
    pub fn handle(&self) -> ConnHandle {
        self.handle.clone()
    }

    /// Replace the user context. The previous value, if any, is dropped.
    pub fn set_context<T: Any + Send>(&mut self, value: T) {
        self.context = Some(Box::new(value));
    }

    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.as_ref()?.downcast_ref()
    }

    pub fn context_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.context.as_mut()?.downcast_mut()
    }

    /// Remove the context if it holds a `T`. A context of another type stays.
    pub fn take_context<T: Any>(&mut self) -> Option<T> {
        match self.context.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.context = Some(other);
                None
            }
        }
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Queue `data` behind any output already pending. Ignored once the
    /// connection has stopped accepting writes.
    pub fn write(&mut self, data: &[u8]) {
        if self.open && !data.is_empty() {
            self.out.push(data.to_vec());
        }
    }

    /// Close the connection once the current callback returns.
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    pub(crate) fn shared_handle(&self) -> &ConnHandle {
        &self.handle
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id())
            .field("local", &self.local_addr())
            .field("remote", &self.remote_addr())
            .field("pending", &self.out.len())
            .field("open", &self.open)
            .finish()
    }
}
