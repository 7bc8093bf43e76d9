use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use mio::{net::TcpListener, Interest, Token};

use crate::{
    config::LoadBalance,
    error::{Result, ServeError},
    mailbox::Mailbox,
    poll::PollHandle,
};

/// Listener tokens live above every connection token.
pub const LISTENER_TOKEN_OFFSET: usize = 1 << 30;

pub fn is_listener_token(token: Token) -> bool {
    token.0 >= LISTENER_TOKEN_OFFSET && token.0 < usize::MAX
}

/// Whether a failed accept concerns only the connection being accepted, so
/// the rest of the backlog can still be taken.
pub fn is_per_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::TimedOut
    )
}

fn bind(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener))
}

/// The bound listening sockets, owned by the loop that accepts.
pub struct Listeners {
    listeners: Vec<TcpListener>,
    addrs: Vec<SocketAddr>,
}

impl Listeners {
    /// Bind every address, failing on the first one that cannot be bound.
    pub fn bind_all(addrs: &[SocketAddr], backlog: i32) -> Result<Self> {
        let mut listeners = Vec::with_capacity(addrs.len());
        let mut bound = Vec::with_capacity(addrs.len());
        for &addr in addrs {
            let listener = bind(addr, backlog).map_err(|source| ServeError::Bind { addr, source })?;
            bound.push(listener.local_addr()?);
            listeners.push(listener);
        }
        Ok(Self {
            listeners,
            addrs: bound,
        })
    }

    /// Actual bound addresses, with any port 0 resolved.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn register(&mut self, poll: &PollHandle) -> io::Result<()> {
        for (i, listener) in self.listeners.iter_mut().enumerate() {
            poll.register(listener, Token(i + LISTENER_TOKEN_OFFSET), Interest::READABLE)?;
        }
        Ok(())
    }

    pub fn deregister(&mut self, poll: &PollHandle) {
        for listener in &mut self.listeners {
            let _ = poll.deregister(listener);
        }
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut TcpListener> {
        let index = token.0.checked_sub(LISTENER_TOKEN_OFFSET)?;
        self.listeners.get_mut(index)
    }
}

/// Chooses the loop that will own each accepted connection.
pub struct Distributor {
    policy: LoadBalance,
    next: AtomicUsize,
}

impl Distributor {
    pub fn new(policy: LoadBalance) -> Self {
        Self {
            policy,
            next: AtomicUsize::new(0),
        }
    }

    /// Pick a loop index and count the new connection against its load.
    pub fn pick(&self, mailboxes: &[Arc<Mailbox>]) -> usize {
        if mailboxes.len() <= 1 {
            if let Some(mailbox) = mailboxes.first() {
                mailbox.add_load();
            }
            return 0;
        }

        let index = match self.policy {
            LoadBalance::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % mailboxes.len(),
            LoadBalance::LeastConnections => {
                // Rotate the starting point so ties are spread across loops.
                let start = self.next.fetch_add(1, Ordering::Relaxed) % mailboxes.len();
                (0..mailboxes.len())
                    .map(|offset| (start + offset) % mailboxes.len())
                    .min_by_key(|&i| mailboxes[i].load())
                    .unwrap_or(start)
            }
        };
        mailboxes[index].add_load();
        index
    }
}
