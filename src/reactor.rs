//! The per-loop reactor.
//!
//! Each loop owns a poller, a slab of connections and a mailbox. One cycle
//! waits for readiness (bounded by the ticker and the nearest close
//! deadline), applies queued commands, dispatches reads and writes to the
//! callbacks, expires stuck closes and finally runs the ticker.

use std::{
    collections::VecDeque,
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use mio::{net::TcpStream, Interest, Token};
use slab::Slab;

use crate::{
    action::Action,
    config::ServerConfig,
    conn::{Conn, ConnHandle, ConnId},
    event::Readiness,
    events::Events,
    listener::{is_listener_token, is_per_connection_error, Distributor, Listeners},
    logger::{LogLevel, Logger},
    mailbox::{Accepted, Command, Mailbox},
    poll::PollHandle,
    ticker::Ticker,
};

/// State shared by every loop of one server.
pub(crate) struct Shared {
    shutdown: AtomicBool,
    next_id: AtomicU64,
    pub(crate) mailboxes: Vec<Arc<Mailbox>>,
    pub(crate) distributor: Distributor,
    pub(crate) logger: Arc<dyn Logger>,
}

impl Shared {
    pub(crate) fn new(mailboxes: Vec<Arc<Mailbox>>, config: &ServerConfig) -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            mailboxes,
            distributor: Distributor::new(config.load_balance),
            logger: Arc::clone(&config.logger),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Flip the global shutdown flag and wake every loop. Only the first
    /// call has an effect.
    pub(crate) fn trigger_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.logger.log(LogLevel::Info, "shutting down");
        for mailbox in &self.mailboxes {
            if let Err(e) = mailbox.wake() {
                self.logger
                    .log(LogLevel::Warn, &format!("failed to wake loop: {e}"));
            }
        }
    }

    fn next_conn_id(&self) -> ConnId {
        ConnId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    /// No new writes; closes once queued output is flushed or the close
    /// deadline passes.
    Closing,
}

struct Connection {
    stream: TcpStream,
    conn: Conn,
    state: State,
    interest: Interest,
}

pub(crate) struct Reactor<E: Events> {
    index: usize,
    poll: PollHandle,
    ready: Vec<Readiness>,
    connections: Slab<Connection>,
    listeners: Option<Listeners>,
    mailbox: Arc<Mailbox>,
    shared: Arc<Shared>,
    events: Arc<E>,
    ticker: Ticker,
    read_buf: Vec<u8>,
    no_delay: bool,
    close_timeout: Duration,
    ticks: bool,
    closing: VecDeque<(Instant, usize, ConnId)>,
    draining: bool,
}

impl<E: Events> Reactor<E> {
    pub(crate) fn new(
        index: usize,
        poll: PollHandle,
        listeners: Option<Listeners>,
        shared: Arc<Shared>,
        events: Arc<E>,
        config: &ServerConfig,
    ) -> Self {
        let mailbox = Arc::clone(&shared.mailboxes[index]);
        Self {
            index,
            poll,
            ready: Vec::with_capacity(config.events_capacity),
            connections: Slab::with_capacity(64),
            listeners,
            mailbox,
            shared,
            events,
            ticker: Ticker::disarmed(),
            read_buf: vec![0; config.buffer_size],
            no_delay: config.no_delay,
            close_timeout: config.close_timeout,
            ticks: index == 0 || config.tick_every_loop,
            closing: VecDeque::new(),
            draining: false,
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.shared.logger.log(level, message);
    }

    /// Run until shutdown has been requested and every connection is closed.
    pub(crate) fn run(mut self) -> io::Result<()> {
        self.mailbox.enter();
        if self.ticks {
            self.ticker = Ticker::armed_at(Instant::now());
        }
        self.log(LogLevel::Debug, &format!("loop {} started", self.index));

        loop {
            if self.shared.is_shutdown() && !self.draining {
                self.begin_teardown();
            }
            if self.draining && self.connections.is_empty() {
                break;
            }

            let timeout = self.poll_timeout(Instant::now());
            if let Err(e) = self.poll.poll(&mut self.ready, timeout) {
                self.log(
                    LogLevel::Error,
                    &format!("loop {} poll failed: {e}", self.index),
                );
                self.shared.trigger_shutdown();
                self.force_close_all();
                return Err(e);
            }

            self.drain_mailbox();

            let ready = std::mem::take(&mut self.ready);
            for readiness in &ready {
                self.dispatch(*readiness);
                self.drain_mailbox();
            }
            self.ready = ready;

            self.expire_closing(Instant::now());

            if !self.draining && !self.shared.is_shutdown() {
                let now = Instant::now();
                if self.ticker.is_due(now) {
                    self.fire_tick(now);
                    self.drain_mailbox();
                }
            }
        }

        self.drain_mailbox();
        self.log(LogLevel::Debug, &format!("loop {} stopped", self.index));
        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        let tick = if self.draining {
            None
        } else {
            self.ticker.timeout(now)
        };
        let close = self
            .closing
            .front()
            .map(|(deadline, _, _)| deadline.saturating_duration_since(now));
        match (tick, close) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn dispatch(&mut self, readiness: Readiness) {
        if self.shared.is_shutdown() && !self.draining {
            self.begin_teardown();
        }

        let token = readiness.token();
        if is_listener_token(token) {
            if !self.draining {
                self.accept(token);
            }
            return;
        }

        let key = token.0;
        if readiness.is_readable() && !self.draining {
            self.read(key);
        }
        if readiness.is_writable() {
            self.flush(key);
        }
        if readiness.is_error() {
            self.check_socket_error(key);
        }
    }

    /// Accept until the backlog is empty. A failure tied to one connection
    /// is skipped. Anything else, such as running out of descriptors, stops
    /// accepting until the listener's next readiness event: sockets still in
    /// the backlog wait for another connection attempt to arrive.
    fn accept(&mut self, token: Token) {
        loop {
            let Some(listener) = self.listeners.as_mut().and_then(|l| l.get_mut(token)) else {
                return;
            };
            match listener.accept() {
                Ok((stream, remote)) => {
                    let local = match stream.local_addr() {
                        Ok(addr) => addr,
                        Err(e) => {
                            self.log(
                                LogLevel::Warn,
                                &format!("dropping connection from {remote}: {e}"),
                            );
                            continue;
                        }
                    };
                    if self.no_delay {
                        if let Err(e) = stream.set_nodelay(true) {
                            self.log(
                                LogLevel::Debug,
                                &format!("set_nodelay failed for {remote}: {e}"),
                            );
                        }
                    }

                    let accepted = Accepted {
                        stream,
                        id: self.shared.next_conn_id(),
                        local,
                        remote,
                    };
                    let target = self.shared.distributor.pick(&self.shared.mailboxes);
                    if target == self.index {
                        self.open(accepted);
                    } else {
                        self.shared.mailboxes[target].send(Command::Attach(accepted));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_per_connection_error(&e) => {
                    self.log(LogLevel::Debug, &format!("skipping failed accept: {e}"));
                }
                Err(e) => {
                    self.log(LogLevel::Error, &format!("accept failed: {e}"));
                    return;
                }
            }
        }
    }

    /// Take ownership of an accepted socket: fire `opened`, then register it.
    fn open(&mut self, accepted: Accepted) {
        let Accepted {
            mut stream,
            id,
            local,
            remote,
        } = accepted;

        if self.draining || self.shared.is_shutdown() {
            self.mailbox.sub_load();
            return;
        }

        let key = self.connections.vacant_key();
        let handle = ConnHandle::new(id, key, local, remote, Arc::clone(&self.mailbox));
        let mut conn = Conn::new(handle);
        let (out, action) = self.events.opened(&mut conn);

        if let Err(e) = self.poll.register(&mut stream, Token(key), Interest::READABLE) {
            self.log(
                LogLevel::Warn,
                &format!("failed to register connection {id}: {e}"),
            );
            conn.open = false;
            conn.shared_handle().mark_closed();
            self.mailbox.sub_load();
            if self.events.closed(&mut conn) == Action::Shutdown {
                self.shared.trigger_shutdown();
            }
            return;
        }

        let inserted = self.connections.insert(Connection {
            stream,
            conn,
            state: State::Open,
            interest: Interest::READABLE,
        });
        debug_assert_eq!(inserted, key);

        self.log(
            LogLevel::Debug,
            &format!("loop {} opened {id} {remote} -> {local}", self.index),
        );
        self.apply(key, out, action);
    }

    fn read(&mut self, key: usize) {
        loop {
            let Some(entry) = self.connections.get_mut(key) else {
                return;
            };
            if entry.state != State::Open {
                return;
            }

            match entry.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    self.close(key);
                    return;
                }
                Ok(n) => {
                    let (out, action) = self.events.data(&mut entry.conn, &self.read_buf[..n]);
                    self.apply(key, out, action);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let id = entry.conn.id();
                    self.log(LogLevel::Debug, &format!("read error on {id}: {e}"));
                    self.finish_close(key);
                    return;
                }
            }
        }
    }

    fn check_socket_error(&mut self, key: usize) {
        let Some(entry) = self.connections.get(key) else {
            return;
        };
        let failure = match entry.stream.take_error() {
            Ok(Some(e)) | Err(e) => e,
            Ok(None) => return,
        };
        self.log(
            LogLevel::Debug,
            &format!("socket error on {}: {failure}", entry.conn.id()),
        );
        self.finish_close(key);
    }

    /// Apply a callback's output and action to connection `key`.
    fn apply(&mut self, key: usize, out: Vec<u8>, action: Action) {
        let Some(entry) = self.connections.get_mut(key) else {
            return;
        };
        if entry.conn.open {
            entry.conn.out.push(out);
        }
        let close = entry.conn.close_requested || !action.is_none();

        if action == Action::Shutdown {
            self.shared.trigger_shutdown();
        }
        if close {
            self.close(key);
        } else {
            self.flush(key);
        }
    }

    /// Stop accepting writes and close once queued output is flushed.
    fn close(&mut self, key: usize) {
        let Some(entry) = self.connections.get_mut(key) else {
            return;
        };
        if entry.state == State::Closing {
            return;
        }
        entry.state = State::Closing;
        entry.conn.open = false;
        let id = entry.conn.id();
        self.closing
            .push_back((Instant::now() + self.close_timeout, key, id));
        self.flush(key);
    }

    fn flush(&mut self, key: usize) {
        let Some(entry) = self.connections.get_mut(key) else {
            return;
        };
        let events = &self.events;
        let result = entry
            .conn
            .out
            .flush(&mut entry.stream, || events.pre_write());
        let (state, id) = (entry.state, entry.conn.id());

        match result {
            Ok(true) if state == State::Closing => self.finish_close(key),
            Ok(true) => self.set_interest(key, Interest::READABLE),
            Ok(false) if state == State::Closing => self.set_interest(key, Interest::WRITABLE),
            Ok(false) => self.set_interest(key, Interest::READABLE | Interest::WRITABLE),
            Err(e) => {
                self.log(LogLevel::Debug, &format!("write error on {id}: {e}"));
                self.finish_close(key);
            }
        }
    }

    fn set_interest(&mut self, key: usize, interest: Interest) {
        let Some(entry) = self.connections.get_mut(key) else {
            return;
        };
        if entry.interest == interest {
            return;
        }
        match self.poll.reregister(&mut entry.stream, Token(key), interest) {
            Ok(()) => entry.interest = interest,
            Err(e) => {
                let id = entry.conn.id();
                self.log(LogLevel::Warn, &format!("reregister failed for {id}: {e}"));
                self.finish_close(key);
            }
        }
    }

    /// Remove connection `key` and fire `closed` for it. Pending output is
    /// discarded.
    fn finish_close(&mut self, key: usize) {
        let Some(mut entry) = self.connections.try_remove(key) else {
            return;
        };
        if let Err(e) = self.poll.deregister(&mut entry.stream) {
            self.log(LogLevel::Debug, &format!("deregister failed: {e}"));
        }
        entry.conn.open = false;
        entry.conn.out.clear();
        entry.conn.shared_handle().mark_closed();
        self.mailbox.sub_load();

        self.log(
            LogLevel::Debug,
            &format!("loop {} closed {}", self.index, entry.conn.id()),
        );
        if self.events.closed(&mut entry.conn) == Action::Shutdown {
            self.shared.trigger_shutdown();
        }
    }

    fn expire_closing(&mut self, now: Instant) {
        while let Some(&(deadline, key, id)) = self.closing.front() {
            if deadline > now {
                break;
            }
            self.closing.pop_front();

            let live = matches!(
                self.connections.get(key),
                Some(entry) if entry.conn.id() == id && entry.state == State::Closing
            );
            if live {
                self.log(
                    LogLevel::Warn,
                    &format!("close timed out for {id}, dropping pending output"),
                );
                self.finish_close(key);
            }
        }
    }

    fn owns(&self, key: usize, id: ConnId) -> bool {
        matches!(self.connections.get(key), Some(entry) if entry.conn.id() == id)
    }

    fn drain_mailbox(&mut self) {
        while let Some(command) = self.mailbox.recv() {
            match command {
                Command::Attach(accepted) => self.open(accepted),
                Command::Write { key, id, data } => {
                    if !self.owns(key, id) {
                        continue;
                    }
                    if let Some(entry) = self.connections.get_mut(key) {
                        if entry.state == State::Open {
                            entry.conn.out.push(data);
                            self.flush(key);
                        }
                    }
                }
                Command::Close { key, id } => {
                    if self.owns(key, id) {
                        self.close(key);
                    }
                }
            }
        }
    }

    fn fire_tick(&mut self, now: Instant) {
        let (delay, action) = self.events.tick(now);
        self.ticker.schedule(now, delay);
        match action {
            Action::None => {}
            Action::Close => self.log(
                LogLevel::Debug,
                "close returned from tick has no connection to close",
            ),
            Action::Shutdown => self.shared.trigger_shutdown(),
        }
    }

    fn begin_teardown(&mut self) {
        self.draining = true;
        self.ticker.disarm();
        if let Some(mut listeners) = self.listeners.take() {
            listeners.deregister(&self.poll);
        }

        let keys: Vec<usize> = self.connections.iter().map(|(key, _)| key).collect();
        self.log(
            LogLevel::Debug,
            &format!("loop {} closing {} connections", self.index, keys.len()),
        );
        for key in keys {
            self.close(key);
        }
    }

    fn force_close_all(&mut self) {
        let keys: Vec<usize> = self.connections.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.finish_close(key);
        }
    }
}
