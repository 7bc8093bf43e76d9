use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crate::{
    action::Action,
    addr::parse_address,
    config::ServerConfig,
    error::{Result, ServeError},
    events::Events,
    listener::Listeners,
    logger::LogLevel,
    mailbox::Mailbox,
    poll::PollHandle,
    reactor::{Reactor, Shared},
};

/// Server information passed to [`Events::serving`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    addrs: Vec<SocketAddr>,
    num_loops: usize,
}

impl Server {
    /// Bound listening addresses, with any port 0 resolved to the real port.
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn num_loops(&self) -> usize {
        self.num_loops
    }
}

/// Serve `addrs` with default configuration, blocking until shutdown.
///
/// ```rust,no_run
/// use gothic::{serve, Action, Conn, Events};
///
/// struct Echo;
///
/// impl Events for Echo {
///     fn data(&self, _conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
///         (input.to_vec(), Action::None)
///     }
/// }
///
/// serve(Echo, &["tcp://127.0.0.1:9000"])?;
/// # Ok::<(), gothic::ServeError>(())
/// ```
pub fn serve<E: Events>(events: E, addrs: &[&str]) -> Result<()> {
    let mut builder = ServerConfig::builder();
    for addr in addrs {
        builder = builder.address(*addr);
    }
    serve_with_config(builder.build(), events)
}

/// Triggers a global shutdown if the loop thread unwinds, so sibling loops
/// still drain and exit.
struct ShutdownOnPanic(Arc<Shared>);

impl Drop for ShutdownOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0
                .logger
                .log(LogLevel::Error, "loop panicked, shutting down");
            self.0.trigger_shutdown();
        }
    }
}

/// Serve with an explicit configuration, blocking until every loop has
/// stopped.
///
/// Fails only when startup fails. A shutdown requested by a callback ends
/// the call with `Ok(())`.
pub fn serve_with_config<E: Events>(config: ServerConfig, events: E) -> Result<()> {
    if config.addresses.is_empty() {
        return Err(ServeError::NoAddress);
    }
    let logger = Arc::clone(&config.logger);

    let addrs = config
        .addresses
        .iter()
        .map(|addr| parse_address(addr))
        .collect::<Result<Vec<_>>>()?;
    let mut listeners = Listeners::bind_all(&addrs, config.backlog)?;

    let num_loops = config.resolved_loops();
    let mut polls = Vec::with_capacity(num_loops);
    let mut mailboxes = Vec::with_capacity(num_loops);
    for _ in 0..num_loops {
        let poll = PollHandle::new(config.events_capacity)?;
        mailboxes.push(Arc::new(Mailbox::new(poll.waker())));
        polls.push(poll);
    }
    listeners.register(&polls[0])?;

    let server = Server {
        addrs: listeners.local_addrs().to_vec(),
        num_loops,
    };
    for addr in server.addrs() {
        logger.log(LogLevel::Info, &format!("listening on {addr}"));
    }

    if events.serving(&server) == Action::Shutdown {
        logger.log(LogLevel::Info, "startup aborted by serving callback");
        return Ok(());
    }

    let shared = Arc::new(Shared::new(mailboxes, &config));
    let events = Arc::new(events);
    let mut listeners = Some(listeners);
    let mut handles: Vec<JoinHandle<std::io::Result<()>>> = Vec::with_capacity(num_loops);

    for (index, poll) in polls.into_iter().enumerate() {
        let reactor = Reactor::new(
            index,
            poll,
            if index == 0 { listeners.take() } else { None },
            Arc::clone(&shared),
            Arc::clone(&events),
            &config,
        );
        let guard = ShutdownOnPanic(Arc::clone(&shared));

        let spawned = thread::Builder::new()
            .name(format!("gothic-loop-{index}"))
            .spawn(move || {
                let _guard = guard;
                reactor.run()
            });

        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                logger.log(LogLevel::Error, &format!("failed to spawn loop {index}: {e}"));
                shared.trigger_shutdown();
                join_loops(handles, &shared);
                return Err(ServeError::Spawn(e));
            }
        }
    }

    join_loops(handles, &shared);
    logger.log(LogLevel::Info, "server stopped");
    Ok(())
}

fn join_loops(handles: Vec<JoinHandle<std::io::Result<()>>>, shared: &Shared) {
    let mut panic = None;
    for (index, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => shared
                .logger
                .log(LogLevel::Error, &format!("loop {index} failed: {e}")),
            Err(payload) => {
                panic.get_or_insert(payload);
            }
        }
    }

    // Sockets handed to a loop that had already stopped are dropped here.
    for mailbox in &shared.mailboxes {
        while mailbox.recv().is_some() {}
    }

    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }
}
