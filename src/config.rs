use std::{sync::Arc, time::Duration};

use crate::logger::{Logger, TracingLogger};

pub const DEFAULT_LOOPS: usize = 1;
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_BACKLOG: i32 = 1024;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the listener distributes accepted connections across loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalance {
    /// Hand connections to each loop in turn.
    #[default]
    RoundRobin,
    /// Hand each connection to the loop with the fewest open connections.
    LeastConnections,
}

/// Configuration for the server engine.
///
/// Controls the listening addresses, how many loops run, and per-socket
/// behavior. Use ServerConfig::builder() for ergonomic construction.
///
/// ## Addresses
///
/// Addresses are scheme-qualified strings such as `tcp://127.0.0.1:9000`,
/// `tcp4://:9000` or `tcp6://[::1]:9000`. A bare `host:port` means `tcp`.
/// They are parsed when the server starts; a bad one is a startup error.
///
/// ## Loops
///
/// - loops: number of single-threaded event loops; 0 means one per CPU
/// - load_balance: how new connections are assigned to loops
/// - tick_every_loop: run the ticker on every loop, or on loop 0 only. With
///   N loops and the default, `Events::tick` runs N times per period
///
/// ## Resource Limits
///
/// - buffer_size: size of the per-loop read buffer
/// - events_capacity: readiness events handled per wait
/// - close_timeout: how long a closing connection may spend draining its
///   queued output before it is closed anyway
#[derive(Clone)]
pub struct ServerConfig {
    /// Addresses to listen on
    pub addresses: Vec<String>,
    /// Number of event loops
    pub loops: usize,
    /// Connection distribution policy
    pub load_balance: LoadBalance,
    /// Size of each loop's read buffer
    pub buffer_size: usize,
    /// Readiness events fetched per wait
    pub events_capacity: usize,
    /// Listen backlog
    pub backlog: i32,
    /// Enable TCP_NODELAY on accepted sockets
    pub no_delay: bool,
    /// Upper bound for flushing a closing connection
    pub close_timeout: Duration,
    /// Run the ticker on every loop instead of loop 0 only
    pub tick_every_loop: bool,
    /// Logger for engine events
    pub logger: Arc<dyn Logger>,
}

impl ServerConfig {
    /// Create a new builder for ServerConfig
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Number of loops to start, resolving 0 to the CPU count.
    pub fn resolved_loops(&self) -> usize {
        if self.loops == 0 {
            crate::utils::available_loops()
        } else {
            self.loops
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            loops: DEFAULT_LOOPS,
            load_balance: LoadBalance::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            backlog: DEFAULT_BACKLOG,
            no_delay: true,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            tick_every_loop: true,
            logger: Arc::new(TracingLogger),
        }
    }
}

/// Builder for ServerConfig using the builder pattern.
///
/// All fields are optional and will use defaults from ServerConfig::default()
/// if not explicitly set. Calling `address` more than once listens on every
/// address given.
#[derive(Default)]
pub struct ServerConfigBuilder {
    addresses: Vec<String>,
    loops: Option<usize>,
    load_balance: Option<LoadBalance>,
    buffer_size: Option<usize>,
    events_capacity: Option<usize>,
    backlog: Option<i32>,
    no_delay: Option<bool>,
    close_timeout: Option<Duration>,
    tick_every_loop: Option<bool>,
    logger: Option<Arc<dyn Logger>>,
}

impl ServerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address to listen on
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// Set the number of loops (0 = one per CPU)
    pub fn loops(mut self, loops: usize) -> Self {
        self.loops = Some(loops);
        self
    }

    /// Set the connection distribution policy
    pub fn load_balance(mut self, policy: LoadBalance) -> Self {
        self.load_balance = Some(policy);
        self
    }

    /// Set the read buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Set how many readiness events are fetched per wait
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    /// Set the listen backlog
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = Some(backlog);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    /// Set the drain limit for closing connections
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Tick on every loop (the default) or on loop 0 only
    pub fn tick_every_loop(mut self, enabled: bool) -> Self {
        self.tick_every_loop = Some(enabled);
        self
    }

    /// Set the logger implementation
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the ServerConfig
    pub fn build(self) -> ServerConfig {
        let default = ServerConfig::default();
        ServerConfig {
            addresses: self.addresses,
            loops: self.loops.unwrap_or(default.loops),
            load_balance: self.load_balance.unwrap_or(default.load_balance),
            buffer_size: self.buffer_size.unwrap_or(default.buffer_size).max(1),
            events_capacity: self
                .events_capacity
                .unwrap_or(default.events_capacity)
                .max(1),
            backlog: self.backlog.unwrap_or(default.backlog),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
            close_timeout: self.close_timeout.unwrap_or(default.close_timeout),
            tick_every_loop: self.tick_every_loop.unwrap_or(default.tick_every_loop),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}
