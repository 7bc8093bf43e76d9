//! # Gothic
//! A callback-driven TCP server engine built on [`mio`].
//!
//! Instead of a thread or task per connection, Gothic runs a small, fixed
//! number of single-threaded event loops. Each loop multiplexes many sockets
//! and drives user code through one set of lifecycle callbacks, the
//! [`Events`] trait. Every callback returns an [`Action`]: keep going, close
//! this connection, or shut the whole server down.
//! ## Features
//! - **Multi-loop**: one reactor per loop, connections spread round-robin or
//!   to the least loaded loop
//! - **Sequential callbacks**: callbacks for the connections of one loop never
//!   run concurrently, so per-connection state needs no locking
//! - **Thread-safe handles**: [`ConnHandle`] routes writes and closes through
//!   the owning loop's lock-free mailbox and is a no-op once closed
//! - **Ticker**: a per-loop timer driving [`Events::tick`]
//! - **Graceful shutdown**: queued output is flushed and every opened
//!   connection sees exactly one [`Events::closed`]
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ serve()     │───▶│   Listener   │───▶│ Distributor │
//! └─────────────┘    └──────────────┘    └─────────────┘
//!                                               │
//!                         ┌─────────────────────┼─────────────────────┐
//!                         ▼                     ▼                     ▼
//!                  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!                  │  Reactor 0  │       │  Reactor 1  │  ...  │  Reactor N  │
//!                  │ PollHandle  │       │ PollHandle  │       │ PollHandle  │
//!                  │ Mailbox     │       │ Mailbox     │       │ Mailbox     │
//!                  │ Ticker      │       │ Ticker      │       │ Ticker      │
//!                  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//! Loop 0 owns the listening sockets. Accepted sockets are either opened in
//! place or handed to another loop through its mailbox.
//! ## Quick Start
//!
//! ```rust,no_run
//! use gothic::prelude::*;
//!
//! struct Echo;
//!
//! impl Events for Echo {
//!     fn opened(&self, _conn: &mut Conn) -> (Vec<u8>, Action) {
//!         (b"HI THERE".to_vec(), Action::None)
//!     }
//!
//!     fn data(&self, _conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
//!         match input {
//!             b"SHUTDOWN" => (b"GOOD BYE".to_vec(), Action::Shutdown),
//!             _ => (input.to_vec(), Action::None),
//!         }
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .address("tcp://127.0.0.1:9000")
//!         .loops(4)
//!         .load_balance(LoadBalance::LeastConnections)
//!         .build();
//!
//!     // Blocks until a callback returns Action::Shutdown.
//!     serve_with_config(config, Echo)?;
//!     Ok(())
//! }
//! ```
//!
//! - [`serve`] / [`serve_with_config`]: the blocking run call
//! - [`Events`]: callbacks invoked by the loops
//! - [`Conn`] / [`ConnHandle`]: loop-local and thread-safe connection views
//! - [`config`]: server configuration and builder
//! - [`frame`]: length-prefixed framing for applications on top
//! - [`logger`]: pluggable logging

pub mod action;
pub mod addr;
pub mod buffer;
pub mod config;
pub mod conn;
pub mod error;
pub mod event;
pub mod events;
pub mod frame;
pub mod listener;
pub mod logger;
mod mailbox;
pub mod poll;
mod reactor;
pub mod server;
pub mod ticker;
pub mod utils;

pub use action::Action;
pub use config::{LoadBalance, ServerConfig, ServerConfigBuilder};
pub use conn::{Conn, ConnHandle, ConnId};
pub use error::{Result, ServeError};
pub use events::Events;
pub use logger::{LogLevel, Logger, NoOpLogger, TracingLogger};
pub use server::{serve, serve_with_config, Server};

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use gothic::prelude::*;
/// ```
///
/// This brings into scope:
/// - [`Events`] and [`Action`] - the callback contract
/// - [`Conn`], [`ConnHandle`] and [`Server`] - what callbacks receive
/// - [`ServerConfig`] and [`LoadBalance`] - configuration
/// - [`serve`] and [`serve_with_config`] - the run calls
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::config::{LoadBalance, ServerConfig};
    pub use crate::conn::{Conn, ConnHandle, ConnId};
    pub use crate::events::Events;
    pub use crate::server::{serve, serve_with_config, Server};
}
