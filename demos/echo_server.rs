use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Result;
use gothic::prelude::*;
use tracing_subscriber::EnvFilter;

/// Greets every peer, echoes what it sends and stops the server on
/// `SHUTDOWN`. Prints the number of open connections every few seconds.
#[derive(Default)]
struct EchoServer {
    open: AtomicUsize,
}

impl Events for EchoServer {
    fn serving(&self, server: &Server) -> Action {
        for addr in server.addrs() {
            println!("echo server listening on {addr} ({} loops)", server.num_loops());
        }
        Action::None
    }

    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        self.open.fetch_add(1, Ordering::Relaxed);
        println!("{} connected from {}", conn.id(), conn.remote_addr());
        (b"HI THERE\r\n".to_vec(), Action::None)
    }

    fn closed(&self, conn: &mut Conn) -> Action {
        self.open.fetch_sub(1, Ordering::Relaxed);
        println!("{} disconnected", conn.id());
        Action::None
    }

    fn data(&self, _conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        match trim(input) {
            b"SHUTDOWN" => (b"GOOD BYE\r\n".to_vec(), Action::Shutdown),
            b"QUIT" => (b"BYE\r\n".to_vec(), Action::Close),
            _ => (input.to_vec(), Action::None),
        }
    }

    fn tick(&self, _now: Instant) -> (Option<Duration>, Action) {
        println!("open connections: {}", self.open.load(Ordering::Relaxed));
        (Some(Duration::from_secs(5)), Action::None)
    }
}

fn trim(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    let end = input
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &input[start..end]
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tcp://127.0.0.1:9000".to_string());

    let config = ServerConfig::builder()
        .address(addr)
        .loops(0)
        .load_balance(LoadBalance::LeastConnections)
        .build();

    let events = Arc::new(EchoServer::default());
    serve_with_config(config, Arc::clone(&events))?;

    println!(
        "server stopped, {} connections left open",
        events.open.load(Ordering::Relaxed)
    );
    Ok(())
}
