//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gothic::{serve_with_config, Action, Conn, Events, Server, ServerConfigBuilder};

/// A server running on a background thread.
pub struct Running<E> {
    pub addr: SocketAddr,
    pub events: Arc<E>,
    handle: thread::JoinHandle<gothic::Result<()>>,
}

impl<E> Running<E> {
    /// Wait for the run call to return.
    pub fn wait(self) -> gothic::Result<()> {
        self.handle.join().expect("server thread panicked")
    }
}

/// Forwards every callback and reports the bound address from `serving`.
struct Reporting<E> {
    inner: Arc<E>,
    bound: Mutex<Option<mpsc::Sender<SocketAddr>>>,
}

impl<E: Events> Events for Reporting<E> {
    fn serving(&self, server: &Server) -> Action {
        if let Some(tx) = self.bound.lock().unwrap().take() {
            let _ = tx.send(server.addrs()[0]);
        }
        self.inner.serving(server)
    }

    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        self.inner.opened(conn)
    }

    fn closed(&self, conn: &mut Conn) -> Action {
        self.inner.closed(conn)
    }

    fn data(&self, conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        self.inner.data(conn, input)
    }

    fn tick(&self, now: Instant) -> (Option<Duration>, Action) {
        self.inner.tick(now)
    }

    fn pre_write(&self) {
        self.inner.pre_write()
    }
}

/// Serve `events` on an ephemeral localhost port.
pub fn spawn_server<E: Events>(builder: ServerConfigBuilder, events: Arc<E>) -> Running<E> {
    let (tx, rx) = mpsc::channel();
    let config = builder.address("tcp://127.0.0.1:0").build();
    let reporting = Reporting {
        inner: Arc::clone(&events),
        bound: Mutex::new(Some(tx)),
    };
    let handle = thread::spawn(move || serve_with_config(config, reporting));
    let addr = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("server did not start");
    Running {
        addr,
        events,
        handle,
    }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

pub fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

/// Read until the peer closes, returning anything received on the way.
pub fn read_to_eof(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    match stream.read_to_end(&mut rest) {
        Ok(_) => rest,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => rest,
        Err(e) => panic!("expected the server to close the connection: {e}"),
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
