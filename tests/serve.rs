//! End-to-end tests driving the engine with plain std TCP clients.

mod common;

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::{connect, read_exact, read_to_eof, spawn_server, wait_for};
use gothic::{
    serve, Action, Conn, ConnHandle, Events, LoadBalance, NoOpLogger, ServeError, Server,
    ServerConfig,
};

/// Greets, echoes, shuts down on `SHUTDOWN`, and drives a retained handle
/// to the second concurrently open connection from the ticker.
struct Greeter {
    opened: AtomicIsize,
    max: AtomicUsize,
    pre_writes: AtomicUsize,
    ticks: AtomicUsize,
    second: Mutex<Option<ConnHandle>>,
    second_steps: AtomicUsize,
    retained: Mutex<Option<ConnHandle>>,
    give_up: Instant,
}

impl Greeter {
    fn new() -> Self {
        Self {
            opened: AtomicIsize::new(0),
            max: AtomicUsize::new(0),
            pre_writes: AtomicUsize::new(0),
            ticks: AtomicUsize::new(0),
            second: Mutex::new(None),
            second_steps: AtomicUsize::new(0),
            retained: Mutex::new(None),
            give_up: Instant::now() + Duration::from_secs(30),
        }
    }
}

impl Events for Greeter {
    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        assert!(conn.local_addr().port() != 0);
        assert!(conn.remote_addr().port() != 0);
        self.max.fetch_add(1, Ordering::SeqCst);
        if self.opened.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
            *self.second.lock().unwrap() = Some(conn.handle());
            self.retained
                .lock()
                .unwrap()
                .get_or_insert_with(|| conn.handle());
        }
        (b"HI THERE".to_vec(), Action::None)
    }

    fn closed(&self, _conn: &mut Conn) -> Action {
        self.opened.fetch_sub(1, Ordering::SeqCst);
        Action::None
    }

    fn data(&self, _conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        if input == b"SHUTDOWN" {
            return (b"GOOD BYE".to_vec(), Action::Shutdown);
        }
        (input.to_vec(), Action::None)
    }

    fn tick(&self, now: Instant) -> (Option<Duration>, Action) {
        if self.ticks.fetch_add(1, Ordering::SeqCst) == 0 {
            return (Some(Duration::ZERO), Action::None);
        }
        if now > self.give_up {
            return (None, Action::Shutdown);
        }

        let mut second = self.second.lock().unwrap();
        if let Some(handle) = second.as_ref() {
            match self.second_steps.fetch_add(1, Ordering::SeqCst) {
                0 => handle.write(b"HERE"),
                1 => {
                    handle.close();
                    *second = None;
                }
                _ => {}
            }
        }
        (Some(Duration::from_millis(100)), Action::None)
    }

    fn pre_write(&self) {
        self.pre_writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_greet_echo_tick_and_shutdown() {
    let server = spawn_server(ServerConfig::builder(), Arc::new(Greeter::new()));
    let addr = server.addr;

    let mut first = connect(addr);
    assert_eq!(read_exact(&mut first, 8), b"HI THERE");
    first.write_all(b"HELLO").unwrap();
    assert_eq!(read_exact(&mut first, 5), b"HELLO");

    let extra = thread::spawn(move || {
        let mut second = connect(addr);
        assert_eq!(read_exact(&mut second, 8), b"HI THERE");
        assert_eq!(read_exact(&mut second, 4), b"HERE");
        assert!(read_to_eof(&mut second).is_empty());

        (0..15).map(|_| TcpStream::connect(addr).unwrap()).collect::<Vec<_>>()
    });
    let held = extra.join().unwrap();

    let events = Arc::clone(&server.events);
    assert!(wait_for(Duration::from_secs(5), || events.max.load(Ordering::SeqCst) == 17));

    first.write_all(b"SHUTDOWN").unwrap();
    assert_eq!(read_exact(&mut first, 8), b"GOOD BYE");
    assert!(read_to_eof(&mut first).is_empty());

    server.wait().unwrap();
    drop(held);

    assert!(events.pre_writes.load(Ordering::SeqCst) > 0);
    assert_eq!(events.opened.load(Ordering::SeqCst), 0);
    assert_eq!(events.max.load(Ordering::SeqCst), 17);

    // The retained handle outlives its connection.
    let retained = events.retained.lock().unwrap().clone().unwrap();
    assert!(retained.is_closed());
    retained.write(b"");
    retained.write(b"too late");
    retained.close();
}

#[derive(Default)]
struct HelloThere {
    opened: AtomicIsize,
    closed: AtomicUsize,
}

impl Events for HelloThere {
    fn opened(&self, _conn: &mut Conn) -> (Vec<u8>, Action) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        (Vec::new(), Action::None)
    }

    fn closed(&self, _conn: &mut Conn) -> Action {
        self.opened.fetch_sub(1, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
        Action::None
    }

    fn data(&self, _conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        let text = String::from_utf8_lossy(input);
        if text.contains("hello") {
            (b"there".to_vec(), Action::Close)
        } else if text.contains("shutdown") {
            (b"bye".to_vec(), Action::Shutdown)
        } else {
            (b"?".to_vec(), Action::Close)
        }
    }
}

#[test]
fn test_close_affects_only_one_connection() {
    let server = spawn_server(ServerConfig::builder(), Arc::new(HelloThere::default()));

    let mut clients: Vec<TcpStream> = (0..50).map(|_| connect(server.addr)).collect();
    for client in &mut clients {
        client.write_all(b"hello").unwrap();
        assert_eq!(read_exact(client, 5), b"there");
        assert!(read_to_eof(client).is_empty());
    }

    let mut last = connect(server.addr);
    last.write_all(b"shutdown").unwrap();
    assert_eq!(read_exact(&mut last, 3), b"bye");

    let events = Arc::clone(&server.events);
    server.wait().unwrap();
    assert_eq!(events.opened.load(Ordering::SeqCst), 0);
    assert_eq!(events.closed.load(Ordering::SeqCst), 51);
}

/// Records when each tick ran and follows a fixed schedule.
#[derive(Default)]
struct Schedule {
    at: Mutex<Vec<Instant>>,
}

impl Events for Schedule {
    fn tick(&self, now: Instant) -> (Option<Duration>, Action) {
        let mut at = self.at.lock().unwrap();
        at.push(now);
        match at.len() {
            1..=3 => (Some(Duration::ZERO), Action::None),
            // Close has nothing to close from the ticker.
            4 => (Some(Duration::from_millis(50)), Action::Close),
            5 => (Some(Duration::from_millis(80)), Action::None),
            _ => (None, Action::Shutdown),
        }
    }
}

#[test]
fn test_tick_delays() {
    let server = spawn_server(ServerConfig::builder(), Arc::new(Schedule::default()));
    let events = Arc::clone(&server.events);
    server.wait().unwrap();

    let at = events.at.lock().unwrap();
    assert_eq!(at.len(), 6);
    assert!(at[4] - at[3] >= Duration::from_millis(50));
    assert!(at[5] - at[4] >= Duration::from_millis(80));
}

/// Pushes through retained handles from outside any callback.
#[derive(Default)]
struct Pushed {
    handles: Mutex<Vec<ConnHandle>>,
    stop: AtomicBool,
    closed: AtomicUsize,
}

impl Events for Pushed {
    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        self.handles.lock().unwrap().push(conn.handle());
        (Vec::new(), Action::None)
    }

    fn closed(&self, conn: &mut Conn) -> Action {
        // Writes are no longer accepted once closed.
        conn.write(b"ignored");
        conn.handle().write(b"ignored");
        self.closed.fetch_add(1, Ordering::SeqCst);
        Action::None
    }

    fn tick(&self, _now: Instant) -> (Option<Duration>, Action) {
        if self.stop.load(Ordering::SeqCst) {
            (None, Action::Shutdown)
        } else {
            (Some(Duration::from_millis(10)), Action::None)
        }
    }
}

#[test]
fn test_external_handle_write_and_close() {
    let server = spawn_server(ServerConfig::builder(), Arc::new(Pushed::default()));
    let events = Arc::clone(&server.events);

    let mut client = connect(server.addr);
    assert!(wait_for(Duration::from_secs(5), || events.handles.lock().unwrap().len() == 1));
    let handle = events.handles.lock().unwrap()[0].clone();
    assert_eq!(handle.remote_addr(), client.local_addr().unwrap());

    handle.write(b"one ");
    handle.write(b"two");
    assert_eq!(read_exact(&mut client, 7), b"one two");

    handle.close();
    assert!(read_to_eof(&mut client).is_empty());
    assert!(wait_for(Duration::from_secs(5), || handle.is_closed()));

    for _ in 0..3 {
        handle.write(b"after close");
        handle.close();
    }

    events.stop.store(true, Ordering::SeqCst);
    server.wait().unwrap();
    assert_eq!(events.closed.load(Ordering::SeqCst), 1);
}

/// Records which loop thread opened each connection.
#[derive(Default)]
struct Spread {
    threads: Mutex<HashSet<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl Events for Spread {
    fn serving(&self, server: &Server) -> Action {
        assert_eq!(server.num_loops(), 4);
        Action::None
    }

    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        let name = thread::current().name().unwrap_or_default().to_string();
        self.threads.lock().unwrap().insert(name);
        self.opened.fetch_add(1, Ordering::SeqCst);
        conn.set_context(conn.id());
        (Vec::new(), Action::None)
    }

    fn closed(&self, conn: &mut Conn) -> Action {
        assert_eq!(conn.context::<gothic::ConnId>(), Some(&conn.id()));
        self.closed.fetch_add(1, Ordering::SeqCst);
        Action::None
    }

    fn data(&self, _conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        match input {
            b"stop" => (b"stopping".to_vec(), Action::Shutdown),
            _ => (input.to_vec(), Action::None),
        }
    }
}

#[test]
fn test_shutdown_closes_every_loop() {
    let builder = ServerConfig::builder()
        .loops(4)
        .load_balance(LoadBalance::RoundRobin);
    let server = spawn_server(builder, Arc::new(Spread::default()));
    let events = Arc::clone(&server.events);

    let mut clients: Vec<TcpStream> = (0..8).map(|_| connect(server.addr)).collect();
    for (i, client) in clients.iter_mut().enumerate() {
        let msg = format!("ping {i}");
        client.write_all(msg.as_bytes()).unwrap();
        assert_eq!(read_exact(client, msg.len()), msg.as_bytes());
    }
    assert_eq!(events.opened.load(Ordering::SeqCst), 8);

    let expected: HashSet<String> = (0..4).map(|i| format!("gothic-loop-{i}")).collect();
    assert_eq!(*events.threads.lock().unwrap(), expected);

    clients[5].write_all(b"stop").unwrap();
    assert_eq!(read_exact(&mut clients[5], 8), b"stopping");
    for client in &mut clients {
        assert!(read_to_eof(client).is_empty());
    }

    server.wait().unwrap();
    assert_eq!(events.closed.load(Ordering::SeqCst), 8);
}

/// Closes through `Conn::close` and shuts down from `closed`.
#[derive(Default)]
struct CloseThenStop {
    data_calls: AtomicUsize,
}

impl Events for CloseThenStop {
    fn data(&self, conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        conn.write(b"last: ");
        conn.write(input);
        conn.close();
        (Vec::new(), Action::None)
    }

    fn closed(&self, _conn: &mut Conn) -> Action {
        Action::Shutdown
    }
}

#[test]
fn test_close_from_conn_and_shutdown_from_closed() {
    let server = spawn_server(ServerConfig::builder(), Arc::new(CloseThenStop::default()));
    let mut client = connect(server.addr);
    client.write_all(b"words").unwrap();

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"last: words");

    let events = Arc::clone(&server.events);
    server.wait().unwrap();
    assert_eq!(events.data_calls.load(Ordering::SeqCst), 1);
}

/// Echoes and reports `serving`, for the plain `serve` entry point.
#[derive(Default)]
struct Plain {
    serving: AtomicBool,
}

impl Events for Plain {
    fn serving(&self, _server: &Server) -> Action {
        self.serving.store(true, Ordering::SeqCst);
        Action::None
    }

    fn data(&self, _conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        match input {
            b"stop" => (b"done".to_vec(), Action::Shutdown),
            _ => (input.to_vec(), Action::None),
        }
    }
}

#[test]
fn test_serve_runs_until_shutdown() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let addr = format!("tcp://127.0.0.1:{port}");
    let events = Arc::new(Plain::default());
    let running = {
        let events = Arc::clone(&events);
        thread::spawn(move || serve(events, &[addr.as_str()]))
    };
    assert!(wait_for(Duration::from_secs(5), || events.serving.load(Ordering::SeqCst)));

    let mut client = connect(([127, 0, 0, 1], port).into());
    client.write_all(b"echo").unwrap();
    assert_eq!(read_exact(&mut client, 4), b"echo");
    client.write_all(b"stop").unwrap();
    assert_eq!(read_exact(&mut client, 4), b"done");
    assert!(read_to_eof(&mut client).is_empty());

    running.join().unwrap().unwrap();
}

struct Refuse;

impl Events for Refuse {
    fn serving(&self, _server: &Server) -> Action {
        Action::Shutdown
    }

    fn opened(&self, _conn: &mut Conn) -> (Vec<u8>, Action) {
        panic!("no connection may be opened");
    }
}

#[test]
fn test_serving_shutdown_aborts_startup() {
    let server = spawn_server(ServerConfig::builder(), Arc::new(Refuse));
    let addr = server.addr;
    server.wait().unwrap();
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_startup_errors() {
    let err = serve(Refuse, &["udp://127.0.0.1:0"]).unwrap_err();
    assert!(matches!(err, ServeError::UnsupportedScheme(_)));

    let err = serve(Refuse, &["tcp://not an address"]).unwrap_err();
    assert!(matches!(err, ServeError::InvalidAddress(_)));

    let err = serve(Refuse, &[]).unwrap_err();
    assert!(matches!(err, ServeError::NoAddress));

    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = format!("tcp://{}", taken.local_addr().unwrap());
    let config = ServerConfig::builder()
        .address(addr)
        .logger(Arc::new(NoOpLogger))
        .build();
    let err = gothic::serve_with_config(config, Refuse).unwrap_err();
    assert!(matches!(err, ServeError::Bind { .. }));
}
