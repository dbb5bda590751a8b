//! End-to-end tests over real loopback TCP connections.
//!
//! Each test launches a server with a dedicated handler, connects with std
//! TCP sockets, and verifies what comes back.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ringherd::{Config, Connection, Handler, Server, Task, sync_wait};

// ── Handlers ────────────────────────────────────────────────────────────

fn echo_session(mut conn: Box<Connection>) -> Task<()> {
    Task::new(async move {
        let bytes = conn.recv().await;
        if bytes < 1 {
            return;
        }
        conn.swap_buffers();
        conn.send().await;
    })
}

static ZERO_READS: AtomicU32 = AtomicU32::new(0);

fn counting_session(mut conn: Box<Connection>) -> Task<()> {
    Task::new(async move {
        let bytes = conn.recv().await;
        if bytes < 1 {
            ZERO_READS.fetch_add(1, Ordering::SeqCst);
            return;
        }
        conn.swap_buffers();
        conn.send().await;
    })
}

fn delayed_echo_session(mut conn: Box<Connection>) -> Task<()> {
    Task::new(async move {
        let bytes = conn.recv().await;
        if bytes < 1 {
            return;
        }
        conn.reactor().timeout(Duration::from_millis(50)).await;
        conn.swap_buffers();
        conn.send().await;
    })
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn start_server(handler: Handler, workers: usize) -> SocketAddr {
    let config = Config {
        workers,
        ..Config::default()
    };
    let mut server = Server::with_config("127.0.0.1:0".parse().unwrap(), config);
    server.set_handler(handler);
    let addr = server.local_addr().unwrap();
    thread::spawn(move || sync_wait(server.serve()));
    addr
}

fn round_trip(addr: SocketAddr, msg: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(msg).unwrap();
    stream.flush().unwrap();

    let mut buf = vec![0u8; msg.len()];
    let mut total = 0;
    while total < msg.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => panic!("read error: {e}"),
        }
    }
    buf.truncate(total);
    buf
}

// ── Tests ───────────────────────────────────────────────────────────────

#[test]
fn echoes_single_line() {
    let addr = start_server(echo_session, 2);
    let echoed = round_trip(addr, b"hello\n");
    assert_eq!(echoed, b"hello\n");
}

#[test]
fn peer_close_without_data_is_not_an_error() {
    let addr = start_server(counting_session, 1);

    {
        let _stream = TcpStream::connect(addr).unwrap();
        // Drop immediately: the handler's recv sees 0.
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while ZERO_READS.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "handler never observed the close");
        thread::sleep(Duration::from_millis(10));
    }

    // Server is still healthy afterwards.
    assert_eq!(round_trip(addr, b"still alive"), b"still alive");
}

#[test]
fn many_connections_no_cross_talk() {
    const CLIENTS: usize = 1024;
    const WAVES: usize = 32;

    let addr = start_server(echo_session, 4);

    let mut handles = Vec::new();
    for wave in 0..WAVES {
        handles.push(thread::spawn(move || {
            for i in 0..CLIENTS / WAVES {
                let id = wave * (CLIENTS / WAVES) + i;
                let mut msg = vec![0u8; 64];
                for (j, byte) in msg.iter_mut().enumerate() {
                    *byte = ((id * 31 + j) % 251) as u8;
                }
                let echoed = round_trip(addr, &msg);
                assert_eq!(echoed, msg, "client {id} got foreign bytes");
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Still responsive after the burst.
    assert_eq!(round_trip(addr, b"after the flood"), b"after the flood");
}

#[test]
fn timeout_delays_the_reply() {
    let addr = start_server(delayed_echo_session, 1);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(b"ping").unwrap();
    stream.flush().unwrap();

    let started = Instant::now();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(&buf, b"ping");
    assert!(elapsed >= Duration::from_millis(50), "replied at {elapsed:?}");
    assert!(elapsed < Duration::from_millis(100), "replied at {elapsed:?}");
}

#[test]
fn sync_wait_round_trip() {
    assert_eq!(sync_wait(Task::new(async { 42 })), 42);
}
