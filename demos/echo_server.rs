//! Echo server demo.
//!
//! Usage:
//!   cargo run --example echo_server [BIND_ADDR]
//!   # default: 127.0.0.1:9090

use ringherd::{Config, Connection, Server, Task, sync_wait};

fn session(mut conn: Box<Connection>) -> Task<()> {
    Task::new(async move {
        let peer = conn.client_addr();
        log::debug!("client {peer} connected");

        let bytes = conn.recv().await;
        if bytes < 1 {
            log::debug!("{peer}: zero bytes read, closing");
            return;
        }
        log::debug!(
            "{peer}: {bytes} bytes read: {}",
            String::from_utf8_lossy(conn.read_buf().as_bytes()).trim_end()
        );

        conn.swap_buffers();
        conn.send().await;
        log::debug!("close connection: {peer}");
    })
}

fn main() {
    ringherd::logger::Builder::new()
        .level(log::LevelFilter::Debug)
        .init()
        .expect("failed to install logger");

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9090".to_string());

    let config = Config {
        workers: 4,
        ..Config::default()
    };

    let mut server = Server::with_config(bind_addr.parse().expect("invalid bind address"), config);
    server.set_handler(session);

    sync_wait(server.serve());
}
