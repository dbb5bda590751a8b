//! Line echo client for the echo_server demo.
//!
//! Usage:
//!   cargo run --example echo_client [SERVER_ADDR]

use std::io::{BufRead, Read, Write};
use std::net::TcpStream;

fn main() {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9090".to_string());

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.expect("stdin read failed");
        let mut stream = TcpStream::connect(&addr).expect("connect failed");
        stream.write_all(line.as_bytes()).expect("send failed");
        stream.write_all(b"\n").expect("send failed");

        let mut echoed = vec![0u8; line.len() + 1];
        stream.read_exact(&mut echoed).expect("recv failed");
        print!("echo: {}", String::from_utf8_lossy(&echoed));
    }
}
