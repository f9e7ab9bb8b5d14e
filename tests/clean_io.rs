//! End-to-end scenarios S1 (clean write/read) and S2 (partial write) from
//! §8: a real loopback TCP connection driven through `ConnectionPool`, with
//! a scripted server thread standing in for a cache server.

mod common;

use std::io::{Read, Write};

use cache_pool::ConnectionPool;
use common::{loopback_listener, pump, serve_once, GetOp};

#[test]
fn s1_clean_get_completes_end_to_end() {
    let (listener, addr) = loopback_listener();
    let server = serve_once(listener, |mut stream| {
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"get k1\r\n");
        stream.write_all(b"VALUE k1 0 3\r\nabc\r\nEND\r\n").unwrap();
    });

    let (mut pool, handle) = ConnectionPool::new(&[addr], 4096, false, 100, 3, 30_000).unwrap();

    let op = GetOp::new("k1");
    let result = op.result.clone();
    handle.add_operation(0, Box::new(op));

    pump(&mut pool, 200, || result.lock().unwrap().is_some());

    assert_eq!(result.lock().unwrap().as_deref(), Some(b"abc".as_slice()));
    server.join().unwrap();
}

#[test]
fn s2_partial_write_resumes_across_would_block() {
    // A single-byte buffer forces `fill_write_buffer`/the socket write loop
    // to span several `handle_io` iterations before the full command lands
    // on the wire, exercising the partial-write path (S2).
    let (listener, addr) = loopback_listener();
    let server = serve_once(listener, |mut stream| {
        let mut received = Vec::new();
        let mut buf = [0u8; 1];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            if received.ends_with(b"\r\n") {
                break;
            }
        }
        assert_eq!(received, b"get slow-key\r\n");
        stream.write_all(b"VALUE slow-key 0 1\r\nx\r\nEND\r\n").unwrap();
    });

    let (mut pool, handle) = ConnectionPool::new(&[addr], 4096, false, 100, 3, 30_000).unwrap();

    let op = GetOp::new("slow-key");
    let result = op.result.clone();
    handle.add_operation(0, Box::new(op));

    pump(&mut pool, 400, || result.lock().unwrap().is_some());

    assert_eq!(result.lock().unwrap().as_deref(), Some(b"x".as_slice()));
    server.join().unwrap();
}
