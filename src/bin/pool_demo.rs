//! Demo binary exercising a connection pool against a configured fleet of
//! cache servers. The wire protocol used here (a trivial `version\r\n` ->
//! one-line-response command) is a stand-in for whatever real encoder/
//! decoder a caller would supply; the pool itself never hardcodes it.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use cache_pool::{Config, ConnectionPool, OpState, Operation, ProtocolError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Sends `version\r\n` and completes on the first `\r\n`-terminated line.
struct VersionOp {
    written: usize,
    response: Vec<u8>,
    state: OpState,
}

impl VersionOp {
    fn new() -> Self {
        Self {
            written: 0,
            response: Vec::new(),
            state: OpState::Writing,
        }
    }
}

impl Operation for VersionOp {
    fn initialize(&mut self) {
        self.written = 0;
        self.response.clear();
        self.state = OpState::Writing;
    }

    fn write_into(&mut self, buf: &mut [u8]) -> usize {
        const WIRE: &[u8] = b"version\r\n";
        let remaining = &WIRE[self.written..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.written += n;
        if self.written == WIRE.len() {
            self.state = OpState::Reading;
        }
        n
    }

    fn read_from(&mut self, buf: &[u8]) -> Result<usize, ProtocolError> {
        for (i, &b) in buf.iter().enumerate() {
            self.response.push(b);
            if b == b'\n' {
                self.state = OpState::Complete;
                return Ok(i + 1);
            }
        }
        Ok(buf.len())
    }

    fn state(&self) -> OpState {
        self.state
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if config.servers.is_empty() {
        error!("no servers configured; pass --servers host:port[,host:port...]");
        return Ok(());
    }

    let addresses: Vec<SocketAddr> = config
        .servers
        .iter()
        .map(|s| s.parse())
        .collect::<Result<_, _>>()?;

    info!(
        servers = ?config.servers,
        buffer_size = config.buffer_size,
        get_optimization = config.get_optimization,
        "starting connection pool demo"
    );

    let (mut pool, handle) = ConnectionPool::new(
        &addresses,
        config.buffer_size,
        config.get_optimization,
        config.excessive_empty,
        config.excessive_errors,
        config.max_backoff_ms,
    )?;

    let producer_handle = handle.clone();
    let producer = thread::spawn(move || {
        for i in 0..5 {
            let idx = i % producer_handle.get_num_connections();
            producer_handle.add_operation(idx, Box::new(VersionOp::new()));
            thread::sleep(Duration::from_millis(50));
        }
        thread::sleep(Duration::from_secs(1));
        producer_handle.shutdown();
    });

    loop {
        match pool.handle_io() {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "pool shut down, exiting loop");
                break;
            }
        }
    }

    producer.join().expect("producer thread panicked");
    Ok(())
}
