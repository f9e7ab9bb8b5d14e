//! Shared test doubles for the connection-pool integration tests: a real
//! loopback TCP listener standing in for a cache server, and a minimal
//! single-key GET `Operation` (with coalescing support) standing in for a
//! real memcached-protocol encoder/decoder.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cache_pool::{OpState, Operation, ProtocolError};

/// Binds a loopback listener and returns it along with its address. Keep
/// the listener alive for as long as you want connections to succeed.
pub fn loopback_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// An address nothing is listening on, so connects to it fail immediately
/// with connection-refused. Useful for starting a node out unhealthy.
pub fn dead_address() -> SocketAddr {
    let (listener, addr) = loopback_listener();
    drop(listener);
    addr
}

/// Accepts exactly one connection on `listener` and runs `script` against
/// it on a background thread: `script` is handed the accepted stream and
/// is free to read/write/close it however the scenario needs.
pub fn serve_once<F>(listener: TcpListener, script: F) -> thread::JoinHandle<()>
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        script(stream);
    })
}

/// Repeatedly calls `handle_io` until `done()` returns true or `attempts`
/// iterations pass, sleeping briefly between calls to give the background
/// server thread a chance to run.
pub fn pump(pool: &mut cache_pool::ConnectionPool, attempts: usize, mut done: impl FnMut() -> bool) {
    for _ in 0..attempts {
        if done() {
            return;
        }
        let _ = pool.handle_io();
        thread::sleep(Duration::from_millis(10));
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// A single-key GET: writes `get <key>\r\n`, expects
/// `VALUE <key> 0 <len>\r\n<data>\r\n` and captures `data`. The group's last
/// member additionally consumes a trailing `END\r\n`.
///
/// Supports coalescing: `combine_many` has the first member's own
/// `write_into` carry a merged `get k1 k2 k3\r\n` command, and tells every
/// other member (via [`Operation::mark_coalesce_follower`]) that its bytes
/// were already folded in and whether it owns the group's shared `END`.
/// Every member still parses its own `VALUE` block with its own
/// `read_from`, so each completes independently in submission order.
pub struct GetOp {
    pub key: String,
    wire: Vec<u8>,
    written: usize,
    state: OpState,
    pub result: Arc<Mutex<Option<Vec<u8>>>>,
    is_group_terminal: bool,
    /// Set once this op has gone through `combine_many`, either as the
    /// merge's leader or as a follower. `fill_write_buffer` re-checks for a
    /// combinable run on every call, so an already-merged op must stop
    /// reporting combinable or a partial write would trigger a second
    /// merge pass and reset write progress.
    already_coalesced: bool,
}

impl GetOp {
    pub fn new(key: &str) -> Self {
        let wire = format!("get {key}\r\n").into_bytes();
        Self {
            key: key.to_string(),
            wire,
            written: 0,
            state: OpState::Writing,
            result: Arc::new(Mutex::new(None)),
            is_group_terminal: true,
            already_coalesced: false,
        }
    }

    /// Parses exactly one `VALUE` block (and, if terminal, the group's
    /// trailing `END\r\n`) out of the front of `buf`. Unlike a stateful
    /// parser, this works directly off whatever prefix of the node's
    /// still-unconsumed read buffer it is handed each call — safe because
    /// the pool only ever drops bytes this method reports as consumed, so
    /// a short read just gets re-offered, from the same start, with more
    /// bytes appended next time.
    fn parse_value_block(&mut self, buf: &[u8]) -> Result<usize, ProtocolError> {
        let Some(header_end) = find_crlf(buf) else {
            return Ok(0);
        };
        let header = std::str::from_utf8(&buf[..header_end])
            .map_err(|_| ProtocolError("non-utf8 VALUE header".into()))?;
        let mut parts = header.split_whitespace();
        if parts.next() != Some("VALUE") {
            return Err(ProtocolError(format!("expected VALUE, got {header:?}")));
        }
        let _key = parts.next();
        let _flags = parts.next();
        let len: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ProtocolError("missing/invalid length".into()))?;

        let data_start = header_end + 2;
        let data_end = data_start + len;
        let value_trailer_end = data_end + 2; // \r\n after the data block
        if buf.len() < value_trailer_end {
            return Ok(0);
        }

        if !self.is_group_terminal {
            *self.result.lock().unwrap() = Some(buf[data_start..data_end].to_vec());
            self.state = OpState::Complete;
            return Ok(value_trailer_end);
        }

        const END: &[u8] = b"END\r\n";
        let after = &buf[value_trailer_end..];
        if after.len() < END.len() {
            return Ok(0);
        }
        if &after[..END.len()] != END {
            return Err(ProtocolError("expected trailing END".into()));
        }
        *self.result.lock().unwrap() = Some(buf[data_start..data_end].to_vec());
        self.state = OpState::Complete;
        Ok(value_trailer_end + END.len())
    }
}

impl Operation for GetOp {
    fn initialize(&mut self) {
        self.written = 0;
        self.state = OpState::Writing;
        *self.result.lock().unwrap() = None;
    }

    fn write_into(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &self.wire[self.written..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.written += n;
        if self.written == self.wire.len() {
            self.state = OpState::Reading;
        }
        n
    }

    fn read_from(&mut self, buf: &[u8]) -> Result<usize, ProtocolError> {
        self.parse_value_block(buf)
    }

    fn state(&self) -> OpState {
        self.state
    }

    fn is_combinable_get(&self) -> bool {
        !self.already_coalesced
    }

    fn combine_key(&self) -> Option<&str> {
        Some(&self.key)
    }

    fn mark_coalesce_follower(&mut self, is_last: bool) {
        self.wire.clear();
        self.written = 0;
        self.state = OpState::Reading;
        self.is_group_terminal = is_last;
        self.already_coalesced = true;
    }

    fn combine_many(mut self: Box<Self>, mut rest: Vec<Box<dyn Operation>>) -> Vec<Box<dyn Operation>> {
        if rest.is_empty() {
            return vec![self];
        }
        let keys: Vec<String> = std::iter::once(self.key.clone())
            .chain(rest.iter().filter_map(|op| op.combine_key().map(String::from)))
            .collect();
        self.wire = format!("get {}\r\n", keys.join(" ")).into_bytes();
        self.written = 0;
        self.state = OpState::Writing;
        self.is_group_terminal = false; // fixed up below, since rest is non-empty here
        self.already_coalesced = true;

        let last = rest.len() - 1;
        for (i, op) in rest.iter_mut().enumerate() {
            op.mark_coalesce_follower(i == last);
        }

        let mut ops: Vec<Box<dyn Operation>> = Vec::with_capacity(1 + rest.len());
        ops.push(self);
        ops.append(&mut rest);
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_get_parses_value_and_end() {
        let mut op = GetOp::new("k1");
        let mut buf = [0u8; 64];
        let n = op.write_into(&mut buf);
        assert_eq!(&buf[..n], b"get k1\r\n");
        assert_eq!(op.state(), OpState::Reading);

        let consumed = op.read_from(b"VALUE k1 0 3\r\nabc\r\nEND\r\n").unwrap();
        assert_eq!(consumed, "VALUE k1 0 3\r\nabc\r\nEND\r\n".len());
        assert_eq!(op.state(), OpState::Complete);
        assert_eq!(op.result.lock().unwrap().as_deref(), Some(b"abc".as_slice()));
    }

    #[test]
    fn partial_response_waits_for_more_bytes() {
        let mut op = GetOp::new("k1");
        let mut buf = [0u8; 64];
        op.write_into(&mut buf);
        assert_eq!(op.read_from(b"VALUE k1 0 3\r\nab").unwrap(), 0);
        assert_eq!(op.state(), OpState::Reading);
        let consumed = op.read_from(b"VALUE k1 0 3\r\nabc\r\nEND\r\n").unwrap();
        assert_eq!(consumed, "VALUE k1 0 3\r\nabc\r\nEND\r\n".len());
        assert_eq!(op.state(), OpState::Complete);
    }

    #[test]
    fn combine_many_merges_wire_and_demuxes_responses_in_order() {
        let leader = Box::new(GetOp::new("k1"));
        let rest: Vec<Box<dyn Operation>> =
            vec![Box::new(GetOp::new("k2")), Box::new(GetOp::new("k3"))];

        let mut merged = leader.combine_many(rest);
        assert_eq!(merged.len(), 3);

        let mut buf = [0u8; 64];
        let n = merged[0].write_into(&mut buf);
        assert_eq!(&buf[..n], b"get k1 k2 k3\r\n");
        assert_eq!(merged[0].state(), OpState::Reading);
        assert_eq!(merged[1].write_into(&mut buf), 0);
        assert_eq!(merged[1].state(), OpState::Reading);
        assert_eq!(merged[2].write_into(&mut buf), 0);
        assert_eq!(merged[2].state(), OpState::Reading);

        let response =
            b"VALUE k1 0 1\r\na\r\nVALUE k2 0 1\r\nb\r\nVALUE k3 0 1\r\nc\r\nEND\r\n".as_slice();
        let mut offset = 0;
        for (i, op) in merged.iter_mut().enumerate() {
            let consumed = op.read_from(&response[offset..]).unwrap();
            assert!(consumed > 0, "member {i} made no progress");
            assert_eq!(op.state(), OpState::Complete);
            offset += consumed;
        }
        assert_eq!(offset, response.len());
    }
}
