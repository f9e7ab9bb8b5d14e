//! The connection pool core (§2 component E/F, §4.E, §4.F, §4.G).
//!
//! Split into two types along the ownership line the concurrency model
//! actually requires: [`ConnectionPool`] owns every socket, buffer, and
//! registration and is driven exclusively by the I/O thread via
//! [`ConnectionPool::handle_io`]; [`PoolHandle`] is the cheap, `Clone`,
//! `Send + Sync` handle producer threads use to submit operations and
//! request shutdown. Nothing socket-shaped ever crosses between them —
//! only queues, atomics, and the selector wakeup do, matching §5's
//! shared-resource policy.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use mio::event::Event;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::PoolError;
use crate::node::{Node, NodeHandle, NodeStats};
use crate::operation::{OpState, Operation};
use crate::reconnect::ReconnectScheduler;

const WAKER_TOKEN_OFFSET: usize = 0;

/// The producer-facing half of the pool. Cheap to clone; every field is an
/// `Arc`. Safe to call from any number of threads concurrently with each
/// other and with the I/O thread's `handle_io` (§5).
#[derive(Clone)]
pub struct PoolHandle {
    handles: Arc<Vec<NodeHandle>>,
    handoff: Arc<SegQueue<usize>>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    get_optimization: Arc<AtomicBool>,
}

impl PoolHandle {
    /// Enqueue `op` at `preferred_idx`, falling back to the next healthy
    /// node on a circular search, per §4.G.
    pub fn add_operation(&self, preferred_idx: usize, mut op: Box<dyn Operation>) {
        let n = self.handles.len();
        assert!(preferred_idx < n, "node index {preferred_idx} out of range");

        let mut chosen = preferred_idx;
        let mut pos = preferred_idx;
        let mut loops = 0u32;
        loop {
            if self.handles[pos].is_healthy() {
                chosen = pos;
                break;
            }
            pos = (pos + 1) % n;
            if pos == preferred_idx {
                loops += 1;
                if loops > 1 {
                    chosen = preferred_idx;
                    break;
                }
            }
        }

        op.initialize();
        self.handles[chosen].push(op);
        self.handoff.push(chosen);
        if let Err(e) = self.waker.wake() {
            tracing::warn!(error = %e, "failed to wake selector after enqueue");
        }
    }

    pub fn get_num_connections(&self) -> usize {
        self.handles.len()
    }

    pub fn get_address_of(&self, idx: usize) -> SocketAddr {
        self.handles[idx].address
    }

    pub fn set_get_optimization(&self, enabled: bool) {
        self.get_optimization.store(enabled, Ordering::Relaxed);
    }

    pub fn stats(&self, idx: usize) -> NodeStats {
        NodeStats {
            reconnect_attempt: self.handles[idx].reconnect_attempt(),
            pending_input: self.handles[idx].pending_input(),
        }
    }

    /// Request shutdown. Takes effect on the I/O thread's next `handle_io`
    /// call, which closes every channel and the selector before returning
    /// `Err(PoolError::ShutDown)` (§5, §7).
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }
}

impl NodeHandle {
    fn push(&self, op: Box<dyn Operation>) {
        self.input_queue.push(op);
    }
}

/// The I/O-thread-owned pool core. Not `Sync`; the type system enforces
/// that only one thread ever calls `handle_io`.
pub struct ConnectionPool {
    nodes: Vec<Node>,
    poll: Poll,
    waker_token: Token,
    handoff: Arc<SegQueue<usize>>,
    shutdown: Arc<AtomicBool>,
    get_optimization: Arc<AtomicBool>,
    reconnect: ReconnectScheduler,
    empty_selects: u32,
    excessive_empty: u32,
    excessive_errors: u32,
    max_backoff_ms: u64,
    shutdown_cleaned_up: bool,
}

impl ConnectionPool {
    /// Opens a non-blocking socket per address and registers it; never
    /// blocks beyond socket initiation cost (§6 `construct`).
    pub fn new(
        addresses: &[SocketAddr],
        buffer_size: usize,
        get_optimization: bool,
        excessive_empty: u32,
        excessive_errors: u32,
        max_backoff_ms: u64,
    ) -> io::Result<(ConnectionPool, PoolHandle)> {
        let poll = Poll::new()?;
        let waker_token = Token(addresses.len() + WAKER_TOKEN_OFFSET);
        let waker = Arc::new(Waker::new(poll.registry(), waker_token)?);

        let mut nodes = Vec::with_capacity(addresses.len());
        let mut node_handles = Vec::with_capacity(addresses.len());
        let mut reconnect = ReconnectScheduler::new();

        for (id, &address) in addresses.iter().enumerate() {
            let (mut node, handle) = Node::new(id, address, buffer_size);
            match TcpStream::connect(address) {
                Ok(mut stream) => {
                    poll.registry()
                        .register(&mut stream, node.token, Interest::WRITABLE)?;
                    node.stream = Some(stream);
                    node.connecting = true;
                }
                Err(e) => {
                    tracing::warn!(node = id, address = %address, error = %e, "initial connect failed");
                    node.set_reconnect_attempt(1);
                    reconnect.schedule(id, 1, max_backoff_ms);
                }
            }
            nodes.push(node);
            node_handles.push(handle);
        }

        let handoff = Arc::new(SegQueue::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let get_optimization = Arc::new(AtomicBool::new(get_optimization));

        let pool = ConnectionPool {
            nodes,
            poll,
            waker_token,
            handoff: Arc::clone(&handoff),
            shutdown: Arc::clone(&shutdown),
            get_optimization: Arc::clone(&get_optimization),
            reconnect,
            empty_selects: 0,
            excessive_empty,
            excessive_errors,
            max_backoff_ms,
            shutdown_cleaned_up: false,
        };

        let handle = PoolHandle {
            handles: Arc::new(node_handles),
            handoff,
            waker,
            shutdown,
            get_optimization,
        };

        Ok((pool, handle))
    }

    /// One iteration of the readiness loop (§4.E). Fails once `shutdown()`
    /// has been observed.
    pub fn handle_io(&mut self) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            if !self.shutdown_cleaned_up {
                self.close_all();
                self.shutdown_cleaned_up = true;
            }
            return Err(PoolError::ShutDown);
        }

        self.drain_handoff();

        let timeout = self.reconnect.next_timeout();
        let mut events = Events::with_capacity(self.nodes.len() + 1);
        self.poll.poll(&mut events, timeout)?;

        if events.iter().next().is_none() {
            self.empty_selects += 1;
            if self.empty_selects > self.excessive_empty {
                tracing::debug!(
                    empty_selects = self.empty_selects,
                    "excessive empty selects, sweeping all registrations"
                );
                self.sweep_all();
                self.empty_selects = 0;
            }
        } else {
            self.empty_selects = 0;
            for event in events.iter() {
                if event.token() == self.waker_token {
                    continue;
                }
                let idx = event.token().0;
                if idx < self.nodes.len() {
                    self.handle_key(idx, event);
                }
            }
        }

        self.attempt_reconnects();
        Ok(())
    }

    fn handle_key(&mut self, idx: usize, event: &Event) {
        let connecting = self.nodes[idx].connecting;
        let outcome = if connecting {
            self.finish_connect(idx)
        } else {
            let mut res = Ok(());
            if event.is_writable() {
                res = self.write_node(idx);
            }
            if res.is_ok() && event.is_readable() {
                res = self.read_node(idx);
            }
            res
        };

        if outcome.is_err() {
            self.queue_reconnect(idx);
            return;
        }
        self.update_interest(idx);
    }

    fn finish_connect(&mut self, idx: usize) -> Result<(), ()> {
        let connected_ok = {
            let stream = self.nodes[idx].stream.as_ref().ok_or(())?;
            matches!(stream.take_error(), Ok(None))
        };
        if !connected_ok {
            return Err(());
        }

        let node = &mut self.nodes[idx];
        node.connecting = false;
        node.set_reconnect_attempt(0);
        tracing::debug!(node = idx, address = %node.address, "connected");

        // Wake the drain-handoff step so any ops submitted while connecting
        // get copied into the write queue on the next iteration.
        self.handoff.push(idx);

        let write_pending = !self.nodes[idx].write_buf.is_empty();
        if write_pending {
            self.write_node(idx)?;
        }
        Ok(())
    }

    fn write_node(&mut self, idx: usize) -> Result<(), ()> {
        let optimize = self.get_optimization.load(Ordering::Relaxed);
        loop {
            self.nodes[idx].fill_write_buffer(optimize);
            let node = &mut self.nodes[idx];
            if node.write_buf.is_empty() {
                return Ok(());
            }

            let result = {
                let stream = node.stream.as_mut().ok_or(())?;
                stream.write(node.write_buf.unsent())
            };

            match result {
                Ok(0) => return Err(()),
                Ok(n) => node.write_buf.advance_written(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(()),
            }
        }
    }

    fn read_node(&mut self, idx: usize) -> Result<(), ()> {
        loop {
            let node = &mut self.nodes[idx];
            if node.read_buf.spare_mut().is_empty() {
                return Ok(());
            }

            let result = {
                let stream = node.stream.as_mut().ok_or(())?;
                stream.read(node.read_buf.spare_mut())
            };

            match result {
                Ok(0) => return Err(()),
                Ok(n) => {
                    self.nodes[idx].read_buf.advance_filled(n);
                    self.drain_read_buffer(idx)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(()),
            }
        }
    }

    /// Feed buffered bytes to the current read op until it runs dry or
    /// needs more bytes than are available (§4.E.iii).
    fn drain_read_buffer(&mut self, idx: usize) -> Result<(), ()> {
        loop {
            let node = &mut self.nodes[idx];
            if node.read_buf.filled() == 0 {
                return Ok(());
            }

            let outcome = {
                let filled = node.read_buf.filled_slice();
                let Some(op) = node.current_read_op_mut() else {
                    debug_assert!(false, "bytes arrived on node {idx} with no current read op");
                    return Err(());
                };
                op.read_from(filled).map(|consumed| (consumed, op.state()))
            };

            match outcome {
                Ok((consumed, state)) => {
                    node.read_buf.consume(consumed);
                    if state == OpState::Complete {
                        node.remove_current_read_op();
                        node.protocol_errors = 0;
                    }
                    if consumed == 0 {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::debug!(node = idx, error = %e, "protocol error");
                    node.protocol_errors += 1;
                    if node.protocol_errors >= self.excessive_errors {
                        return Err(());
                    }
                    return Ok(());
                }
            }
        }
    }

    fn queue_reconnect(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        if node.stream.is_none() {
            return; // already queued; idempotent per §4.F
        }

        let mut stream = node.stream.take().unwrap();
        let _ = self.poll.registry().deregister(&mut stream);
        node.connecting = false;

        let attempt = node.reconnect_attempt().max(0) + 1;
        node.set_reconnect_attempt(attempt);
        node.setup_resend();

        tracing::warn!(node = idx, address = %node.address, attempt, "queuing reconnect");
        self.reconnect.schedule(idx, attempt, self.max_backoff_ms);
    }

    fn attempt_reconnects(&mut self) {
        for idx in self.reconnect.drain_ready() {
            self.start_connect(idx);
        }
    }

    fn start_connect(&mut self, idx: usize) {
        let address = self.nodes[idx].address;
        match TcpStream::connect(address) {
            Ok(mut stream) => {
                let token = self.nodes[idx].token;
                if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::WRITABLE) {
                    tracing::warn!(node = idx, error = %e, "failed to register reconnecting socket");
                    self.reschedule_failed_connect(idx);
                    return;
                }
                let node = &mut self.nodes[idx];
                node.stream = Some(stream);
                node.connecting = true;
            }
            Err(e) => {
                tracing::warn!(node = idx, address = %address, error = %e, "reconnect attempt failed");
                self.reschedule_failed_connect(idx);
            }
        }
    }

    fn reschedule_failed_connect(&mut self, idx: usize) {
        let attempt = self.nodes[idx].reconnect_attempt().max(0) + 1;
        self.nodes[idx].set_reconnect_attempt(attempt);
        self.reconnect.schedule(idx, attempt, self.max_backoff_ms);
    }

    /// §4.E step 1: drain the handoff queue, writing where possible and
    /// always copying input to write queues, then recomputing interest.
    fn drain_handoff(&mut self) {
        let mut seen = HashSet::new();
        while let Some(idx) = self.handoff.pop() {
            if idx >= self.nodes.len() || !seen.insert(idx) {
                continue;
            }

            self.nodes[idx].copy_input_queue();

            if self.nodes[idx].is_connected() && self.nodes[idx].has_write_op() {
                if self.write_node(idx).is_err() {
                    self.queue_reconnect(idx);
                    continue;
                }
            }
            self.update_interest(idx);
        }
    }

    /// Defensive sweep after `EXCESSIVE_EMPTY` consecutive empty selects
    /// (§4.E step 3): nodes with pending work get a direct I/O attempt;
    /// a node whose attempt still fails is queued for reconnect, since its
    /// registration is presumed stuck.
    fn sweep_all(&mut self) {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].stream.is_none() || self.nodes[idx].connecting {
                continue;
            }
            let has_ops = self.nodes[idx].has_read_op() || self.nodes[idx].has_write_op();
            if !has_ops {
                continue;
            }
            if self.write_node(idx).is_err() || self.read_node(idx).is_err() {
                self.queue_reconnect(idx);
                continue;
            }
            self.update_interest(idx);
        }
    }

    /// §4.E.iv: recompute and apply the interest set for a node's
    /// registration. `mio::Interest` cannot represent "no interest"; an
    /// idle connected node (no read, no write op) keeps `READABLE` so a
    /// peer-initiated close is still observed promptly.
    fn update_interest(&mut self, idx: usize) {
        let connecting = self.nodes[idx].connecting;
        let has_read = self.nodes[idx].has_read_op();
        let has_write = self.nodes[idx].has_write_op() || !self.nodes[idx].write_buf.is_empty();
        let token = self.nodes[idx].token;

        let interest = if connecting {
            Interest::WRITABLE
        } else if has_read && has_write {
            Interest::READABLE | Interest::WRITABLE
        } else if has_write {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        if let Some(stream) = self.nodes[idx].stream.as_mut() {
            let _ = self.poll.registry().reregister(stream, token, interest);
        }
    }

    fn close_all(&mut self) {
        for node in &mut self.nodes {
            if let Some(mut stream) = node.stream.take() {
                let _ = self.poll.registry().deregister(&mut stream);
            }
            node.connecting = false;
        }
        tracing::info!("connection pool shut down");
    }
}
