//! Per-server connection state (§3, §4.B).
//!
//! A `Node` is created once per configured server address and persists for
//! the lifetime of the pool; only its socket, registration, and buffers
//! cycle across reconnects. It is touched exclusively by the I/O thread.
//! The parts producer threads need — the input queue and the health
//! counter — are shared via `Arc` with a [`NodeHandle`] held by the
//! producer-facing side of the pool.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::operation::{OpState, Operation};
use crossbeam_queue::SegQueue;
use mio::net::TcpStream;
use mio::Token;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The thread-safe sliver of a [`Node`] visible to producer threads.
///
/// Cloning a `NodeHandle` is cheap: every field is an `Arc`. This is the
/// type producer threads hold (indirectly, via `PoolHandle`) to submit
/// operations and to peek at a node's health without touching anything the
/// I/O thread owns exclusively.
#[derive(Clone)]
pub struct NodeHandle {
    pub address: SocketAddr,
    pub(crate) input_queue: Arc<SegQueue<Box<dyn Operation>>>,
    pub(crate) reconnect_attempt: Arc<AtomicU32>,
}

impl NodeHandle {
    /// `true` iff `reconnect_attempt == 0` (Invariant 6): connected and not
    /// queued for reconnect, as last observed. Producers tolerate staleness
    /// here — see §5's cross-thread contract.
    pub fn is_healthy(&self) -> bool {
        self.reconnect_attempt.load(Ordering::Relaxed) == 0
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.load(Ordering::Relaxed)
    }

    pub fn pending_input(&self) -> usize {
        self.input_queue.len()
    }
}

/// A point-in-time snapshot of a node's health, for ambient observability
/// (§10.E). Readable from any thread without touching I/O-thread state.
#[derive(Debug, Clone, Copy)]
pub struct NodeStats {
    pub reconnect_attempt: u32,
    pub pending_input: usize,
}

/// Per-server connection state, owned exclusively by the I/O thread.
pub struct Node {
    pub id: usize,
    pub address: SocketAddr,
    /// `None` while a reconnect is pending (Invariant 3).
    pub stream: Option<TcpStream>,
    /// `true` while `stream` is a freshly opened socket waiting on
    /// `CONNECT` readiness.
    pub connecting: bool,
    pub token: Token,
    pub read_buf: ReadBuffer,
    pub write_buf: WriteBuffer,
    input_queue: Arc<SegQueue<Box<dyn Operation>>>,
    pub write_queue: VecDeque<Box<dyn Operation>>,
    pub read_queue: VecDeque<Box<dyn Operation>>,
    reconnect_attempt: Arc<AtomicU32>,
    pub protocol_errors: u32,
}

impl Node {
    pub fn new(id: usize, address: SocketAddr, buffer_size: usize) -> (Self, NodeHandle) {
        let input_queue = Arc::new(SegQueue::new());
        let reconnect_attempt = Arc::new(AtomicU32::new(0));

        let handle = NodeHandle {
            address,
            input_queue: Arc::clone(&input_queue),
            reconnect_attempt: Arc::clone(&reconnect_attempt),
        };

        let node = Node {
            id,
            address,
            stream: None,
            connecting: false,
            token: Token(id),
            read_buf: ReadBuffer::new(buffer_size),
            write_buf: WriteBuffer::new(buffer_size),
            input_queue,
            write_queue: VecDeque::new(),
            read_queue: VecDeque::new(),
            reconnect_attempt,
            protocol_errors: 0,
        };

        (node, handle)
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.load(Ordering::Relaxed)
    }

    pub fn set_reconnect_attempt(&self, attempt: u32) {
        self.reconnect_attempt.store(attempt, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some() && !self.connecting
    }

    pub fn has_read_op(&self) -> bool {
        !self.read_queue.is_empty()
    }

    pub fn has_write_op(&self) -> bool {
        !self.write_queue.is_empty()
    }

    pub fn current_read_op_mut(&mut self) -> Option<&mut Box<dyn Operation>> {
        self.read_queue.front_mut()
    }

    pub fn remove_current_read_op(&mut self) -> Option<Box<dyn Operation>> {
        self.read_queue.pop_front()
    }

    /// Push this node's shared input queue's contents into `write_queue`,
    /// preserving submission order (§4.B `copyInputQueue`).
    pub fn copy_input_queue(&mut self) {
        while let Some(op) = self.input_queue.pop() {
            self.write_queue.push_back(op);
        }
    }

    pub fn pending_input(&self) -> usize {
        self.input_queue.len()
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            reconnect_attempt: self.reconnect_attempt(),
            pending_input: self.pending_input(),
        }
    }

    /// Compact and refill the write buffer from `write_queue`, optionally
    /// coalescing a run of consecutive single-key GETs (§4.B
    /// `fillWriteBuffer`).
    pub fn fill_write_buffer(&mut self, optimize_gets: bool) {
        self.write_buf.compact();

        if optimize_gets {
            self.try_coalesce_front();
        }

        loop {
            if self.write_buf.spare_len() == 0 {
                break;
            }
            let Some(front) = self.write_queue.front_mut() else {
                break;
            };

            let n = front.write_into(self.write_buf.spare_mut());
            self.write_buf.advance_len(n);

            if front.state() != OpState::Writing {
                let op = self.write_queue.pop_front().expect("front just matched");
                self.read_queue.push_back(op);
                continue;
            }

            if n == 0 {
                // Operation made no progress and still wants to write more
                // than fits in the remaining buffer space; stop and let the
                // next fill pass (after some bytes drain to the socket)
                // pick up where it left off.
                break;
            }
        }
    }

    /// Merge a run of consecutive combinable GETs at the front of
    /// `write_queue` into one coalesced wire operation (§4.B, §8 S4). The
    /// merge itself — producing sub-operations that demultiplex individual
    /// completions out of one multi-key response — is delegated to the
    /// operation abstraction via `Operation::combine_many`; the node only
    /// detects the run and re-threads the queue.
    fn try_coalesce_front(&mut self) {
        let run_len = self
            .write_queue
            .iter()
            .take_while(|op| op.is_combinable_get())
            .count();

        if run_len < 2 {
            return;
        }

        let mut drained: Vec<Box<dyn Operation>> =
            (0..run_len).map(|_| self.write_queue.pop_front().unwrap()).collect();
        let first = drained.remove(0);
        let merged = first.combine_many(drained);

        for op in merged.into_iter().rev() {
            self.write_queue.push_front(op);
        }
    }

    /// Merge outstanding read and write queues back into the head of the
    /// input queue (read-first, per §9's fixed ordering), rewinding every
    /// partially-written or partially-received operation via `initialize()`
    /// so none resumes from a stale byte offset once the write/read buffers
    /// underneath it are discarded, and reset buffers (§4.B `setupResend`).
    pub fn setup_resend(&mut self) {
        let mut requeued: VecDeque<Box<dyn Operation>> = VecDeque::new();

        while let Some(mut op) = self.read_queue.pop_front() {
            op.initialize();
            requeued.push_back(op);
        }
        while let Some(mut op) = self.write_queue.pop_front() {
            op.initialize();
            requeued.push_back(op);
        }

        // Anything already sitting in the input queue (submitted after the
        // disconnect but before reconnect completed) comes after resent
        // ops, preserving submission order.
        while let Some(op) = self.input_queue.pop() {
            requeued.push_back(op);
        }
        for op in requeued {
            self.input_queue.push(op);
        }

        self.read_buf = ReadBuffer::new(self.read_buf.capacity());
        self.write_buf = WriteBuffer::new(self.write_buf.capacity());
        self.protocol_errors = 0;
    }
}
