//! Operation contract (§4.A): the entire coupling between the pool and the
//! higher-level client. The pool never downcasts or otherwise inspects an
//! operation beyond this trait.

use crate::error::ProtocolError;

/// Where an operation is in its lifecycle. The pool only ever reacts to
/// `Complete`; everything else just gates whether the operation is fed more
/// bytes to write or to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Writing,
    Reading,
    Complete,
}

/// An opaque unit of work submitted to a [`crate::pool::ConnectionPool`].
///
/// Implementations own their own wire encoding/decoding; the pool's job is
/// purely to shuttle bytes between an operation and a socket in the right
/// order.
pub trait Operation: Send {
    /// Called exactly once, just before the operation is pushed onto a
    /// node's input queue. Also called again by `setup_resend` to rewind an
    /// operation that had only partially received its response before a
    /// reconnect, so it can be replayed from scratch.
    fn initialize(&mut self);

    /// Append this operation's on-wire bytes into `buf`, starting at
    /// `buf[..]`'s current fill point. Returns the number of bytes written.
    /// May be called multiple times across partial writes; the operation is
    /// responsible for remembering how much of its payload it has already
    /// handed to the pool.
    fn write_into(&mut self, buf: &mut [u8]) -> usize;

    /// Consume zero or more bytes from `buf`, advancing internal parse
    /// state. Returns the number of bytes consumed, or a [`ProtocolError`]
    /// if the bytes could not be interpreted as a continuation of this
    /// operation's response.
    fn read_from(&mut self, buf: &[u8]) -> Result<usize, ProtocolError>;

    /// Current lifecycle state.
    fn state(&self) -> OpState;

    /// Whether this is a single-key GET that can be coalesced with
    /// adjacent GETs into one multi-key request on the wire (§4.B). Any
    /// operation returning `true` here must also support
    /// [`Operation::combine_key`] returning its key.
    fn is_combinable_get(&self) -> bool {
        false
    }

    /// The key this GET addresses, if combinable. Used only to build the
    /// coalesced wire request; the pool does not otherwise look at keys.
    fn combine_key(&self) -> Option<&str> {
        None
    }

    /// Told by `combine_many` to every member it did not choose to carry
    /// the merged wire write (everything but the one member whose own
    /// `write_into` produced the combined command): its own bytes were
    /// already folded into that write, so it should behave as if it had
    /// nothing left to write, and `is_last` tells it whether it is
    /// responsible for consuming this protocol's shared response
    /// terminator (e.g. memcached's trailing `END\r\n` after the last
    /// `VALUE` block of a multi-key GET). Default no-op.
    fn mark_coalesce_follower(&mut self, _is_last: bool) {}

    /// Merge `self` with a run of subsequent combinable GETs (`rest`, in
    /// submission order) into the set of operations that should actually
    /// occupy the write/read queues. A real GET implementation returns a
    /// set of sub-operations that together write one multi-key request and
    /// each parse their own slice of the multi-key response out of a
    /// response stream shared between them (e.g. via `Rc<RefCell<..>>>`),
    /// so each constituent still completes individually even though only
    /// one wire write happened. The pool only calls this when
    /// `self.is_combinable_get()` was true and `rest` is non-empty; it does
    /// not interpret the returned operations beyond the `Operation` trait.
    ///
    /// `fill_write_buffer` re-checks for a combinable run on every call, so
    /// every operation this returns must itself report
    /// `is_combinable_get() == false` from then on — otherwise a partial
    /// write would trigger a second merge pass and reset write progress.
    ///
    /// The default implementation performs no merge.
    fn combine_many(self: Box<Self>, rest: Vec<Box<dyn Operation>>) -> Vec<Box<dyn Operation>> {
        let mut ops: Vec<Box<dyn Operation>> = Vec::with_capacity(1 + rest.len());
        ops.push(self);
        ops.extend(rest);
        ops
    }
}
