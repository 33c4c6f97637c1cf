//! Lanes: logical sub-streams of a connection, each with its own delivery
//! discipline and independent sequence space.
//!
//! A lane sits between the raw datagram socket and the application, turning
//! unreliable, out-of-order, possibly duplicated packet delivery into the
//! guarantee its kind promises:
//!
//! | Kind | Delivery | Ordering |
//! |---|---|---|
//! | [`UnreliableLane`] | best-effort | none (duplicates suppressed) |
//! | [`ReliableLane`] | guaranteed | none |
//! | [`SequencedLane`] | guaranteed | strict, stale-free |
//!
//! Lanes are sans-I/O: the dispatch loop owns the socket, routes inbound
//! datagrams into [`Lane::recv`] / [`Lane::recv_ack`] by message type and
//! lane index, transmits what [`Lane::send`] returns, drains [`Lane::poll`]
//! and drives [`Lane::update`] on a timer. Everything a lane needs from the
//! connection itself goes through the [`Connection`] trait.

mod reliable;
mod send;
mod sequenced;
mod unreliable;

pub use {reliable::ReliableLane, sequenced::SequencedLane, unreliable::UnreliableLane};

use std::{convert::Infallible, fmt, rc::Rc};

use arbitrary::Arbitrary;
use bytes::{Bytes, BytesMut};
use octs::{BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};
use web_time::Instant;

use crate::{
    config::LaneConfig,
    conn::Connection,
    packet::AckHeader,
    pool::{MemoryPool, OutOfMemory},
    seq::Seq,
};

/// Index of a lane on its connection, carried in the second byte of every
/// packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Arbitrary)]
pub struct LaneIndex(pub u8);

impl fmt::Display for LaneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FixedEncodeLen for LaneIndex {
    const ENCODE_LEN: usize = u8::ENCODE_LEN;
}

impl Encode for LaneIndex {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.0)
    }
}

impl Decode for LaneIndex {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        Ok(Self(src.read()?))
    }
}

/// Kind of delivery discipline a lane provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneKind {
    /// Best-effort delivery with duplicate suppression; no resends, no acks.
    Unreliable,
    /// Guaranteed delivery in whatever order packets happen to arrive.
    ReliableUnordered,
    /// Guaranteed delivery in strict send order.
    ReliableSequenced,
}

/// Whether a lane kind guarantees delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneReliability {
    /// Messages may be lost.
    Unreliable,
    /// Messages are resent until acknowledged.
    Reliable,
}

impl LaneKind {
    /// Gets whether this lane kind guarantees delivery.
    #[must_use]
    pub const fn reliability(&self) -> LaneReliability {
        match self {
            Self::Unreliable => LaneReliability::Unreliable,
            Self::ReliableUnordered | Self::ReliableSequenced => LaneReliability::Reliable,
        }
    }

    /// Creates a lane of this kind as a trait object, for dispatch loops
    /// which hold their lanes in one collection.
    #[must_use]
    pub fn new_lane(
        self,
        index: LaneIndex,
        config: &LaneConfig,
        pool: Rc<MemoryPool>,
    ) -> Box<dyn Lane> {
        match self {
            Self::Unreliable => Box::new(UnreliableLane::new(index, config, pool)),
            Self::ReliableUnordered => Box::new(ReliableLane::new(index, config, pool)),
            Self::ReliableSequenced => Box::new(SequencedLane::new(index, config, pool)),
        }
    }
}

/// Framed packet produced by [`Lane::send`], ready for transmission.
///
/// Who releases the underlying buffer back to the
/// [`MemoryPool`](crate::pool::MemoryPool) depends on the variant.
#[derive(Debug)]
pub enum Outgoing<'a> {
    /// The caller owns the buffer, and must release it to the pool once the
    /// packet has been handed to the socket.
    Owned(BytesMut),
    /// The lane retains the buffer for retransmission and will release it
    /// itself on acknowledgement or [`Lane::reset`]; the caller transmits
    /// this view and keeps nothing.
    Retained(&'a [u8]),
}

impl AsRef<[u8]> for Outgoing<'_> {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Owned(buf) => buf.as_ref(),
            Self::Retained(view) => view,
        }
    }
}

/// What [`Lane::recv`] made of an inbound data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recv {
    /// Application payload released by this packet, if any.
    pub msg: Option<Bytes>,
    /// `true` if the lane is now holding previously buffered payloads that
    /// [`Lane::poll`] can release - a hint to the dispatch loop to poll
    /// before waiting for more datagrams.
    pub has_more: bool,
}

impl Recv {
    /// The packet released nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            msg: None,
            has_more: false,
        }
    }
}

/// Failed to [`Lane::send`] a message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// The next sequence would land on a send window slot still occupied by
    /// an unacknowledged packet.
    #[error("send window full")]
    WindowFull,
    /// See [`OutOfMemory`].
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

/// Failed to process an inbound packet.
///
/// The dispatch loop is expected to drop the offending datagram on
/// [`RecvError::ReadSequence`], and to tear the connection down on
/// [`RecvError::OutOfMemory`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecvError {
    /// Packet was too short to read a sequence number out of.
    #[error("not enough bytes to read sequence")]
    ReadSequence,
    /// See [`OutOfMemory`].
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

/// One lane of a connection.
///
/// All entry points are synchronous, bounded, and must be invoked serially -
/// a lane is owned by a single dispatch loop and is not thread-safe.
pub trait Lane {
    /// Frames an application message into a data packet, assigning it the
    /// next sequence on this lane.
    ///
    /// The first sequence a fresh (or [`reset`](Lane::reset)) lane assigns
    /// is 1. See [`Outgoing`] for who releases the returned buffer.
    ///
    /// # Errors
    ///
    /// Errors if the buffer could not be allocated, or if the send window
    /// has no room for another in-flight packet.
    fn send(&mut self, now: Instant, msg: &[u8]) -> Result<Outgoing<'_>, SendError>;

    /// Handles an inbound data packet, starting at its sequence bytes (the
    /// dispatch layer has already consumed the message type and lane index).
    ///
    /// Reliable lanes transmit an ack through `conn` for *every* packet
    /// received here, duplicates and stale packets included - the previous
    /// ack may have been lost.
    ///
    /// # Errors
    ///
    /// Errors if the packet is too short to carry a sequence, or if a buffer
    /// for holding an out-of-order payload could not be allocated.
    fn recv(
        &mut self,
        now: Instant,
        conn: &mut dyn Connection,
        payload: Bytes,
    ) -> Result<Recv, RecvError>;

    /// Handles an inbound ack, starting at its sequence bytes.
    ///
    /// If the acked sequence is still in flight, its buffer is released, a
    /// roundtrip sample measured from the packet's first transmission is fed
    /// into `conn`, and the slot is freed. Duplicate acks are ignored.
    ///
    /// # Errors
    ///
    /// Errors if the packet is too short to carry a sequence.
    fn recv_ack(
        &mut self,
        now: Instant,
        conn: &mut dyn Connection,
        payload: Bytes,
    ) -> Result<(), RecvError>;

    /// Releases the next in-order payload held by this lane, if any.
    ///
    /// Only [`SequencedLane`] ever returns [`Some`]; call it repeatedly
    /// until it returns [`None`]. Ownership of the buffer transfers to the
    /// caller, who must release it to the pool once done with the bytes.
    fn poll(&mut self) -> Option<BytesMut>;

    /// Drives retransmission; call periodically, with an interval of at most
    /// half the resend threshold to keep retransmission timely.
    ///
    /// Retransmits every in-flight packet whose last transmission is older
    /// than `conn.roundtrip()` plus the configured extra delay, and
    /// disconnects `conn` once a packet has exhausted its resend attempts.
    fn update(&mut self, now: Instant, conn: &mut dyn Connection);

    /// Releases every buffer this lane holds and returns its sequences to
    /// their initial state, as if freshly constructed.
    fn reset(&mut self);
}

/// Transmits an ack for `seq` through `conn`, on lane `lane`.
///
/// The ack buffer itself is pool-allocated, handed to the connection, and
/// released immediately - acks are fire-and-forget, the next duplicate data
/// packet will trigger a re-ack if this one is lost.
fn send_ack(
    pool: &MemoryPool,
    conn: &mut dyn Connection,
    lane: LaneIndex,
    seq: Seq,
) -> Result<(), OutOfMemory> {
    let mut buf = pool.allocate()?;
    buf.write(&AckHeader { lane, seq })
        .expect("BytesMut grows when written over capacity");
    conn.send_raw(&buf);
    pool.release(buf);
    Ok(())
}
