use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use octs::{Read, Write};
use tracing::trace;
use web_time::Instant;

use super::{Lane, LaneIndex, Outgoing, Recv, RecvError, SendError};
use crate::{
    config::LaneConfig, conn::Connection, packet::DataHeader, pool::MemoryPool, seq::Seq,
    seq_buf::SeqBuf,
};

/// Best-effort lane: no resends, no acks, no ordering.
///
/// The only state it keeps is a duplicate-suppression window on the receive
/// side, so a datagram duplicated by the network is surfaced to the
/// application once. Messages falling more than a window behind the newest
/// contiguously observed sequence are treated as already seen.
#[derive(Debug)]
pub struct UnreliableLane {
    index: LaneIndex,
    pool: Rc<MemoryPool>,
    /// Last sequence assigned to an outgoing packet.
    last_seq: Seq,
    /// Next sequence after the highest contiguously observed one.
    pending: Seq,
    /// Sequences above `pending` that have already been observed.
    seen: SeqBuf<()>,
}

impl UnreliableLane {
    /// Creates the lane at the given index.
    #[must_use]
    pub fn new(index: LaneIndex, config: &LaneConfig, pool: Rc<MemoryPool>) -> Self {
        Self {
            index,
            pool,
            last_seq: Seq(0),
            pending: Seq(1),
            seen: SeqBuf::new(config.window_size),
        }
    }
}

impl Lane for UnreliableLane {
    fn send(&mut self, _now: Instant, msg: &[u8]) -> Result<Outgoing<'_>, SendError> {
        let seq = self.last_seq + Seq(1);
        let mut buffer = self.pool.allocate()?;
        buffer
            .write(&DataHeader {
                lane: self.index,
                seq,
            })
            .expect("BytesMut grows when written over capacity");
        buffer
            .write_from(msg)
            .expect("BytesMut grows when written over capacity");
        self.last_seq = seq;
        Ok(Outgoing::Owned(buffer))
    }

    fn recv(
        &mut self,
        _now: Instant,
        _conn: &mut dyn Connection,
        mut payload: Bytes,
    ) -> Result<Recv, RecvError> {
        let seq = payload
            .read::<Seq>()
            .map_err(|_| RecvError::ReadSequence)?;
        if seq < self.pending || self.seen.get(seq).is_some() {
            trace!("dropping duplicate {seq}");
            return Ok(Recv::empty());
        }

        self.seen.insert(seq, ());
        while self.seen.remove(self.pending).is_some() {
            self.pending += Seq(1);
        }
        Ok(Recv {
            msg: Some(payload),
            has_more: false,
        })
    }

    fn recv_ack(
        &mut self,
        _now: Instant,
        _conn: &mut dyn Connection,
        _payload: Bytes,
    ) -> Result<(), RecvError> {
        // unreliable lanes neither produce nor consume acks
        Ok(())
    }

    fn poll(&mut self) -> Option<BytesMut> {
        None
    }

    fn update(&mut self, _now: Instant, _conn: &mut dyn Connection) {}

    fn reset(&mut self) {
        self.seen.clear();
        self.last_seq = Seq(0);
        self.pending = Seq(1);
    }
}
