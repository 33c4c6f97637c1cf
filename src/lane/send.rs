use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use octs::{Read, Write};
use tracing::{trace, warn};
use web_time::{Duration, Instant};

use super::{LaneIndex, RecvError, SendError};
use crate::{
    config::LaneConfig, conn::Connection, packet::DataHeader, pool::MemoryPool, seq::Seq,
    seq_buf::SeqBuf,
};

/// Outgoing half shared by [`ReliableLane`] and [`SequencedLane`]: the
/// in-flight window, framing, ack consumption and the resend sweep.
///
/// An in-flight packet's buffer lives in here from the moment [`send`]
/// frames it until either its ack arrives or the lane is reset; if it
/// instead runs out of resend attempts, the whole connection is torn down
/// and the buffer is reclaimed by that reset.
///
/// [`ReliableLane`]: super::ReliableLane
/// [`SequencedLane`]: super::SequencedLane
/// [`send`]: ReliableSender::send
#[derive(Debug)]
pub(super) struct ReliableSender {
    lane: LaneIndex,
    pool: Rc<MemoryPool>,
    max_resend_attempts: u32,
    resend_extra_delay: Duration,
    sent: SeqBuf<SentPacket>,
    /// Last sequence assigned to an outgoing packet.
    last_seq: Seq,
    /// Highest sequence at or below which every outgoing packet has been
    /// acknowledged; the in-flight window is `(acked_floor, last_seq]`.
    acked_floor: Seq,
}

#[derive(Debug)]
struct SentPacket {
    buffer: BytesMut,
    first_sent_at: Instant,
    last_sent_at: Instant,
    attempts: u32,
}

impl ReliableSender {
    pub fn new(lane: LaneIndex, config: &LaneConfig, pool: Rc<MemoryPool>) -> Self {
        Self {
            lane,
            pool,
            max_resend_attempts: config.max_resend_attempts,
            resend_extra_delay: config.resend_extra_delay,
            sent: SeqBuf::new(config.window_size),
            last_seq: Seq(0),
            acked_floor: Seq(0),
        }
    }

    pub fn lane(&self) -> LaneIndex {
        self.lane
    }

    /// Frames `msg` under the next sequence and stores the packet in the
    /// in-flight window, returning a view of it for the initial
    /// transmission.
    pub fn send(&mut self, now: Instant, msg: &[u8]) -> Result<&[u8], SendError> {
        let seq = self.last_seq + Seq(1);
        if self.sent.occupied(seq) {
            return Err(SendError::WindowFull);
        }

        let mut buffer = self.pool.allocate()?;
        buffer
            .write(&DataHeader {
                lane: self.lane,
                seq,
            })
            .expect("BytesMut grows when written over capacity");
        buffer
            .write_from(msg)
            .expect("BytesMut grows when written over capacity");

        self.last_seq = seq;
        self.sent.insert(
            seq,
            SentPacket {
                buffer,
                first_sent_at: now,
                last_sent_at: now,
                attempts: 1,
            },
        );
        Ok(self
            .sent
            .get(seq)
            .expect("entry was just inserted")
            .buffer
            .as_ref())
    }

    /// Consumes an ack payload: frees the acked packet, emits a roundtrip
    /// sample measured from its first transmission, and advances the acked
    /// floor across contiguously acknowledged slots.
    pub fn recv_ack(
        &mut self,
        now: Instant,
        conn: &mut dyn Connection,
        mut payload: Bytes,
    ) -> Result<(), RecvError> {
        let seq = payload
            .read::<Seq>()
            .map_err(|_| RecvError::ReadSequence)?;
        let Some(sent) = self.sent.remove(seq) else {
            trace!("ack for {seq} which is not in flight");
            return Ok(());
        };

        conn.add_roundtrip_sample(now.saturating_duration_since(sent.first_sent_at));
        self.pool.release(sent.buffer);

        while self.acked_floor != self.last_seq && self.sent.get(self.acked_floor + Seq(1)).is_none()
        {
            self.acked_floor += Seq(1);
        }
        Ok(())
    }

    /// Sweeps the in-flight window: retransmits packets past the resend
    /// threshold, and disconnects the connection once a packet has exhausted
    /// its attempts.
    pub fn update(&mut self, now: Instant, conn: &mut dyn Connection) {
        let threshold = conn.roundtrip() + self.resend_extra_delay;
        let in_flight = u16::try_from(self.last_seq.delta(self.acked_floor)).unwrap_or(0);
        for i in 1..=in_flight {
            let seq = self.acked_floor + Seq(i);
            let Some(sent) = self.sent.get_mut(seq) else {
                continue;
            };

            if sent.attempts > self.max_resend_attempts {
                warn!(
                    "{seq} exhausted its {} resend attempts - disconnecting",
                    self.max_resend_attempts
                );
                conn.disconnect();
                return;
            }

            if now.saturating_duration_since(sent.last_sent_at) > threshold {
                trace!("resending {seq}, attempt {}", sent.attempts + 1);
                conn.send_raw(&sent.buffer);
                sent.attempts += 1;
                sent.last_sent_at = now;
            }
        }
    }

    /// Releases every in-flight buffer and returns the sequence counters to
    /// their initial state.
    pub fn reset(&mut self) {
        for sent in self.sent.drain() {
            self.pool.release(sent.buffer);
        }
        self.last_seq = Seq(0);
        self.acked_floor = Seq(0);
    }
}
