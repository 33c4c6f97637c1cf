use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use octs::{Read, Write};
use tracing::trace;
use web_time::Instant;

use super::{send::ReliableSender, send_ack, Lane, LaneIndex, Outgoing, Recv, RecvError, SendError};
use crate::{
    config::LaneConfig, conn::Connection, pool::MemoryPool, seq::Seq, seq_buf::SeqBuf,
};

/// Guaranteed-delivery lane with strict in-order release.
///
/// Unlike [`ReliableLane`](super::ReliableLane), a packet that arrives ahead
/// of a gap cannot be surfaced yet - its payload is copied into a pooled
/// buffer and held in the receive window until everything before it has
/// arrived. [`poll`](Lane::poll) drains those held payloads in sequence
/// order; the packet that fills a gap is surfaced directly from
/// [`recv`](Lane::recv), with [`Recv::has_more`] set if held payloads became
/// releasable behind it.
#[derive(Debug)]
pub struct SequencedLane {
    sender: ReliableSender,
    pool: Rc<MemoryPool>,
    /// Next sequence to release to the application.
    pending: Seq,
    /// Payloads received ahead of `pending`, keyed by sequence.
    held: SeqBuf<BytesMut>,
}

impl SequencedLane {
    /// Creates the lane at the given index.
    #[must_use]
    pub fn new(index: LaneIndex, config: &LaneConfig, pool: Rc<MemoryPool>) -> Self {
        Self {
            sender: ReliableSender::new(index, config, Rc::clone(&pool)),
            pool,
            pending: Seq(1),
            held: SeqBuf::new(config.window_size),
        }
    }
}

impl Lane for SequencedLane {
    fn send(&mut self, now: Instant, msg: &[u8]) -> Result<Outgoing<'_>, SendError> {
        self.sender.send(now, msg).map(Outgoing::Retained)
    }

    fn recv(
        &mut self,
        _now: Instant,
        conn: &mut dyn Connection,
        mut payload: Bytes,
    ) -> Result<Recv, RecvError> {
        let seq = payload
            .read::<Seq>()
            .map_err(|_| RecvError::ReadSequence)?;
        if seq < self.pending || self.held.occupied(seq) {
            // our previous ack may have been lost - ack again, deliver nothing
            trace!("re-acking duplicate {seq}");
            send_ack(&self.pool, conn, self.sender.lane(), seq)?;
            return Ok(Recv::empty());
        }

        if seq == self.pending {
            self.pending += Seq(1);
            send_ack(&self.pool, conn, self.sender.lane(), seq)?;
            return Ok(Recv {
                msg: Some(payload),
                has_more: self.held.get(self.pending).is_some(),
            });
        }

        // ahead of a gap: hold the payload until everything before it arrives
        let mut buffer = self.pool.allocate()?;
        buffer
            .write_from(payload)
            .expect("BytesMut grows when written over capacity");
        self.held.insert(seq, buffer);
        send_ack(&self.pool, conn, self.sender.lane(), seq)?;
        Ok(Recv::empty())
    }

    fn recv_ack(
        &mut self,
        now: Instant,
        conn: &mut dyn Connection,
        payload: Bytes,
    ) -> Result<(), RecvError> {
        self.sender.recv_ack(now, conn, payload)
    }

    fn poll(&mut self) -> Option<BytesMut> {
        let buffer = self.held.remove(self.pending)?;
        self.pending += Seq(1);
        Some(buffer)
    }

    fn update(&mut self, now: Instant, conn: &mut dyn Connection) {
        self.sender.update(now, conn);
    }

    fn reset(&mut self) {
        self.sender.reset();
        for buffer in self.held.drain() {
            self.pool.release(buffer);
        }
        self.pending = Seq(1);
    }
}

#[cfg(test)]
mod tests {
    use web_time::Duration;

    use super::*;
    use crate::lane::testing::{data, TestConn};

    fn lane(pool: &Rc<MemoryPool>) -> SequencedLane {
        let config = LaneConfig {
            window_size: 64,
            max_resend_attempts: 10,
            resend_extra_delay: Duration::from_millis(50),
        };
        SequencedLane::new(LaneIndex(0), &config, Rc::clone(pool))
    }

    fn drain(l: &mut SequencedLane, pool: &MemoryPool) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(buffer) = l.poll() {
            out.push(buffer.to_vec());
            pool.release(buffer);
        }
        out
    }

    #[test]
    fn out_of_order_arrival_released_in_order() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        // 2 and 3 arrive ahead of 1: held, not surfaced
        let recv = l.recv(now, &mut conn, data(2, b"B")).unwrap();
        assert_eq!(Recv::empty(), recv);
        let recv = l.recv(now, &mut conn, data(3, b"C")).unwrap();
        assert_eq!(Recv::empty(), recv);
        assert!(l.poll().is_none());

        // 1 fills the gap: surfaced directly, with 2 and 3 behind it
        let recv = l.recv(now, &mut conn, data(1, b"A")).unwrap();
        assert_eq!(Some(Bytes::from_static(b"A")), recv.msg);
        assert!(recv.has_more);
        assert_eq!(vec![b"B".to_vec(), b"C".to_vec()], drain(&mut l, &pool));

        // 4 is now in order
        let recv = l.recv(now, &mut conn, data(4, b"D")).unwrap();
        assert_eq!(Some(Bytes::from_static(b"D")), recv.msg);
        assert!(!recv.has_more);
        assert!(l.poll().is_none());

        assert_eq!(vec![2, 3, 1, 4], conn.acked_seqs());
        assert_eq!(0, pool.outstanding());
    }

    #[test]
    fn duplicate_of_held_payload_reacked() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let _ = l.recv(now, &mut conn, data(3, b"C")).unwrap();
        assert_eq!(1, pool.outstanding());

        // same sequence again: no second hold, but a fresh ack
        let recv = l.recv(now, &mut conn, data(3, b"C")).unwrap();
        assert_eq!(Recv::empty(), recv);
        assert_eq!(1, pool.outstanding());
        assert_eq!(vec![3, 3], conn.acked_seqs());
    }

    #[test]
    fn stale_sequence_reacked() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let _ = l.recv(now, &mut conn, data(1, b"A")).unwrap();
        let recv = l.recv(now, &mut conn, data(1, b"A")).unwrap();
        assert_eq!(Recv::empty(), recv);
        assert_eq!(vec![1, 1], conn.acked_seqs());
    }

    #[test]
    fn release_order_matches_send_order() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        // arrival order: 4, 2, 1, 3, plus duplicates sprinkled in
        let mut released = Vec::new();
        for seq in [4u16, 2, 1, 2, 3, 4] {
            let recv = l
                .recv(now, &mut conn, data(seq, seq.to_string().as_bytes()))
                .unwrap();
            if let Some(msg) = recv.msg {
                released.push(msg.to_vec());
            }
            released.extend(drain(&mut l, &pool));
        }

        assert_eq!(
            vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec(), b"4".to_vec()],
            released
        );
        assert_eq!(0, pool.outstanding());
    }

    #[test]
    fn reset_releases_held_payloads() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let _ = l.send(now, b"out").unwrap();
        let _ = l.recv(now, &mut conn, data(5, b"held")).unwrap();
        assert_eq!(2, pool.outstanding());

        l.reset();
        assert_eq!(0, pool.outstanding());

        // watermark is back at the start
        let recv = l.recv(now, &mut conn, data(1, b"A")).unwrap();
        assert_eq!(Some(Bytes::from_static(b"A")), recv.msg);
    }
}
