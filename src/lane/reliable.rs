use std::rc::Rc;

use ahash::AHashSet;
use bytes::{Bytes, BytesMut};
use octs::Read;
use tracing::trace;
use web_time::Instant;

use super::{send::ReliableSender, send_ack, Lane, LaneIndex, Outgoing, Recv, RecvError, SendError};
use crate::{config::LaneConfig, conn::Connection, pool::MemoryPool, seq::Seq};

/// Guaranteed-delivery lane without ordering.
///
/// Every message sent on this lane reaches the application on the other side
/// exactly once, in whatever order its packets happen to arrive - a packet
/// is surfaced the moment it comes in. The receive side only needs to
/// remember *which* future sequences it has already surfaced, so it keeps a
/// set of sequence numbers rather than buffered payloads.
#[derive(Debug)]
pub struct ReliableLane {
    sender: ReliableSender,
    pool: Rc<MemoryPool>,
    /// Next sequence after the highest contiguously received one.
    pending: Seq,
    /// Sequences above `pending` that have already been surfaced.
    seen: AHashSet<Seq>,
}

impl ReliableLane {
    /// Creates the lane at the given index.
    #[must_use]
    pub fn new(index: LaneIndex, config: &LaneConfig, pool: Rc<MemoryPool>) -> Self {
        Self {
            sender: ReliableSender::new(index, config, Rc::clone(&pool)),
            pool,
            pending: Seq(1),
            seen: AHashSet::new(),
        }
    }
}

impl Lane for ReliableLane {
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
        if seq < self.pending || self.seen.contains(&seq) {
            // our previous ack may have been lost - ack again, deliver nothing
            trace!("re-acking duplicate {seq}");
            send_ack(&self.pool, conn, self.sender.lane(), seq)?;
            return Ok(Recv::empty());
        }

        self.seen.insert(seq);
        while self.seen.remove(&self.pending) {
            self.pending += Seq(1);
        }
        send_ack(&self.pool, conn, self.sender.lane(), seq)?;
        Ok(Recv {
            msg: Some(payload),
            has_more: false,
        })
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
        None
    }

    fn update(&mut self, now: Instant, conn: &mut dyn Connection) {
        self.sender.update(now, conn);
    }

    fn reset(&mut self) {
        self.sender.reset();
        self.seen.clear();
        self.pending = Seq(1);
    }
}

#[cfg(test)]
mod tests {
    use web_time::Duration;

    use super::*;
    use crate::lane::testing::{ack, data, TestConn};

    fn lane(pool: &Rc<MemoryPool>) -> ReliableLane {
        let config = LaneConfig {
            window_size: 64,
            max_resend_attempts: 10,
            resend_extra_delay: Duration::from_millis(50),
        };
        ReliableLane::new(LaneIndex(0), &config, Rc::clone(pool))
    }

    #[test]
    fn out_of_order_arrival_delivers_immediately() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let recv = l.recv(now, &mut conn, data(2, b"B")).unwrap();
        assert_eq!(Some(Bytes::from_static(b"B")), recv.msg);
        let recv = l.recv(now, &mut conn, data(3, b"C")).unwrap();
        assert_eq!(Some(Bytes::from_static(b"C")), recv.msg);
        let recv = l.recv(now, &mut conn, data(1, b"A")).unwrap();
        assert_eq!(Some(Bytes::from_static(b"A")), recv.msg);
        let recv = l.recv(now, &mut conn, data(4, b"D")).unwrap();
        assert_eq!(Some(Bytes::from_static(b"D")), recv.msg);

        // one ack per receive, in receive order
        assert_eq!(vec![2, 3, 1, 4], conn.acked_seqs());
        // nothing is ever buffered for ordering
        assert!(l.poll().is_none());
        assert_eq!(0, pool.outstanding());
    }

    #[test]
    fn duplicate_suppressed_but_reacked() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let recv = l.recv(now, &mut conn, data(5, b"X")).unwrap();
        assert!(recv.msg.is_some());
        let recv = l.recv(now, &mut conn, data(5, b"X")).unwrap();
        assert!(recv.msg.is_none());

        assert_eq!(vec![5, 5], conn.acked_seqs());
    }

    #[test]
    fn stale_sequence_reacked() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        for seq in 1..=3 {
            let _ = l.recv(now, &mut conn, data(seq, b"M")).unwrap();
        }
        // 2 is below the watermark by now, but still gets an ack
        let recv = l.recv(now, &mut conn, data(2, b"M")).unwrap();
        assert!(recv.msg.is_none());
        assert_eq!(vec![1, 2, 3, 2], conn.acked_seqs());
    }

    #[test]
    fn exactly_once_under_duplication_and_reordering() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let arrivals = [3, 1, 3, 2, 1, 4, 2, 4, 3];
        let mut delivered = Vec::new();
        for seq in arrivals {
            let recv = l
                .recv(now, &mut conn, data(seq, seq.to_string().as_bytes()))
                .unwrap();
            if let Some(msg) = recv.msg {
                delivered.push(msg);
            }
        }

        let mut delivered = delivered
            .iter()
            .map(|msg| std::str::from_utf8(msg).unwrap())
            .collect::<Vec<_>>();
        delivered.sort_unstable();
        assert_eq!(vec!["1", "2", "3", "4"], delivered);
        // an ack per arrival, duplicates included
        assert_eq!(arrivals.len(), conn.acked_seqs().len());
    }

    #[test]
    fn send_retains_buffer_until_ack() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let Outgoing::Retained(frame) = l.send(now, b"payload").unwrap() else {
            panic!("reliable send must retain the buffer");
        };
        assert_eq!(&[1, 0, 1, 0], &frame[..4]);
        assert_eq!(1, pool.outstanding());

        l.recv_ack(now, &mut conn, ack(1)).unwrap();
        assert_eq!(0, pool.outstanding());
    }

    #[test]
    fn reset_zeroes_all_state() {
        let pool = Rc::new(MemoryPool::new(1024));
        let mut l = lane(&pool);
        let mut conn = TestConn::new(Duration::from_millis(100));
        let now = Instant::now();

        let _ = l.send(now, b"one").unwrap();
        let _ = l.recv(now, &mut conn, data(7, b"future")).unwrap();

        l.reset();
        assert_eq!(0, pool.outstanding());

        // the same future sequence is fresh again after a reset
        let recv = l.recv(now, &mut conn, data(7, b"future")).unwrap();
        assert!(recv.msg.is_some());
    }
}
