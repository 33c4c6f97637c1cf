//! See [`Connection`].

use web_time::Duration;

/// Side of a connection that [lanes](crate::lane) talk to in order to reach
/// the wire.
///
/// The socket I/O, connection lifecycle and roundtrip bookkeeping all live
/// above this crate; a lane only ever needs these four operations of them.
/// Implementations are expected to back [`roundtrip`] with an estimator such
/// as [`RttEstimator`], feeding it the samples from
/// [`add_roundtrip_sample`].
///
/// [`roundtrip`]: Connection::roundtrip
/// [`add_roundtrip_sample`]: Connection::add_roundtrip_sample
/// [`RttEstimator`]: crate::rtt::RttEstimator
pub trait Connection {
    /// Transmits a single raw datagram to the peer, best-effort.
    fn send_raw(&mut self, datagram: &[u8]);

    /// Gets the current estimate of the roundtrip time to the peer.
    fn roundtrip(&self) -> Duration;

    /// Feeds one roundtrip measurement into the connection's estimator.
    ///
    /// Lanes emit a sample when an in-flight packet is acknowledged,
    /// measured from the packet's *first* transmission.
    fn add_roundtrip_sample(&mut self, sample: Duration);

    /// Tears the connection down, non-gracefully.
    ///
    /// Called by a reliable lane when a packet has exhausted its resend
    /// attempts. After this, the dispatch loop is expected to
    /// [`reset`](crate::lane::Lane::reset) every lane of this connection.
    fn disconnect(&mut self);
}
