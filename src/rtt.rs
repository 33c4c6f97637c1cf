//! See [`RttEstimator`].

use web_time::Duration;

/// Exponentially-weighted estimate of the roundtrip time to a peer.
///
/// [`Connection`](crate::conn::Connection) implementations can keep one of
/// these and feed it the samples that lanes emit on acknowledgement. The
/// smoothing follows the classic TCP formula: an `1/8` weight on new samples
/// for the mean and `1/4` for the variance.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    latest: Duration,
    smoothed: Duration,
    var: Duration,
}

impl RttEstimator {
    /// Creates an estimator which reports `initial` until the first sample
    /// arrives.
    #[must_use]
    pub fn new(initial: Duration) -> Self {
        Self {
            latest: initial,
            smoothed: initial,
            var: initial / 2,
        }
    }

    /// Gets the smoothed roundtrip estimate.
    #[must_use]
    pub const fn get(&self) -> Duration {
        self.smoothed
    }

    /// Gets the most recent raw sample.
    #[must_use]
    pub const fn latest(&self) -> Duration {
        self.latest
    }

    /// Feeds one roundtrip measurement into the estimator.
    pub fn update(&mut self, sample: Duration) {
        self.latest = sample;

        let var_sample = if self.smoothed > sample {
            self.smoothed - sample
        } else {
            sample - self.smoothed
        };
        self.var = (3 * self.var + var_sample) / 4;
        self.smoothed = (7 * self.smoothed + sample) / 8;
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
