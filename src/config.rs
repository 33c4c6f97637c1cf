//! See [`LaneConfig`].

use web_time::Duration;

/// Configuration shared by every [lane](crate::lane) of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneConfig {
    /// Capacity of the send and receive sliding windows, in sequences.
    ///
    /// Governs how many in-flight sequences a lane tracks at once. Must stay
    /// well under `2^15` so that every live sequence pair sits in the same
    /// half of the sequence circle.
    pub window_size: usize,
    /// How many transmissions a reliable packet gets before the lane gives
    /// up and disconnects the connection.
    pub max_resend_attempts: u32,
    /// Delay added on top of the current roundtrip estimate to form the
    /// resend threshold for in-flight packets.
    pub resend_extra_delay: Duration,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            window_size: 256,
            max_resend_attempts: 10,
            resend_extra_delay: Duration::from_millis(50),
        }
    }
}
