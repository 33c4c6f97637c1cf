//! See [`Seq`].

use std::{
    cmp::Ordering,
    convert::Infallible,
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use arbitrary::Arbitrary;
use octs::{BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};

/// Sequence number identifying a data packet sent on a [lane](crate::lane).
///
/// Each lane assigns sequence numbers from its own monotonically increasing
/// counter. The number is stored as a [`u16`], which will wrap around fairly
/// quickly under load, so any comparison between two sequences must go
/// through [`Seq::delta`] or the wraparound-aware [`Seq::cmp`] - naive
/// integer comparison breaks at the `65535 -> 0` boundary.
///
/// The sequence space can be visualized as a circle, where [`u16::MAX`] sits
/// right before `0`:
///
/// ```text
///     65534  65535    0      1      2
/// ... --|------|------|------|------|-- ...
/// ```
///
/// See <https://gafferongames.com/post/reliability_ordering_and_congestion_avoidance_over_udp/>,
/// *Handling Sequence Number Wrap-Around*.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Arbitrary)]
pub struct Seq(pub u16);

impl Seq {
    /// Sequence number with value [`u16::MAX`].
    pub const MAX: Seq = Seq(u16::MAX);

    /// Gets the signed number of sequences elapsed between `rhs` and `self`.
    ///
    /// This is effectively `self - rhs` in modular arithmetic of `2^16`,
    /// reinterpreted as signed - always the shortest path around the circle.
    /// A positive result means `self` is ahead of `rhs`.
    ///
    /// # Example
    ///
    /// ```
    /// # use laneproto::seq::Seq;
    /// assert_eq!(Seq(0).delta(Seq(0)), 0);
    /// assert_eq!(Seq(5).delta(Seq(0)), 5);
    /// assert_eq!(Seq(0).delta(Seq(5)), -5);
    ///
    /// assert_eq!(Seq(0).delta(Seq::MAX), 1);
    /// assert_eq!(Seq(2).delta(Seq::MAX), 3);
    /// assert_eq!(Seq::MAX.delta(Seq(0)), -1);
    /// ```
    #[must_use]
    pub const fn delta(self, rhs: Self) -> i16 {
        #[allow(clippy::cast_possible_wrap)] // that's exactly what we want
        (self.0.wrapping_sub(rhs.0) as i16)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Ord for Seq {
    /// Logically compares `self` to `other` in a way that respects wrap-around
    /// of sequence numbers, treating e.g. `0 cmp 1` as [`Less`] (as expected),
    /// but `0 cmp 65535` as [`Greater`].
    ///
    /// If the two values compared have a real difference equal to or larger
    /// than `u16::MAX / 2`, no guarantees are upheld.
    ///
    /// [`Greater`]: Ordering::Greater
    /// [`Less`]: Ordering::Less
    fn cmp(&self, other: &Self) -> Ordering {
        self.delta(*other).cmp(&0)
    }
}

impl PartialOrd for Seq {
    /// See [`Seq::cmp`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add<Seq> for Seq {
    type Output = Seq;

    fn add(self, rhs: Seq) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Seq {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub<Seq> for Seq {
    type Output = Seq;

    fn sub(self, rhs: Seq) -> Self::Output {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Seq {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl FixedEncodeLen for Seq {
    const ENCODE_LEN: usize = u16::ENCODE_LEN;
}

impl Encode for Seq {
    type Error = Infallible;

    /// Sequences are little-endian on the wire.
    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        let [lo, hi] = self.0.to_le_bytes();
        dst.write(&lo)?;
        dst.write(&hi)
    }
}

impl Decode for Seq {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        let lo = src.read::<u8>()?;
        let hi = src.read::<u8>()?;
        Ok(Self(u16::from_le_bytes([lo, hi])))
    }
}
