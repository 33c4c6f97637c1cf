//! Wire format of the datagrams that lanes produce and consume.
//!
//! A data packet, after the outer transport headers are stripped:
//!
//! ```text
//! offset 0     message type    (1 byte, [`MessageType::Data`])
//! offset 1     lane index      (1 byte)
//! offset 2..4  sequence        (little-endian u16)
//! offset 4..   application payload
//! ```
//!
//! An ack packet is the same header with no payload:
//!
//! ```text
//! offset 0     message type    (1 byte, [`MessageType::Ack`])
//! offset 1     lane index      (1 byte)
//! offset 2..4  acked sequence  (little-endian u16)
//! ```
//!
//! Lanes are handed their packets with the message type and lane index
//! already consumed by the dispatch layer, so on the receive path they only
//! ever read the sequence onwards.

use std::convert::Infallible;

use octs::{BufError, BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};

use crate::{lane::LaneIndex, seq::Seq};

/// What a datagram contains, identified by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Application payload carried on a lane.
    Data = 1,
    /// Acknowledgement of a single received sequence.
    Ack = 2,
}

/// Read a [`MessageType`] byte which does not map to any known message type,
/// or does not map to the message type expected in this position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid message type `{0}`")]
pub struct InvalidMessageType(pub u8);

impl BufError for InvalidMessageType {}

impl MessageType {
    /// Gets the message type identified by the given byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Data),
            2 => Some(Self::Ack),
            _ => None,
        }
    }
}

impl FixedEncodeLen for MessageType {
    const ENCODE_LEN: usize = u8::ENCODE_LEN;
}

impl Encode for MessageType {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&(*self as u8))
    }
}

impl Decode for MessageType {
    type Error = InvalidMessageType;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        let byte = src.read::<u8>()?;
        Self::from_byte(byte).ok_or_else(|| InvalidMessageType(byte).into())
    }
}

/// Header of a [`MessageType::Data`] packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Lane this packet is carried on.
    pub lane: LaneIndex,
    /// Sequence number assigned to this packet by the sending lane.
    pub seq: Seq,
}

/// A full [`MessageType::Ack`] packet - acks carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHeader {
    /// Lane the acked sequence was received on.
    pub lane: LaneIndex,
    /// Sequence being acknowledged.
    pub seq: Seq,
}

impl FixedEncodeLen for DataHeader {
    const ENCODE_LEN: usize = MessageType::ENCODE_LEN + LaneIndex::ENCODE_LEN + Seq::ENCODE_LEN;
}

impl Encode for DataHeader {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&MessageType::Data)?;
        dst.write(&self.lane)?;
        dst.write(&self.seq)
    }
}

impl Decode for DataHeader {
    type Error = InvalidMessageType;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        let ty = src.read::<MessageType>()?;
        if ty != MessageType::Data {
            return Err(InvalidMessageType(ty as u8).into());
        }
        Ok(Self {
            lane: src.read()?,
            seq: src.read()?,
        })
    }
}

impl FixedEncodeLen for AckHeader {
    const ENCODE_LEN: usize = MessageType::ENCODE_LEN + LaneIndex::ENCODE_LEN + Seq::ENCODE_LEN;
}

impl Encode for AckHeader {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&MessageType::Ack)?;
        dst.write(&self.lane)?;
        dst.write(&self.seq)
    }
}

impl Decode for AckHeader {
    type Error = InvalidMessageType;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        let ty = src.read::<MessageType>()?;
        if ty != MessageType::Ack {
            return Err(InvalidMessageType(ty as u8).into());
        }
        Ok(Self {
            lane: src.read()?,
            seq: src.read()?,
        })
    }
}
