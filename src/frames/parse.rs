//! Wire decoding for the two inbound frames the core consumes
//! (RFC 9000 Sections 19.3 and 19.6).

use crate::error::{Error, Result};
use crate::frames::{
    AckFrame, AckRange, CryptoFrame, FRAME_TYPE_ACK, FRAME_TYPE_ACK_ECN, FRAME_TYPE_CRYPTO,
};
use crate::types::VarIntCodec;
use bytes::Bytes;
use tinyvec::TinyVec;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(Error::FrameEncoding)?;
        self.pos += 1;
        Ok(b)
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, consumed) =
            VarIntCodec::decode(&self.buf[self.pos..]).ok_or(Error::FrameEncoding)?;
        self.pos += consumed;
        Ok(value)
    }
}

/// Decode a CRYPTO frame starting at its type byte.
///
/// `buf` is the remaining packet payload; the frame's data is a
/// zero-copy slice of it. Returns the frame and the number of bytes
/// consumed.
pub fn decode_crypto_frame(buf: &Bytes) -> Result<(CryptoFrame, usize)> {
    let mut cursor = Cursor::new(buf);
    if cursor.u8()? != FRAME_TYPE_CRYPTO {
        return Err(Error::FrameEncoding);
    }

    let offset = cursor.varint()?;
    let length = cursor.varint()? as usize;

    let data_start = cursor.pos;
    let data_end = data_start.checked_add(length).ok_or(Error::FrameEncoding)?;
    if data_end > buf.len() {
        return Err(Error::FrameEncoding);
    }

    Ok((
        CryptoFrame {
            offset,
            data: buf.slice(data_start..data_end),
        },
        data_end,
    ))
}

/// Decode an ACK or ACK_ECN frame starting at its type byte.
///
/// Gap/length pairs are expanded into inclusive packet-number ranges,
/// largest range first. ECN counts are validated but not retained.
/// Returns the frame and the number of bytes consumed.
pub fn decode_ack_frame(buf: &[u8]) -> Result<(AckFrame, usize)> {
    let mut cursor = Cursor::new(buf);
    let frame_type = cursor.u8()?;
    if frame_type != FRAME_TYPE_ACK && frame_type != FRAME_TYPE_ACK_ECN {
        return Err(Error::FrameEncoding);
    }

    let largest_acknowledged = cursor.varint()?;
    let ack_delay = cursor.varint()?;
    let range_count = cursor.varint()?;
    let first_range = cursor.varint()?;

    let mut ack_ranges: TinyVec<[AckRange; 8]> = TinyVec::new();
    let mut smallest = largest_acknowledged
        .checked_sub(first_range)
        .ok_or(Error::FrameEncoding)?;
    ack_ranges.push(AckRange {
        smallest,
        largest: largest_acknowledged,
    });

    for _ in 0..range_count {
        let gap = cursor.varint()?;
        let len = cursor.varint()?;

        // RFC 9000 §19.3.1: largest = previous smallest - gap - 2
        let largest = smallest
            .checked_sub(gap)
            .and_then(|v| v.checked_sub(2))
            .ok_or(Error::FrameEncoding)?;
        smallest = largest.checked_sub(len).ok_or(Error::FrameEncoding)?;
        ack_ranges.push(AckRange { smallest, largest });
    }

    if frame_type == FRAME_TYPE_ACK_ECN {
        // ECT(0), ECT(1), ECN-CE counts; congestion response to ECN
        // is outside this core.
        for _ in 0..3 {
            cursor.varint()?;
        }
    }

    Ok((
        AckFrame {
            largest_acknowledged,
            ack_delay,
            ack_ranges,
        },
        cursor.pos,
    ))
}
