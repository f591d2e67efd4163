// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Frame codecs.
//!
//! A codec turns frames into bytes and pulls frames back out of a receive
//! buffer. Decoding never blocks: it either yields a frame, asks for more
//! bytes, or throws away garbage up to the next plausible start marker and
//! reports why.
//!
//! The FC1 drive frame looks like this:
//!
//! ```text
//! STX  LL  PPPP...  CC
//! ```
//!
//! `LL` is the little-endian payload length and `CC` the little-endian
//! two's complement of the 16-bit sum over `LL` and the payload.

use crate::error::{Error, Result};
use crate::protocol::{MAX_FC1_PAYLOAD, OP_REPEAT, STX};

// ============================================================================
// Codec Trait
// ============================================================================

pub trait Codec: Send {
    type Frame: std::fmt::Debug;

    fn encode(&self, frame: &Self::Frame) -> Vec<u8>;

    /// Take one frame off the front of `buf`. `Ok(None)` means the buffer
    /// holds the start of a frame and more bytes are needed.
    fn decode(&self, buf: &mut Vec<u8>) -> Result<Option<Self::Frame>>;

    /// Frames asking the sender to transmit its last frame again.
    fn is_resend_request(&self, _frame: &Self::Frame) -> bool {
        false
    }

    /// Frame asking the peer for its last reply again. Without one, a lost
    /// reply is recovered by sending the original request again.
    fn repeat_request(&self) -> Option<Self::Frame> {
        None
    }
}

/// Drop the first byte of `buf` and everything up to the next byte that
/// could start a frame. Returns the number of bytes discarded.
pub fn resync(buf: &mut Vec<u8>, is_start: impl Fn(u8) -> bool) -> usize {
    let next = buf
        .iter()
        .skip(1)
        .position(|&b| is_start(b))
        .map(|i| i + 1)
        .unwrap_or(buf.len());
    buf.drain(..next);
    next
}

// ============================================================================
// FC1 Codec
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct Fc1Codec;

/// Checksum over the length bytes and payload.
pub fn fc1_checksum(bytes: &[u8]) -> u16 {
    let sum = bytes.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
    0u16.wrapping_sub(sum)
}

impl Codec for Fc1Codec {
    type Frame = Vec<u8>;

    fn encode(&self, payload: &Vec<u8>) -> Vec<u8> {
        debug_assert!(payload.len() <= MAX_FC1_PAYLOAD);
        let mut out = Vec::with_capacity(payload.len() + 5);
        out.push(STX);
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        let checksum = fc1_checksum(&out[1..]);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    fn decode(&self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if buf[0] != STX {
            let skipped = resync(buf, |b| b == STX);
            return Err(Error::Framing(format!("discarded {} bytes before start marker", skipped)));
        }

        if buf.len() < 3 {
            return Ok(None);
        }

        let length = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        if length > MAX_FC1_PAYLOAD {
            resync(buf, |b| b == STX);
            return Err(Error::Framing(format!("declared length {} exceeds {}", length, MAX_FC1_PAYLOAD)));
        }

        let total = length + 5;
        if buf.len() < total {
            return Ok(None);
        }

        let stated = u16::from_le_bytes([buf[3 + length], buf[4 + length]]);
        let computed = fc1_checksum(&buf[1..3 + length]);
        if stated != computed {
            resync(buf, |b| b == STX);
            return Err(Error::Checksum { stated, computed });
        }

        let payload = buf[3..3 + length].to_vec();
        buf.drain(..total);
        Ok(Some(payload))
    }

    fn is_resend_request(&self, payload: &Vec<u8>) -> bool {
        payload == OP_REPEAT
    }

    fn repeat_request(&self) -> Option<Vec<u8>> {
        Some(OP_REPEAT.to_vec())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(payload: &[u8]) -> Vec<u8> {
        Fc1Codec.encode(&payload.to_vec())
    }

    #[test]
    fn test_encode_known_frame() {
        // 3 + 0 + 'A' + 'C' + 'K' = 210, 0x10000 - 210 = 0xFF2E
        assert_eq!(encode(b"ACK"), vec![STX, 0x03, 0x00, b'A', b'C', b'K', 0x2E, 0xFF]);
    }

    #[test]
    fn test_round_trip() {
        let payloads: [&[u8]; 4] = [b"", b"EOF", b"LST0001DEMO.JBI    ", &[0xFFu8; 258]];
        for payload in payloads {
            let mut buf = encode(payload);
            let decoded = Fc1Codec.decode(&mut buf).expect("valid frame");
            assert_eq!(decoded.as_deref(), Some(payload));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_corrupted_checksum_is_rejected() {
        let mut buf = encode(b"FRDHELLO");
        let last = buf.len() - 1;
        buf[last] ^= 0x55;

        match Fc1Codec.decode(&mut buf) {
            Err(Error::Checksum { .. }) => {}
            other => panic!("expected checksum error, got {:?}", other),
        }
        // the bad frame is gone, nothing in it looked like a start marker
        assert!(Fc1Codec.decode(&mut buf).map(|f| f.is_none()).unwrap_or(true));
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let full = encode(b"DSZ00729088");
        let mut buf = full[..6].to_vec();
        assert_eq!(Fc1Codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 6);

        buf.extend_from_slice(&full[6..]);
        assert_eq!(Fc1Codec.decode(&mut buf).unwrap(), Some(b"DSZ00729088".to_vec()));
    }

    #[test]
    fn test_resync_after_leading_garbage() {
        let mut buf = vec![0x00, 0x41, 0x7F];
        buf.extend(encode(b"ENQ"));

        match Fc1Codec.decode(&mut buf) {
            Err(Error::Framing(_)) => {}
            other => panic!("expected framing error, got {:?}", other),
        }
        assert_eq!(Fc1Codec.decode(&mut buf).unwrap(), Some(b"ENQ".to_vec()));
    }

    #[test]
    fn test_oversized_length_is_garbage() {
        let mut buf = vec![STX, 0xFF, 0xFF, b'x'];
        buf.extend(encode(b"ACK"));

        assert!(matches!(Fc1Codec.decode(&mut buf), Err(Error::Framing(_))));
        assert_eq!(Fc1Codec.decode(&mut buf).unwrap(), Some(b"ACK".to_vec()));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = encode(b"ACK");
        buf.extend(encode(b"EOF"));
        assert_eq!(Fc1Codec.decode(&mut buf).unwrap(), Some(b"ACK".to_vec()));
        assert_eq!(Fc1Codec.decode(&mut buf).unwrap(), Some(b"EOF".to_vec()));
        assert_eq!(Fc1Codec.decode(&mut buf).unwrap(), None);
    }
}
