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

//! The controller's host-link port.
//!
//! This is close to IBM binary synchronous communication. A message is one
//! or more blocks:
//!
//! ```text
//! SOH 01,000 STX body... ETB CC     first block, more follow
//! STX body... ETX CC                last block
//! ```
//!
//! `CC` is the little-endian 16-bit sum of every byte after the leading
//! SOH/STX up to and including the terminator. Each block is acknowledged
//! with `DLE 0` / `DLE 1` alternately, starting again from `DLE 0` after
//! every EOT.

use std::time::{Duration, Instant};
use log::{debug, warn};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::frame::{Codec, resync};
use crate::protocol::*;

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Enq,
    Eot,
    Nak,
    Ack0,
    Ack1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Transaction code, present on the first block of a message only.
    pub header: Option<String>,
    pub body: Vec<u8>,
    /// Closed with ETX rather than ETB.
    pub last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostFrame {
    Control(Control),
    Block(Block),
}

/// Split a message body into blocks of at most `MAX_BLOCK_BODY` bytes.
pub fn blocks(header: &str, body: &[u8]) -> Vec<Block> {
    let chunks: Vec<&[u8]> = if body.is_empty() {
        vec![body]
    } else {
        body.chunks(MAX_BLOCK_BODY).collect()
    };
    let count = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Block {
            header: (i == 0).then(|| header.to_string()),
            body: chunk.to_vec(),
            last: i + 1 == count,
        })
        .collect()
}

fn block_checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

fn is_start(byte: u8) -> bool {
    matches!(byte, SOH | STX | ENQ | EOT | NAK | DLE)
}

// ============================================================================
// Codec
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct HostLinkCodec;

impl Codec for HostLinkCodec {
    type Frame = HostFrame;

    fn encode(&self, frame: &HostFrame) -> Vec<u8> {
        match frame {
            HostFrame::Control(Control::Enq) => vec![ENQ],
            HostFrame::Control(Control::Eot) => vec![EOT],
            HostFrame::Control(Control::Nak) => vec![NAK],
            HostFrame::Control(Control::Ack0) => vec![DLE, ACK0],
            HostFrame::Control(Control::Ack1) => vec![DLE, ACK1],
            HostFrame::Block(block) => {
                let mut out = Vec::with_capacity(block.body.len() + 12);
                if let Some(header) = &block.header {
                    out.push(SOH);
                    out.extend_from_slice(header.as_bytes());
                }
                out.push(STX);
                out.extend_from_slice(&block.body);
                out.push(if block.last { ETX } else { ETB });
                let checksum = block_checksum(&out[1..]);
                out.extend_from_slice(&checksum.to_le_bytes());
                out
            }
        }
    }

    fn decode(&self, buf: &mut Vec<u8>) -> Result<Option<HostFrame>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        let single = match first {
            ENQ => Some(Control::Enq),
            EOT => Some(Control::Eot),
            NAK => Some(Control::Nak),
            _ => None,
        };
        if let Some(control) = single {
            buf.drain(..1);
            return Ok(Some(HostFrame::Control(control)));
        }

        let body_start = match first {
            DLE => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let control = match buf[1] {
                    ACK0 => Control::Ack0,
                    ACK1 => Control::Ack1,
                    other => {
                        resync(buf, is_start);
                        return Err(Error::Framing(format!("unsupported DLE sequence {:#04x}", other)));
                    }
                };
                buf.drain(..2);
                return Ok(Some(HostFrame::Control(control)));
            }
            SOH => {
                if buf.len() < 8 {
                    return Ok(None);
                }
                if buf[7] != STX || !buf[1..7].iter().all(u8::is_ascii_graphic) {
                    resync(buf, is_start);
                    return Err(Error::Framing("malformed block heading".into()));
                }
                8
            }
            STX => 1,
            _ => {
                let skipped = resync(buf, is_start);
                return Err(Error::Framing(format!("discarded {} bytes before start marker", skipped)));
            }
        };

        let window_end = buf.len().min(body_start + MAX_BLOCK_BODY + 1);
        let Some(offset) = buf[body_start..window_end].iter().position(|&b| b == ETX || b == ETB) else {
            if buf.len() < body_start + MAX_BLOCK_BODY + 1 {
                return Ok(None);
            }
            resync(buf, is_start);
            return Err(Error::Framing("no block terminator within window".into()));
        };

        let end = body_start + offset;
        let total = end + 3;
        if buf.len() < total {
            return Ok(None);
        }

        let stated = u16::from_le_bytes([buf[end + 1], buf[end + 2]]);
        let computed = block_checksum(&buf[1..=end]);
        if stated != computed {
            resync(buf, is_start);
            return Err(Error::Checksum { stated, computed });
        }

        let header = (first == SOH).then(|| String::from_utf8_lossy(&buf[1..7]).into_owned());
        let block = Block {
            header,
            body: buf[body_start..end].to_vec(),
            last: buf[end] == ETX,
        };
        buf.drain(..total);
        Ok(Some(HostFrame::Block(block)))
    }

    fn is_resend_request(&self, frame: &HostFrame) -> bool {
        *frame == HostFrame::Control(Control::Nak)
    }
}

// ============================================================================
// Session
// ============================================================================

/// A received message: its transaction code and the joined block bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: String,
    pub body: Vec<u8>,
}

/// Drives whole host-link messages over an engine, keeping track of the
/// alternating acknowledgement.
pub struct HostLink {
    engine: Engine<HostLinkCodec>,
    ack_odd: bool,
}

impl HostLink {
    pub fn new(engine: Engine<HostLinkCodec>) -> Self {
        HostLink { engine, ack_odd: false }
    }

    fn next_ack(&mut self) -> Control {
        let ack = if self.ack_odd { Control::Ack1 } else { Control::Ack0 };
        self.ack_odd = !self.ack_odd;
        ack
    }

    fn expect_ack(&mut self, reply: HostFrame, what: &str) -> Result<()> {
        let expected = self.next_ack();
        match reply {
            HostFrame::Control(control) if control == expected => Ok(()),
            HostFrame::Control(Control::Eot) => {
                Err(Error::Protocol(format!("controller ended the exchange after {}", what)))
            }
            other => Err(Error::Protocol(format!("expected {:?} after {}, got {:?}", expected, what, other))),
        }
    }

    /// Send one message as the calling station: ENQ, blocks, EOT.
    pub fn send_message(&mut self, code: &str, body: &[u8]) -> Result<()> {
        self.ack_odd = false;

        let reply = self.engine.request(&HostFrame::Control(Control::Enq))?;
        self.expect_ack(reply, "enquiry")?;

        for block in blocks(code, body) {
            let reply = self.engine.request(&HostFrame::Block(block))?;
            self.expect_ack(reply, "block")?;
        }

        self.engine.send(&HostFrame::Control(Control::Eot))?;
        self.ack_odd = false;
        Ok(())
    }

    /// Wait for the controller to call and take one message from it.
    ///
    /// `wait` bounds the wait for the controller's ENQ; `None` waits until
    /// the controller calls. Every later frame uses the link timeout.
    pub fn receive_message(&mut self, wait: Option<Duration>) -> Result<Message> {
        let config = *self.engine.config();
        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            let slice = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(config.timeout),
                None => config.timeout,
            };
            match self.engine.receive(slice) {
                Ok(HostFrame::Control(Control::Enq)) => break,
                Ok(HostFrame::Control(Control::Eot)) => continue,
                Ok(other) => return Err(Error::Protocol(format!("expected ENQ, got {:?}", other))),
                Err(e) if e.is_transport() => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(match e {
                            Error::Timeout(_) => Error::Timeout(wait.unwrap_or(config.timeout)),
                            other => other,
                        });
                    }
                    debug!("still waiting for controller: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        self.ack_odd = false;
        let mut last_ack = self.next_ack();
        self.engine.send(&HostFrame::Control(last_ack))?;

        let mut code = None;
        let mut body = Vec::new();
        let mut failures = 0;

        loop {
            let frame = match self.engine.receive(config.timeout) {
                Ok(frame) => frame,
                Err(e) if e.is_transport() && failures + 1 < config.attempts => {
                    failures += 1;
                    warn!("bad block from controller ({}), {} of {}", e, failures, config.attempts);
                    if !matches!(e, Error::Timeout(_)) {
                        self.engine.send(&HostFrame::Control(Control::Nak))?;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            match frame {
                HostFrame::Block(block) => {
                    if code.is_none() {
                        match block.header {
                            Some(header) => code = Some(header),
                            None => return Err(Error::Protocol("message started without a heading".into())),
                        }
                    }
                    body.extend_from_slice(&block.body);
                    last_ack = self.next_ack();
                    self.engine.send(&HostFrame::Control(last_ack))?;
                    if block.last {
                        break;
                    }
                }
                // our acknowledgement went missing
                HostFrame::Control(Control::Enq) => {
                    self.engine.send(&HostFrame::Control(last_ack))?;
                }
                HostFrame::Control(Control::Eot) => {
                    return Err(Error::Protocol("controller ended transmission mid-message".into()));
                }
                other => return Err(Error::Protocol(format!("unexpected {:?} inside message", other))),
            }
        }

        match self.engine.receive(config.timeout)? {
            HostFrame::Control(Control::Eot) => {}
            other => return Err(Error::Protocol(format!("expected EOT, got {:?}", other))),
        }
        self.ack_odd = false;

        let code = code.unwrap_or_default();
        debug!("message {} {:?}", code, String::from_utf8_lossy(&body));
        Ok(Message { code, body })
    }

    /// Send a command message and wait for the controller's answer.
    pub fn exchange(&mut self, code: &str, body: &[u8], wait: Option<Duration>) -> Result<Message> {
        self.send_message(code, body)?;
        self.receive_message(wait)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::LinkConfig;
    use crate::serial::MockSerialPort;

    pub fn wire(frame: HostFrame) -> Vec<u8> {
        HostLinkCodec.encode(&frame)
    }

    pub fn ack(odd: bool) -> Vec<u8> {
        wire(HostFrame::Control(if odd { Control::Ack1 } else { Control::Ack0 }))
    }

    pub fn message(code: &str, body: &[u8]) -> Vec<u8> {
        blocks(code, body).into_iter().flat_map(|b| wire(HostFrame::Block(b))).collect()
    }

    /// Bytes the controller sends and bytes we must send for one
    /// command/answer exchange.
    pub fn script(command: &[u8], answer_code: &str, answer: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let reads = [
            ack(false),
            ack(true),
            vec![ENQ],
            message(answer_code, answer),
            vec![EOT],
        ]
        .concat();
        let writes = [
            vec![ENQ],
            message(TX_COMMAND, command),
            vec![EOT],
            ack(false),
            ack(true),
        ]
        .concat();
        (reads, writes)
    }

    pub fn link(reads: Vec<u8>, writes: Vec<u8>) -> HostLink {
        let mock = MockSerialPort::scripted(vec![Some(reads)], writes);
        let config = LinkConfig { timeout: Duration::from_millis(20), attempts: 3 };
        HostLink::new(Engine::new(Box::new(mock), HostLinkCodec, config))
    }

    #[test]
    fn test_encode_small_block() {
        let block = Block { header: None, body: b"A".to_vec(), last: true };
        assert_eq!(wire(HostFrame::Block(block)), vec![STX, b'A', ETX, 0x44, 0x00]);
    }

    #[test]
    fn test_encode_headed_block() {
        let bytes = message(TX_COMMAND, b"RPOS\r");
        assert_eq!(bytes[0], SOH);
        assert_eq!(&bytes[1..7], b"01,000");
        assert_eq!(bytes[7], STX);
        assert_eq!(&bytes[8..13], b"RPOS\r");
        assert_eq!(bytes[13], ETX);
        let sum: u16 = bytes[1..14].iter().map(|&b| b as u16).sum();
        assert_eq!(u16::from_le_bytes([bytes[14], bytes[15]]), sum);
    }

    #[test]
    fn test_block_round_trip() {
        for block in blocks(TX_DATA, &[b'7'; 600]) {
            let mut buf = wire(HostFrame::Block(block.clone()));
            assert_eq!(HostLinkCodec.decode(&mut buf).unwrap(), Some(HostFrame::Block(block)));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_long_body_splits_with_etb() {
        let parts = blocks(TX_DATA, &[b'x'; 300]);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].header.as_deref(), Some(TX_DATA));
        assert!(!parts[0].last);
        assert_eq!(parts[0].body.len(), MAX_BLOCK_BODY);
        assert_eq!(parts[1].header, None);
        assert!(parts[1].last);
    }

    #[test]
    fn test_control_sequences_decode() {
        let mut buf = vec![ENQ, DLE, ACK1, EOT, NAK, DLE, ACK0];
        let expected = [Control::Enq, Control::Ack1, Control::Eot, Control::Nak, Control::Ack0];
        for control in expected {
            assert_eq!(HostLinkCodec.decode(&mut buf).unwrap(), Some(HostFrame::Control(control)));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_corrupted_block_is_rejected() {
        let mut buf = message(TX_RESULT, b"0000\r");
        buf[9] = b'1';
        assert!(matches!(HostLinkCodec.decode(&mut buf), Err(Error::Checksum { .. })));
    }

    #[test]
    fn test_exchange_round_trip() {
        let (reads, writes) = script(b"HOLD 1\r", TX_RESULT, b"0000\r");
        let mut link = link(reads, writes);
        let answer = link.exchange(TX_COMMAND, b"HOLD 1\r", Some(Duration::from_millis(50))).unwrap();
        assert_eq!(answer, Message { code: TX_RESULT.into(), body: b"0000\r".to_vec() });
    }

    #[test]
    fn test_multi_block_answer_is_joined() {
        let data = vec![b'9'; 400];
        let reads = [
            ack(false),
            ack(true),
            vec![ENQ],
            message(TX_DATA, &data),
            vec![EOT],
        ]
        .concat();
        let writes = [
            vec![ENQ],
            message(TX_COMMAND, b"RJDIR *\r"),
            vec![EOT],
            ack(false),
            ack(true),
            ack(false),
        ]
        .concat();

        let mut link = link(reads, writes);
        let answer = link.exchange(TX_COMMAND, b"RJDIR *\r", None).unwrap();
        assert_eq!(answer.code, TX_DATA);
        assert_eq!(answer.body, data);
    }

    #[test]
    fn test_wrong_acknowledgement_is_protocol_error() {
        let reads = ack(true);
        let writes = vec![ENQ];
        let mut link = link(reads, writes);
        assert!(matches!(link.send_message(TX_COMMAND, b"RESET\r"), Err(Error::Protocol(_))));
    }
}
