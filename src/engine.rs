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

//! Request/response exchanges over a serial port.
//!
//! The wire has no request identifiers, so exactly one request may be in
//! flight. Every operation takes `&mut self`; the borrow checker keeps a
//! second request from being sent while the first is outstanding.

use std::time::{Duration, Instant};
use log::{debug, warn};
use crate::error::{Error, Result};
use crate::frame::Codec;
use crate::protocol::{DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT};
use crate::serial::SerialPort;

/// Timing and retry settings for one link.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Wait for a single response frame.
    pub timeout: Duration,
    /// Sends of one request before the last transport error is returned.
    pub attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

pub struct Engine<C: Codec> {
    serial: Box<dyn SerialPort>,
    codec: C,
    config: LinkConfig,
    rx: Vec<u8>,
}

impl<C: Codec> Engine<C> {
    pub fn new(serial: Box<dyn SerialPort>, codec: C, config: LinkConfig) -> Self {
        Engine {
            serial,
            codec,
            config: LinkConfig {
                attempts: config.attempts.max(1),
                ..config
            },
            rx: Vec::new(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn attempts(&self) -> u32 {
        self.config.attempts
    }

    /// Encode and write one frame without waiting for anything.
    pub fn send(&mut self, frame: &C::Frame) -> Result<()> {
        let bytes = self.codec.encode(frame);
        debug!("tx {:?} ({} bytes)", frame, bytes.len());
        self.serial.write_all(&bytes)?;
        Ok(())
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Garbage in front of a frame is skipped while more buffered bytes
    /// remain. A decode error that leaves the buffer empty is returned at
    /// once instead of waiting out the timeout.
    pub fn receive(&mut self, timeout: Duration) -> Result<C::Frame> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            match self.codec.decode(&mut self.rx) {
                Ok(Some(frame)) => {
                    debug!("rx {:?}", frame);
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) if !self.rx.is_empty() => {
                    warn!("{}, resynchronizing", e);
                    continue;
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(timeout));
            }

            match self.serial.read_timeout(&mut chunk, deadline - now) {
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(Error::Timeout(timeout));
                }
                Err(e) => return Err(Error::Serial(e)),
            }
        }
    }

    /// Send `request` and wait for the answer. Gives up after the configured
    /// number of sends with the last transport error.
    ///
    /// A resend request from the peer means the request never arrived intact,
    /// so the last frame goes out again. A garbled or missing answer means the
    /// request may already have been acted on. Codecs with a repeat request
    /// ask for the answer again instead of repeating the request.
    pub fn execute(&mut self, request: &C::Frame, timeout: Duration) -> Result<C::Frame> {
        let mut repeat: Option<C::Frame> = None;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.send(repeat.as_ref().unwrap_or(request))?;

            let failure = match self.receive(timeout) {
                Ok(frame) if self.codec.is_resend_request(&frame) => {
                    Error::Protocol(format!("peer asked for {:?} to be sent again", request))
                }
                Ok(frame) => return Ok(frame),
                Err(e) if e.is_transport() => {
                    if repeat.is_none() {
                        repeat = self.codec.repeat_request();
                    }
                    e
                }
                Err(e) => return Err(e),
            };

            if attempt >= self.config.attempts {
                warn!("giving up after {} attempts: {}", attempt, failure);
                return Err(failure);
            }
            warn!("attempt {} of {} failed: {}", attempt, self.config.attempts, failure);
        }
    }

    /// `execute` with the configured timeout.
    pub fn request(&mut self, request: &C::Frame) -> Result<C::Frame> {
        let timeout = self.config.timeout;
        self.execute(request, timeout)
    }
}

// ============================================================================
// Tests
// ============================================================================
