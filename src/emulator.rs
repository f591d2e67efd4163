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

//! FC1 floppy drive emulation.
//!
//! The controller drives the conversation. Each request frame is handed to
//! [`Drive::handle`], which moves the drive between its states and produces
//! at most one reply:
//!
//! ```text
//! Idle --LST/DSZ--> DirectoryServing --ACK--> Idle (EOF)
//! Idle --FRD-->     ReadingFile      --ACK--> next block ... Idle (EOF)
//! Idle --FWT-->     WritingFile      --FWT--> append ... --EOF--> commit, Idle
//! any  --CAN-->     Idle
//! ```
//!
//! `NAK` is answered with the previous reply, whatever the state, and moves
//! nothing. A garbled request is answered with `NAK` so the controller sends
//! it again.

use std::mem;
use log::{debug, error, info, warn};
use crate::catalog::{fix_job_name, valid_name, DiskCatalog};
use crate::engine::{Engine, LinkConfig};
use crate::error::{Error, Result};
use crate::frame::Fc1Codec;
use crate::protocol::*;
use crate::serial::SerialPort;

#[derive(Debug, Clone, Copy)]
pub struct EmulatorConfig {
    /// Free space reported to `DSZ`.
    pub free_space: u32,
    /// Rewrite the `//NAME` line of served jobs to match the file name.
    pub fix_job_names: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            free_space: DISK_FREE_BYTES,
            fix_job_names: false,
        }
    }
}

#[derive(Debug)]
enum DriveState {
    Idle,
    DirectoryServing,
    ReadingFile { name: String, data: Vec<u8>, offset: usize },
    WritingFile { name: String, buffer: Vec<u8>, expected: Option<usize> },
}

impl DriveState {
    fn name(&self) -> &'static str {
        match self {
            DriveState::Idle => "Idle",
            DriveState::DirectoryServing => "DirectoryServing",
            DriveState::ReadingFile { .. } => "ReadingFile",
            DriveState::WritingFile { .. } => "WritingFile",
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn refusal(reason: &[u8]) -> Vec<u8> {
    [OP_CANCEL, reason].concat()
}

/// Refusal sent back for a failed catalog operation.
fn refusal_for(e: &Error) -> Vec<u8> {
    match e {
        Error::NotFound(_) => refusal(REASON_NOT_FOUND),
        Error::Conflict(_) => refusal(REASON_EXISTS),
        Error::Parameter(_) => refusal(REASON_BAD_NAME),
        _ => refusal(REASON_IO),
    }
}

/// File names arrive padded with trailing spaces.
fn request_name(arg: &[u8]) -> String {
    lossy(arg).trim_end().to_string()
}

pub struct Drive {
    catalog: DiskCatalog,
    config: EmulatorConfig,
    state: DriveState,
    last_reply: Option<Vec<u8>>,
}

impl Drive {
    pub fn new(catalog: DiskCatalog, config: EmulatorConfig) -> Self {
        Drive {
            catalog,
            config,
            state: DriveState::Idle,
            last_reply: None,
        }
    }

    pub fn catalog(&self) -> &DiskCatalog {
        &self.catalog
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, DriveState::Idle)
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Drop the current session without committing anything.
    pub fn abandon(&mut self) {
        let previous = mem::replace(&mut self.state, DriveState::Idle);
        match previous {
            DriveState::WritingFile { name, buffer, .. } => {
                warn!("discarded {} bytes written to {}", buffer.len(), name);
            }
            DriveState::ReadingFile { name, offset, data } => {
                warn!("abandoned read of {} at {} of {} bytes", name, offset, data.len());
            }
            _ => {}
        }
    }

    /// Process one request from the controller. Returns the reply to send,
    /// if any.
    pub fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request == OP_REPEAT {
            match &self.last_reply {
                Some(reply) => debug!("repeating {:?} in {}", lossy(&reply[..reply.len().min(3)]), self.state_name()),
                None => debug!("nothing to repeat"),
            }
            return self.last_reply.clone();
        }

        let reply = self.answer(request);
        self.last_reply = reply.clone();
        reply
    }

    fn answer(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let (op, arg) = request.split_at(request.len().min(3));

        if op == OP_CANCEL {
            if !self.is_idle() {
                info!("controller cancelled in {}", self.state_name());
            }
            self.abandon();
            return Some(OP_ACK.to_vec());
        }
        if op == OP_ENQUIRY {
            debug!("answering enquiry");
            return Some(OP_ACK.to_vec());
        }
        if op == OP_EOT {
            debug!("end of transmission");
            self.abandon();
            return None;
        }

        match mem::replace(&mut self.state, DriveState::Idle) {
            DriveState::Idle => self.handle_idle(op, arg),
            DriveState::DirectoryServing if op == OP_ACK => Some(OP_EOF.to_vec()),
            DriveState::ReadingFile { name, data, offset } if op == OP_ACK => {
                if offset >= data.len() {
                    info!("sent {} ({} bytes)", name, data.len());
                    return Some(OP_EOF.to_vec());
                }
                let end = data.len().min(offset + BLOCK_SIZE);
                let reply = [OP_READ, &data[offset..end]].concat();
                self.state = DriveState::ReadingFile { name, data, offset: end };
                Some(reply)
            }
            DriveState::WritingFile { name, buffer, expected } => {
                self.handle_writing(name, buffer, expected, op, arg)
            }
            previous => {
                warn!("{} interrupted {}, starting over", lossy(request), previous.name());
                self.handle_idle(op, arg)
            }
        }
    }

    fn handle_idle(&mut self, op: &[u8], arg: &[u8]) -> Option<Vec<u8>> {
        if op == OP_LIST {
            let limit = (MAX_FC1_PAYLOAD - 7) / NAME_WIDTH;
            let names: Vec<&str> = self.catalog.names().collect();
            if names.len() > limit {
                warn!("listing only the first {} of {} files", limit, names.len());
            }
            let names = &names[..names.len().min(limit)];

            let mut reply = format!("LST{:04}", names.len());
            for name in names {
                reply.push_str(&format!("{:<width$}", name, width = NAME_WIDTH));
            }
            info!("listing {} files", names.len());
            self.state = DriveState::DirectoryServing;
            return Some(reply.into_bytes());
        }

        if op == OP_DISK_SIZE {
            self.state = DriveState::DirectoryServing;
            return Some(format!("DSZ{:08}", self.config.free_space).into_bytes());
        }

        if op == OP_READ {
            let name = request_name(arg);
            let data = match self.catalog.read(&name) {
                Ok(data) => data,
                Err(e) => {
                    warn!("cannot serve {}: {}", name, e);
                    return Some(refusal_for(&e));
                }
            };
            let data = if self.config.fix_job_names && name.to_ascii_uppercase().ends_with(".JBI") {
                let (fixed, replaced) = fix_job_name(&name, &data);
                if let Some(line) = replaced {
                    info!("{}: replaced {:?} to match the file name", name, line);
                }
                fixed
            } else {
                data
            };

            info!("reading {} ({} bytes)", name, data.len());
            let reply = format!("FSZ{:08}", data.len()).into_bytes();
            self.state = DriveState::ReadingFile { name, data, offset: 0 };
            return Some(reply);
        }

        if op == OP_WRITE {
            let name = request_name(arg);
            if !valid_name(&name) {
                warn!("refusing write to {:?}", name);
                return Some(refusal(REASON_BAD_NAME));
            }
            if !self.catalog.overwrite() && self.catalog.exists(&name) {
                warn!("refusing write to {}: file exists", name);
                return Some(refusal(REASON_EXISTS));
            }
            info!("writing {}", name);
            self.state = DriveState::WritingFile { name, buffer: Vec::new(), expected: None };
            return Some(OP_ACK.to_vec());
        }

        if op == OP_DELETE {
            let name = request_name(arg);
            return Some(match self.catalog.remove(&name) {
                Ok(()) => OP_ACK.to_vec(),
                Err(e) => {
                    warn!("cannot delete {}: {}", name, e);
                    refusal_for(&e)
                }
            });
        }

        if op == OP_ACK {
            debug!("ignoring stray acknowledgement");
            return None;
        }

        warn!("unhandled request {:?}", lossy(&[op, arg].concat()));
        Some(refusal(REASON_UNKNOWN_REQUEST))
    }

    fn handle_writing(
        &mut self,
        name: String,
        mut buffer: Vec<u8>,
        expected: Option<usize>,
        op: &[u8],
        arg: &[u8],
    ) -> Option<Vec<u8>> {
        if op == OP_FILE_SIZE {
            let size = lossy(arg).parse::<usize>().ok();
            match size {
                Some(size) if buffer.is_empty() => {
                    debug!("{} will be {} bytes", name, size);
                    self.state = DriveState::WritingFile { name, buffer, expected: Some(size) };
                    Some(OP_ACK.to_vec())
                }
                _ => {
                    warn!("bad size {:?} for {}, write abandoned", lossy(arg), name);
                    Some(refusal(REASON_SIZE))
                }
            }
        } else if op == OP_WRITE {
            buffer.extend_from_slice(arg);
            if expected.is_some_and(|expected| buffer.len() > expected) {
                warn!("{} overran its declared size, write abandoned", name);
                return Some(refusal(REASON_SIZE));
            }
            self.state = DriveState::WritingFile { name, buffer, expected };
            Some(OP_ACK.to_vec())
        } else if op == OP_EOF {
            if expected.is_some_and(|expected| buffer.len() != expected) {
                warn!("{} ended short of its declared size, write abandoned", name);
                return Some(refusal(REASON_SIZE));
            }
            Some(match self.catalog.commit(&name, &buffer) {
                Ok(()) => OP_ACK.to_vec(),
                Err(e) => {
                    error!("cannot store {}: {}", name, e);
                    refusal_for(&e)
                }
            })
        } else {
            warn!("{} interrupted write of {}, nothing stored", lossy(op), name);
            self.handle_idle(op, arg)
        }
    }
}

/// A drive answering on a serial port.
pub struct DiskEmulator {
    engine: Engine<Fc1Codec>,
    drive: Drive,
    silent: u32,
}

impl DiskEmulator {
    pub fn new(serial: Box<dyn SerialPort>, link: LinkConfig, drive: Drive) -> Self {
        DiskEmulator {
            engine: Engine::new(serial, Fc1Codec, link),
            drive,
            silent: 0,
        }
    }

    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    /// Wait for one request and answer it. Returns `false` once the link is
    /// gone.
    ///
    /// Garbage is answered with `NAK`. A session that hears nothing for the
    /// attempt ceiling's worth of timeouts is abandoned. Idle waits never
    /// give up.
    pub fn step(&mut self) -> Result<bool> {
        let timeout = self.engine.config().timeout;
        match self.engine.receive(timeout) {
            Ok(request) => {
                self.silent = 0;
                if let Some(reply) = self.drive.handle(&request) {
                    self.engine.send(&reply)?;
                }
                Ok(true)
            }
            Err(e @ (Error::Framing(_) | Error::Checksum { .. })) => {
                debug!("{} in {}, asking for the request again", e, self.drive.state_name());
                self.engine.send(&OP_REPEAT.to_vec())?;
                Ok(true)
            }
            Err(Error::Timeout(_)) => {
                if self.drive.is_idle() {
                    return Ok(true);
                }
                self.silent += 1;
                if self.silent >= self.engine.attempts() {
                    warn!("no request in {} after {} waits", self.drive.state_name(), self.silent);
                    self.drive.abandon();
                    self.silent = 0;
                }
                Ok(true)
            }
            Err(Error::Serial(e)) if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof
            ) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Answer requests until the link closes.
    pub fn serve(&mut self) -> Result<()> {
        info!(
            "serving {} files from {}",
            self.drive.catalog().names().count(),
            self.drive.catalog().dir().display()
        );
        while self.step()? {}
        info!("link closed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
