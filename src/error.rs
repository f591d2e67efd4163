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

//! Error kinds shared by the codecs, the engine and the protocol layers.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bytes on the wire did not parse as a frame.
    #[error("framing error: {0}")]
    Framing(String),

    #[error("checksum mismatch: frame says {stated:#06x}, computed {computed:#06x}")]
    Checksum { stated: u16, computed: u16 },

    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// A well-formed frame that makes no sense at this point of the dialogue.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("{0} already exists and overwriting is disabled")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("cancelled by peer during {0}")]
    Cancelled(String),

    #[error("controller error {code}: {meaning}")]
    Controller { code: u16, meaning: &'static str },

    #[error("{path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serial I/O error: {0}")]
    Serial(#[from] std::io::Error),
}

impl Error {
    /// Errors the engine recovers from by asking again.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Framing(_) | Error::Checksum { .. } | Error::Timeout(_))
    }

    pub fn local_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::LocalFile { path: path.into(), source }
    }

    /// Prefix the message of a protocol error with where it happened.
    pub fn context(self, what: &str) -> Self {
        match self {
            Error::Protocol(msg) => Error::Protocol(format!("{} (during {})", msg, what)),
            other => other,
        }
    }
}
