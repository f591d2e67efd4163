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

//! YASNAC ERC link constants

use std::time::Duration;

// ============================================================================
// Control bytes
// ============================================================================

/// Start of heading - opens a host-link block carrying a transaction code
pub const SOH: u8 = 0x01;

/// Start of text - opens an FC1 frame, or the body of a host-link block
pub const STX: u8 = 0x02;

/// End of text - closes the final block of a host-link message
pub const ETX: u8 = 0x03;

/// End of transmission - the sender is done, acknowledgement parity resets
pub const EOT: u8 = 0x04;

/// Enquiry - request to start a host-link exchange
pub const ENQ: u8 = 0x05;

/// Data link escape - prefixes the two-byte host-link acknowledgements
pub const DLE: u8 = 0x10;

/// Negative acknowledge - the last block was garbled, send it again
pub const NAK: u8 = 0x15;

/// End of transmission block - more blocks of this message follow
pub const ETB: u8 = 0x17;

/// Even acknowledgement (follows DLE)
pub const ACK0: u8 = b'0';

/// Odd acknowledgement (follows DLE)
pub const ACK1: u8 = b'1';

// ============================================================================
// FC1 drive dialogue
// ============================================================================

/// Enquiry from the controller, answered with ACK
pub const OP_ENQUIRY: &[u8] = b"ENQ";

/// Positive acknowledgement, also the "next block please" request
pub const OP_ACK: &[u8] = b"ACK";

/// End of transmission from the controller
pub const OP_EOT: &[u8] = b"EOT";

/// End of file / end of listing
pub const OP_EOF: &[u8] = b"EOF";

/// Cancel the current session (a two-letter reason may follow)
pub const OP_CANCEL: &[u8] = b"CAN";

/// Directory listing
pub const OP_LIST: &[u8] = b"LST";

/// Free disk space query
pub const OP_DISK_SIZE: &[u8] = b"DSZ";

/// File read request, and the prefix of each data block sent back
pub const OP_READ: &[u8] = b"FRD";

/// File write request, and the prefix of each data block received
pub const OP_WRITE: &[u8] = b"FWT";

/// Declared file size, eight decimal digits
pub const OP_FILE_SIZE: &[u8] = b"FSZ";

/// File delete request
pub const OP_DELETE: &[u8] = b"DEL";

/// Send the last reply again. The receiver's session does not move.
/// Received in answer to a request, it asks for that request again.
pub const OP_REPEAT: &[u8] = b"NAK";

/// Refusal reason: the named file is not in the catalog
pub const REASON_NOT_FOUND: &[u8] = b"NF";

/// Refusal reason: the named file exists and overwriting is disabled
pub const REASON_EXISTS: &[u8] = b"EX";

/// Refusal reason: the name cannot be used on this disk
pub const REASON_BAD_NAME: &[u8] = b"BD";

/// Refusal reason: the drive side failed to read or write its file
pub const REASON_IO: &[u8] = b"IO";

/// Refusal reason: a write's declared size was unreadable, overrun or not reached
pub const REASON_SIZE: &[u8] = b"SZ";

/// Refusal reason: the request is not part of the dialogue
pub const REASON_UNKNOWN_REQUEST: &[u8] = b"RQ";

/// Bytes of file data carried by a single FRD/FWT block
pub const BLOCK_SIZE: usize = 255;

/// File names are space padded to this width in requests and listings
pub const NAME_WIDTH: usize = 12;

/// Free space reported for the emulated floppy
pub const DISK_FREE_BYTES: u32 = 729_088;

/// Largest FC1 payload a decoder will wait for before declaring garbage
pub const MAX_FC1_PAYLOAD: usize = 4096;

// ============================================================================
// Host-link transaction codes
// ============================================================================

/// Command from the remote computer
pub const TX_COMMAND: &str = "01,000";

/// Command result: `0000` or a four digit error code
pub const TX_RESULT: &str = "90,000";

/// Data response, comma separated
pub const TX_DATA: &str = "90,001";

/// Result body confirming a command or a received file
pub const RESULT_OK: &[u8] = b"0000\r";

/// Independent job sent by the controller (`NAME.JBI`)
pub const TX_FILE_JOB: &str = "02,001";

/// Related (master) job sent by the controller (`NAME.JBR`)
pub const TX_FILE_RELATED_JOB: &str = "02,002";

/// Condition and system data files sent by the controller, all saved as `.DAT`
pub const TX_FILE_DATA: [&str; 12] = [
    "02,011", // WEAV
    "02,012", // TOOL
    "02,013", // UFRAME
    "02,014", // ABSWELD
    "02,015", // CV
    "02,016", // SENSOR
    "02,017", // COMARC2
    "02,018", // PC1PC2
    "02,020", // POSOUT
    "02,022", // RECIPRO
    "02,023", // PALACT
    "02,030", // SYSTEM
];

/// Extension a file sent under transaction `code` is saved with.
pub fn file_extension(code: &str) -> Option<&'static str> {
    match code {
        TX_FILE_JOB => Some("JBI"),
        TX_FILE_RELATED_JOB => Some("JBR"),
        _ if TX_FILE_DATA.contains(&code) => Some("DAT"),
        _ => None,
    }
}

/// Largest body carried by one host-link block
pub const MAX_BLOCK_BODY: usize = 256;

// ============================================================================
// Link defaults
// ============================================================================

/// Baud rate of the FC1 drive port
pub const FC1_BAUD: u32 = 4800;

/// Baud rate of the controller's host-link port
pub const HOST_LINK_BAUD: u32 = 9600;

/// Sends of one request before giving up
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// Wait for one response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for the controller to call back with a command's answer
pub const REPLY_WAIT: Duration = Duration::from_secs(10);
