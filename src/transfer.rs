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

//! File operations against an FC1 drive, playing the controller's side of
//! the dialogue. Every request waits for its answer before the next one is
//! sent; the drive's `ACK` doubles as "send the next block".
//!
//! Requests are never sent twice once the drive may have acted on them. A
//! lost or garbled answer is recovered with `NAK`, which makes the drive
//! repeat its last reply without moving on.

use std::fs;
use std::path::Path;
use log::{debug, info, warn};
use crate::catalog::valid_name;
use crate::engine::{Engine, LinkConfig};
use crate::error::{Error, Result};
use crate::frame::Fc1Codec;
use crate::protocol::*;
use crate::serial::SerialPort;

pub struct DiskClient {
    engine: Engine<Fc1Codec>,
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn padded_name(name: &str) -> Result<Vec<u8>> {
    if !valid_name(name) {
        return Err(Error::Parameter(format!("{:?} is not a valid disk file name", name)));
    }
    Ok(format!("{:<width$}", name, width = NAME_WIDTH).into_bytes())
}

fn digits(field: &[u8]) -> Option<usize> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Turn a reply that is not the one we wanted into an error.
fn refused(reply: &[u8], name: &str, what: &str) -> Error {
    match reply.strip_prefix(OP_CANCEL) {
        Some(reason) if reason.is_empty() => Error::Cancelled(what.to_string()),
        Some(reason) if reason == REASON_NOT_FOUND => Error::NotFound(name.to_string()),
        Some(reason) if reason == REASON_EXISTS => Error::Conflict(name.to_string()),
        Some(reason) if reason == REASON_BAD_NAME => {
            Error::Parameter(format!("drive rejected the name {:?}", name))
        }
        Some(reason) if reason == REASON_IO => {
            Error::Protocol(format!("drive could not access {} during {}", name, what))
        }
        Some(reason) if reason == REASON_SIZE => {
            Error::Protocol(format!("drive rejected the size of {} during {}", name, what))
        }
        Some(reason) if reason == REASON_UNKNOWN_REQUEST => {
            Error::Protocol(format!("drive does not understand {}", what))
        }
        Some(reason) => Error::Protocol(format!("{} refused with unknown reason {:?}", what, lossy(reason))),
        None => Error::Protocol(format!("unexpected reply {:?} to {}", lossy(reply), what)),
    }
}

fn parse_listing(reply: &[u8]) -> Result<Vec<String>> {
    let body = reply
        .strip_prefix(OP_LIST)
        .ok_or_else(|| refused(reply, "", "list"))?;
    if body.len() < 4 {
        return Err(Error::Protocol(format!("listing {:?} has no entry count", lossy(reply))));
    }

    let (count, names) = body.split_at(4);
    let count = digits(count)
        .ok_or_else(|| Error::Protocol(format!("bad listing count {:?}", lossy(count))))?;

    let names: Vec<String> = names
        .chunks(NAME_WIDTH)
        .map(|chunk| lossy(chunk).trim_end().to_string())
        .collect();
    if names.len() != count {
        return Err(Error::Protocol(format!("listing says {} files but carries {}", count, names.len())));
    }
    Ok(names)
}

impl DiskClient {
    pub fn new(serial: Box<dyn SerialPort>, config: LinkConfig) -> Self {
        DiskClient {
            engine: Engine::new(serial, Fc1Codec, config),
        }
    }

    fn request(&mut self, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.engine.request(&payload)
    }

    fn expect_ack(&mut self, payload: Vec<u8>, name: &str, what: &str) -> Result<()> {
        let reply = self.request(payload)?;
        if reply == OP_ACK {
            Ok(())
        } else {
            Err(refused(&reply, name, what))
        }
    }

    /// Ask the drive for the closing `EOF` of a listing or size query.
    fn expect_eof(&mut self, what: &str) -> Result<()> {
        let reply = self.request(OP_ACK.to_vec())?;
        if reply == OP_EOF {
            Ok(())
        } else {
            Err(refused(&reply, "", what))
        }
    }

    /// File names in the order the drive lists them.
    pub fn list(&mut self) -> Result<Vec<String>> {
        let reply = self.request(OP_LIST.to_vec())?;
        let names = parse_listing(&reply)?;
        self.expect_eof("list")?;
        debug!("drive lists {} files", names.len());
        Ok(names)
    }

    /// Free space reported by the drive, in bytes.
    pub fn disk_size(&mut self) -> Result<u32> {
        let reply = self.request(OP_DISK_SIZE.to_vec())?;
        let size = reply
            .strip_prefix(OP_DISK_SIZE)
            .ok_or_else(|| refused(&reply, "", "disk size"))
            .and_then(|field| {
                digits(field)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| Error::Protocol(format!("bad disk size {:?}", lossy(field))))
            })?;
        self.expect_eof("disk size")?;
        Ok(size)
    }

    /// Read a whole file. The assembled length must match the size the
    /// drive declared when the read was opened.
    pub fn get(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut request = OP_READ.to_vec();
        request.extend(padded_name(name)?);

        let reply = self.request(request)?;
        let declared = reply
            .strip_prefix(OP_FILE_SIZE)
            .ok_or_else(|| refused(&reply, name, "read"))
            .and_then(|field| {
                digits(field).ok_or_else(|| Error::Protocol(format!("bad file size {:?}", lossy(field))))
            })?;
        info!("reading {} ({} bytes)", name, declared);

        let mut data = Vec::with_capacity(declared);
        loop {
            let reply = self.request(OP_ACK.to_vec())?;
            if reply == OP_EOF {
                break;
            }
            let chunk = reply
                .strip_prefix(OP_READ)
                .ok_or_else(|| refused(&reply, name, "read"))?;
            data.extend_from_slice(chunk);
            if data.len() > declared {
                return Err(Error::Protocol(format!(
                    "{} ran past its declared {} bytes", name, declared
                )));
            }
        }

        if data.len() != declared {
            return Err(Error::Protocol(format!(
                "{} ended after {} of {} bytes", name, data.len(), declared
            )));
        }
        Ok(data)
    }

    /// Copy a file from the drive to `dest`.
    ///
    /// The data lands in `dest.partial` and is renamed over `dest` only once
    /// the whole file arrived. Returns the number of bytes written.
    pub fn download(&mut self, name: &str, dest: &Path, overwrite: bool) -> Result<usize> {
        if !overwrite && dest.exists() {
            return Err(Error::Conflict(dest.display().to_string()));
        }

        let data = self.get(name)?;

        let mut partial = dest.as_os_str().to_owned();
        partial.push(".partial");
        let partial = Path::new(&partial);

        let written = fs::write(partial, &data).and_then(|_| fs::rename(partial, dest));
        if let Err(e) = written {
            let _ = fs::remove_file(partial);
            return Err(Error::local_file(dest, e));
        }
        info!("saved {} as {}", name, dest.display());
        Ok(data.len())
    }

    /// Open a write session for `name`, declaring its length when known.
    pub fn begin_write(&mut self, name: &str, length: Option<usize>) -> Result<WriteSession<'_>> {
        let mut request = OP_WRITE.to_vec();
        request.extend(padded_name(name)?);
        self.expect_ack(request, name, "write")?;

        let session = WriteSession {
            client: self,
            name: name.to_string(),
            declared: length,
            sent: 0,
            open: true,
        };
        if let Some(length) = length {
            let request = format!("FSZ{:08}", length).into_bytes();
            session.client.expect_ack(request, name, "write")?;
        }
        Ok(session)
    }

    /// Store `data` on the drive as `name`.
    ///
    /// Without `overwrite` the drive is listed first and an existing name is
    /// a conflict. A failure part way leaves nothing committed.
    pub fn put(&mut self, name: &str, data: &[u8], overwrite: bool) -> Result<()> {
        padded_name(name)?;
        if !overwrite && self.list()?.iter().any(|listed| listed == name) {
            return Err(Error::Conflict(name.to_string()));
        }

        let mut session = self.begin_write(name, Some(data.len()))?;
        for chunk in data.chunks(BLOCK_SIZE) {
            session.send(chunk)?;
        }
        session.commit()?;
        info!("wrote {} ({} bytes)", name, data.len());
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        let mut request = OP_DELETE.to_vec();
        request.extend(padded_name(name)?);
        self.expect_ack(request, name, "delete")?;
        info!("deleted {}", name);
        Ok(())
    }

    /// Abort whatever session the drive has open.
    pub fn cancel(&mut self) -> Result<()> {
        self.expect_ack(OP_CANCEL.to_vec(), "", "cancel")
    }
}

/// An open write on the drive. Exactly one can exist per client.
///
/// Dropping a session that was neither committed nor cancelled cancels it.
pub struct WriteSession<'a> {
    client: &'a mut DiskClient,
    name: String,
    declared: Option<usize>,
    sent: usize,
    open: bool,
}

impl WriteSession<'_> {
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Send one block of at most 255 bytes.
    pub fn send(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.len() > BLOCK_SIZE {
            return Err(Error::Parameter(format!(
                "block of {} bytes exceeds {}", chunk.len(), BLOCK_SIZE
            )));
        }
        if let Some(declared) = self.declared {
            if self.sent + chunk.len() > declared {
                return Err(Error::Parameter(format!(
                    "{} declared {} bytes, refusing to send more", self.name, declared
                )));
            }
        }

        let mut request = OP_WRITE.to_vec();
        request.extend_from_slice(chunk);
        self.client.expect_ack(request, &self.name, "write")?;
        self.sent += chunk.len();
        Ok(())
    }

    /// End of file: the drive stores what it was sent.
    pub fn commit(mut self) -> Result<()> {
        if let Some(declared) = self.declared {
            if declared != self.sent {
                return Err(Error::Parameter(format!(
                    "{} declared {} bytes but {} were sent", self.name, declared, self.sent
                )));
            }
        }
        self.open = false;
        self.client.expect_ack(OP_EOF.to_vec(), &self.name, "write")
    }

    pub fn cancel(mut self) -> Result<()> {
        self.open = false;
        self.client.cancel()
    }
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        if self.open {
            warn!("abandoning write of {} after {} bytes", self.name, self.sent);
            if let Err(e) = self.client.cancel() {
                warn!("drive did not confirm cancel: {}", e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use crate::frame::Codec;
    use crate::serial::MockSerialPort;

    fn f(payload: &[u8]) -> Vec<u8> {
        Fc1Codec.encode(&payload.to_vec())
    }

    fn client(replies: &[&[u8]], requests: &[&[u8]]) -> DiskClient {
        let reads = replies.iter().map(|r| Some(f(r))).collect();
        let writes = requests.iter().flat_map(|r| f(r)).collect();
        let config = LinkConfig { timeout: Duration::from_millis(20), attempts: 2 };
        DiskClient::new(Box::new(MockSerialPort::scripted(reads, writes)), config)
    }

    #[test]
    fn test_list() {
        let mut client = client(
            &[b"LST0002A.JBI       B.JBI       ", b"EOF"],
            &[b"LST", b"ACK"],
        );
        assert_eq!(client.list().unwrap(), vec!["A.JBI", "B.JBI"]);
    }

    #[test]
    fn test_list_count_mismatch() {
        let mut client = client(&[b"LST0003A.JBI       "], &[b"LST"]);
        assert!(matches!(client.list(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_disk_size() {
        let mut client = client(&[b"DSZ00729088", b"EOF"], &[b"DSZ", b"ACK"]);
        assert_eq!(client.disk_size().unwrap(), 729_088);
    }

    #[test]
    fn test_get_assembles_blocks() {
        let mut client = client(
            &[b"FSZ00000010", b"FRD01234", b"FRD56789", b"EOF"],
            &[b"FRDDEMO.JBI    ", b"ACK", b"ACK", b"ACK"],
        );
        assert_eq!(client.get("DEMO.JBI").unwrap(), b"0123456789".to_vec());
    }

    #[test]
    fn test_get_refusals() {
        let mut missing = client(&[b"CANNF"], &[b"FRDOTHER.JBI   "]);
        assert!(matches!(missing.get("OTHER.JBI"), Err(Error::NotFound(_))));

        let mut cancelled = client(
            &[b"FSZ00000010", b"FRD01234", b"CAN"],
            &[b"FRDDEMO.JBI    ", b"ACK", b"ACK"],
        );
        assert!(matches!(cancelled.get("DEMO.JBI"), Err(Error::Cancelled(_))));
    }

    #[test]
    fn test_garbled_block_is_asked_for_again() {
        let mut garbled = f(b"FRDdata");
        garbled[4] ^= 0x01;

        let reads = vec![
            Some(f(b"FSZ00000004")),
            Some(garbled),
            Some(f(b"FRDdata")),
            Some(f(b"EOF")),
        ];
        let writes = [f(b"FRDDEMO.JBI    "), f(b"ACK"), f(b"NAK"), f(b"ACK")].concat();
        let config = LinkConfig { timeout: Duration::from_millis(20), attempts: 2 };
        let mut client = DiskClient::new(Box::new(MockSerialPort::scripted(reads, writes)), config);

        assert_eq!(client.get("DEMO.JBI").unwrap(), b"data".to_vec());
    }

    #[test]
    fn test_size_refusal_is_a_fault_not_a_cancel() {
        let mut short = client(
            &[b"ACK", b"ACK", b"ACK", b"CANSZ"],
            &[b"FWTNEW.JBI     ", b"FSZ00000004", b"FWTdata", b"EOF"],
        );
        match short.put("NEW.JBI", b"data", true) {
            Err(Error::Protocol(message)) => assert!(message.contains("size")),
            other => panic!("expected a protocol error, got {:?}", other),
        }

        let mut unknown = client(&[b"CANRQ"], &[b"DELA.JBI       "]);
        assert!(matches!(unknown.delete("A.JBI"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_get_short_file_is_protocol_error() {
        let mut client = client(
            &[b"FSZ00000010", b"FRD01234", b"EOF"],
            &[b"FRDDEMO.JBI    ", b"ACK", b"ACK"],
        );
        assert!(matches!(client.get("DEMO.JBI"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bad_name_never_reaches_the_wire() {
        let mut client = client(&[], &[]);
        assert!(matches!(client.get("MUCHTOOLONG.JBI"), Err(Error::Parameter(_))));
        assert!(matches!(client.delete("../X.JBI"), Err(Error::Parameter(_))));
    }

    #[test]
    fn test_download_conflict_before_any_request() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("DEMO.JBI");
        fs::write(&dest, b"local").unwrap();

        let mut client = client(&[], &[]);
        assert!(matches!(client.download("DEMO.JBI", &dest, false), Err(Error::Conflict(_))));
        assert_eq!(fs::read(&dest).unwrap(), b"local");
    }

    #[test]
    fn test_download_writes_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("DEMO.JBI");

        let mut client = client(
            &[b"FSZ00000004", b"FRDNOP\n", b"EOF"],
            &[b"FRDDEMO.JBI    ", b"ACK", b"ACK"],
        );
        assert_eq!(client.download("DEMO.JBI", &dest, false).unwrap(), 4);
        assert_eq!(fs::read(&dest).unwrap(), b"NOP\n");
        assert!(!dir.path().join("DEMO.JBI.partial").exists());
    }

    #[test]
    fn test_download_failure_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("DEMO.JBI");

        let mut client = client(&[b"CANNF"], &[b"FRDDEMO.JBI    "]);
        assert!(client.download("DEMO.JBI", &dest, false).is_err());
        assert!(!dest.exists());
        assert!(!dir.path().join("DEMO.JBI.partial").exists());
    }

    #[test]
    fn test_put_lists_then_writes() {
        let data = vec![b'x'; 300];
        let mut first = b"FWT".to_vec();
        first.extend(&data[..255]);
        let mut second = b"FWT".to_vec();
        second.extend(&data[255..]);

        let mut client = client(
            &[b"LST0001A.JBI       ", b"EOF", b"ACK", b"ACK", b"ACK", b"ACK", b"ACK"],
            &[b"LST", b"ACK", b"FWTNEW.JBI     ", b"FSZ00000300", &first, &second, b"EOF"],
        );
        client.put("NEW.JBI", &data, false).unwrap();
    }

    #[test]
    fn test_put_conflict_stops_after_listing() {
        let mut client = client(
            &[b"LST0001A.JBI       ", b"EOF"],
            &[b"LST", b"ACK"],
        );
        assert!(matches!(client.put("A.JBI", b"data", false), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_put_refused_by_drive() {
        let mut client = client(&[b"CANEX"], &[b"FWTA.JBI       "]);
        assert!(matches!(client.put("A.JBI", b"data", true), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_dropped_session_is_cancelled() {
        let mut client = client(
            &[b"ACK", b"ACK", b"ACK"],
            &[b"FWTNEW.JBI     ", b"FWTpart", b"CAN"],
        );
        let mut session = client.begin_write("NEW.JBI", None).unwrap();
        session.send(b"part").unwrap();
        assert_eq!(session.sent(), 4);
        drop(session);
    }

    #[test]
    fn test_session_refuses_more_than_declared() {
        let mut client = client(
            &[b"ACK", b"ACK", b"ACK"],
            &[b"FWTNEW.JBI     ", b"FSZ00000002", b"CAN"],
        );
        let mut session = client.begin_write("NEW.JBI", Some(2)).unwrap();
        assert!(matches!(session.send(b"abc"), Err(Error::Parameter(_))));
        session.cancel().unwrap();
    }

    #[test]
    fn test_delete() {
        let mut client = client(&[b"ACK", b"CANNF"], &[b"DELA.JBI       ", b"DELB.JBI       "]);
        client.delete("A.JBI").unwrap();
        assert!(matches!(client.delete("B.JBI"), Err(Error::NotFound(_))));
    }
}
