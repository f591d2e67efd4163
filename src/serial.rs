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

#[cfg(test)]
use std::collections::VecDeque;
use std::io::{Error, ErrorKind, Result};
use std::time::Duration;
use serialport::{DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte pipe to the controller. Reads are bounded by `timeout`; an expired
/// wait is reported as `ErrorKind::TimedOut`.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

// ============================================================================
// RS-232 port
// ============================================================================

/// A port opened through the serialport crate.
pub struct RealSerialPort {
    port: Box<dyn serialport::SerialPort>,
    timeout: Duration,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> serialport::Result<Self> {
        let timeout = Duration::from_millis(100);
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()?;

        Ok(RealSerialPort { port, timeout })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        // the controller link waits with a handful of distinct timeouts
        if timeout != self.timeout {
            self.port.set_timeout(timeout).map_err(Error::from)?;
            self.timeout = timeout;
        }
        match self.port.read(buf) {
            // some drivers report an expired wait as an empty read
            Ok(0) => Err(Error::new(ErrorKind::TimedOut, "no data before timeout")),
            other => other,
        }
    }
}

// ============================================================================
// Scripted port for unit tests
// ============================================================================

/// Replays the peer's side of a conversation one chunk per read. A `None`
/// chunk is a wait that times out. On drop, every chunk must have been read
/// and the bytes written must equal `expected_writes`.
#[cfg(test)]
pub struct MockSerialPort {
    script: VecDeque<Option<Vec<u8>>>,
    written: Vec<u8>,
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn scripted(reads: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            script: reads.into(),
            written: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.written.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let Some(Some(chunk)) = self.script.pop_front() else {
            return Err(Error::new(ErrorKind::TimedOut, "script silent"));
        };

        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.script.push_front(Some(chunk[n..].to_vec()));
        }
        Ok(n)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            self.script.is_empty(),
            "{} scripted reads never consumed: {:02X?}",
            self.script.len(),
            self.script
        );
        assert_eq!(
            self.written, self.expected_writes,
            "write log mismatch\nexpected {:02X?}\ngot      {:02X?}",
            self.expected_writes, self.written
        );
    }
}

// ============================================================================
// In-memory cable for end-to-end tests
// ============================================================================

/// One end of an in-memory cable. Dropping one end makes reads on the other
/// end fail with `BrokenPipe` once its queue is drained.
#[cfg(test)]
pub struct MemoryPort {
    tx: std::sync::mpsc::Sender<Vec<u8>>,
    rx: std::sync::mpsc::Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    writes: usize,
    garble: Option<usize>,
}

#[cfg(test)]
impl MemoryPort {
    fn end(tx: std::sync::mpsc::Sender<Vec<u8>>, rx: std::sync::mpsc::Receiver<Vec<u8>>) -> Self {
        MemoryPort { tx, rx, pending: VecDeque::new(), writes: 0, garble: None }
    }

    pub fn pair() -> (MemoryPort, MemoryPort) {
        let (a_tx, b_rx) = std::sync::mpsc::channel();
        let (b_tx, a_rx) = std::sync::mpsc::channel();
        (MemoryPort::end(a_tx, a_rx), MemoryPort::end(b_tx, b_rx))
    }

    /// Invert the final byte of write number `n` (from zero) on its way out.
    pub fn garble_write(mut self, n: usize) -> Self {
        self.garble = Some(n);
        self
    }
}

#[cfg(test)]
impl SerialPort for MemoryPort {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut bytes = buf.to_vec();
        if self.garble == Some(self.writes) {
            if let Some(last) = bytes.last_mut() {
                *last = !*last;
            }
        }
        self.writes += 1;

        self.tx.send(bytes)
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "peer hung up"))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        use std::sync::mpsc::RecvTimeoutError;

        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::new(ErrorKind::TimedOut, "memory port timeout"));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::new(ErrorKind::BrokenPipe, "peer hung up"));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_port_pair_carries_bytes_both_ways() {
        let (mut a, mut b) = MemoryPort::pair();
        a.write_all(b"ping").unwrap();
        b.write_all(b"pong").unwrap();

        let mut buf = [0u8; 8];
        let n = b.read_timeout(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(&buf[..n], b"ping");
        let n = a.read_timeout(&mut buf, Duration::from_millis(100)).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_memory_port_reports_timeout_and_hangup() {
        let (mut a, b) = MemoryPort::pair();
        let mut buf = [0u8; 4];
        let err = a.read_timeout(&mut buf, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);

        drop(b);
        let err = a.read_timeout(&mut buf, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_memory_port_garbles_only_the_chosen_write() {
        let (a, mut b) = MemoryPort::pair();
        let mut a = a.garble_write(1);
        a.write_all(&[0x10, 0x20]).unwrap();
        a.write_all(&[0x10, 0x20]).unwrap();
        a.write_all(&[0x10, 0x20]).unwrap();

        let mut buf = [0u8; 8];
        let mut received = Vec::new();
        while let Ok(n) = b.read_timeout(&mut buf, Duration::from_millis(10)) {
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, vec![0x10, 0x20, 0x10, 0xDF, 0x10, 0x20]);
    }

    #[test]
    fn test_mock_reads_one_chunk_at_a_time() {
        let mut mock = MockSerialPort::scripted(
            vec![Some(b"ABC".to_vec()), None, Some(b"D".to_vec())],
            b"out".to_vec(),
        );
        mock.write_all(b"out").unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(mock.read_timeout(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(&buf, b"AB");
        assert_eq!(mock.read_timeout(&mut buf, Duration::ZERO).unwrap(), 1);
        assert_eq!(buf[0], b'C');
        assert_eq!(mock.read_timeout(&mut buf, Duration::ZERO).unwrap_err().kind(), ErrorKind::TimedOut);
        assert_eq!(mock.read_timeout(&mut buf, Duration::ZERO).unwrap(), 1);
        assert_eq!(buf[0], b'D');
    }
}
