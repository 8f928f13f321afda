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

use std::io::ErrorKind;
use std::time::Duration;
use serialport::SerialPort as SerialPortTrait;
use tracing::{debug, trace};
use crate::config::LineConfig;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the XMODEM engines.
///
/// The port is closed when the value is dropped.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Reads a single byte. `None` means nothing arrived within `timeout`.
    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read_timeout(&mut buf, timeout) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads one burst of bytes, at most `max` long.
    ///
    /// The first byte may take up to `timeout` to arrive; after that the
    /// burst ends as soon as the line stays quiet for `interval`. An empty
    /// result means the line stayed quiet for the whole `timeout`.
    fn read_unit(&mut self, max: usize, timeout: Duration, interval: Duration) -> std::io::Result<Vec<u8>> {
        let mut unit = vec![0u8; max];
        let mut len = 0;

        while len < max {
            let wait = if len == 0 { timeout } else { interval };
            match self.read_timeout(&mut unit[len..], wait) {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }

        unit.truncate(len);
        trace!("Read {} bytes: {:02X?}", len, unit);
        Ok(unit)
    }
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(line: &LineConfig) -> Result<Self, serialport::Error> {
        let port = serialport::new(&line.port, line.baud)
            .data_bits(line.data_bits)
            .parity(line.parity)
            .stop_bits(line.stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        debug!("Opened {} ({} baud, {:?}, {:?}, {:?})",
               line.port, line.baud, line.data_bits, line.parity, line.stop_bits);
        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        trace!("Write {} bytes: {:02X?}", buf.len(), buf);
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(std::io::Error::other)?;
        self.port.read(buf)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
use std::sync::{Arc, Mutex};

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Arc<Mutex<Vec<u8>>>,
    // Expected writes for verification, None when the caller inspects the log itself
    expected_writes: Option<Vec<u8>>,
    fail_writes: bool,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Arc::new(Mutex::new(Vec::new())),
            expected_writes: Some(expected_writes),
            fail_writes: false,
        }
    }

    /// Mock whose writes are handed back through the shared log instead of
    /// being checked on drop
    pub fn recording(responses: Vec<Option<u8>>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let port = MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Arc::new(Mutex::new(Vec::new())),
            expected_writes: None,
            fail_writes: false,
        };
        let log = Arc::clone(&port.write_log);
        (port, log)
    }

    pub fn with_write_error(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

/// Script helper: the bytes of one burst followed by a quiet line
#[cfg(test)]
pub fn burst(bytes: &[u8]) -> Vec<Option<u8>> {
    let mut out: Vec<Option<u8>> = bytes.iter().map(|&b| Some(b)).collect();
    out.push(None);
    out
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        if self.fail_writes {
            return Err(std::io::Error::new(ErrorKind::BrokenPipe, "Mock write failure"));
        }
        self.write_log.lock().unwrap().extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(
                ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(
                ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        if let Some(expected) = &self.expected_writes {
            let written = self.write_log.lock().unwrap();
            assert_eq!(
                &*written,
                expected,
                "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
                expected.len(),
                expected,
                written.len(),
                &*written
            );
        }
    }
}
