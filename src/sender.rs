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

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, info, warn};
use crate::config::SenderConfig;
use crate::error::{Result, TransferError};
use crate::packet;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    NoInit,
    Accepted,
    Rejected,
    UnrecognizedByte,
    WaitingForAnswer,
    Canceled,
    Eot,
    /// All packets acknowledged, EOT due
    Finish,
}

impl SenderState {
    pub fn name(&self) -> &'static str {
        match self {
            SenderState::NoInit => "NoInit",
            SenderState::Accepted => "Accepted",
            SenderState::Rejected => "Rejected",
            SenderState::UnrecognizedByte => "UnrecognizedByte",
            SenderState::WaitingForAnswer => "WaitingForAnswer",
            SenderState::Canceled => "Canceled",
            SenderState::Eot => "EOT",
            SenderState::Finish => "Finish",
        }
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Session & Transitions
// ============================================================================

#[derive(Debug, Clone)]
pub struct SenderSession {
    pub state: SenderState,
    /// Sequence number of the packet being sent
    pub seq: u8,
    pub packets_sent: u32,
    pub total_packets: u32,
    /// Unknown until the receiver asks for a mode
    pub checksum: Option<ChecksumKind>,
    /// Encoded frame awaiting acknowledgement
    pending: Option<Vec<u8>>,
}

impl Default for SenderSession {
    fn default() -> Self {
        SenderSession {
            state: SenderState::NoInit,
            seq: 1,
            packets_sent: 0,
            total_packets: 0,
            checksum: None,
            pending: None,
        }
    }
}

/// Applies the receiver's answer to a data frame. `None` is a timeout.
pub fn on_reply(mut session: SenderSession, reply: Option<u8>) -> SenderSession {
    let init_byte = session.checksum.map(ChecksumKind::init_byte);

    session.state = match reply {
        None => SenderState::WaitingForAnswer,
        Some(ACK) => SenderState::Accepted,
        Some(NAK) => SenderState::Rejected,
        Some(byte) if Some(byte) == init_byte => SenderState::Rejected,
        Some(CAN) => SenderState::Canceled,
        Some(_) => SenderState::UnrecognizedByte,
    };

    if session.state == SenderState::Accepted {
        session.seq = session.seq.wrapping_add(1);
        session.packets_sent += 1;
        session.pending = None;
    }

    session
}

/// Applies the receiver's answer to EOT. Anything but ACK, NAK or CAN
/// leaves the session waiting.
pub fn on_eot_reply(mut session: SenderSession, reply: Option<u8>) -> SenderSession {
    match reply {
        Some(ACK) => session.state = SenderState::Eot,
        Some(NAK) => session.state = SenderState::Finish,
        Some(CAN) => session.state = SenderState::Canceled,
        _ => {}
    }
    session
}

// ============================================================================
// FSM Structure
// ============================================================================

pub type SenderObserver = Box<dyn FnMut(&SenderSession) + Send>;

pub struct SenderFsm {
    serial: Box<dyn SerialPort>,
    config: SenderConfig,
    session: SenderSession,
    observer: Option<SenderObserver>,
}

impl SenderFsm {
    pub fn new(serial: Box<dyn SerialPort>, config: SenderConfig) -> Self {
        SenderFsm {
            serial,
            config,
            session: SenderSession::default(),
            observer: None,
        }
    }

    /// Called after every state change; status display only
    pub fn with_observer(mut self, observer: SenderObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sends all of `input`. The serial port is closed when this returns,
    /// whatever the outcome.
    pub fn send<R: Read + Seek>(mut self, input: &mut R) -> Result<()> {
        let kind = self.negotiate()?;
        self.session.checksum = Some(kind);

        let size = input.seek(SeekFrom::End(0)).map_err(TransferError::Stream)?;
        input.rewind().map_err(TransferError::Stream)?;

        self.session.total_packets = size.div_ceil(DATA_SIZE as u64) as u32;
        info!(
            "Config {{checksum: {}, init byte: 0x{:02X}, packet size: {}}}",
            kind,
            kind.init_byte(),
            kind.frame_size()
        );
        info!("File size: {} bytes | Packets: {}", size, self.session.total_packets);

        self.session.state = SenderState::Accepted;

        while self.session.packets_sent < self.session.total_packets
            && self.session.state != SenderState::Canceled
        {
            if matches!(self.session.state, SenderState::Accepted | SenderState::Rejected) {
                let frame = match self.session.pending.take() {
                    Some(frame) => {
                        debug!("{} Retransmitting packet", self.tag());
                        frame
                    }
                    None => {
                        let chunk = read_chunk(input).map_err(TransferError::Stream)?;
                        packet::encode(self.session.seq, &chunk, kind)
                    }
                };
                self.write(&frame)?;
                self.session.pending = Some(frame);
                self.set_state(SenderState::WaitingForAnswer);
            }

            let reply = self.read_reply()?;
            let session = std::mem::take(&mut self.session);
            self.session = on_reply(session, reply);

            match self.session.state {
                SenderState::WaitingForAnswer => warn!("{} Timeout waiting for answer", self.tag()),
                SenderState::UnrecognizedByte => warn!("{} Unrecognized answer: {:02X?}", self.tag(), reply),
                state => debug!("{} State changed to: {}", self.tag(), state),
            }
            self.report();
        }

        if self.session.state == SenderState::Canceled {
            warn!("Transfer canceled by receiver");
            return Err(TransferError::Canceled("canceled by receiver".to_string()));
        }

        self.set_state(SenderState::Finish);
        self.finish()?;

        info!("Transfer complete: {} packets sent", self.session.packets_sent);
        Ok(())
    }

    /// Waits until the receiver names a checksum mode
    fn negotiate(&mut self) -> Result<ChecksumKind> {
        info!("Waiting for receiver...");
        loop {
            match self.read_reply()? {
                Some(byte) => match ChecksumKind::from_init_byte(byte) {
                    Some(kind) => {
                        info!("Initialization finished: receiver requested {}", kind);
                        return Ok(kind);
                    }
                    None => debug!("Ignoring byte 0x{:02X} while waiting for receiver", byte),
                },
                None => debug!("Receiver not ready"),
            }
            self.report();
        }
    }

    /// End-of-transmission handshake; only ACK or CAN ends it
    fn finish(&mut self) -> Result<()> {
        loop {
            if self.session.state == SenderState::Finish {
                self.write(&[EOT])?;
                self.set_state(SenderState::WaitingForAnswer);
            }

            let reply = self.read_reply()?;
            let session = std::mem::take(&mut self.session);
            self.session = on_eot_reply(session, reply);
            self.report();

            match self.session.state {
                SenderState::Eot => return Ok(()),
                SenderState::Canceled => {
                    warn!("Transfer canceled by receiver during EOT");
                    return Err(TransferError::Canceled("canceled by receiver".to_string()));
                }
                SenderState::Finish => debug!("{} EOT rejected, resending", self.tag()),
                _ => {}
            }
        }
    }

    fn set_state(&mut self, state: SenderState) {
        self.session.state = state;
        debug!("{} State changed to: {}", self.tag(), state);
        self.report();
    }

    fn report(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.session);
        }
    }

    fn tag(&self) -> String {
        format!(
            "[{} | {}/{} | #{}]",
            self.session.state, self.session.packets_sent, self.session.total_packets, self.session.seq
        )
    }

    fn read_reply(&mut self) -> Result<Option<u8>> {
        self.serial.read_byte(self.config.timeout).map_err(|e| self.io_error(e))
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.serial.write_all(buf).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, e: std::io::Error) -> TransferError {
        TransferError::Transport {
            state: self.session.state.name(),
            source: e,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Reads up to one block; shorter only at end of input
fn read_chunk<R: Read>(input: &mut R) -> std::io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(DATA_SIZE);
    input.by_ref().take(DATA_SIZE as u64).read_to_end(&mut chunk)?;
    Ok(chunk)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use crate::config::ReceiverConfig;
    use crate::packet::encode;
    use crate::receiver::ReceiverFsm;
    use crate::serial::{burst, MockSerialPort};

    fn replies(bytes: &[u8]) -> Vec<Option<u8>> {
        bytes.iter().map(|&b| Some(b)).collect()
    }

    fn run_sender(responses: Vec<Option<u8>>, expected_writes: Vec<u8>, content: &[u8]) -> Result<()> {
        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let mut input = Cursor::new(content.to_vec());
        SenderFsm::new(mock_serial, SenderConfig::default()).send(&mut input)
    }

    #[test]
    fn test_sender_full_transfer() {
        let test_file = std::env::temp_dir().join("xmodem_sender_small.txt");
        std::fs::write(&test_file, b"Test data").unwrap();

        let responses = replies(&[C, ACK, ACK]);

        let mut expected_writes = encode(1, b"Test data", ChecksumKind::Crc16);
        expected_writes.push(EOT);

        let mock_serial = Box::new(MockSerialPort::new(responses, expected_writes));
        let mut file = std::fs::File::open(&test_file).unwrap();

        SenderFsm::new(mock_serial, SenderConfig::default())
            .send(&mut file)
            .expect("Transfer failed");

        std::fs::remove_file(&test_file).ok();
    }

    #[test]
    fn test_sender_sum8_mode() {
        let responses = replies(&[NAK, ACK, ACK]);

        let mut expected_writes = encode(1, b"sum", ChecksumKind::Sum8);
        expected_writes.push(EOT);

        run_sender(responses, expected_writes, b"sum").expect("Transfer failed");
    }

    #[test]
    fn test_sender_negotiation_ignores_noise() {
        let mut responses = vec![None, Some(0x41), Some(ACK), None];
        responses.extend(replies(&[C, ACK, ACK]));

        let mut expected_writes = encode(1, b"late", ChecksumKind::Crc16);
        expected_writes.push(EOT);

        run_sender(responses, expected_writes, b"late").expect("Transfer failed");
    }

    #[test]
    fn test_sender_nak_retransmits() {
        let responses = replies(&[C, NAK, C, ACK, ACK]);

        let frame = encode(1, b"retry", ChecksumKind::Crc16);
        let mut expected_writes = Vec::new();
        for _ in 0..3 {
            expected_writes.extend_from_slice(&frame);
        }
        expected_writes.push(EOT);

        run_sender(responses, expected_writes, b"retry").expect("Transfer failed");
    }

    #[test]
    fn test_sender_waits_through_noise_and_timeouts() {
        let responses = vec![Some(C), Some(0x7E), None, Some(ACK), None, Some(ACK)];

        let mut expected_writes = encode(1, b"patient", ChecksumKind::Crc16);
        expected_writes.push(EOT);

        run_sender(responses, expected_writes, b"patient").expect("Transfer failed");
    }

    #[test]
    fn test_sender_multiple_blocks() {
        let content: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let responses = replies(&[C, ACK, ACK, ACK, ACK]);

        let mut expected_writes = Vec::new();
        for (i, chunk) in content.chunks(128).enumerate() {
            let frame = encode(i as u8 + 1, chunk, ChecksumKind::Crc16);
            assert_eq!(frame[1], i as u8 + 1);
            expected_writes.extend_from_slice(&frame);
        }
        expected_writes.push(EOT);

        let last = &expected_writes[2 * 133..3 * 133];
        assert!(last[3 + 44..3 + 128].iter().all(|&b| b == SUB));

        run_sender(responses, expected_writes, &content).expect("Transfer failed");
    }

    #[test]
    fn test_sender_empty_input() {
        let responses = replies(&[C, ACK]);

        run_sender(responses, vec![EOT], b"").expect("Transfer failed");
    }

    #[test]
    fn test_sender_canceled_mid_transfer() {
        let content = vec![0x42u8; 200];
        let responses = replies(&[C, ACK, CAN]);

        let mut expected_writes = encode(1, &content[..128], ChecksumKind::Crc16);
        expected_writes.extend(encode(2, &content[128..], ChecksumKind::Crc16));

        match run_sender(responses, expected_writes, &content) {
            Err(TransferError::Canceled(cause)) => assert_eq!(cause, "canceled by receiver"),
            other => panic!("Expected cancel, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_eot_nak_resends() {
        let responses = vec![Some(C), Some(ACK), Some(NAK), None, Some(ACK)];

        let mut expected_writes = encode(1, b"eot", ChecksumKind::Crc16);
        expected_writes.extend([EOT, EOT]);

        run_sender(responses, expected_writes, b"eot").expect("Transfer failed");
    }

    #[test]
    fn test_sender_eot_canceled() {
        let responses = replies(&[C, ACK, CAN]);

        let mut expected_writes = encode(1, b"eot", ChecksumKind::Crc16);
        expected_writes.push(EOT);

        let result = run_sender(responses, expected_writes, b"eot");
        assert!(matches!(result, Err(TransferError::Canceled(_))));
    }

    #[test]
    fn test_sender_sequence_wraps() {
        let content: Vec<u8> = (0..257 * 128).map(|i| (i / 128) as u8).collect();

        let mut responses = vec![Some(C)];
        responses.extend(std::iter::repeat_n(Some(ACK), 258));

        let mut expected_writes = Vec::new();
        let mut seq: u8 = 1;
        for chunk in content.chunks(128) {
            expected_writes.extend(encode(seq, chunk, ChecksumKind::Crc16));
            seq = seq.wrapping_add(1);
        }
        expected_writes.push(EOT);

        assert_eq!(expected_writes[255 * 133 + 1], 0x00);
        assert_eq!(expected_writes[256 * 133 + 1], 0x01);

        run_sender(responses, expected_writes, &content).expect("Transfer failed");
    }

    #[test]
    fn test_sender_write_failure() {
        let mock_serial = Box::new(MockSerialPort::new(vec![Some(C)], vec![]).with_write_error());
        let mut input = Cursor::new(b"data".to_vec());

        match SenderFsm::new(mock_serial, SenderConfig::default()).send(&mut input) {
            Err(TransferError::Transport { state, .. }) => assert_eq!(state, "Accepted"),
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_on_reply_mapping() {
        let session = SenderSession {
            state: SenderState::WaitingForAnswer,
            checksum: Some(ChecksumKind::Sum8),
            pending: Some(vec![SOH]),
            ..SenderSession::default()
        };

        let rejected = on_reply(session.clone(), Some(NAK));
        assert_eq!(rejected.state, SenderState::Rejected);
        assert!(rejected.pending.is_some());

        assert_eq!(on_reply(session.clone(), Some(C)).state, SenderState::UnrecognizedByte);
        assert_eq!(on_reply(session.clone(), Some(CAN)).state, SenderState::Canceled);
        assert_eq!(on_reply(session.clone(), None).state, SenderState::WaitingForAnswer);

        let accepted = on_reply(session, Some(ACK));
        assert_eq!(accepted.state, SenderState::Accepted);
        assert_eq!(accepted.seq, 2);
        assert_eq!(accepted.packets_sent, 1);
        assert!(accepted.pending.is_none());
    }

    #[test]
    fn test_end_to_end_300_bytes() {
        let content: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let (sender_port, wire) = MockSerialPort::recording(replies(&[C, ACK, ACK, ACK, ACK]));
        let mut input = Cursor::new(content.clone());
        SenderFsm::new(Box::new(sender_port), SenderConfig::default())
            .send(&mut input)
            .expect("Send failed");

        let wire = wire.lock().unwrap().clone();
        assert_eq!(wire.len(), 3 * 133 + 1);

        let mut responses = Vec::new();
        for (i, frame) in wire[..3 * 133].chunks(133).enumerate() {
            assert_eq!(frame[0], SOH);
            assert_eq!(frame[1], i as u8 + 1);
            responses.extend(burst(frame));
        }
        assert_eq!(wire[3 * 133], EOT);
        responses.extend(burst(&[EOT]));

        let receiver_port = Box::new(MockSerialPort::new(responses, vec![C, ACK, ACK, ACK, ACK]));
        let mut output = Vec::new();
        let packets = ReceiverFsm::new(receiver_port, ReceiverConfig::default())
            .receive(&mut output)
            .expect("Receive failed");

        assert_eq!(packets, 3);
        assert_eq!(output, content);
    }
}
