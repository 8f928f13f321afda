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
use std::io::Write;
use tracing::{debug, info, warn};
use crate::config::ReceiverConfig;
use crate::error::{Result, TransferError};
use crate::packet::{self, Inbound, Verdict};
use crate::protocol::*;
use crate::serial::SerialPort;

/// Largest burst read from the line in one go; leaves room to find a frame
/// behind leading noise
const RX_BUFFER_SIZE: usize = 256;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    /// Sender not heard from yet; holds the last attempt that did not sync
    NoInit(Option<Box<ReceiverState>>),
    /// Header byte seen, frame waiting for validation
    PacketFound,
    Timeout,
    AcceptPacket,
    AcceptPacketDuplicate,
    RejectPacket(String),
    Cancel(String),
    Eot,
}

impl ReceiverState {
    pub fn name(&self) -> &'static str {
        match self {
            ReceiverState::NoInit(_) => "NoInit",
            ReceiverState::PacketFound => "PacketFound",
            ReceiverState::Timeout => "Timeout",
            ReceiverState::AcceptPacket => "AcceptPacket",
            ReceiverState::AcceptPacketDuplicate => "AcceptPacketDuplicate",
            ReceiverState::RejectPacket(_) => "RejectPacket",
            ReceiverState::Cancel(_) => "Cancel",
            ReceiverState::Eot => "EOT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiverState::Cancel(_) | ReceiverState::Eot)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ReceiverState::AcceptPacket | ReceiverState::AcceptPacketDuplicate)
    }

    /// Control byte sent back to the sender after entering this state
    fn reply(&self, init_byte: u8) -> u8 {
        match self {
            ReceiverState::NoInit(_) => init_byte,
            ReceiverState::AcceptPacket | ReceiverState::AcceptPacketDuplicate => ACK,
            ReceiverState::PacketFound
            | ReceiverState::RejectPacket(_)
            | ReceiverState::Timeout => NAK,
            ReceiverState::Cancel(_) => CAN,
            ReceiverState::Eot => ACK,
        }
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverState::NoInit(Some(cause)) => write!(f, "NoInit({})", cause),
            ReceiverState::RejectPacket(cause) | ReceiverState::Cancel(cause) => {
                write!(f, "{}({})", self.name(), cause)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

// ============================================================================
// Session & Transitions
// ============================================================================

/// Everything the receiver knows about the transfer in progress
#[derive(Debug, Clone)]
pub struct ReceiverSession {
    pub state: ReceiverState,
    pub expected_seq: u8,
    /// Consecutive iterations without an accepted frame
    pub failures: u32,
    /// Distinct frames written to the output
    pub packets: u32,
    pub checksum: ChecksumKind,
}

impl ReceiverSession {
    pub fn new(checksum: ChecksumKind) -> Self {
        ReceiverSession {
            state: ReceiverState::NoInit(None),
            expected_seq: 1,
            failures: 0,
            packets: 0,
            checksum,
        }
    }

    fn tag(&self) -> String {
        format!("[{}|{}|{}]", self.state.name(), self.failures, self.expected_seq)
    }
}

/// One thing the line delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    Timeout,
    Received(Inbound<'a>),
}

/// What the engine must do after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub reply: u8,
    /// Payload to append to the output, only for newly accepted frames
    pub payload: Option<Vec<u8>>,
}

/// Advances the receiver by one event. No I/O happens here.
pub fn transition(mut session: ReceiverSession, event: Event<'_>, retries: u32) -> (ReceiverSession, Action) {
    let mut payload = None;

    let proposed = match event {
        Event::Timeout => ReceiverState::Timeout,
        Event::Received(Inbound::Frame(frame)) => {
            match packet::validate(frame, session.expected_seq, session.checksum) {
                Verdict::Accepted => {
                    payload = Some(packet::extract_payload(frame));
                    ReceiverState::AcceptPacket
                }
                Verdict::AcceptedDuplicate => ReceiverState::AcceptPacketDuplicate,
                Verdict::Rejected(reason) => ReceiverState::RejectPacket(reason.to_string()),
                Verdict::OutOfSync { expected, received } => ReceiverState::Cancel(format!(
                    "transmission out of sync (expected packet {}, received {})",
                    expected, received
                )),
            }
        }
        Event::Received(Inbound::EndOfTransmission) => ReceiverState::Eot,
        Event::Received(Inbound::Cancel) => ReceiverState::Cancel("canceled by sender".to_string()),
        Event::Received(Inbound::Unrecognized) => ReceiverState::RejectPacket("unrecognized data".to_string()),
    };

    // Until the sender has been heard, only a frame or a cancel counts
    let syncs = proposed.is_accepted() || matches!(proposed, ReceiverState::Cancel(_));
    session.state = if matches!(session.state, ReceiverState::NoInit(_)) && !syncs {
        payload = None;
        ReceiverState::NoInit(Some(Box::new(proposed)))
    } else {
        proposed
    };

    if session.state == ReceiverState::AcceptPacket {
        session.expected_seq = session.expected_seq.wrapping_add(1);
        session.packets += 1;
    }

    let mut reply = session.state.reply(session.checksum.init_byte());

    if session.state.is_accepted() || session.state.is_terminal() {
        session.failures = 0;
    } else {
        session.failures += 1;
    }

    if session.failures > retries {
        session.state = ReceiverState::Cancel(format!("retries limit reached (limit: {})", retries));
        session.failures = 0;
        reply = CAN;
    }

    (session, Action { reply, payload })
}

// ============================================================================
// FSM Structure
// ============================================================================

pub type ReceiverObserver = Box<dyn FnMut(&ReceiverSession) + Send>;

pub struct ReceiverFsm {
    serial: Box<dyn SerialPort>,
    config: ReceiverConfig,
    session: ReceiverSession,
    observer: Option<ReceiverObserver>,
}

impl ReceiverFsm {
    pub fn new(serial: Box<dyn SerialPort>, config: ReceiverConfig) -> Self {
        let session = ReceiverSession::new(config.checksum);
        ReceiverFsm {
            serial,
            config,
            session,
            observer: None,
        }
    }

    /// Called after every state change; status display only
    pub fn with_observer(mut self, observer: ReceiverObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs the transfer to completion, appending accepted payloads to
    /// `output`. Returns the number of packets written.
    ///
    /// The serial port is closed when this returns, whatever the outcome.
    pub fn receive<W: Write>(mut self, output: &mut W) -> Result<u32> {
        let kind = self.session.checksum;
        info!(
            "Config {{timeout: {:?}, retries: {}, init byte: 0x{:02X}, packet size: {}, checksum: {}}}",
            self.config.timeout,
            self.config.retries,
            kind.init_byte(),
            kind.frame_size(),
            kind
        );

        self.write(kind.init_byte())?;

        while !self.session.state.is_terminal() {
            let reply = self.step(output)?;
            self.write(reply)?;
        }

        match self.session.state {
            ReceiverState::Cancel(cause) => {
                output.flush().map_err(TransferError::Stream)?;
                warn!("Transfer canceled: {}", cause);
                Err(TransferError::Canceled(cause))
            }
            _ => {
                output.flush().map_err(TransferError::Stream)?;
                info!("Transfer complete: {} packets received", self.session.packets);
                Ok(self.session.packets)
            }
        }
    }

    /// Reads one unit from the line and applies it. Returns the reply to send.
    fn step<W: Write>(&mut self, output: &mut W) -> Result<u8> {
        let kind = self.session.checksum;
        let unit = self.serial
            .read_unit(RX_BUFFER_SIZE, self.config.timeout, self.config.read_interval)
            .map_err(|e| self.io_error(e))?;

        // Noise before sync is only logged at debug
        let synced = !matches!(self.session.state, ReceiverState::NoInit(_));
        let event = if unit.is_empty() {
            if synced {
                warn!("{} Timeout!", self.session.tag());
            }
            Event::Timeout
        } else {
            let inbound = packet::classify(&unit, kind);
            if let Inbound::Frame(frame) = inbound {
                if frame.len() != unit.len() {
                    let tag = self.session.tag();
                    if synced {
                        warn!("{} Frame recovered from {} bytes of unrecognized data", tag, unit.len());
                    } else {
                        debug!("{} Frame recovered from {} bytes of unrecognized data", tag, unit.len());
                    }
                }
                self.report_packet_found();
            } else if inbound == Inbound::Unrecognized && synced {
                warn!("{} Unrecognized data received ({} bytes)", self.session.tag(), unit.len());
            }
            Event::Received(inbound)
        };

        let (session, action) = transition(self.session.clone(), event, self.config.retries);

        if let Some(payload) = &action.payload {
            output.write_all(payload).map_err(TransferError::Stream)?;
        }

        self.session = session;
        self.log_state();
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.session);
        }

        Ok(action.reply)
    }

    fn report_packet_found(&mut self) {
        debug!("{} Packet found", self.session.tag());
        if let Some(observer) = self.observer.as_mut() {
            let mut view = self.session.clone();
            view.state = ReceiverState::PacketFound;
            observer(&view);
        }
    }

    fn log_state(&self) {
        let tag = self.session.tag();
        match &self.session.state {
            ReceiverState::NoInit(Some(cause)) => debug!("{} Rejected initialization: {}", tag, cause),
            ReceiverState::RejectPacket(cause) => warn!("{} Packet rejected: {}", tag, cause),
            state => debug!("{} State changed to: {}", tag, state),
        }
    }

    fn write(&mut self, byte: u8) -> Result<()> {
        self.serial.write_all(&[byte]).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, e: std::io::Error) -> TransferError {
        TransferError::Transport {
            state: self.session.state.name(),
            source: e,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
