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

//! XMODEM protocol constants

use std::fmt;

/// Start of header - begins a 128-byte data frame
pub const SOH: u8 = 0x01;

/// End of transmission - sender has no more frames
pub const EOT: u8 = 0x04;

/// Acknowledge - frame accepted, or EOT confirmed
pub const ACK: u8 = 0x06;

/// Negative acknowledge - frame rejected; also requests SUM8 mode before the first frame
pub const NAK: u8 = 0x15;

/// Cancel - either side aborts the transfer
pub const CAN: u8 = 0x18;

/// 'C' - receiver requests CRC16 mode before the first frame
pub const C: u8 = 0x43;

/// Substitute - pads the final short data block, never sent alone
pub const SUB: u8 = 0x1A;

/// Payload bytes carried by every frame
pub const DATA_SIZE: usize = 128;

/// Header byte plus sequence number and its complement
pub const HEADER_SIZE: usize = 3;

/// Checksum algorithm negotiated for a transfer. Fixed once chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Crc16,
    Sum8,
}

impl ChecksumKind {
    /// Bytes appended after the payload
    pub fn tag_size(self) -> usize {
        match self {
            ChecksumKind::Crc16 => 2,
            ChecksumKind::Sum8 => 1,
        }
    }

    /// Byte the receiver repeats until the sender starts transmitting
    pub fn init_byte(self) -> u8 {
        match self {
            ChecksumKind::Crc16 => C,
            ChecksumKind::Sum8 => NAK,
        }
    }

    /// Total bytes in one frame: 133 for CRC16, 132 for SUM8
    pub fn frame_size(self) -> usize {
        HEADER_SIZE + DATA_SIZE + self.tag_size()
    }

    pub fn from_init_byte(byte: u8) -> Option<Self> {
        match byte {
            C => Some(ChecksumKind::Crc16),
            NAK => Some(ChecksumKind::Sum8),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::Crc16 => write!(f, "CRC16"),
            ChecksumKind::Sum8 => write!(f, "SUM8"),
        }
    }
}
