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

//! Frame checksums: CRC-16/XMODEM and the 8-bit algebraic sum

use crate::protocol::ChecksumKind;

const CRC16_POLY: u16 = 0x1021;

/// CRC-16 with polynomial 0x1021 and a zero initial register
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Tag appended to a frame payload. CRC16 is big-endian.
pub fn calculate(kind: ChecksumKind, data: &[u8]) -> Vec<u8> {
    match kind {
        ChecksumKind::Crc16 => crc16(data).to_be_bytes().to_vec(),
        ChecksumKind::Sum8 => vec![sum8(data)],
    }
}

pub fn verify(kind: ChecksumKind, data: &[u8], tag: &[u8]) -> bool {
    tag.len() == kind.tag_size() && calculate(kind, data) == tag
}

/// Verifies a payload with its tag still attached.
///
/// For CRC16 the register is run across the tag as well; an intact block
/// leaves it at zero.
pub fn verify_appended(kind: ChecksumKind, block: &[u8]) -> bool {
    if block.len() < kind.tag_size() {
        return false;
    }
    match kind {
        ChecksumKind::Crc16 => crc16(block) == 0,
        ChecksumKind::Sum8 => {
            let (data, tag) = block.split_at(block.len() - 1);
            verify(kind, data, tag)
        }
    }
}
