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

//! Frame encoding, classification and validation
//!
//! Wire layout: `SOH, seq, 0xFF - seq, data[128], tag[1 or 2]`.

use std::fmt;
use tracing::trace;
use crate::checksum;
use crate::protocol::*;

// ============================================================================
// Types
// ============================================================================

/// Classification of the first byte of an inbound unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    DataFrameStart,
    EndOfTransmission,
    Cancel,
    Unrecognized(u8),
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Length { expected: usize, received: usize },
    SequenceIntegrity { seq: u8, complement: u8 },
    Checksum,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Length { expected, received } => {
                write!(f, "invalid packet length: {} (expected {})", received, expected)
            }
            RejectReason::SequenceIntegrity { seq, complement } => {
                write!(f, "bit error in packet number: [0x{:02X}|0x{:02X}]", seq, complement)
            }
            RejectReason::Checksum => write!(f, "bad checksum"),
        }
    }
}

/// Result of validating a candidate frame against the receiver's expectations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Retransmission of the frame accepted just before; re-acknowledge only
    AcceptedDuplicate,
    Rejected(RejectReason),
    /// Sequence number is neither the expected one nor its predecessor
    OutOfSync { expected: u8, received: u8 },
}

/// What an inbound unit turned out to be once classified and, if needed,
/// resynchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    Frame(&'a [u8]),
    EndOfTransmission,
    Cancel,
    Unrecognized,
}

// ============================================================================
// Encoding
// ============================================================================

/// Builds a complete frame. Short data is padded with SUB; data longer than
/// one block is truncated to DATA_SIZE.
pub fn encode(seq: u8, data: &[u8], kind: ChecksumKind) -> Vec<u8> {
    let data = &data[..data.len().min(DATA_SIZE)];

    let mut frame = Vec::with_capacity(kind.frame_size());
    frame.push(SOH);
    frame.push(seq);
    frame.push(0xFF - seq);
    frame.extend_from_slice(data);
    frame.resize(HEADER_SIZE + DATA_SIZE, SUB);

    let tag = checksum::calculate(kind, &frame[HEADER_SIZE..]);
    frame.extend_from_slice(&tag);
    frame
}

// ============================================================================
// Decoding
// ============================================================================

pub fn decode_header(byte: Option<u8>) -> Header {
    match byte {
        Some(SOH) => Header::DataFrameStart,
        Some(EOT) => Header::EndOfTransmission,
        Some(CAN) => Header::Cancel,
        Some(other) => Header::Unrecognized(other),
        None => Header::Timeout,
    }
}

/// Checks are applied in a fixed order; the first failure decides.
pub fn validate(frame: &[u8], expected_seq: u8, kind: ChecksumKind) -> Verdict {
    if frame.len() != kind.frame_size() {
        return Verdict::Rejected(RejectReason::Length {
            expected: kind.frame_size(),
            received: frame.len(),
        });
    }

    let seq = frame[1];
    let complement = frame[2];
    if seq.wrapping_add(complement) != 0xFF {
        return Verdict::Rejected(RejectReason::SequenceIntegrity { seq, complement });
    }

    match expected_seq.wrapping_sub(seq) {
        0 => {}
        1 => return Verdict::AcceptedDuplicate,
        _ => return Verdict::OutOfSync { expected: expected_seq, received: seq },
    }

    if !checksum::verify_appended(kind, &frame[HEADER_SIZE..]) {
        return Verdict::Rejected(RejectReason::Checksum);
    }

    Verdict::Accepted
}

/// Payload of a validated frame with trailing SUB padding removed.
///
/// Data that genuinely ends in 0x1A loses those bytes; the wire format
/// carries no length to tell them apart.
pub fn extract_payload(frame: &[u8]) -> Vec<u8> {
    let end = (HEADER_SIZE + DATA_SIZE).min(frame.len());
    let data = frame.get(HEADER_SIZE..end).unwrap_or(&[]);
    let len = data.iter().rposition(|&b| b != SUB).map_or(0, |i| i + 1);
    data[..len].to_vec()
}

/// Finds one frame-sized run starting at the first SOH in a buffer that
/// may carry leading noise or trailing bytes.
pub fn recover_frame(buf: &[u8], kind: ChecksumKind) -> Option<&[u8]> {
    let start = buf.iter().position(|&b| b == SOH)?;
    buf[start..].get(..kind.frame_size())
}

/// Classifies one unit read from the line.
///
/// A unit led by SOH is a frame candidate: anything past one frame is cut
/// off, and a short one is left for `validate` to reject by length. EOT and
/// CAN are recognized by their lead byte. Any other lead byte triggers a
/// scan for an embedded frame.
pub fn classify(unit: &[u8], kind: ChecksumKind) -> Inbound<'_> {
    match decode_header(unit.first().copied()) {
        Header::DataFrameStart => {
            Inbound::Frame(&unit[..unit.len().min(kind.frame_size())])
        }
        Header::EndOfTransmission => Inbound::EndOfTransmission,
        Header::Cancel => Inbound::Cancel,
        Header::Unrecognized(byte) => {
            trace!("Unexpected lead byte 0x{:02X}, scanning {} bytes for a frame", byte, unit.len());
            match recover_frame(unit, kind) {
                Some(frame) => Inbound::Frame(frame),
                None => Inbound::Unrecognized,
            }
        }
        Header::Timeout => Inbound::Unrecognized,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds() -> impl Strategy<Value = ChecksumKind> {
        prop_oneof![Just(ChecksumKind::Crc16), Just(ChecksumKind::Sum8)]
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode(1, b"Test data", ChecksumKind::Crc16);
        assert_eq!(frame.len(), 133);
        assert_eq!(&frame[0..3], &[SOH, 0x01, 0xFE]);
        assert_eq!(&frame[3..12], b"Test data");
        assert!(frame[12..131].iter().all(|&b| b == SUB));

        let crc = checksum::crc16(&frame[3..131]);
        assert_eq!(&frame[131..], &crc.to_be_bytes());
    }

    #[test]
    fn test_encode_sum8_layout() {
        let frame = encode(0xFF, &[0x01; 128], ChecksumKind::Sum8);
        assert_eq!(frame.len(), 132);
        assert_eq!(&frame[0..3], &[SOH, 0xFF, 0x00]);
        assert_eq!(frame[131], 128u8);
    }

    #[test]
    fn test_decode_header() {
        assert_eq!(decode_header(Some(SOH)), Header::DataFrameStart);
        assert_eq!(decode_header(Some(EOT)), Header::EndOfTransmission);
        assert_eq!(decode_header(Some(CAN)), Header::Cancel);
        assert_eq!(decode_header(Some(0x7E)), Header::Unrecognized(0x7E));
        assert_eq!(decode_header(None), Header::Timeout);
    }

    #[test]
    fn test_validate_length_first() {
        let mut frame = encode(1, b"x", ChecksumKind::Crc16);
        frame.pop();
        frame[2] = 0x00;
        assert_eq!(
            validate(&frame, 1, ChecksumKind::Crc16),
            Verdict::Rejected(RejectReason::Length { expected: 133, received: 132 })
        );
    }

    #[test]
    fn test_validate_sequence_integrity_before_checksum() {
        let mut frame = encode(1, b"x", ChecksumKind::Sum8);
        frame[2] = 0xFD;
        frame[10] ^= 0xFF;
        assert_eq!(
            validate(&frame, 1, ChecksumKind::Sum8),
            Verdict::Rejected(RejectReason::SequenceIntegrity { seq: 1, complement: 0xFD })
        );
    }

    #[test]
    fn test_validate_duplicate_and_out_of_sync() {
        let frame = encode(5, b"dup", ChecksumKind::Crc16);
        assert_eq!(validate(&frame, 5, ChecksumKind::Crc16), Verdict::Accepted);
        assert_eq!(validate(&frame, 6, ChecksumKind::Crc16), Verdict::AcceptedDuplicate);
        assert_eq!(
            validate(&frame, 7, ChecksumKind::Crc16),
            Verdict::OutOfSync { expected: 7, received: 5 }
        );
        assert_eq!(
            validate(&frame, 4, ChecksumKind::Crc16),
            Verdict::OutOfSync { expected: 4, received: 5 }
        );
    }

    #[test]
    fn test_validate_duplicate_across_wrap() {
        let frame = encode(0xFF, b"wrap", ChecksumKind::Crc16);
        assert_eq!(validate(&frame, 0x00, ChecksumKind::Crc16), Verdict::AcceptedDuplicate);

        let frame = encode(0x00, b"wrap", ChecksumKind::Crc16);
        assert_eq!(validate(&frame, 0x00, ChecksumKind::Crc16), Verdict::Accepted);
    }

    #[test]
    fn test_validate_bad_checksum() {
        let mut frame = encode(1, b"payload", ChecksumKind::Crc16);
        frame[20] ^= 0x01;
        assert_eq!(
            validate(&frame, 1, ChecksumKind::Crc16),
            Verdict::Rejected(RejectReason::Checksum)
        );
    }

    #[test]
    fn test_extract_payload_strips_padding() {
        let frame = encode(1, b"Test data", ChecksumKind::Sum8);
        assert_eq!(extract_payload(&frame), b"Test data");

        let frame = encode(1, &[SUB; 10], ChecksumKind::Sum8);
        assert!(extract_payload(&frame).is_empty());

        let full: Vec<u8> = (0..128).map(|i| i as u8).collect();
        let frame = encode(1, &full, ChecksumKind::Crc16);
        assert_eq!(extract_payload(&frame), full);
    }

    #[test]
    fn test_recover_frame_after_noise() {
        let frame = encode(1, b"resync", ChecksumKind::Crc16);
        let mut buf = vec![0x7E, 0x00, 0x55];
        buf.extend_from_slice(&frame);
        buf.push(0x99);

        assert_eq!(recover_frame(&buf, ChecksumKind::Crc16), Some(frame.as_slice()));
        assert_eq!(classify(&buf, ChecksumKind::Crc16), Inbound::Frame(frame.as_slice()));
    }

    #[test]
    fn test_recover_frame_too_short() {
        let frame = encode(1, b"resync", ChecksumKind::Crc16);
        let mut buf = vec![0x7E];
        buf.extend_from_slice(&frame[..100]);

        assert_eq!(recover_frame(&buf, ChecksumKind::Crc16), None);
        assert_eq!(classify(&buf, ChecksumKind::Crc16), Inbound::Unrecognized);
        assert_eq!(classify(&[0x42], ChecksumKind::Crc16), Inbound::Unrecognized);
    }

    #[test]
    fn test_classify_control_bytes() {
        assert_eq!(classify(&[EOT], ChecksumKind::Crc16), Inbound::EndOfTransmission);
        assert_eq!(classify(&[CAN, CAN], ChecksumKind::Crc16), Inbound::Cancel);
        assert_eq!(classify(&[], ChecksumKind::Crc16), Inbound::Unrecognized);
    }

    #[test]
    fn test_classify_truncates_oversized_frame() {
        let frame = encode(1, b"long", ChecksumKind::Sum8);
        let mut buf = frame.clone();
        buf.extend_from_slice(&[0x00, 0x01]);
        assert_eq!(classify(&buf, ChecksumKind::Sum8), Inbound::Frame(frame.as_slice()));

        let short = &frame[..50];
        assert_eq!(classify(short, ChecksumKind::Sum8), Inbound::Frame(short));
    }

    proptest! {
        #[test]
        fn encoded_frames_validate(
            data in proptest::collection::vec(any::<u8>(), 0..=128),
            seq in any::<u8>(),
            kind in kinds(),
        ) {
            let frame = encode(seq, &data, kind);
            prop_assert_eq!(frame.len(), kind.frame_size());
            prop_assert_eq!(validate(&frame, seq, kind), Verdict::Accepted);
            prop_assert_eq!(classify(&frame, kind), Inbound::Frame(frame.as_slice()));
        }

        #[test]
        fn broken_complement_is_rejected(
            seq in any::<u8>(),
            complement in any::<u8>(),
            kind in kinds(),
        ) {
            prop_assume!(seq.wrapping_add(complement) != 0xFF);
            let mut frame = encode(seq, b"integrity", kind);
            frame[2] = complement;
            prop_assert_eq!(
                validate(&frame, seq, kind),
                Verdict::Rejected(RejectReason::SequenceIntegrity { seq, complement })
            );
        }

        #[test]
        fn distant_sequence_is_out_of_sync(
            seq in any::<u8>(),
            offset in 2u8..=255,
            kind in kinds(),
        ) {
            let frame = encode(seq, b"sync", kind);
            let expected = seq.wrapping_add(offset);
            prop_assert_eq!(
                validate(&frame, expected, kind),
                Verdict::OutOfSync { expected, received: seq }
            );
        }
    }
}
