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

//! Line parameters and per-role transfer settings

use std::time::Duration;
use serialport::{DataBits, Parity, StopBits};
use tracing_subscriber::fmt::MakeWriter;
use crate::protocol::ChecksumKind;

/// How the serial line is opened
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub port: String,
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub checksum: ChecksumKind,
    /// How long to wait for the first byte of a frame
    pub timeout: Duration,
    /// Quiet time that ends a burst once bytes are flowing
    pub read_interval: Duration,
    /// Consecutive failures tolerated before the receiver cancels
    pub retries: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            checksum: ChecksumKind::Crc16,
            timeout: Duration::from_millis(10_000),
            read_interval: Duration::from_millis(50),
            retries: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// How long to wait for each reply byte
    pub timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            timeout: Duration::from_millis(200),
        }
    }
}

pub fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

pub fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

pub fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

pub fn parse_checksum(name: &str) -> Result<ChecksumKind, String> {
    match name.to_lowercase().as_str() {
        "crc16" | "crc" => Ok(ChecksumKind::Crc16),
        "sum8" | "sum" => Ok(ChecksumKind::Sum8),
        _ => Err(format!("Invalid checksum: {}. Must be 'crc16' or 'sum8'", name)),
    }
}

/// Installs the global tracing subscriber writing through `writer`.
/// `RUST_LOG` wins over `level`.
pub fn init_logging<W>(level: &str, writer: W) -> Result<(), String>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_target(false))
        .try_init()
        .map_err(|e| format!("Failed to init logging: {}", e))
}
