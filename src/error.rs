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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Everything that can end a transfer unsuccessfully.
///
/// Corrupted frames and line noise never show up here; the engines absorb
/// them into their retry loops until the retry budget runs out.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to open serial port: {0}")]
    Open(#[from] serialport::Error),

    #[error("I/O error: {source} (in state: {state})")]
    Transport {
        state: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("file I/O error: {0}")]
    Stream(#[source] std::io::Error),

    #[error("transmission canceled: {0}")]
    Canceled(String),
}
