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

// XMODEM protocol implementation
mod checksum;
mod config;
mod error;
mod packet;
mod protocol;
mod receiver;
mod sender;
mod serial;
mod status;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};
use config::{LineConfig, ReceiverConfig, SenderConfig};
use error::TransferError;
use receiver::ReceiverFsm;
use sender::SenderFsm;
use serial::RealSerialPort;
use status::StatusLine;

#[derive(Parser)]
#[command(name = "xmodem")]
#[command(about = "XMODEM file transfer over a serial line", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Log level (error, warn, info, debug, or trace)
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: String,

    /// Enable debug output (same as --log-level debug)
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file using the XMODEM protocol
    Send {
        /// File to send
        file: PathBuf,

        /// Milliseconds to wait for each answer from the receiver
        #[arg(long, default_value = "200", value_name = "MS",
              value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,
    },
    /// Receive a file using the XMODEM protocol
    Receive {
        /// Where to write the received file
        file: PathBuf,

        /// Checksum to request from the sender (crc16 or sum8)
        #[arg(long, default_value = "crc16")]
        checksum: String,

        /// Milliseconds to wait for the sender before retrying
        #[arg(long, default_value = "10000", value_name = "MS",
              value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,

        /// Consecutive failures tolerated before canceling
        #[arg(long, default_value = "10",
              value_parser = clap::value_parser!(u32).range(1..))]
        retries: u32,
    },
}

fn exit_with(message: String) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug".to_string() } else { cli.log_level.to_lowercase() };
    let verbose = matches!(level.as_str(), "debug" | "trace");
    let status = StatusLine::new(!verbose);

    if let Err(e) = config::init_logging(&level, status.log_writer()) {
        exit_with(e);
    }

    let line = LineConfig {
        port: cli.port.clone(),
        baud: cli.baud,
        data_bits: config::parse_data_bits(cli.data_bits).unwrap_or_else(|e| exit_with(e)),
        parity: config::parse_parity(&cli.parity).unwrap_or_else(|e| exit_with(e)),
        stop_bits: config::parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| exit_with(e)),
    };

    status.println(format!("Opening serial port: {}", line.port));
    status.println(format!(
        "Settings: {} baud, {:?}, {:?}, {:?}",
        line.baud, line.data_bits, line.parity, line.stop_bits
    ));

    match cli.command {
        Commands::Send { file, timeout } => {
            status.println(format!("\nSending file: {}", file.display()));
            let config = SenderConfig {
                timeout: Duration::from_millis(timeout),
            };
            match send_file(&line, file, config, &status) {
                Ok(()) => {
                    status.finish("Done".to_string());
                    println!("\nFile sent successfully!");
                }
                Err(e) => {
                    status.abandon();
                    exit_with(format!("Send failed: {}", e));
                }
            }
        }
        Commands::Receive { file, checksum, timeout, retries } => {
            status.println(format!("\nReceiving file: {}", file.display()));
            let config = ReceiverConfig {
                checksum: config::parse_checksum(&checksum).unwrap_or_else(|e| exit_with(e)),
                timeout: Duration::from_millis(timeout),
                retries,
                ..ReceiverConfig::default()
            };
            match receive_file(&line, file, config, &status) {
                Ok(packets) => {
                    status.finish(format!("{} packets", packets));
                    println!("\nFile received successfully! ({} packets)", packets);
                }
                Err(e) => {
                    status.abandon();
                    exit_with(format!("Receive failed: {}", e));
                }
            }
        }
    }
}

fn send_file(line: &LineConfig, file: PathBuf, config: SenderConfig, status: &StatusLine) -> Result<(), TransferError> {
    let mut input = File::open(&file).map_err(TransferError::Stream)?;
    let serial_port = RealSerialPort::open(line)?;

    SenderFsm::new(Box::new(serial_port), config)
        .with_observer(status.sender_observer())
        .send(&mut input)
}

fn receive_file(line: &LineConfig, file: PathBuf, config: ReceiverConfig, status: &StatusLine) -> Result<u32, TransferError> {
    let serial_port = RealSerialPort::open(line)?;
    let mut output = BufWriter::new(File::create(&file).map_err(TransferError::Stream)?);

    ReceiverFsm::new(Box::new(serial_port), config)
        .with_observer(status.receiver_observer())
        .receive(&mut output)
}
