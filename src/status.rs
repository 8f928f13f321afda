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

//! Terminal status line fed by the engine observers

use std::io::{self, Write};
use std::time::Duration;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;
use crate::receiver::ReceiverObserver;
use crate::sender::SenderObserver;

pub struct StatusLine {
    bar: ProgressBar,
}

impl StatusLine {
    /// A hidden status line swallows all updates, used when debug logs
    /// would otherwise interleave with it
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(spinner_style());
        bar.set_message("Waiting for the other side...");
        StatusLine { bar }
    }

    pub fn receiver_observer(&self) -> ReceiverObserver {
        let bar = self.bar.clone();
        Box::new(move |session| {
            bar.set_position(session.packets as u64);
            bar.set_message(format!(
                "State: {} | retries: {} | next: #{}",
                session.state.name(),
                session.failures,
                session.expected_seq
            ));
        })
    }

    pub fn sender_observer(&self) -> SenderObserver {
        let bar = self.bar.clone();
        Box::new(move |session| {
            if session.checksum.is_some() && bar.length() != Some(session.total_packets as u64) {
                bar.set_length(session.total_packets as u64);
                bar.set_style(bar_style());
            }
            bar.set_position(session.packets_sent as u64);
            bar.set_message(format!("State: {}", session.state));
        })
    }

    /// Prints a line to stdout without tearing the status line
    pub fn println(&self, line: String) {
        self.bar.suspend(|| println!("{}", line));
    }

    /// Log sink that shares the terminal with the status line
    pub fn log_writer(&self) -> LogWriter {
        LogWriter { bar: self.bar.clone() }
    }

    pub fn finish(&self, message: String) {
        self.bar.finish_with_message(message);
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Writes each log line to stderr with the status line cleared first and
/// redrawn after
#[derive(Clone)]
pub struct LogWriter {
    bar: ProgressBar,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bar.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bar.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{pos}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:50.cyan/blue}] [{pos}/{len}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChecksumKind;
    use crate::receiver::{ReceiverSession, ReceiverState};
    use crate::sender::{SenderSession, SenderState};

    #[test]
    fn test_sender_progress() {
        let status = StatusLine::new(false);
        let mut observer = status.sender_observer();

        let mut session = SenderSession::default();
        observer(&session);
        assert_eq!(status.bar.position(), 0);

        session.checksum = Some(ChecksumKind::Crc16);
        session.total_packets = 3;
        session.packets_sent = 2;
        session.state = SenderState::WaitingForAnswer;
        observer(&session);

        assert_eq!(status.bar.length(), Some(3));
        assert_eq!(status.bar.position(), 2);
        assert_eq!(status.bar.message(), "State: WaitingForAnswer");
    }

    #[test]
    fn test_receiver_progress() {
        let status = StatusLine::new(false);
        let mut observer = status.receiver_observer();

        let mut session = ReceiverSession::new(ChecksumKind::Sum8);
        session.state = ReceiverState::AcceptPacket;
        session.packets = 4;
        session.expected_seq = 5;
        observer(&session);

        assert_eq!(status.bar.position(), 4);
        assert_eq!(status.bar.message(), "State: AcceptPacket | retries: 0 | next: #5");
    }

    #[test]
    fn test_log_writer_keeps_status() {
        let status = StatusLine::new(false);
        let mut observer = status.receiver_observer();

        let mut session = ReceiverSession::new(ChecksumKind::Crc16);
        session.packets = 2;
        observer(&session);

        let mut writer = status.log_writer().make_writer();
        assert_eq!(writer.write(b"log line\n").expect("Write failed"), 9);
        writer.write_all(b"another\n").expect("Write failed");
        writer.flush().expect("Flush failed");

        assert_eq!(status.bar.position(), 2);
        assert_eq!(status.bar.message(), "State: NoInit | retries: 0 | next: #1");
    }
}
