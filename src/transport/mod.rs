//! Transport adapter boundary.
//!
//! The engine never touches a device directly. It calls [`Transport`] to
//! open, write and close, and receives everything the device reports
//! (complete lines, errors, close confirmation) as [`TransportEvent`]s sent
//! through the [`TransportSink`] handed over on open.

pub mod loopback;
pub mod serial;

use crate::error::TransportError;
use std::sync::mpsc::Sender;
use tracing::warn;

pub use loopback::{LoopbackHandle, LoopbackTransport};
pub use serial::SerialTransport;

/// Line delimiter used in both directions.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Serial parameters. Framing is fixed at 8N1 for MT-SICS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub address: String,
    pub baud_rate: u32,
}

impl PortSettings {
    pub const DATA_BITS: u8 = 8;
    pub const STOP_BITS: u8 = 1;

    pub fn new(address: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            address: address.into(),
            baud_rate,
        }
    }
}

/// Notifications from a transport to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete line, terminator removed.
    Line(Vec<u8>),
    /// A runtime failure while open.
    Error(String),
    /// The port finished closing.
    Closed,
}

/// Sending half of the engine's transport notification queue.
#[derive(Debug, Clone)]
pub struct TransportSink(Sender<TransportEvent>);

impl TransportSink {
    pub fn new(tx: Sender<TransportEvent>) -> Self {
        Self(tx)
    }

    /// Queues a notification. Returns false once the engine is gone.
    pub fn notify(&self, event: TransportEvent) -> bool {
        self.0.send(event).is_ok()
    }
}

/// Open/close/write capability supplied to the engine.
pub trait Transport: Send {
    /// Opens the device. Notifications for this connection go to `sink`.
    fn open(&mut self, settings: &PortSettings, sink: TransportSink) -> Result<(), TransportError>;

    /// Writes bytes. Failures are treated as transport errors by the engine.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Starts closing. Completion is reported later as [`TransportEvent::Closed`].
    fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn open(&mut self, settings: &PortSettings, sink: TransportSink) -> Result<(), TransportError> {
        (**self).open(settings, sink)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write(bytes)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, settings: &PortSettings, sink: TransportSink) -> Result<(), TransportError> {
        (**self).open(settings, sink)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write(bytes)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Buffers a byte stream and cuts it into CR LF terminated lines.
///
/// A CR not followed by LF stays part of the line. A line longer than
/// [`LineSplitter::MAX_LINE`] is dropped up to its terminator.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest line kept, terminator excluded.
    pub const MAX_LINE: usize = 1024;

    /// Appends `bytes` and returns every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &b in bytes {
            self.buffer.push(b);
            if self.buffer.ends_with(LINE_TERMINATOR) {
                self.buffer.truncate(self.buffer.len() - LINE_TERMINATOR.len());
                let line = std::mem::take(&mut self.buffer);
                if !std::mem::take(&mut self.discarding) {
                    lines.push(line);
                }
            } else if self.buffer.len() - usize::from(b == b'\r') > Self::MAX_LINE {
                if !self.discarding {
                    warn!(limit = Self::MAX_LINE, "line too long, discarding it");
                    self.discarding = true;
                }
                // A trailing CR may still pair with the next LF.
                let pending_cr = b == b'\r';
                self.buffer.clear();
                if pending_cr {
                    self.buffer.push(b'\r');
                }
            }
        }
        lines
    }

    /// Bytes received since the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_crlf() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"S\r\nI4\r\n");
        assert_eq!(lines, vec![b"S".to_vec(), b"I4".to_vec()]);
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn keeps_partial_lines_across_pushes() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"M0").is_empty());
        assert!(splitter.push(b"2\r").is_empty());
        assert_eq!(splitter.pending(), b"M02\r");
        assert_eq!(splitter.push(b"\n"), vec![b"M02".to_vec()]);
    }

    #[test]
    fn bare_lf_or_cr_does_not_end_a_line() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"A\nB\rC").is_empty());
        assert_eq!(splitter.push(b"\r\n"), vec![b"A\nB\rC".to_vec()]);
    }

    #[test]
    fn unterminated_input_stays_bounded() {
        let mut splitter = LineSplitter::new();
        let chunk = [b'A'; 1024];
        for _ in 0..1000 {
            assert!(splitter.push(&chunk).is_empty());
            assert!(splitter.pending().len() <= LineSplitter::MAX_LINE);
        }
        assert_eq!(splitter.push(b"\r\nS\r\n"), vec![b"S".to_vec()]);
        assert!(splitter.pending().is_empty());
    }

    #[test]
    fn overlong_line_split_at_cr_is_still_dropped() {
        let mut splitter = LineSplitter::new();
        let mut line = vec![b'x'; LineSplitter::MAX_LINE + 1];
        line.push(b'\r');
        assert!(splitter.push(&line).is_empty());
        assert_eq!(splitter.push(b"\nI4\r\n"), vec![b"I4".to_vec()]);
    }

    #[test]
    fn line_at_the_limit_is_kept() {
        let mut splitter = LineSplitter::new();
        let mut bytes = vec![b'x'; LineSplitter::MAX_LINE];
        bytes.extend_from_slice(LINE_TERMINATOR);
        assert_eq!(splitter.push(&bytes), vec![vec![b'x'; LineSplitter::MAX_LINE]]);
    }

    #[test]
    fn empty_lines_are_reported() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"\r\n"), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn reset_discards_pending_bytes() {
        let mut splitter = LineSplitter::new();
        splitter.push(b"TA");
        splitter.reset();
        assert_eq!(splitter.push(b"S\r\n"), vec![b"S".to_vec()]);
    }

    #[test]
    fn sink_reports_dropped_receiver() {
        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TransportSink::new(tx);
        assert!(sink.notify(TransportEvent::Closed));
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Closed);
        drop(rx);
        assert!(!sink.notify(TransportEvent::Closed));
    }
}
