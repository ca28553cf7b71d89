//! In-memory transport.
//!
//! Stands in for a serial device in tests and in console sessions without
//! hardware. A [`LoopbackHandle`] plays the remote end: it feeds inbound
//! bytes, injects faults and collects what the simulator wrote.

use super::{LineSplitter, PortSettings, Transport, TransportEvent, TransportSink, LINE_TERMINATOR};
use crate::error::TransportError;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    open: bool,
    settings: Option<PortSettings>,
    sink: Option<TransportSink>,
    splitter: LineSplitter,
    written: Vec<u8>,
    open_failure: Option<String>,
    write_failure: Option<String>,
    close_failure: Option<String>,
}

impl Shared {
    fn notify(&self, event: TransportEvent) -> bool {
        match &self.sink {
            Some(sink) => sink.notify(event),
            None => false,
        }
    }
}

/// Transport whose far end is a [`LoopbackHandle`].
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Remote end of a [`LoopbackTransport`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackTransport {
    /// A closed transport and the handle driving its far end.
    pub fn pair() -> (Self, LoopbackHandle) {
        let transport = Self::default();
        let handle = LoopbackHandle {
            shared: Arc::clone(&transport.shared),
        };
        (transport, handle)
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self, settings: &PortSettings, sink: TransportSink) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if let Some(reason) = shared.open_failure.take() {
            return Err(TransportError::Open {
                address: settings.address.clone(),
                reason,
            });
        }
        shared.open = true;
        shared.settings = Some(settings.clone());
        shared.sink = Some(sink);
        shared.splitter.reset();
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if !shared.open {
            return Err(TransportError::NotOpen);
        }
        if let Some(reason) = shared.write_failure.clone() {
            return Err(TransportError::Io(std::io::Error::other(reason)));
        }
        shared.written.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut shared = self.shared.lock();
        if !shared.open {
            return Err(TransportError::NotOpen);
        }
        if let Some(reason) = shared.close_failure.take() {
            return Err(TransportError::Io(std::io::Error::other(reason)));
        }
        shared.open = false;
        shared.notify(TransportEvent::Closed);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }
}

impl LoopbackHandle {
    /// Feeds raw inbound bytes. Complete CR LF lines are delivered to the
    /// engine; the rest is buffered. Returns the number of lines delivered.
    pub fn feed(&self, bytes: &[u8]) -> usize {
        let mut shared = self.shared.lock();
        if !shared.open {
            return 0;
        }
        let lines = shared.splitter.push(bytes);
        lines
            .into_iter()
            .filter(|line| shared.notify(TransportEvent::Line(line.clone())))
            .count()
    }

    /// Sends one line, appending the terminator.
    pub fn send_line(&self, line: &str) -> bool {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(LINE_TERMINATOR);
        self.feed(&bytes) == 1
    }

    /// Reports a runtime failure, as a device error would.
    pub fn inject_error(&self, description: &str) -> bool {
        self.shared
            .lock()
            .notify(TransportEvent::Error(description.to_string()))
    }

    /// The device went away: the port closes without being asked to.
    pub fn hang_up(&self) -> bool {
        let mut shared = self.shared.lock();
        if !shared.open {
            return false;
        }
        shared.open = false;
        shared.notify(TransportEvent::Closed)
    }

    /// The next open attempt fails with `reason`.
    pub fn fail_next_open(&self, reason: &str) {
        self.shared.lock().open_failure = Some(reason.to_string());
    }

    /// Every write fails with `reason` until cleared with `None`.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.shared.lock().write_failure = reason.map(str::to_string);
    }

    /// The next close attempt fails with `reason` and leaves the port open.
    pub fn fail_next_close(&self, reason: &str) {
        self.shared.lock().close_failure = Some(reason.to_string());
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.lock().written.clone()
    }

    /// Removes and returns the written data as lines, terminators stripped.
    pub fn take_written_lines(&self) -> Vec<String> {
        let bytes = std::mem::take(&mut self.shared.lock().written);
        let mut splitter = LineSplitter::new();
        splitter
            .push(&bytes)
            .into_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    /// Settings passed to the most recent successful open.
    pub fn settings(&self) -> Option<PortSettings> {
        self.shared.lock().settings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn opened() -> (LoopbackTransport, LoopbackHandle, mpsc::Receiver<TransportEvent>) {
        let (mut transport, handle) = LoopbackTransport::pair();
        let (tx, rx) = mpsc::channel();
        transport
            .open(&PortSettings::new("loop", 38400), TransportSink::new(tx))
            .unwrap();
        (transport, handle, rx)
    }

    #[test]
    fn open_records_settings() {
        let (transport, handle, _rx) = opened();
        assert!(transport.is_open());
        assert_eq!(handle.settings(), Some(PortSettings::new("loop", 38400)));
    }

    #[test]
    fn scheduled_open_failure_applies_once() {
        let (mut transport, handle) = LoopbackTransport::pair();
        handle.fail_next_open("busy");
        let (tx, _rx) = mpsc::channel();
        let settings = PortSettings::new("loop", 9600);
        let err = transport
            .open(&settings, TransportSink::new(tx.clone()))
            .unwrap_err();
        assert!(err.to_string().contains("busy"));
        assert!(!transport.is_open());
        assert!(transport.open(&settings, TransportSink::new(tx)).is_ok());
    }

    #[test]
    fn fed_bytes_arrive_as_lines() {
        let (_transport, handle, rx) = opened();
        assert_eq!(handle.feed(b"S\r\nI"), 1);
        assert_eq!(handle.feed(b"4\r\n"), 1);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::Line(b"S".to_vec()),
                TransportEvent::Line(b"I4".to_vec())
            ]
        );
    }

    #[test]
    fn writes_are_collected() {
        let (mut transport, handle, _rx) = opened();
        transport.write(b"S S 0.00 KG\r\n").unwrap();
        transport.write(b"I4 A \"X\"\r\n").unwrap();
        assert_eq!(
            handle.take_written_lines(),
            vec!["S S 0.00 KG".to_string(), "I4 A \"X\"".to_string()]
        );
        assert!(handle.written().is_empty());
    }

    #[test]
    fn write_failure_is_reported() {
        let (mut transport, handle, _rx) = opened();
        handle.fail_writes(Some("cable unplugged"));
        assert!(matches!(transport.write(b"x"), Err(TransportError::Io(_))));
        handle.fail_writes(None);
        assert!(transport.write(b"x").is_ok());
    }

    #[test]
    fn close_confirms_through_sink() {
        let (mut transport, _handle, rx) = opened();
        transport.close().unwrap();
        assert!(!transport.is_open());
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Closed);
        assert!(matches!(transport.close(), Err(TransportError::NotOpen)));
    }

    #[test]
    fn scheduled_close_failure_applies_once() {
        let (mut transport, handle, rx) = opened();
        handle.fail_next_close("stuck");
        assert!(matches!(transport.close(), Err(TransportError::Io(_))));
        assert!(transport.is_open());
        assert!(rx.try_recv().is_err());
        transport.close().unwrap();
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Closed);
    }

    #[test]
    fn hang_up_and_errors_are_notified() {
        let (transport, handle, rx) = opened();
        assert!(handle.inject_error("framing error"));
        assert!(handle.hang_up());
        assert!(!transport.is_open());
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::Error("framing error".into()),
                TransportEvent::Closed
            ]
        );
    }

    #[test]
    fn closed_port_ignores_input() {
        let (mut transport, handle, rx) = opened();
        transport.close().unwrap();
        let _ = rx.try_iter().count();
        assert_eq!(handle.feed(b"S\r\n"), 0);
        assert!(rx.try_recv().is_err());
    }
}
