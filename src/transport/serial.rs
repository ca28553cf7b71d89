//! Serial port transport backed by the `serialport` crate.

use super::{LineSplitter, PortSettings, Transport, TransportEvent, TransportSink};
use crate::error::TransportError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How long a blocking read waits before re-checking for shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

struct Reader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Transport over a real serial device.
///
/// A reader thread owns a clone of the port, cuts the input into lines and
/// forwards them to the engine.
#[derive(Default)]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    reader: Option<Reader>,
    sink: Option<TransportSink>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases the port and waits for the reader thread to finish.
    fn stop_reader(&mut self) {
        self.port = None;
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Relaxed);
            if reader.thread.join().is_err() {
                warn!("serial reader thread panicked");
            }
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            debug!("serial transport dropped while open");
        }
        self.stop_reader();
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, settings: &PortSettings, sink: TransportSink) -> Result<(), TransportError> {
        let open_error = |reason: String| TransportError::Open {
            address: settings.address.clone(),
            reason,
        };

        let port = serialport::new(&settings.address, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| open_error(e.to_string()))?;
        let read_half = port.try_clone().map_err(|e| open_error(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let sink = sink.clone();
            thread::Builder::new()
                .name(format!("serial-rx {}", settings.address))
                .spawn(move || read_lines(read_half, &stop, &sink))?
        };

        debug!(address = %settings.address, baud = settings.baud_rate, "serial port open");
        self.port = Some(port);
        self.reader = Some(Reader { stop, thread });
        self.sink = Some(sink);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.is_none() {
            return Err(TransportError::NotOpen);
        }
        self.stop_reader();
        if let Some(sink) = self.sink.take() {
            sink.notify(TransportEvent::Closed);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

fn read_lines(mut port: Box<dyn SerialPort>, stop: &AtomicBool, sink: &TransportSink) {
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 256];

    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                trace!(bytes = n, "serial read");
                for line in splitter.push(&buf[..n]) {
                    if !sink.notify(TransportEvent::Line(line)) {
                        return;
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                error!(error = %e, "serial read failed");
                sink.notify(TransportEvent::Error(e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    // Creating pty pairs is not thread-safe on every platform.
    #[cfg(unix)]
    static PTY: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn unopened_port_rejects_io() {
        let mut transport = SerialTransport::new();
        assert!(!transport.is_open());
        assert!(matches!(transport.write(b"S\r\n"), Err(TransportError::NotOpen)));
        assert!(matches!(transport.close(), Err(TransportError::NotOpen)));
    }

    #[test]
    fn missing_device_fails_to_open() {
        let mut transport = SerialTransport::new();
        let (tx, _rx) = mpsc::channel();
        let err = transport
            .open(
                &PortSettings::new("/dev/does-not-exist-mtsics", 38400),
                TransportSink::new(tx),
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
        assert!(!transport.is_open());
    }

    #[cfg(unix)]
    #[test]
    fn dropped_transport_stops_reading() {
        use serialport::TTYPort;
        use std::time::Duration;

        let _pty = PTY.lock();
        let (mut master, slave) = TTYPort::pair().unwrap();
        let path = slave.name().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut transport = SerialTransport::new();
        transport
            .open(&PortSettings::new(&path, 9600), TransportSink::new(tx))
            .unwrap();
        drop(transport);

        master.write_all(b"I4\r\n").unwrap();
        match rx.recv_timeout(Duration::from_millis(300)) {
            Err(_) => {}
            Ok(event) => panic!("reader still running after drop: {event:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn close_stops_reading_and_confirms() {
        use serialport::TTYPort;
        use std::time::Duration;

        let _pty = PTY.lock();
        let (mut master, slave) = TTYPort::pair().unwrap();
        let path = slave.name().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut transport = SerialTransport::new();
        transport
            .open(&PortSettings::new(&path, 9600), TransportSink::new(tx))
            .unwrap();
        master.write_all(b"S\r\n").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            TransportEvent::Line(b"S".to_vec())
        );

        transport.close().unwrap();
        assert!(!transport.is_open());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), TransportEvent::Closed);
    }
}
