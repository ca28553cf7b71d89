//! The protocol engine: connection lifecycle, inbound line handling and
//! response delivery.
//!
//! A [`Simulator`] is driven from a single thread of control. Requests
//! (`open`, `close`) take `&mut self`, and everything the transport reports
//! is queued and applied by [`Simulator::process_pending`] or
//! [`Simulator::wait_and_process`], one notification at a time. A close
//! requested while a line is being handled therefore runs after it.

use crate::dispatch::Dispatcher;
use crate::error::SimError;
use crate::events::{Event, EventBus, Payload};
use crate::normalize::{normalize, Normalized};
use crate::profile::InstrumentProfile;
use crate::state::ConnectionState;
use crate::transport::{PortSettings, Transport, TransportEvent, TransportSink, LINE_TERMINATOR};
use chrono::{DateTime, Utc};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Source of wall-clock time for timestamps and synthetic weights.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Emulated MT-SICS balance bound to one transport.
pub struct Simulator<T: Transport> {
    state: ConnectionState,
    dispatcher: Dispatcher,
    transport: T,
    settings: PortSettings,
    bus: EventBus,
    clock: Clock,
    notify_tx: Sender<TransportEvent>,
    notify_rx: Receiver<TransportEvent>,
}

impl<T: Transport> Simulator<T> {
    /// Creates a closed simulator. Nothing is opened until [`open`](Self::open).
    pub fn new(transport: T, settings: PortSettings, profile: InstrumentProfile) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel();
        Self {
            state: ConnectionState::Closed,
            dispatcher: Dispatcher::new(profile),
            transport,
            settings,
            bus: EventBus::new(),
            clock: Arc::new(Utc::now),
            notify_tx,
            notify_rx,
        }
    }

    /// Replaces the wall clock.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Publishes to `bus` instead of a private one.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn profile(&self) -> &InstrumentProfile {
        self.dispatcher.profile()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    /// The bus this simulator publishes to. Clone it to subscribe.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens the transport: Closed → Opening → Offline, or back to Closed
    /// with an `error` event when the transport refuses.
    ///
    /// Only fails when called in a state other than Closed.
    pub fn open(&mut self) -> Result<ConnectionState, SimError> {
        if self.state != ConnectionState::Closed {
            return Err(SimError::IllegalState {
                operation: "open",
                state: self.state,
            });
        }

        let stale = self.notify_rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarded notifications from previous connection");
        }

        self.transition(ConnectionState::Opening)?;
        let sink = TransportSink::new(self.notify_tx.clone());
        match self.transport.open(&self.settings, sink) {
            Ok(()) => {
                info!(
                    address = %self.settings.address,
                    baud = self.settings.baud_rate,
                    "port open"
                );
                self.transition(ConnectionState::Offline)?;
            }
            Err(e) => {
                error!(address = %self.settings.address, error = %e, "port failed to open");
                self.publish(Payload::Error(format!("Port Failed to open: {e}")));
                self.transition(ConnectionState::Closed)?;
            }
        }
        Ok(self.state)
    }

    /// Requests a close. Returns Closing while the transport still has to
    /// confirm, Closed when it was already shut.
    pub fn close(&mut self) -> Result<ConnectionState, SimError> {
        match self.state {
            ConnectionState::Closed | ConnectionState::Closing => {
                debug!(state = %self.state, "close ignored");
                Ok(self.state)
            }
            state if state.can_close() => {
                self.shut_down()?;
                Ok(self.state)
            }
            state => Err(SimError::IllegalState {
                operation: "close",
                state,
            }),
        }
    }

    /// Applies every queued transport notification. Returns how many ran.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.notify_rx.try_recv() {
            self.handle_transport_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for a transport notification, then applies it
    /// and anything queued behind it. Returns false on timeout.
    pub fn wait_and_process(&mut self, timeout: Duration) -> bool {
        match self.notify_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_transport_event(event);
                self.process_pending();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Applies one transport notification.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        let result = match event {
            TransportEvent::Line(raw) => {
                self.receive_line(&raw);
                Ok(())
            }
            TransportEvent::Error(description) => self.transport_failed(&description),
            TransportEvent::Closed => self.transport_closed(),
        };
        if let Err(e) = result {
            error!(error = %e, "transport notification rejected");
        }
    }

    /// Normalizes, answers and reports one inbound line.
    fn receive_line(&mut self, raw: &[u8]) {
        if !self.state.accepts_traffic() {
            debug!(state = %self.state, "line dropped, port not ready");
            return;
        }

        match normalize(raw) {
            Normalized::Blank => {}
            Normalized::Invalid(reason) => warn!(%reason, "command not valid"),
            Normalized::Command { line, id } => {
                trace!(%line, %id, "rx");
                self.publish(Payload::Rx(line));
                let response = self.dispatcher.dispatch(&id, (self.clock)());
                self.respond(response);
            }
        }
    }

    fn respond(&mut self, response: String) {
        let mut bytes = Vec::with_capacity(response.len() + LINE_TERMINATOR.len());
        bytes.extend_from_slice(response.as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR);

        match self.transport.write(&bytes) {
            Ok(()) => {
                trace!(%response, "tx");
                self.publish(Payload::Tx(response));
            }
            Err(e) => {
                if let Err(e) = self.transport_failed(&e.to_string()) {
                    error!(error = %e, "cannot close after write failure");
                }
            }
        }
    }

    fn transport_failed(&mut self, description: &str) -> Result<(), SimError> {
        if !self.state.can_close() {
            debug!(state = %self.state, %description, "transport error after shutdown");
            return Ok(());
        }
        error!(%description, "port error");
        self.publish(Payload::Error(format!("Port Error: {description}")));
        self.shut_down()
    }

    fn transport_closed(&mut self) -> Result<(), SimError> {
        match self.state {
            ConnectionState::Closing => self.transition(ConnectionState::Closed),
            state if state.can_close() => {
                warn!(%state, "port closed unexpectedly");
                self.shut_down()
            }
            state => {
                debug!(%state, "close notification ignored");
                Ok(())
            }
        }
    }

    /// Enters Closing and asks the transport to close. Closed follows at once
    /// if the transport was not open or could not be closed.
    fn shut_down(&mut self) -> Result<(), SimError> {
        self.transition(ConnectionState::Closing)?;
        if !self.transport.is_open() {
            return self.transition(ConnectionState::Closed);
        }
        if let Err(e) = self.transport.close() {
            warn!(error = %e, "transport close failed, treating port as closed");
            return self.transition(ConnectionState::Closed);
        }
        Ok(())
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), SimError> {
        if !self.state.can_transition_to(next) {
            return Err(SimError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(old = %self.state, new = %next, "state change");
        self.state = next;
        self.publish(Payload::State(next));
        Ok(())
    }

    fn publish(&self, payload: Payload) {
        self.bus.publish(Event::new((self.clock)(), payload));
    }
}
