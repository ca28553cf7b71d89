//! # MT-SICS Balance Simulator Library
//!
//! This library emulates a laboratory balance speaking the MT-SICS
//! command/response protocol over a serial line. It frames and normalizes
//! received lines, answers a fixed set of commands from a static instrument
//! profile, and reports lifecycle and traffic events to subscribers.
//!
//! ```no_run
//! use mt_sim::{EventKind, InstrumentProfile, PortSettings, SerialTransport, Simulator};
//! use std::time::Duration;
//!
//! let mut sim = Simulator::new(
//!     SerialTransport::new(),
//!     PortSettings::new("/dev/ttyUSB1", 38400),
//!     InstrumentProfile::default(),
//! );
//! sim.events().subscribe(EventKind::State, |event| println!("{event}"));
//! sim.open().ok();
//! while sim.state().accepts_traffic() {
//!     sim.wait_and_process(Duration::from_millis(100));
//! }
//! ```

pub mod config;
pub mod console;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod normalize;
pub mod profile;
pub mod state;
pub mod transport;

pub use dispatch::{CommandRule, Dispatcher};
pub use engine::Simulator;
pub use error::{ConfigError, SimError, TransportError};
pub use events::{Event, EventBus, EventKind, Payload};
pub use profile::InstrumentProfile;
pub use state::ConnectionState;
pub use transport::{LoopbackHandle, LoopbackTransport, PortSettings, SerialTransport, Transport};
