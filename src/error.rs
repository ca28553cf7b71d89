//! Error types shared across the simulator.

use crate::state::ConnectionState;
use thiserror::Error;

// Errors raised by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device could not be opened.
    #[error("failed to open {address}: {reason}")]
    Open { address: String, reason: String },
    /// An operation needed an open port.
    #[error("port is not open")]
    NotOpen,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Errors raised by the engine for lifecycle misuse. Transport faults never
// come back through here; they are published as `error` events.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    /// The requested operation is not legal in the current state.
    #[error("cannot {operation} while {state}")]
    IllegalState {
        operation: &'static str,
        state: ConnectionState,
    },
    /// The state machine refused a transition.
    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read profile {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid profile {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}
