//! # Connection State Machine
//!
//! ```text
//!   Closed ──open──► Opening ──ok──► Offline ──► Initializing ──► Online
//!     ▲                 │               │             │              │
//!     │            open failed          └──────┬──────┴──────────────┘
//!     │                 │          close / transport error / transport close
//!     ├─────────────────┘                      ▼
//!     └───────────── close confirmed ◄──── Closing
//! ```
//!
//! `Initializing` and `Online` are reserved for instruments with an
//! initialization handshake. The simulator answers commands from `Offline`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No port open. The only way out is an explicit open request.
    #[default]
    Closed,
    /// Open request in progress.
    Opening,
    /// Port open, accepting traffic.
    Offline,
    /// Reserved: instrument handshake running.
    Initializing,
    /// Reserved: handshake complete.
    Online,
    /// Waiting for the transport to confirm the close.
    Closing,
}

impl ConnectionState {
    /// Every state, in lifecycle order.
    pub const ALL: [ConnectionState; 6] = [
        Self::Closed,
        Self::Opening,
        Self::Offline,
        Self::Initializing,
        Self::Online,
        Self::Closing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Opening => "Opening",
            Self::Offline => "Offline",
            Self::Initializing => "Initializing",
            Self::Online => "Online",
            Self::Closing => "Closing",
        }
    }

    /// Whether the port is open and inbound lines should be answered.
    pub fn accepts_traffic(&self) -> bool {
        matches!(self, Self::Offline | Self::Initializing | Self::Online)
    }

    /// Whether a close request (or transport fault) moves this state to Closing.
    pub fn can_close(&self) -> bool {
        self.accepts_traffic()
    }

    /// Validate if transition to `next` is allowed from the current state.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, Opening) => true,

            (Opening, Offline) => true, // transport opened
            (Opening, Closed) => true,  // open failed

            (Offline, Initializing) => true,
            (Initializing, Online) => true,

            (Offline | Initializing | Online, Closing) => true,

            (Closing, Closed) => true,

            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn default_is_closed() {
        assert_eq!(ConnectionState::default(), Closed);
    }

    #[test]
    fn open_path_is_legal() {
        assert!(Closed.can_transition_to(Opening));
        assert!(Opening.can_transition_to(Offline));
        assert!(Opening.can_transition_to(Closed));
    }

    #[test]
    fn closed_only_leaves_through_opening() {
        for next in ConnectionState::ALL {
            assert_eq!(Closed.can_transition_to(next), next == Opening, "Closed -> {next}");
        }
    }

    #[test]
    fn open_states_close_through_closing() {
        for state in [Offline, Initializing, Online] {
            assert!(state.can_transition_to(Closing));
            assert!(!state.can_transition_to(Closed));
            assert!(state.accepts_traffic());
        }
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closing.can_transition_to(Offline));
    }

    #[test]
    fn no_self_transitions() {
        for state in ConnectionState::ALL {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn only_open_states_accept_traffic() {
        assert!(!Closed.accepts_traffic());
        assert!(!Opening.accepts_traffic());
        assert!(!Closing.accepts_traffic());
    }

    #[test]
    fn display_uses_state_name() {
        assert_eq!(Offline.to_string(), "Offline");
        assert_eq!(Closing.as_str(), "Closing");
    }
}
