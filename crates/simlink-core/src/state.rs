//! Process-wide connection state shared between the transport and the
//! tick.
//!
//! The RPC channel owns the only [`ConnectionCell`] and is the only
//! writer. Everything else holds a [`ConnectionStatus`], a cheap
//! read-only handle onto the same atomic.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of the connection to the trainer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected = 0,
    /// Opening the transport.
    Connecting = 1,
    /// Transport open, handshake in progress.
    Handshaking = 2,
    /// Handshake complete, no round in flight.
    Ready = 3,
    /// A request has been sent and its response is outstanding.
    Exchanging = 4,
    /// Shutting down; pending waits are being cancelled.
    Closing = 5,
    /// The transport failed. Operations fail until a reconnect succeeds.
    Faulted = 6,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Handshaking,
            3 => Self::Ready,
            4 => Self::Exchanging,
            5 => Self::Closing,
            6 => Self::Faulted,
            _ => Self::Disconnected,
        }
    }

    /// Whether a round may be attempted in this state.
    pub fn accepts_rounds(self) -> bool {
        matches!(self, Self::Ready | Self::Exchanging)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Exchanging => "exchanging",
            Self::Closing => "closing",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// The single writable connection state. Not `Clone`.
#[derive(Debug)]
pub struct ConnectionCell {
    state: Arc<AtomicU8>,
}

impl ConnectionCell {
    /// A new cell in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
        }
    }

    /// Current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Overwrite the state, returning the previous one.
    pub fn set(&self, next: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.swap(next as u8, Ordering::AcqRel))
    }

    /// Move from `from` to `to` only if the state is still `from`.
    ///
    /// Returns `true` when the transition happened.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// A read-only handle onto this cell.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for ConnectionCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a [`ConnectionCell`].
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    state: Arc<AtomicU8>,
}

impl ConnectionStatus {
    /// Current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }
}
