//! Error types for the RPC channel.

use std::io;

/// Boxed transport error, as surfaced by `tonic` and its connectors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A connection attempt did not produce a usable channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The endpoint could not be reached. Retried per the backoff policy.
    #[error("trainer at {endpoint} unreachable: {source}")]
    Unreachable {
        /// The endpoint that was tried.
        endpoint: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },
    /// The stream opened but the handshake did not complete: the peer
    /// closed, timed out, or answered with something other than an ack.
    #[error("handshake with {endpoint} failed: {detail}")]
    HandshakeFailed {
        /// The endpoint that was tried.
        endpoint: String,
        /// What went wrong.
        detail: String,
    },
    /// The trainer refused the bridge, or speaks an incompatible protocol
    /// version. Not retried automatically.
    #[error("handshake rejected by trainer {trainer_version}: {reason}")]
    HandshakeRejected {
        /// Why the handshake was refused.
        reason: String,
        /// Version the trainer reported.
        trainer_version: String,
    },
    /// The configured reconnect attempts are used up.
    #[error("gave up after {attempts} connection attempts")]
    AttemptsExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The I/O runtime that drives the stream could not be started.
    #[error("starting transport runtime: {source}")]
    Runtime {
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    /// Whether the backoff policy may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::HandshakeFailed { .. })
    }
}

/// Sending a message failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The channel is not connected, or has faulted.
    #[error("channel closed")]
    ChannelClosed,
    /// The trainer stopped draining the stream and the outbound queue
    /// is full. The channel is now faulted.
    #[error("trainer is not draining the stream")]
    Backpressure,
}

/// Receiving a message failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The deadline elapsed with no message.
    #[error("receive timed out")]
    Timeout,
    /// The channel is not connected, or the peer went away.
    #[error("channel closed")]
    ChannelClosed,
}
