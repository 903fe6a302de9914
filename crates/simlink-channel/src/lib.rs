//! gRPC streaming, handshaking, self-reconnecting transport to an RL trainer.
//!
//! [`RpcChannel`] owns one `TrainerLink` bidirectional stream (over TCP
//! or a Unix socket, via `tonic`) and the process-wide
//! [`ConnectionState`](simlink_core::ConnectionState).
//!
//! # Architecture
//!
//! ```text
//! Tick Thread                  simlink-io (tokio)     simlink-rx          simlink-connect
//!     |                              |                    |                     |
//!     |--send(envelope)--> mpsc(2) ->| h2 writes          |                     |
//!     |   (try_send, never blocks)   |                    | inbound.message()   |
//!     |<--receive(deadline)-----------------------------  | inbox.send(env)     |
//!     |   [inbox: bounded(1)]        |                    |                     |
//!     |                              |                    |                     |
//!     |--poll_reconnect(now)------------------------------------------------->  |
//!     |   (spawns an attempt when the backoff delay elapsed)                    | connect + handshake
//!     |<--AttemptEvent via bounded(2)-------------------------------------------|
//! ```
//!
//! The tick thread is the only writer of the connection state. The
//! background threads hand results back through one-slot channels and
//! never touch it.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod channel;
pub mod endpoint;
pub mod error;
mod handshake;
mod reader;

pub use backoff::{ReconnectBackoff, ReconnectPolicy};
pub use channel::{ChannelConfig, ReconnectEvent, RpcChannel, TrainerInfo};
pub use endpoint::{Endpoint, EndpointError, DEFAULT_EDITOR_PORT, DEFAULT_TRAINING_PORT};
pub use error::{BoxError, ConnectError, RecvError, SendError};
