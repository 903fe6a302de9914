//! Protobuf schema and versioned envelope for the simlink step protocol.
//!
//! The schema lives in `proto/simlink.proto` and is compiled by
//! `tonic-build` into [`proto`]: prost messages plus the `TrainerLink`
//! bidirectional streaming service. Every message travels inside an
//! [`Envelope`] that carries the binary format version. Protobuf
//! decoders skip fields they do not know, so the bridge and the trainer
//! can evolve their schemas independently within one format version.
//!
//! # Architecture
//!
//! - [`proto`] holds the generated messages, client and server
//! - [`codec`] maps domain [`Message`]s onto envelopes and validates
//!   what arrives (versions, required fields, tensor shapes)
//! - [`version`] decides whether two communication versions interoperate

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod message;
pub mod version;

/// Messages and service stubs generated from `proto/simlink.proto`.
#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod proto {
    tonic::include_proto!("simlink.v1");
}

pub use codec::{
    decode, decode_inbound, encode, encode_step_request, from_envelope, inbound_from_envelope,
    step_request_envelope, to_envelope,
};
pub use error::CodecError;
pub use message::{
    BehaviorSpec, Close, ControlMessage, Handshake, HandshakeAck, Inbound, Message, Reset,
    StepRequest, StepResponse,
};
pub use proto::Envelope;
pub use version::is_compatible;

/// Current binary format version.
///
/// History:
/// - v1: protobuf envelope over the `TrainerLink` stream
pub const FORMAT_VERSION: u32 = 1;

/// Oldest format version this build can decode.
pub const MIN_FORMAT_VERSION: u32 = 1;

/// Largest envelope either side will encode or accept, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Semantic version of the step protocol, exchanged in the handshake.
pub const COMMUNICATION_VERSION: &str = "1.0.0";
