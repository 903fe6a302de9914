//! Message kinds exchanged between the bridge and the trainer.

use simlink_core::{ActionBatch, ActionSpec, BehaviorName, ObservationSpec, StepBatch, StepSequence};

/// Schema of one behavior, announced to the trainer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BehaviorSpec {
    /// Fully qualified behavior name.
    pub name: BehaviorName,
    /// Declared observation layout.
    pub observation: ObservationSpec,
    /// Declared action layout.
    pub action: ActionSpec,
}

/// First message on a new connection, bridge to trainer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// Communication (protocol) version the bridge speaks.
    pub bridge_version: String,
    /// Version of the bridge package itself, informational.
    pub package_version: String,
    /// Human-readable bridge identity.
    pub bridge_name: String,
    /// Behaviors registered at connect time.
    pub behaviors: Vec<BehaviorSpec>,
}

/// The trainer's answer to a [`Handshake`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeAck {
    /// Whether the trainer accepts this bridge.
    pub accepted: bool,
    /// Communication version the trainer speaks.
    pub trainer_version: String,
    /// Seed the simulation should use, 0 when unspecified.
    pub seed: u64,
    /// Number of parallel training areas requested.
    pub num_areas: u32,
    /// Why the handshake was refused, when it was.
    pub reason: Option<String>,
}

/// One exchanged step, bridge to trainer.
#[derive(Clone, Debug, PartialEq)]
pub struct StepRequest {
    /// Round correlation number.
    pub sequence: StepSequence,
    /// Per-behavior agent records.
    pub batch: StepBatch,
    /// Behaviors registered since the last announcement on this connection.
    pub new_behaviors: Vec<BehaviorSpec>,
}

/// Actions for one exchanged step, trainer to bridge.
#[derive(Clone, Debug, PartialEq)]
pub struct StepResponse {
    /// Sequence of the request this answers.
    pub sequence: StepSequence,
    /// Per-behavior actions.
    pub actions: ActionBatch,
}

/// Trainer command: reset every episode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reset {
    /// New seed for the environment, if the trainer supplies one.
    pub seed: Option<u64>,
}

/// Orderly end of the connection, either direction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Close {
    /// Why the peer is closing.
    pub reason: Option<String>,
}

/// Every message kind on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Bridge to trainer.
    Handshake(Handshake),
    /// Trainer to bridge.
    HandshakeAck(HandshakeAck),
    /// Bridge to trainer.
    StepRequest(StepRequest),
    /// Trainer to bridge.
    StepResponse(StepResponse),
    /// Trainer to bridge.
    Reset(Reset),
    /// Either direction.
    Close(Close),
}

impl Message {
    /// Short name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "Handshake",
            Self::HandshakeAck(_) => "HandshakeAck",
            Self::StepRequest(_) => "StepRequest",
            Self::StepResponse(_) => "StepResponse",
            Self::Reset(_) => "Reset",
            Self::Close(_) => "Close",
        }
    }
}

/// Trainer-to-bridge messages that are not actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Handshake answer.
    HandshakeAck(HandshakeAck),
    /// Reset every episode.
    Reset(Reset),
    /// The trainer is going away.
    Close(Close),
}

/// What the bridge can receive.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Actions answering the request with `sequence`.
    Actions {
        /// Correlation number.
        sequence: StepSequence,
        /// The actions.
        actions: ActionBatch,
    },
    /// A control message.
    Control(ControlMessage),
}
