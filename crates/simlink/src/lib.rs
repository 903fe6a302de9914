//! simlink: a real-time bridge between interactive simulations and
//! reinforcement-learning trainers.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! simlink sub-crates. For most users, adding `simlink` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use simlink::prelude::*;
//!
//! // A bridge that never reaches a trainer still ticks: agents backed by a
//! // local heuristic decide on their own.
//! let mut config = BridgeConfig::default();
//! config.reconnect = ReconnectPolicy::disabled();
//! let mut bridge = Bridge::new(config).unwrap();
//!
//! let setup = AgentSetup::new(
//!     "Walker",
//!     ObservationSpec::vector(4),
//!     ActionSpec::continuous(2),
//!     PolicySource::LocalHeuristic(Box::new(ConstantHeuristic::new(
//!         Action::continuous(vec![0.25, -0.25]),
//!     ))),
//! );
//! let sensor = |_agent: AgentId| Observation::from_vector(vec![0.0; 4]);
//! let actuator = |_agent: AgentId, action: &Action| {
//!     assert_eq!(action.continuous, vec![0.25, -0.25]);
//! };
//! let agent = bridge.add_agent(setup, sensor, actuator).unwrap();
//!
//! let report = bridge.on_tick();
//! assert!(report.is_clean());
//! assert_eq!(report.round, RoundStatus::NoRound);
//! assert!(bridge.last_action(agent).is_some());
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `simlink-core` | IDs, observations, actions, batches, connection state, errors, sensor/actuator traits |
//! | [`codec`] | `simlink-codec` | Protobuf schema, message conversion, version checks |
//! | [`channel`] | `simlink-channel` | Endpoints, the RPC channel, handshake, reconnect backoff |
//! | [`policy`] | `simlink-policy` | Decision sources, heuristics, local models, behavior registry |
//! | [`engine`] | `simlink-engine` | The bridge, step exchange, cadence control, configuration |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`simlink-core`).
///
/// Contains agent and behavior identifiers, observation and action shapes,
/// the batched records exchanged with a trainer, and the
/// [`types::Sensor`] / [`types::Actuator`] traits a simulation implements.
pub use simlink_core as types;

/// Wire format (`simlink-codec`).
///
/// [`codec::Message`] and the versioned protobuf [`codec::Envelope`] it
/// travels in, with [`codec::encode`] / [`codec::decode`] for raw bytes.
pub use simlink_codec as codec;

/// Transport to the trainer (`simlink-channel`).
///
/// [`channel::RpcChannel`] owns the gRPC stream, the background reader
/// and the reconnect schedule. [`channel::Endpoint`] names where the trainer listens.
pub use simlink_channel as channel;

/// Decision sources (`simlink-policy`).
///
/// [`policy::PolicySource`] selects the trainer, a [`policy::Heuristic`],
/// or a [`policy::LocalModel`] per behavior.
pub use simlink_policy as policy;

/// The control loop (`simlink-engine`).
///
/// [`engine::Bridge`] is ticked once per simulation frame and reports what
/// happened in an [`engine::TickReport`].
pub use simlink_engine as engine;

/// Common imports for typical simlink usage.
///
/// ```rust
/// use simlink::prelude::*;
/// ```
///
/// This imports the bridge and its configuration, the agent-facing core
/// types, the collaborator traits, and the shipped local policies.
pub mod prelude {
    // Core types and traits
    pub use simlink_core::{
        Action, ActionSpec, Actuator, AgentId, BehaviorName, ConnectionState, EpisodeSignal,
        Observation, ObservationSpec, Sensor,
    };

    // Errors
    pub use simlink_core::{PolicyError, RegistrationError, ShapeError};

    // Channel
    pub use simlink_channel::{Endpoint, ReconnectPolicy};

    // Policy
    pub use simlink_policy::{
        ConstantHeuristic, FnHeuristic, Heuristic, LinearModel, LocalModel, PolicySource,
        ZeroHeuristic,
    };

    // Engine
    pub use simlink_engine::{
        AgentSetup, BehaviorDecl, Bridge, BridgeConfig, BridgeError, BridgeFault, BridgeMetrics,
        CadenceConfig, CadenceMode, RoundStatus, TickReport, TimeoutPolicy,
    };
}
