//! Core types and traits for the simlink simulation-to-trainer bridge.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the data model shared by every other crate in the workspace: agent
//! and behavior identifiers, observations, actions and their declared
//! shapes, the batched records exchanged with a trainer, the shared
//! connection state, error types, and the collaborator traits through
//! which a simulation plugs in its sensing and actuation logic.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod batch;
pub mod error;
pub mod id;
pub mod state;
pub mod traits;
pub mod types;

pub use batch::{ActionBatch, AgentRecord, EpisodeSignal, StepBatch};
pub use error::{PolicyError, RegistrationError, ShapeError};
pub use id::{AgentId, BehaviorName, StepSequence};
pub use state::{ConnectionCell, ConnectionState, ConnectionStatus};
pub use traits::{Actuator, Sensor};
pub use types::{Action, ActionSpec, Observation, ObservationSpec, ObservationTensor, Shape};
