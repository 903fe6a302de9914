//! Frame-synchronous control loop for simlink.
//!
//! Provides the top-level [`Bridge`] that a simulation ticks once per
//! frame. Each tick senses every agent, decides locally or through the
//! trainer per the [`CadenceController`], runs at most one
//! [`StepExchange`] round, and actuates every agent with its resolved
//! action. Supports lockstep, decimated and fire-and-forget cadences.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod cadence;
pub mod config;
pub mod exchange;
pub mod metrics;
pub mod report;

pub use bridge::{AgentSetup, Bridge, BridgeError};
pub use cadence::{CadenceController, TickPlan};
pub use config::{
    BehaviorDecl, BridgeConfig, CadenceConfig, CadenceMode, ConfigError, TimeoutPolicy,
};
pub use exchange::{
    ExchangeError, ExchangeEvent, PendingAgent, Resolution, RoundPhase, StepExchange,
};
pub use metrics::BridgeMetrics;
pub use report::{BridgeFault, RoundStatus, TickReport};
