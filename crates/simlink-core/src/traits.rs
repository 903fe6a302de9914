//! Collaborator traits through which a simulation plugs into the bridge.
//!
//! The bridge never inspects world state itself. Each tick it asks a
//! [`Sensor`] for every agent needing a decision and hands every agent's
//! resolved action to its [`Actuator`].

use crate::id::AgentId;
use crate::types::{Action, Observation};

/// Turns world state into an observation for one agent.
///
/// Called on the tick thread, at most once per agent per tick.
pub trait Sensor: Send {
    /// Observe the world from `agent`'s point of view.
    fn collect(&mut self, agent: AgentId) -> Observation;
}

/// Turns an action into world-state mutation for one agent.
///
/// Called on the tick thread exactly once per agent per tick.
pub trait Actuator: Send {
    /// Apply `action` on behalf of `agent`.
    fn apply(&mut self, agent: AgentId, action: &Action);
}

impl<F> Sensor for F
where
    F: FnMut(AgentId) -> Observation + Send,
{
    fn collect(&mut self, agent: AgentId) -> Observation {
        self(agent)
    }
}

impl<F> Actuator for F
where
    F: FnMut(AgentId, &Action) + Send,
{
    fn apply(&mut self, agent: AgentId, action: &Action) {
        self(agent, action)
    }
}
