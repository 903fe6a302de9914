//! Hand-written decision rules.

use simlink_core::{Action, ActionSpec, AgentId, Observation, PolicyError};

/// A rule mapping one agent's observation to an action.
///
/// Called on the tick thread. Must not block.
pub trait Heuristic: Send {
    /// Decide for `agent`. The result is checked against `spec` by the
    /// caller.
    fn decide(
        &mut self,
        agent: AgentId,
        observation: &Observation,
        spec: &ActionSpec,
    ) -> Result<Action, PolicyError>;
}

/// Always the zero action.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZeroHeuristic;

impl Heuristic for ZeroHeuristic {
    fn decide(
        &mut self,
        _agent: AgentId,
        _observation: &Observation,
        spec: &ActionSpec,
    ) -> Result<Action, PolicyError> {
        Ok(spec.zero_action())
    }
}

/// Always the same action.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantHeuristic {
    action: Action,
}

impl ConstantHeuristic {
    /// Return `action` for every agent.
    pub fn new(action: Action) -> Self {
        Self { action }
    }
}

impl Heuristic for ConstantHeuristic {
    fn decide(
        &mut self,
        _agent: AgentId,
        _observation: &Observation,
        _spec: &ActionSpec,
    ) -> Result<Action, PolicyError> {
        Ok(self.action.clone())
    }
}

/// A closure as a heuristic.
pub struct FnHeuristic<F> {
    f: F,
}

impl<F> FnHeuristic<F>
where
    F: FnMut(AgentId, &Observation) -> Result<Action, PolicyError> + Send,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Heuristic for FnHeuristic<F>
where
    F: FnMut(AgentId, &Observation) -> Result<Action, PolicyError> + Send,
{
    fn decide(
        &mut self,
        agent: AgentId,
        observation: &Observation,
        _spec: &ActionSpec,
    ) -> Result<Action, PolicyError> {
        (self.f)(agent, observation)
    }
}
