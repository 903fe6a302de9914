//! Per-agent decision routing and the last-known action table.

use indexmap::IndexMap;
use log::warn;
use simlink_core::{
    Action, ActionSpec, AgentId, BehaviorName, Observation, ObservationSpec, PolicyError,
    RegistrationError,
};

use crate::registry::BehaviorRegistry;
use crate::source::PolicySource;

/// What to apply when a remote decision does not arrive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fallback {
    /// Keep the last action, or the zero action if there is none.
    HoldLastAction,
    /// Apply the zero action.
    ZeroAction,
}

/// Outcome of [`PolicyDispatch::decide`].
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    /// A local policy decided; the action is already installed.
    Ready(Action),
    /// The behavior is remote; the agent goes into the next round.
    Pending,
    /// The local policy failed. The zero action is installed instead.
    Recovered {
        /// The installed replacement.
        action: Action,
        /// What went wrong.
        error: PolicyError,
    },
}

/// Owns the behavior registry and the latest action of every agent.
#[derive(Debug, Default)]
pub struct PolicyDispatch {
    registry: BehaviorRegistry,
    last: IndexMap<AgentId, Action>,
}

impl PolicyDispatch {
    /// Empty dispatch.
    pub fn new() -> Self {
        Self::default()
    }

    /// The behavior registry.
    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    /// See [`BehaviorRegistry::register`].
    pub fn register_behavior(
        &mut self,
        name: BehaviorName,
        observation: ObservationSpec,
        action: ActionSpec,
        source: PolicySource,
    ) -> Result<bool, RegistrationError> {
        self.registry.register(name, observation, action, source)
    }

    /// See [`BehaviorRegistry::release`].
    pub fn release_behavior(&mut self, name: &BehaviorName) -> Result<bool, RegistrationError> {
        self.registry.release(name)
    }

    /// Whether `behavior` is decided by the trainer.
    pub fn is_remote(&self, behavior: &BehaviorName) -> bool {
        self.registry
            .get(behavior)
            .is_some_and(|e| e.source.is_remote())
    }

    /// Declared action layout of `behavior`.
    pub fn action_spec(&self, behavior: &BehaviorName) -> Option<&ActionSpec> {
        self.registry.get(behavior).map(|e| &e.action)
    }

    /// Decide for one agent.
    ///
    /// Remote behaviors yield [`Decision::Pending`]. Local ones are
    /// evaluated now, validated against the action spec, and installed.
    pub fn decide(
        &mut self,
        agent: AgentId,
        behavior: &BehaviorName,
        observation: &Observation,
        mask: &[bool],
    ) -> Decision {
        let Some(entry) = self.registry.get_mut(behavior) else {
            return Decision::Recovered {
                action: Action::default(),
                error: PolicyError::Failed {
                    reason: format!("behavior '{behavior}' is not registered"),
                },
            };
        };
        let spec = &entry.action;
        let result = match &mut entry.source {
            PolicySource::Remote => return Decision::Pending,
            PolicySource::LocalHeuristic(h) => h.decide(agent, observation, spec),
            PolicySource::LocalModel(m) => m.infer(observation, mask, spec),
        };
        let checked = result.and_then(|a| spec.check(&a).map(|()| a).map_err(PolicyError::from));
        match checked {
            Ok(action) => {
                self.last.insert(agent, action.clone());
                Decision::Ready(action)
            }
            Err(error) => {
                warn!("agent {agent} ({behavior}): {error}; applying zero action");
                let action = spec.zero_action();
                self.last.insert(agent, action.clone());
                Decision::Recovered { action, error }
            }
        }
    }

    /// Record `action` as the agent's latest.
    pub fn install(&mut self, agent: AgentId, action: Action) {
        self.last.insert(agent, action);
    }

    /// The agent's latest action, if any.
    pub fn last_action(&self, agent: AgentId) -> Option<&Action> {
        self.last.get(&agent)
    }

    /// Resolve an agent whose remote decision did not arrive, install the
    /// result, and return it.
    pub fn fallback(&mut self, agent: AgentId, behavior: &BehaviorName, policy: Fallback) -> Action {
        let zero = || {
            self.registry
                .get(behavior)
                .map(|e| e.action.zero_action())
                .unwrap_or_default()
        };
        let action = match (policy, self.last.get(&agent)) {
            (Fallback::HoldLastAction, Some(held)) => return held.clone(),
            (Fallback::HoldLastAction, None) | (Fallback::ZeroAction, _) => zero(),
        };
        self.last.insert(agent, action.clone());
        action
    }

    /// Drop the agent's latest action.
    pub fn forget(&mut self, agent: AgentId) {
        self.last.shift_remove(&agent);
    }
}
