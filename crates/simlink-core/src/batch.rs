//! Batched per-agent records exchanged with the trainer.
//!
//! A [`StepBatch`] travels out (observations, rewards, episode signals)
//! and an [`ActionBatch`] travels back. Both group agents by
//! [`BehaviorName`] and keep each group sorted by [`AgentId`] ascending,
//! so correlation never depends on insertion or wire order.

use crate::id::{AgentId, BehaviorName};
use crate::types::{Action, Observation};
use std::collections::BTreeMap;

/// Whether an agent's episode ends this step, and why.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EpisodeSignal {
    /// The episode continues.
    #[default]
    Running,
    /// The episode reached a terminal state.
    Done,
    /// The episode was truncated from outside (max steps, shutdown,
    /// lost trainer).
    Interrupted,
}

impl EpisodeSignal {
    /// Whether the episode ends this step.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Everything the trainer needs from one agent for one step.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentRecord {
    /// The agent this record describes.
    pub agent: AgentId,
    /// Observation collected this step.
    pub observation: Observation,
    /// Reward accumulated since the previous exchanged step.
    pub reward: f32,
    /// Episode status.
    pub signal: EpisodeSignal,
    /// Cooperative group, 0 when ungrouped.
    pub group_id: u32,
    /// Reward shared with the agent's group since the previous step.
    pub group_reward: f32,
    /// Discrete action mask, one entry per option across all branches.
    /// `true` means the option is disabled. Empty when unmasked.
    pub action_mask: Vec<bool>,
}

impl AgentRecord {
    /// A running, ungrouped, unmasked record.
    pub fn new(agent: AgentId, observation: Observation, reward: f32) -> Self {
        Self {
            agent,
            observation,
            reward,
            signal: EpisodeSignal::Running,
            group_id: 0,
            group_reward: 0.0,
            action_mask: Vec::new(),
        }
    }
}

/// Outbound unit of one exchanged step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepBatch {
    behaviors: BTreeMap<BehaviorName, Vec<AgentRecord>>,
}

impl StepBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, keeping the behavior's list sorted by agent id.
    ///
    /// A second record for the same agent replaces the first.
    pub fn insert(&mut self, behavior: BehaviorName, record: AgentRecord) {
        let list = self.behaviors.entry(behavior).or_default();
        match list.binary_search_by_key(&record.agent, |r| r.agent) {
            Ok(pos) => list[pos] = record,
            Err(pos) => list.insert(pos, record),
        }
    }

    /// Records of one behavior, sorted by agent id.
    pub fn get(&self, behavior: &BehaviorName) -> Option<&[AgentRecord]> {
        self.behaviors.get(behavior).map(Vec::as_slice)
    }

    /// Iterate behaviors in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&BehaviorName, &[AgentRecord])> {
        self.behaviors.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Total number of agent records.
    pub fn agent_count(&self) -> usize {
        self.behaviors.values().map(Vec::len).sum()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.agent_count() == 0
    }

    /// Every (behavior, agent) pair, in batch order.
    pub fn agents(&self) -> Vec<(BehaviorName, AgentId)> {
        self.behaviors
            .iter()
            .flat_map(|(b, recs)| recs.iter().map(move |r| (b.clone(), r.agent)))
            .collect()
    }
}

/// Inbound unit of one exchanged step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionBatch {
    behaviors: BTreeMap<BehaviorName, Vec<(AgentId, Action)>>,
}

impl ActionBatch {
    /// An empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action, keeping the behavior's list sorted by agent id.
    pub fn insert(&mut self, behavior: BehaviorName, agent: AgentId, action: Action) {
        let list = self.behaviors.entry(behavior).or_default();
        match list.binary_search_by_key(&agent, |(a, _)| *a) {
            Ok(pos) => list[pos].1 = action,
            Err(pos) => list.insert(pos, (agent, action)),
        }
    }

    /// The action for one agent of one behavior.
    pub fn get(&self, behavior: &BehaviorName, agent: AgentId) -> Option<&Action> {
        let list = self.behaviors.get(behavior)?;
        list.binary_search_by_key(&agent, |(a, _)| *a)
            .ok()
            .map(|pos| &list[pos].1)
    }

    /// Iterate behaviors in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&BehaviorName, &[(AgentId, Action)])> {
        self.behaviors.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Total number of actions.
    pub fn agent_count(&self) -> usize {
        self.behaviors.values().map(Vec::len).sum()
    }

    /// Whether the batch holds no actions.
    pub fn is_empty(&self) -> bool {
        self.agent_count() == 0
    }
}
