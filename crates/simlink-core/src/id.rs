//! Strongly-typed identifiers for agents, behaviors, and exchange rounds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one controllable entity.
///
/// IDs are allocated by the bridge when an agent is added and stay
/// valid until the agent is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AgentId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Sequence number correlating a `StepRequest` with its `StepResponse`.
///
/// Strictly increasing for the lifetime of a bridge, including across
/// reconnects. Sequence 0 is never sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepSequence(pub u64);

impl StepSequence {
    /// The sequence number used by the first exchanged round.
    pub const FIRST: Self = Self(1);

    /// The sequence number following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StepSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StepSequence {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Separator between the base name and the team suffix in a fully
/// qualified behavior name (`"Runner?team=1"`).
const TEAM_SUFFIX: &str = "?team=";

/// Key grouping agents that share one policy and one observation/action
/// schema.
///
/// The stored string is the fully qualified name. A name without a
/// `?team=N` suffix belongs to team 0.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorName(String);

impl BehaviorName {
    /// Create a behavior name from a (possibly qualified) string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Create the fully qualified name for `base` on `team`.
    ///
    /// Team 0 yields the bare base name.
    pub fn with_team(base: &str, team: u32) -> Self {
        if team == 0 {
            Self(base.to_string())
        } else {
            Self(format!("{base}{TEAM_SUFFIX}{team}"))
        }
    }

    /// The fully qualified string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name without any team suffix.
    pub fn base(&self) -> &str {
        match self.0.split_once(TEAM_SUFFIX) {
            Some((base, _)) => base,
            None => &self.0,
        }
    }

    /// The team id encoded in the name, or 0 when absent or unparseable.
    pub fn team_id(&self) -> u32 {
        self.0
            .split_once(TEAM_SUFFIX)
            .and_then(|(_, team)| team.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for BehaviorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BehaviorName {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

impl From<String> for BehaviorName {
    fn from(v: String) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_name_is_team_zero() {
        let name = BehaviorName::new("Runner");
        assert_eq!(name.base(), "Runner");
        assert_eq!(name.team_id(), 0);
    }

    #[test]
    fn qualified_name_splits_base_and_team() {
        let name = BehaviorName::with_team("Striker", 2);
        assert_eq!(name.as_str(), "Striker?team=2");
        assert_eq!(name.base(), "Striker");
        assert_eq!(name.team_id(), 2);
    }

    #[test]
    fn garbage_team_suffix_falls_back_to_zero() {
        let name = BehaviorName::new("Goalie?team=blue");
        assert_eq!(name.base(), "Goalie");
        assert_eq!(name.team_id(), 0);
    }

    #[test]
    fn sequence_advances_by_one() {
        assert_eq!(StepSequence::FIRST.next(), StepSequence(2));
    }
}
