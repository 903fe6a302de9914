//! Where a behavior's decisions come from.

use std::fmt;

use crate::heuristic::Heuristic;
use crate::model::LocalModel;

/// The decision source of one behavior.
pub enum PolicySource {
    /// Actions come from the external trainer.
    Remote,
    /// Actions come from a hand-written rule.
    LocalHeuristic(Box<dyn Heuristic>),
    /// Actions come from an in-process model.
    LocalModel(Box<dyn LocalModel>),
}

/// Payload-free tag of a [`PolicySource`], used for consistency checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// [`PolicySource::Remote`].
    Remote,
    /// [`PolicySource::LocalHeuristic`].
    LocalHeuristic,
    /// [`PolicySource::LocalModel`].
    LocalModel,
}

impl PolicySource {
    /// The payload-free tag.
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Remote => SourceKind::Remote,
            Self::LocalHeuristic(_) => SourceKind::LocalHeuristic,
            Self::LocalModel(_) => SourceKind::LocalModel,
        }
    }

    /// Whether decisions for this source go through the trainer.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote)
    }
}

impl fmt::Debug for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicySource::{}", self.kind())
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "Remote"),
            Self::LocalHeuristic => write!(f, "LocalHeuristic"),
            Self::LocalModel => write!(f, "LocalModel"),
        }
    }
}
