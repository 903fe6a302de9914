//! Error types shared across the simlink workspace.
//!
//! Transport-level errors live in `simlink-channel` and wire-format
//! errors in `simlink-codec`; this module holds the errors that the
//! data model itself can produce.

use crate::id::{AgentId, BehaviorName};
use std::error::Error;
use std::fmt;

/// A value does not conform to its declared shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShapeError {
    /// Wrong number of observation tensors.
    TensorCount {
        /// Declared count.
        expected: usize,
        /// Actual count.
        got: usize,
    },
    /// An observation tensor has the wrong rank or a mismatched dimension.
    TensorShape {
        /// Index of the offending tensor.
        index: usize,
        /// Declared shape (0 = stacked).
        expected: Vec<u32>,
        /// Actual shape.
        got: Vec<u32>,
    },
    /// An observation tensor's data does not fill its shape.
    DataLength {
        /// Index of the offending tensor.
        index: usize,
        /// Element count implied by the shape.
        expected: usize,
        /// Actual data length.
        got: usize,
    },
    /// The product of an observation tensor's dimensions overflows.
    Overflow {
        /// Index of the offending tensor.
        index: usize,
        /// The tensor's shape.
        shape: Vec<u32>,
    },
    /// Wrong number of continuous action components.
    ContinuousSize {
        /// Declared size.
        expected: usize,
        /// Actual size.
        got: usize,
    },
    /// Wrong number of discrete branches.
    BranchCount {
        /// Declared count.
        expected: usize,
        /// Actual count.
        got: usize,
    },
    /// A discrete choice lies outside its branch.
    BranchChoice {
        /// Branch index.
        branch: usize,
        /// The chosen option.
        choice: i32,
        /// Number of options in the branch.
        size: u32,
    },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TensorCount { expected, got } => {
                write!(f, "expected {expected} observation tensors, got {got}")
            }
            Self::TensorShape {
                index,
                expected,
                got,
            } => write!(
                f,
                "observation tensor {index} has shape {got:?}, declared {expected:?}"
            ),
            Self::DataLength {
                index,
                expected,
                got,
            } => write!(
                f,
                "observation tensor {index} holds {got} values, shape implies {expected}"
            ),
            Self::Overflow { index, shape } => {
                write!(f, "observation tensor {index} shape {shape:?} is too large")
            }
            Self::ContinuousSize { expected, got } => {
                write!(f, "expected {expected} continuous actions, got {got}")
            }
            Self::BranchCount { expected, got } => {
                write!(f, "expected {expected} discrete branches, got {got}")
            }
            Self::BranchChoice {
                branch,
                choice,
                size,
            } => write!(
                f,
                "discrete branch {branch} choice {choice} out of range 0..{size}"
            ),
        }
    }
}

impl Error for ShapeError {}

/// A locally computed decision failed.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyError {
    /// The heuristic or model reported a failure.
    Failed {
        /// Human-readable description.
        reason: String,
    },
    /// The policy produced an action that does not fit the behavior.
    InvalidAction(ShapeError),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "local policy failed: {reason}"),
            Self::InvalidAction(e) => write!(f, "local policy produced invalid action: {e}"),
        }
    }
}

impl Error for PolicyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidAction(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for PolicyError {
    fn from(e: ShapeError) -> Self {
        Self::InvalidAction(e)
    }
}

/// Errors from registering or releasing behaviors and agents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    /// A behavior was registered twice with a different decision source
    /// or schema.
    InconsistentBehaviorConfig {
        /// The behavior in question.
        behavior: BehaviorName,
        /// What differs.
        detail: String,
    },
    /// The behavior is not registered.
    UnknownBehavior(BehaviorName),
    /// The agent is not registered.
    UnknownAgent(AgentId),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InconsistentBehaviorConfig { behavior, detail } => {
                write!(f, "inconsistent config for behavior '{behavior}': {detail}")
            }
            Self::UnknownBehavior(b) => write!(f, "unknown behavior '{b}'"),
            Self::UnknownAgent(a) => write!(f, "unknown agent {a}"),
        }
    }
}

impl Error for RegistrationError {}
