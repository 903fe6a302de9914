//! Observations, actions, and the shapes behaviors declare for them.

use crate::error::ShapeError;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Dimensions of one observation tensor, outermost first.
///
/// In an [`ObservationSpec`], a dimension of `0` marks a stacked
/// (variable-length) axis that matches any length.
pub type Shape = SmallVec<[u32; 4]>;

/// One numeric tensor of an [`Observation`], stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationTensor {
    /// Dimensions of the tensor.
    pub shape: Shape,
    /// Flat row-major data. Length equals the product of `shape`.
    pub data: Vec<f32>,
}

impl ObservationTensor {
    /// A rank-1 tensor holding `data`.
    pub fn vector(data: Vec<f32>) -> Self {
        let mut shape = Shape::new();
        shape.push(data.len() as u32);
        Self { shape, data }
    }

    /// Number of elements implied by the shape, or `None` when the
    /// product of the dimensions does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d as usize))
    }
}

/// Everything one agent senses in one step.
///
/// An ordered list of tensors, fixed once handed to the exchange
/// protocol.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    tensors: Vec<ObservationTensor>,
}

impl Observation {
    /// Build an observation from its tensors.
    pub fn new(tensors: Vec<ObservationTensor>) -> Self {
        Self { tensors }
    }

    /// An observation made of one flat vector.
    pub fn from_vector(data: Vec<f32>) -> Self {
        Self::new(vec![ObservationTensor::vector(data)])
    }

    /// The tensors in declaration order.
    pub fn tensors(&self) -> &[ObservationTensor] {
        &self.tensors
    }

    /// All tensor data concatenated in order.
    pub fn flatten(&self) -> Vec<f32> {
        self.tensors
            .iter()
            .flat_map(|t| t.data.iter().copied())
            .collect()
    }

    /// Whether every value is finite (no NaN or infinity).
    pub fn is_finite(&self) -> bool {
        self.tensors
            .iter()
            .all(|t| t.data.iter().all(|v| v.is_finite()))
    }
}

/// Declared observation layout of a behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSpec {
    /// One shape per tensor, in order.
    pub shapes: Vec<Shape>,
}

impl ObservationSpec {
    /// A spec of a single flat vector of `len` values.
    pub fn vector(len: u32) -> Self {
        let mut shape = Shape::new();
        shape.push(len);
        Self {
            shapes: vec![shape],
        }
    }

    /// Check that `obs` conforms to this spec.
    ///
    /// Every tensor must have the declared rank, every non-stacked
    /// dimension must match, and each tensor's data length must equal
    /// the product of its actual shape.
    pub fn check(&self, obs: &Observation) -> Result<(), ShapeError> {
        if obs.tensors.len() != self.shapes.len() {
            return Err(ShapeError::TensorCount {
                expected: self.shapes.len(),
                got: obs.tensors.len(),
            });
        }
        for (index, (declared, tensor)) in self.shapes.iter().zip(&obs.tensors).enumerate() {
            let dims_match = declared.len() == tensor.shape.len()
                && declared
                    .iter()
                    .zip(&tensor.shape)
                    .all(|(&d, &t)| d == 0 || d == t);
            if !dims_match {
                return Err(ShapeError::TensorShape {
                    index,
                    expected: declared.to_vec(),
                    got: tensor.shape.to_vec(),
                });
            }
            let expected = tensor.element_count().ok_or_else(|| ShapeError::Overflow {
                index,
                shape: tensor.shape.to_vec(),
            })?;
            if tensor.data.len() != expected {
                return Err(ShapeError::DataLength {
                    index,
                    expected,
                    got: tensor.data.len(),
                });
            }
        }
        Ok(())
    }
}

/// Declared action layout of a behavior.
///
/// An action has `continuous` real-valued components followed by one
/// choice per discrete branch; `discrete_branches[i]` is the number of
/// options in branch `i`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Number of continuous action components.
    #[serde(default)]
    pub continuous: u32,
    /// Option count of each discrete branch.
    #[serde(default)]
    pub discrete_branches: SmallVec<[u32; 4]>,
}

impl ActionSpec {
    /// A purely continuous action space.
    pub fn continuous(size: u32) -> Self {
        Self {
            continuous: size,
            discrete_branches: SmallVec::new(),
        }
    }

    /// A purely discrete action space.
    pub fn discrete(branches: &[u32]) -> Self {
        Self {
            continuous: 0,
            discrete_branches: SmallVec::from_slice(branches),
        }
    }

    /// Number of discrete branches.
    pub fn branch_count(&self) -> usize {
        self.discrete_branches.len()
    }

    /// Length of a full action mask: the sum of all branch sizes.
    pub fn mask_len(&self) -> usize {
        self.discrete_branches.iter().map(|&b| b as usize).sum()
    }

    /// Merge two specs, concatenating continuous sizes and branches.
    pub fn combine(specs: &[ActionSpec]) -> Self {
        let mut out = ActionSpec::default();
        for spec in specs {
            out.continuous += spec.continuous;
            out.discrete_branches
                .extend_from_slice(&spec.discrete_branches);
        }
        out
    }

    /// The no-op action: all continuous values 0.0, all branches option 0.
    pub fn zero_action(&self) -> Action {
        Action {
            continuous: vec![0.0; self.continuous as usize],
            discrete: vec![0; self.branch_count()],
        }
    }

    /// Check that `action` has this spec's layout and every discrete
    /// choice is within its branch.
    pub fn check(&self, action: &Action) -> Result<(), ShapeError> {
        if action.continuous.len() != self.continuous as usize {
            return Err(ShapeError::ContinuousSize {
                expected: self.continuous as usize,
                got: action.continuous.len(),
            });
        }
        if action.discrete.len() != self.branch_count() {
            return Err(ShapeError::BranchCount {
                expected: self.branch_count(),
                got: action.discrete.len(),
            });
        }
        for (branch, (&choice, &size)) in action
            .discrete
            .iter()
            .zip(&self.discrete_branches)
            .enumerate()
        {
            if choice < 0 || choice as u32 >= size {
                return Err(ShapeError::BranchChoice {
                    branch,
                    choice,
                    size,
                });
            }
        }
        Ok(())
    }
}

/// What one agent does in one step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Action {
    /// Continuous components.
    pub continuous: Vec<f32>,
    /// One chosen option per discrete branch.
    pub discrete: Vec<i32>,
}

impl Action {
    /// A purely continuous action.
    pub fn continuous(values: Vec<f32>) -> Self {
        Self {
            continuous: values,
            discrete: Vec::new(),
        }
    }

    /// A purely discrete action.
    pub fn discrete(choices: Vec<i32>) -> Self {
        Self {
            continuous: Vec::new(),
            discrete: choices,
        }
    }

    /// Whether the action carries no components at all.
    pub fn is_empty(&self) -> bool {
        self.continuous.is_empty() && self.discrete.is_empty()
    }
}
