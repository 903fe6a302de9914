//! In-process inference models.
//!
//! [`LinearModel`] is the one shipped implementation: a dense affine map
//! from the flattened observation to one output per continuous component
//! and one logit per discrete option.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use simlink_core::{Action, ActionSpec, Observation, PolicyError};

/// A model evaluated on the tick thread.
pub trait LocalModel: Send {
    /// Infer an action from `observation`.
    ///
    /// `mask` is the agent's discrete action mask, one entry per option
    /// across all branches, `true` meaning disabled. Empty when unmasked.
    fn infer(
        &mut self,
        observation: &Observation,
        mask: &[bool],
        spec: &ActionSpec,
    ) -> Result<Action, PolicyError>;
}

/// Errors from building or loading a [`LinearModel`].
#[derive(Debug)]
pub enum ModelError {
    /// The model file could not be read.
    Io(io::Error),
    /// The model file is not valid JSON for a model.
    Parse(serde_json::Error),
    /// Weight rows and bias disagree in size.
    Shape {
        /// What is inconsistent.
        detail: String,
    },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "reading model: {e}"),
            Self::Parse(e) => write!(f, "parsing model: {e}"),
            Self::Shape { detail } => write!(f, "inconsistent model shape: {detail}"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Shape { .. } => None,
        }
    }
}

impl From<io::Error> for ModelError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// `y = W x + b`.
///
/// The first `spec.continuous` outputs are continuous components, clamped
/// to `[-1, 1]`. The rest are logits, `discrete_branches[i]` of them per
/// branch; each branch picks its highest-scoring unmasked option, the
/// lowest index winning ties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// One row per output, each as long as the flattened observation.
    weights: Vec<Vec<f32>>,
    /// One entry per output.
    bias: Vec<f32>,
}

impl LinearModel {
    /// Build a model, checking that all rows and the bias agree.
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self, ModelError> {
        let model = Self { weights, bias };
        model.validate()?;
        Ok(model)
    }

    /// A model with every weight and bias zero.
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            weights: vec![vec![0.0; inputs]; outputs],
            bias: vec![0.0; outputs],
        }
    }

    /// Parse a model from JSON: `{"weights": [[..], ..], "bias": [..]}`.
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let model: Self = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    /// Load a model from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Length of the flattened observation the model expects.
    pub fn input_len(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    /// Number of outputs.
    pub fn output_len(&self) -> usize {
        self.bias.len()
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.weights.len() != self.bias.len() {
            return Err(ModelError::Shape {
                detail: format!(
                    "{} weight rows but {} bias entries",
                    self.weights.len(),
                    self.bias.len()
                ),
            });
        }
        let width = self.input_len();
        if let Some(row) = self.weights.iter().position(|r| r.len() != width) {
            return Err(ModelError::Shape {
                detail: format!(
                    "row {row} has {} weights, row 0 has {width}",
                    self.weights[row].len()
                ),
            });
        }
        Ok(())
    }

    fn forward(&self, x: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect()
    }
}

impl LocalModel for LinearModel {
    fn infer(
        &mut self,
        observation: &Observation,
        mask: &[bool],
        spec: &ActionSpec,
    ) -> Result<Action, PolicyError> {
        let x = observation.flatten();
        if x.len() != self.input_len() {
            return Err(PolicyError::Failed {
                reason: format!(
                    "model expects {} inputs, observation has {}",
                    self.input_len(),
                    x.len()
                ),
            });
        }
        let continuous = spec.continuous as usize;
        let needed = continuous + spec.mask_len();
        if self.output_len() != needed {
            return Err(PolicyError::Failed {
                reason: format!(
                    "model has {} outputs, action spec needs {needed}",
                    self.output_len()
                ),
            });
        }

        let y = self.forward(&x);
        if y.iter().any(|v| !v.is_finite()) {
            return Err(PolicyError::Failed {
                reason: "model produced a non-finite output".into(),
            });
        }

        let mut action = Action {
            continuous: y[..continuous].iter().map(|v| v.clamp(-1.0, 1.0)).collect(),
            discrete: Vec::with_capacity(spec.branch_count()),
        };
        let mut offset = 0;
        for &size in &spec.discrete_branches {
            let size = size as usize;
            let logits = &y[continuous + offset..continuous + offset + size];
            let allowed = |i: usize| !mask.get(offset + i).copied().unwrap_or(false);
            let choice = (0..size)
                .filter(|&i| allowed(i))
                .fold(None, |best: Option<usize>, i| match best {
                    Some(b) if logits[b] >= logits[i] => Some(b),
                    _ => Some(i),
                })
                // Fully masked branch: fall back to option 0.
                .unwrap_or(0);
            action.discrete.push(choice as i32);
            offset += size;
        }
        Ok(action)
    }
}
