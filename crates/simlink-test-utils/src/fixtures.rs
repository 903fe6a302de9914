//! Simulation-side fixtures.
//!
//! - [`ConstSensor`]: the same observation for every agent.
//! - [`CountingSensor`]: observation encodes how often it was called.
//! - [`RecordingActuator`]: appends every applied action to a [`SharedLog`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use simlink_core::{Action, Actuator, AgentId, Observation, Sensor};

/// A cloneable append-only log shared between a fixture and the test.
#[derive(Debug)]
pub struct SharedLog<T> {
    inner: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for SharedLog<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SharedLog<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> SharedLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.lock().push(item);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> SharedLog<T> {
    /// Copy of everything logged so far.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().clone()
    }
}

/// Returns a fixed vector observation for every agent.
#[derive(Clone, Debug)]
pub struct ConstSensor {
    pub values: Vec<f32>,
    pub calls: SharedLog<AgentId>,
}

impl ConstSensor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            calls: SharedLog::new(),
        }
    }
}

impl Sensor for ConstSensor {
    fn collect(&mut self, agent: AgentId) -> Observation {
        self.calls.push(agent);
        Observation::from_vector(self.values.clone())
    }
}

/// Observation of length `width` filled with the number of previous
/// calls, so each step's observation is distinguishable.
#[derive(Clone, Debug)]
pub struct CountingSensor {
    pub width: usize,
    count: u32,
}

impl CountingSensor {
    pub fn new(width: usize) -> Self {
        Self { width, count: 0 }
    }
}

impl Sensor for CountingSensor {
    fn collect(&mut self, _agent: AgentId) -> Observation {
        let v = self.count as f32;
        self.count += 1;
        Observation::from_vector(vec![v; self.width])
    }
}

/// Records every `(agent, action)` it is asked to apply.
#[derive(Clone, Debug, Default)]
pub struct RecordingActuator {
    pub applied: SharedLog<(AgentId, Action)>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applied actions for one agent, in order.
    pub fn for_agent(&self, agent: AgentId) -> Vec<Action> {
        self.applied
            .snapshot()
            .into_iter()
            .filter(|(a, _)| *a == agent)
            .map(|(_, action)| action)
            .collect()
    }
}

impl Actuator for RecordingActuator {
    fn apply(&mut self, agent: AgentId, action: &Action) {
        self.applied.push((agent, action.clone()));
    }
}
