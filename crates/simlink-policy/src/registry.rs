//! Reference-counted behavior registrations.

use indexmap::IndexMap;
use log::debug;
use simlink_core::{ActionSpec, BehaviorName, ObservationSpec, RegistrationError};

use crate::source::PolicySource;

/// One registered behavior.
#[derive(Debug)]
pub struct BehaviorEntry {
    /// Declared observation layout.
    pub observation: ObservationSpec,
    /// Declared action layout.
    pub action: ActionSpec,
    /// Decision source shared by every agent of the behavior.
    pub source: PolicySource,
    refcount: usize,
}

impl BehaviorEntry {
    /// Number of live registrations.
    pub fn refcount(&self) -> usize {
        self.refcount
    }
}

/// Behaviors in first-registration order.
///
/// A behavior exists while at least one registration holds it. Every
/// registration of a name must agree on the source kind and both shapes.
#[derive(Debug, Default)]
pub struct BehaviorRegistry {
    entries: IndexMap<BehaviorName, BehaviorEntry>,
}

impl BehaviorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or take another reference to it.
    ///
    /// Returns `true` when the behavior was created by this call. On a
    /// repeat registration the supplied `source` is dropped; the first
    /// registration's source stays in use.
    pub fn register(
        &mut self,
        name: BehaviorName,
        observation: ObservationSpec,
        action: ActionSpec,
        source: PolicySource,
    ) -> Result<bool, RegistrationError> {
        if let Some(entry) = self.entries.get_mut(&name) {
            let mismatch = if entry.source.kind() != source.kind() {
                Some(format!(
                    "source {} differs from registered {}",
                    source.kind(),
                    entry.source.kind()
                ))
            } else if entry.observation != observation {
                Some(format!(
                    "observation spec {observation:?} differs from registered {:?}",
                    entry.observation
                ))
            } else if entry.action != action {
                Some(format!(
                    "action spec {action:?} differs from registered {:?}",
                    entry.action
                ))
            } else {
                None
            };
            if let Some(detail) = mismatch {
                return Err(RegistrationError::InconsistentBehaviorConfig {
                    behavior: name,
                    detail,
                });
            }
            entry.refcount += 1;
            return Ok(false);
        }
        debug!("behavior '{name}' registered ({})", source.kind());
        self.entries.insert(
            name,
            BehaviorEntry {
                observation,
                action,
                source,
                refcount: 1,
            },
        );
        Ok(true)
    }

    /// Drop one reference. Returns `true` when the behavior was removed.
    pub fn release(&mut self, name: &BehaviorName) -> Result<bool, RegistrationError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| RegistrationError::UnknownBehavior(name.clone()))?;
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return Ok(false);
        }
        self.entries.shift_remove(name);
        debug!("behavior '{name}' removed");
        Ok(true)
    }

    /// Look a behavior up.
    pub fn get(&self, name: &BehaviorName) -> Option<&BehaviorEntry> {
        self.entries.get(name)
    }

    /// Look a behavior up for a local decision.
    pub fn get_mut(&mut self, name: &BehaviorName) -> Option<&mut BehaviorEntry> {
        self.entries.get_mut(name)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &BehaviorName) -> bool {
        self.entries.contains_key(name)
    }

    /// Behaviors in first-registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&BehaviorName, &BehaviorEntry)> {
        self.entries.iter()
    }

    /// Number of registered behaviors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
