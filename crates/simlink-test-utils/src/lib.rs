//! Test utilities for simlink development.
//!
//! - [`MockTrainer`]: an in-process gRPC trainer on a loopback port whose
//!   replies are scripted per request.
//! - [`fixtures`]: sensors and actuators that record what the bridge
//!   asked of the simulation.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
mod trainer;

pub use fixtures::{ConstSensor, CountingSensor, RecordingActuator, SharedLog};
pub use trainer::{answer_all, MockTrainer, Reply, TrainerScript};
