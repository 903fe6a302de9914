//! Decision sources for simlink behaviors.
//!
//! Every behavior is backed by exactly one [`PolicySource`]: the remote
//! trainer, a hand-written [`Heuristic`], or an in-process
//! [`LocalModel`]. [`PolicyDispatch`] owns the behavior registry and the
//! last action resolved for every agent, so the step exchange only ever
//! sees agents whose decision is [`Decision::Pending`].
//!
//! Local decisions are synchronous and never block. A local policy that
//! fails, or produces an action that does not fit the behavior's
//! [`ActionSpec`](simlink_core::ActionSpec), resolves to the zero action
//! and is reported through [`Decision::Recovered`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod dispatch;
pub mod heuristic;
pub mod model;
pub mod registry;
pub mod source;

pub use dispatch::{Decision, Fallback, PolicyDispatch};
pub use heuristic::{ConstantHeuristic, FnHeuristic, Heuristic, ZeroHeuristic};
pub use model::{LinearModel, LocalModel, ModelError};
pub use registry::{BehaviorEntry, BehaviorRegistry};
pub use source::{PolicySource, SourceKind};
