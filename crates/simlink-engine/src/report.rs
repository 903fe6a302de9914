//! Per-tick outcome reporting.

use std::fmt;
use std::time::Duration;

use simlink_core::{AgentId, BehaviorName, ConnectionState, PolicyError, ShapeError, StepSequence};

/// A classified problem observed during one tick.
///
/// Faults never interrupt the tick; they describe what was degraded.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeFault {
    /// A connection attempt failed.
    ConnectFailed {
        /// Why.
        detail: String,
        /// When the next attempt is due, if any.
        retry_in: Option<Duration>,
    },
    /// The trainer refused the handshake. No automatic retry follows.
    HandshakeRejected {
        /// The trainer's reason.
        reason: String,
    },
    /// The connection was lost.
    ChannelFaulted {
        /// What happened.
        reason: String,
    },
    /// The trainer closed the connection.
    RemoteClosed {
        /// The trainer's reason, if given.
        reason: Option<String>,
    },
    /// A request could not be sent.
    SendFailed {
        /// The abandoned round.
        sequence: StepSequence,
        /// Transport error.
        detail: String,
    },
    /// A round resolved without a response.
    RoundTimedOut {
        /// The round.
        sequence: StepSequence,
        /// Agents that fell back.
        pending: usize,
    },
    /// A response arrived for an already resolved round.
    StaleResponse {
        /// Its sequence.
        sequence: StepSequence,
    },
    /// A trainer message could not be decoded.
    Malformed {
        /// What was wrong.
        detail: String,
    },
    /// An agent was sent but the response had no usable action for it.
    MissingAgent {
        /// Its behavior.
        behavior: BehaviorName,
        /// The agent.
        agent: AgentId,
    },
    /// A local policy failed; the zero action was applied.
    LocalPolicyFailed {
        /// The agent.
        agent: AgentId,
        /// The failure.
        error: PolicyError,
    },
    /// A sensor produced an observation that does not fit the behavior.
    /// The agent was left out of the round.
    InvalidObservation {
        /// The agent.
        agent: AgentId,
        /// The mismatch.
        error: ShapeError,
    },
    /// A sensor produced NaN or infinity. The observation was still sent.
    NonFiniteObservation {
        /// The agent.
        agent: AgentId,
    },
    /// Decision-seeking is halted after a timeout under `FatalStop`.
    DecisionsHalted,
}

impl fmt::Display for BridgeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { detail, retry_in } => match retry_in {
                Some(d) => write!(f, "connect failed: {detail} (retry in {d:?})"),
                None => write!(f, "connect failed: {detail} (no further retries)"),
            },
            Self::HandshakeRejected { reason } => write!(f, "handshake rejected: {reason}"),
            Self::ChannelFaulted { reason } => write!(f, "channel faulted: {reason}"),
            Self::RemoteClosed { reason } => write!(
                f,
                "trainer closed the connection: {}",
                reason.as_deref().unwrap_or("no reason given")
            ),
            Self::SendFailed { sequence, detail } => {
                write!(f, "round {sequence} not sent: {detail}")
            }
            Self::RoundTimedOut { sequence, pending } => {
                write!(f, "round {sequence} timed out with {pending} agents pending")
            }
            Self::StaleResponse { sequence } => write!(f, "stale response for round {sequence}"),
            Self::Malformed { detail } => write!(f, "malformed message: {detail}"),
            Self::MissingAgent { behavior, agent } => {
                write!(f, "agent {agent} ({behavior}) missing from response")
            }
            Self::LocalPolicyFailed { agent, error } => write!(f, "agent {agent}: {error}"),
            Self::InvalidObservation { agent, error } => {
                write!(f, "agent {agent}: invalid observation: {error}")
            }
            Self::NonFiniteObservation { agent } => {
                write!(f, "agent {agent}: observation contains NaN or infinity")
            }
            Self::DecisionsHalted => write!(f, "decision-seeking halted"),
        }
    }
}

/// What happened to decisions this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStatus {
    /// No agents needed a remote decision.
    NoRound,
    /// Held actions were reused (decimated off-tick, or a non-blocking
    /// round still in flight).
    Reused,
    /// A round was due but could not be sent.
    Skipped,
    /// A non-blocking round was sent and has not resolved yet.
    InFlight(StepSequence),
    /// A round's response was applied.
    Applied(StepSequence),
    /// A round resolved without a response.
    TimedOut(StepSequence),
}

/// Outcome of one [`Bridge::on_tick`](crate::Bridge::on_tick).
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// Zero-based tick index.
    pub tick: u64,
    /// Decision outcome.
    pub round: RoundStatus,
    /// Connection state at the end of the tick.
    pub connection: ConnectionState,
    /// Whether the trainer asked for an episode reset this tick.
    pub reset_requested: bool,
    /// Whether a (re)connection completed this tick.
    pub reconnected: bool,
    /// Everything that degraded the tick.
    pub faults: Vec<BridgeFault>,
    /// Wall-clock duration of the tick.
    pub elapsed: Duration,
}

impl TickReport {
    pub(crate) fn new(tick: u64) -> Self {
        Self {
            tick,
            round: RoundStatus::NoRound,
            connection: ConnectionState::Disconnected,
            reset_requested: false,
            reconnected: false,
            faults: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Whether the tick ran without faults.
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    /// The round applied this tick, if any.
    pub fn applied(&self) -> Option<StepSequence> {
        match self.round {
            RoundStatus::Applied(seq) => Some(seq),
            _ => None,
        }
    }
}
