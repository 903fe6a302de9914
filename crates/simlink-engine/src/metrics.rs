//! Cumulative bridge counters.
//!
//! [`BridgeMetrics`] is updated by [`Bridge::on_tick`](crate::Bridge::on_tick)
//! and read through [`Bridge::metrics`](crate::Bridge::metrics). All
//! counters are cumulative since the bridge was created; the `last_*`
//! fields describe the most recent tick or round.

/// Counters describing rounds, faults, and connection churn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeMetrics {
    /// Ticks run.
    pub ticks: u64,
    /// Rounds whose request was sent.
    pub rounds_opened: u64,
    /// Rounds resolved by a matching response.
    pub rounds_applied: u64,
    /// Rounds resolved by deadline, transport loss, or a malformed reply.
    pub rounds_timed_out: u64,
    /// Round ticks on which no request could be sent: not connected, or
    /// decision-seeking halted.
    pub rounds_skipped: u64,
    /// Responses discarded because their round had already resolved.
    pub stale_responses: u64,
    /// Trainer messages that failed to decode.
    pub malformed_messages: u64,
    /// Agents absent from, or wrongly shaped in, a response.
    pub missing_agents: u64,
    /// Local policy evaluations that fell back to the zero action.
    pub local_policy_failures: u64,
    /// Background connection attempts started.
    pub reconnect_attempts: u64,
    /// Successful (re)connections.
    pub reconnects: u64,
    /// Trainer-requested resets.
    pub episode_resets: u64,
    /// Send-to-apply latency of the last applied round, in microseconds.
    pub last_round_us: u64,
    /// Wall-clock time of the last tick, in microseconds.
    pub last_tick_us: u64,
}
