//! Which ticks open rounds, and what happens when they time out.

use std::time::Duration;

use log::info;
use simlink_policy::Fallback;

use crate::config::{CadenceConfig, CadenceMode, TimeoutPolicy};

/// What the current tick should do about decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickPlan {
    /// Decide for every agent. Remote agents go into a round; when
    /// `blocking`, the tick waits for it.
    Round {
        /// Whether the tick waits for the response.
        blocking: bool,
    },
    /// Apply the held actions unchanged.
    Reuse,
    /// A non-blocking round is still in flight; apply the held actions.
    Busy,
}

/// Per-tick round scheduling.
#[derive(Clone, Debug)]
pub struct CadenceController {
    config: CadenceConfig,
    tick: u64,
    halted_epoch: Option<u64>,
}

impl CadenceController {
    /// A controller at tick 0.
    pub fn new(config: CadenceConfig) -> Self {
        Self {
            config,
            tick: 0,
            halted_epoch: None,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    /// Ticks planned so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Plan the next tick. Call exactly once per tick.
    pub fn advance(&mut self, round_in_flight: bool) -> TickPlan {
        let t = self.tick;
        self.tick += 1;
        match self.config.mode {
            CadenceMode::Lockstep => TickPlan::Round { blocking: true },
            CadenceMode::Decimated(n) => {
                let n = u64::from(n.max(1));
                if t % n == u64::from(self.config.decision_offset) % n {
                    TickPlan::Round { blocking: true }
                } else {
                    TickPlan::Reuse
                }
            }
            CadenceMode::FireAndForget if round_in_flight => TickPlan::Busy,
            CadenceMode::FireAndForget => TickPlan::Round { blocking: false },
        }
    }

    /// Longest a round may wait.
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Fallback applied to agents of a timed-out round.
    pub fn fallback(&self) -> Fallback {
        self.config.on_timeout.fallback()
    }

    /// Whether a timed-out round interrupts episodes and halts
    /// decision-seeking.
    pub fn stops_on_timeout(&self) -> bool {
        self.config.on_timeout == TimeoutPolicy::FatalStop
    }

    /// Record a timeout on connection `epoch`. Halts decision-seeking
    /// under `FatalStop`; no effect otherwise.
    pub fn on_timeout(&mut self, epoch: u64) {
        if self.stops_on_timeout() && self.halted_epoch.is_none() {
            info!("decision-seeking halted until the connection is re-established");
            self.halted_epoch = Some(epoch);
        }
    }

    /// Whether decision-seeking is halted on connection `epoch`.
    /// A new epoch lifts the halt.
    pub fn is_halted(&mut self, epoch: u64) -> bool {
        match self.halted_epoch {
            Some(halted) if halted == epoch => true,
            Some(_) => {
                info!("connection re-established; decision-seeking resumed");
                self.halted_epoch = None;
                false
            }
            None => false,
        }
    }
}
