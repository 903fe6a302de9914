//! The per-tick orchestrator.
//!
//! A [`Bridge`] owns the channel, the exchange, the cadence controller,
//! the policy dispatch and every registered agent. The simulation calls
//! [`on_tick`](Bridge::on_tick) once per frame; each call senses, decides,
//! exchanges (per cadence) and actuates, and returns a [`TickReport`].

use std::fmt;
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use simlink_channel::{ConnectError, Endpoint, ReconnectEvent, RpcChannel, TrainerInfo};
use simlink_codec::{BehaviorSpec, ControlMessage};
use simlink_core::{
    Action, ActionSpec, Actuator, AgentId, AgentRecord, BehaviorName, ConnectionState,
    ConnectionStatus, EpisodeSignal, Observation, ObservationSpec, RegistrationError, Sensor,
};
use simlink_policy::{Decision, Fallback, PolicyDispatch, PolicySource};

use crate::cadence::{CadenceController, TickPlan};
use crate::config::{BridgeConfig, ConfigError};
use crate::exchange::{ExchangeError, ExchangeEvent, PendingAgent, Resolution, StepExchange};
use crate::metrics::BridgeMetrics;
use crate::report::{BridgeFault, RoundStatus, TickReport};

/// Errors returned by bridge construction and agent management.
///
/// Never returned from [`Bridge::on_tick`]; tick-time problems are
/// reported as [`BridgeFault`]s.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A behavior or agent registration failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// A synchronous connection attempt failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// An action mask of the wrong length.
    #[error("agent {agent}: action mask has {got} entries, expected {expected}")]
    InvalidMask {
        /// The agent.
        agent: AgentId,
        /// Discrete options of its behavior.
        expected: usize,
        /// Entries supplied.
        got: usize,
    },
}

/// How a new agent is decided.
#[derive(Debug)]
pub struct AgentSetup {
    /// Behavior the agent belongs to.
    pub behavior: BehaviorName,
    /// Observation layout of the behavior.
    pub observation: ObservationSpec,
    /// Action layout of the behavior.
    pub action: ActionSpec,
    /// Who decides for the behavior.
    pub source: PolicySource,
}

impl AgentSetup {
    /// An agent decided by `source`.
    pub fn new(
        behavior: impl Into<BehaviorName>,
        observation: ObservationSpec,
        action: ActionSpec,
        source: PolicySource,
    ) -> Self {
        Self {
            behavior: behavior.into(),
            observation,
            action,
            source,
        }
    }

    /// An agent decided by the trainer.
    pub fn remote(
        behavior: impl Into<BehaviorName>,
        observation: ObservationSpec,
        action: ActionSpec,
    ) -> Self {
        Self::new(behavior, observation, action, PolicySource::Remote)
    }
}

struct AgentSlot {
    behavior: BehaviorName,
    sensor: Box<dyn Sensor>,
    actuator: Box<dyn Actuator>,
    reward: f32,
    group_id: u32,
    group_reward: f32,
    signal: EpisodeSignal,
    mask: Vec<bool>,
    steps: u32,
    max_step: u32,
}

impl AgentSlot {
    fn record(&self, agent: AgentId, observation: Observation) -> AgentRecord {
        let mut record = AgentRecord::new(agent, observation, self.reward);
        record.signal = self.signal;
        record.group_id = self.group_id;
        record.group_reward = self.group_reward;
        record.action_mask = self.mask.clone();
        record
    }

    /// The decision step was taken: rewards and the mask start over, and
    /// a finished episode restarts.
    fn consume(&mut self) {
        self.reward = 0.0;
        self.group_reward = 0.0;
        self.mask.clear();
        if self.signal.is_terminal() {
            self.signal = EpisodeSignal::Running;
            self.steps = 0;
        }
    }

    fn reset_episode(&mut self) {
        self.reward = 0.0;
        self.group_reward = 0.0;
        self.signal = EpisodeSignal::Running;
        self.steps = 0;
    }
}

/// The simulation-side endpoint of a trainer connection.
pub struct Bridge {
    config: BridgeConfig,
    channel: RpcChannel,
    exchange: StepExchange,
    cadence: CadenceController,
    dispatch: PolicyDispatch,
    agents: IndexMap<AgentId, AgentSlot>,
    next_agent: u32,
    announced: IndexSet<BehaviorName>,
    announced_epoch: u64,
    metrics: BridgeMetrics,
    episode_count: u64,
    last_seed: Option<u64>,
    closed: bool,
}

impl Bridge {
    /// Validate `config` and build a bridge.
    ///
    /// With `wait_for_trainer` the trainer is connected synchronously and
    /// its absence is an error. Otherwise connection happens in the
    /// background, driven by [`on_tick`](Self::on_tick).
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let channel = RpcChannel::new(config.channel_config())?;
        let mut bridge = Self {
            exchange: StepExchange::new(config.malformed_threshold),
            cadence: CadenceController::new(config.cadence.clone()),
            channel,
            dispatch: PolicyDispatch::new(),
            agents: IndexMap::new(),
            next_agent: 0,
            announced: IndexSet::new(),
            announced_epoch: 0,
            metrics: BridgeMetrics::default(),
            episode_count: 0,
            last_seed: None,
            closed: false,
            config,
        };
        if bridge.config.wait_for_trainer {
            let endpoint = bridge.config.endpoint.clone();
            bridge.connect(endpoint)?;
        }
        Ok(bridge)
    }

    /// Connect to `endpoint` now, blocking for at most the connect plus
    /// handshake timeouts.
    ///
    /// Any in-flight round is abandoned with its agents holding their
    /// last action. Clears a latched handshake rejection.
    pub fn connect(&mut self, endpoint: Endpoint) -> Result<(), BridgeError> {
        self.abandon_round();
        self.closed = false;
        self.config.endpoint = endpoint.clone();
        self.channel.connect(endpoint)?;
        self.metrics.reconnects += 1;
        Ok(())
    }

    /// The active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Cumulative counters.
    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    /// Read-only handle onto the connection state.
    pub fn status(&self) -> ConnectionStatus {
        self.channel.status()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Handshake details of the current connection.
    pub fn trainer(&self) -> Option<&TrainerInfo> {
        self.channel.trainer()
    }

    /// Trainer-requested resets so far.
    pub fn episode_count(&self) -> u64 {
        self.episode_count
    }

    /// Seed carried by the most recent trainer reset, if any.
    pub fn last_seed(&self) -> Option<u64> {
        self.last_seed
    }

    /// Registered agents.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// The agent's latest resolved action.
    pub fn last_action(&self, agent: AgentId) -> Option<&Action> {
        self.dispatch.last_action(agent)
    }

    // ── Agent lifecycle ───────────────────────────────────────────

    /// Register an agent. The behavior is created on its first agent.
    ///
    /// Fails with [`RegistrationError::InconsistentBehaviorConfig`] when
    /// the setup disagrees with the behavior's declaration or with an
    /// earlier registration.
    pub fn add_agent(
        &mut self,
        setup: AgentSetup,
        sensor: impl Sensor + 'static,
        actuator: impl Actuator + 'static,
    ) -> Result<AgentId, BridgeError> {
        if let Some(decl) = self.config.declared(&setup.behavior) {
            if decl.observation != setup.observation || decl.action != setup.action {
                return Err(RegistrationError::InconsistentBehaviorConfig {
                    behavior: setup.behavior,
                    detail: "shapes differ from the declaration".into(),
                }
                .into());
            }
        }
        let behavior = setup.behavior.clone();
        let created = self.dispatch.register_behavior(
            setup.behavior,
            setup.observation,
            setup.action,
            setup.source,
        )?;
        if created {
            self.sync_hello();
        }

        let agent = loop {
            let id = AgentId(self.next_agent);
            self.next_agent = self.next_agent.wrapping_add(1);
            if !self.agents.contains_key(&id) {
                break id;
            }
        };
        debug!("agent {agent} registered under '{behavior}'");
        self.agents.insert(
            agent,
            AgentSlot {
                behavior,
                sensor: Box::new(sensor),
                actuator: Box::new(actuator),
                reward: 0.0,
                group_id: 0,
                group_reward: 0.0,
                signal: EpisodeSignal::Running,
                mask: Vec::new(),
                steps: 0,
                max_step: 0,
            },
        );
        Ok(agent)
    }

    /// Unregister an agent. Its behavior goes away with its last agent.
    pub fn release_agent(&mut self, agent: AgentId) -> Result<(), BridgeError> {
        let slot = self
            .agents
            .shift_remove(&agent)
            .ok_or(RegistrationError::UnknownAgent(agent))?;
        self.dispatch.forget(agent);
        if self.dispatch.release_behavior(&slot.behavior)? {
            debug!("behavior '{}' released", slot.behavior);
            self.sync_hello();
        }
        Ok(())
    }

    /// Add to the reward reported with the agent's next decision.
    pub fn add_reward(&mut self, agent: AgentId, reward: f32) -> Result<(), BridgeError> {
        self.slot_mut(agent)?.reward += reward;
        Ok(())
    }

    /// Replace the reward reported with the agent's next decision.
    pub fn set_reward(&mut self, agent: AgentId, reward: f32) -> Result<(), BridgeError> {
        self.slot_mut(agent)?.reward = reward;
        Ok(())
    }

    /// Add `reward` to every agent in `group`.
    pub fn add_group_reward(&mut self, group: u32, reward: f32) {
        for slot in self.agents.values_mut().filter(|s| s.group_id == group) {
            slot.group_reward += reward;
        }
    }

    /// Move an agent into `group`. Group 0 means ungrouped.
    pub fn set_group(&mut self, agent: AgentId, group: u32) -> Result<(), BridgeError> {
        self.slot_mut(agent)?.group_id = group;
        Ok(())
    }

    /// Mark the agent's episode done. Reported with its next decision.
    pub fn end_episode(&mut self, agent: AgentId) -> Result<(), BridgeError> {
        self.slot_mut(agent)?.signal = EpisodeSignal::Done;
        Ok(())
    }

    /// Mark the agent's episode interrupted. Reported with its next
    /// decision.
    pub fn interrupt_episode(&mut self, agent: AgentId) -> Result<(), BridgeError> {
        self.slot_mut(agent)?.signal = EpisodeSignal::Interrupted;
        Ok(())
    }

    /// Forbid discrete options for the agent's next decision.
    ///
    /// One entry per option, concatenated across branches; `true` masks
    /// the option out. An empty mask clears it.
    pub fn set_action_mask(&mut self, agent: AgentId, mask: Vec<bool>) -> Result<(), BridgeError> {
        let slot = self
            .agents
            .get_mut(&agent)
            .ok_or(RegistrationError::UnknownAgent(agent))?;
        let expected = self
            .dispatch
            .action_spec(&slot.behavior)
            .map_or(0, ActionSpec::mask_len);
        if !mask.is_empty() && mask.len() != expected {
            return Err(BridgeError::InvalidMask {
                agent,
                expected,
                got: mask.len(),
            });
        }
        slot.mask = mask;
        Ok(())
    }

    /// Interrupt the agent's episode once it lasts `max_step` ticks.
    /// Zero disables the limit.
    pub fn set_max_step(&mut self, agent: AgentId, max_step: u32) -> Result<(), BridgeError> {
        self.slot_mut(agent)?.max_step = max_step;
        Ok(())
    }

    fn slot_mut(&mut self, agent: AgentId) -> Result<&mut AgentSlot, BridgeError> {
        self.agents
            .get_mut(&agent)
            .ok_or_else(|| RegistrationError::UnknownAgent(agent).into())
    }

    // ── Tick ──────────────────────────────────────────────────────

    /// Run one frame: sense, decide, exchange per cadence, actuate.
    ///
    /// Every agent's actuator is called exactly once. Blocks only on
    /// round ticks of `Lockstep` and `Decimated` modes, and then for at
    /// most the cadence timeout.
    pub fn on_tick(&mut self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::new(self.cadence.ticks());
        self.metrics.ticks += 1;

        self.poll_connection(started, &mut report);

        let was_live = self.channel.state().accepts_rounds();
        if self.exchange.in_flight().is_some() {
            let resolved = match self
                .exchange
                .poll_response(&mut self.channel, &mut self.dispatch)
            {
                Some(resolution) => Some(resolution),
                None => self.exchange.expire(
                    &mut self.channel,
                    Instant::now(),
                    self.cadence.timeout(),
                ),
            };
            if let Some(resolution) = resolved {
                self.resolve(resolution, &mut report);
            }
        } else {
            self.exchange.drain_idle(&mut self.channel);
            if was_live && self.channel.state() == ConnectionState::Faulted {
                report.faults.push(BridgeFault::ChannelFaulted {
                    reason: "trainer connection lost".into(),
                });
            }
        }

        self.advance_episodes();
        match self.cadence.advance(self.exchange.in_flight().is_some()) {
            TickPlan::Round { blocking } => self.round(blocking, &mut report),
            TickPlan::Busy => {
                self.decide_local(&mut report);
                if report.round == RoundStatus::NoRound && !self.agents.is_empty() {
                    report.round = RoundStatus::Reused;
                }
            }
            TickPlan::Reuse => {
                if report.round == RoundStatus::NoRound && !self.agents.is_empty() {
                    report.round = RoundStatus::Reused;
                }
            }
        }

        self.drain_events(&mut report);
        self.actuate();

        report.connection = self.channel.state();
        report.elapsed = started.elapsed();
        self.metrics.last_tick_us = micros(report.elapsed);
        report
    }

    /// Close the connection. An in-flight round is abandoned and its
    /// agents keep their last action. The bridge keeps ticking offline
    /// until [`connect`](Self::connect) is called.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.abandon_round();
        self.channel.close();
        self.closed = true;
    }

    fn poll_connection(&mut self, now: Instant, report: &mut TickReport) {
        while let Some(event) = self.channel.poll_reconnect(now) {
            match event {
                ReconnectEvent::Attempting { attempt } => {
                    self.metrics.reconnect_attempts += 1;
                    debug!("connection attempt {attempt}");
                }
                ReconnectEvent::Connected { epoch, trainer } => {
                    self.metrics.reconnects += 1;
                    report.reconnected = true;
                    info!(
                        "connected to trainer {} (epoch {epoch}, {} areas)",
                        trainer.version, trainer.num_areas
                    );
                }
                ReconnectEvent::Failed { error, retry_in } => {
                    let fault = match error {
                        ConnectError::HandshakeRejected { reason, .. } => {
                            BridgeFault::HandshakeRejected { reason }
                        }
                        other => BridgeFault::ConnectFailed {
                            detail: other.to_string(),
                            retry_in,
                        },
                    };
                    report.faults.push(fault);
                }
            }
        }
    }

    fn advance_episodes(&mut self) {
        for (agent, slot) in self.agents.iter_mut() {
            slot.steps = slot.steps.saturating_add(1);
            if slot.max_step > 0
                && slot.steps >= slot.max_step
                && slot.signal == EpisodeSignal::Running
            {
                debug!("agent {agent} reached max step {}", slot.max_step);
                slot.signal = EpisodeSignal::Interrupted;
            }
        }
    }

    fn round(&mut self, blocking: bool, report: &mut TickReport) {
        let epoch = self.channel.connection_epoch();
        let halted = self.cadence.is_halted(epoch);
        let mut can_send = self.channel.state().accepts_rounds() && !halted;
        if can_send {
            if let Err(e) = self.exchange.begin() {
                warn!("cannot open round: {e}");
                can_send = false;
            }
        }

        let mut sent: Vec<AgentId> = Vec::new();
        let mut skipped: Vec<PendingAgent> = Vec::new();
        for (&agent, slot) in self.agents.iter_mut() {
            let Some(observation) = sense(agent, slot, &self.dispatch, report) else {
                continue;
            };
            match self
                .dispatch
                .decide(agent, &slot.behavior, &observation, &slot.mask)
            {
                Decision::Ready(_) => slot.consume(),
                Decision::Recovered { error, .. } => {
                    self.metrics.local_policy_failures += 1;
                    report
                        .faults
                        .push(BridgeFault::LocalPolicyFailed { agent, error });
                    slot.consume();
                }
                Decision::Pending if can_send => {
                    let record = slot.record(agent, observation);
                    match self.exchange.collect(slot.behavior.clone(), record) {
                        Ok(()) => sent.push(agent),
                        Err(e) => {
                            warn!("agent {agent} left out of round: {e}");
                            skipped.push((slot.behavior.clone(), agent));
                        }
                    }
                }
                Decision::Pending => skipped.push((slot.behavior.clone(), agent)),
            }
        }

        let mut opened = false;
        if sent.is_empty() {
            self.exchange.cancel();
        } else {
            let announce = self.unannounced();
            let deadline = Instant::now() + self.cadence.timeout();
            match self.exchange.send(&mut self.channel, &announce) {
                Ok(sequence) => {
                    opened = true;
                    self.metrics.rounds_opened += 1;
                    self.announced
                        .extend(announce.into_iter().map(|spec| spec.name));
                    for agent in &sent {
                        if let Some(slot) = self.agents.get_mut(agent) {
                            slot.consume();
                        }
                    }
                    if blocking {
                        if let Some(resolution) = self.exchange.await_response(
                            &mut self.channel,
                            &mut self.dispatch,
                            deadline,
                        ) {
                            self.resolve(resolution, report);
                        }
                    } else if report.round == RoundStatus::NoRound {
                        report.round = RoundStatus::InFlight(sequence);
                    }
                }
                Err(ExchangeError::Send {
                    sequence,
                    pending,
                    source,
                }) => {
                    warn!("round {sequence} not sent: {source}");
                    report.faults.push(BridgeFault::SendFailed {
                        sequence,
                        detail: source.to_string(),
                    });
                    if self.channel.state() == ConnectionState::Faulted {
                        report.faults.push(BridgeFault::ChannelFaulted {
                            reason: source.to_string(),
                        });
                    }
                    skipped.extend(pending);
                }
                Err(e) => {
                    warn!("round not sent: {e}");
                    self.exchange.cancel();
                }
            }
        }

        if !skipped.is_empty() {
            if halted {
                report.faults.push(BridgeFault::DecisionsHalted);
            }
            if !opened {
                self.metrics.rounds_skipped += 1;
                if report.round == RoundStatus::NoRound {
                    report.round = RoundStatus::Skipped;
                }
            }
            let fallback = self.cadence.fallback();
            self.settle(&skipped, fallback);
        }
    }

    /// Decide every locally driven agent while a remote round is still
    /// out. Remote agents keep their held action.
    fn decide_local(&mut self, report: &mut TickReport) {
        for (&agent, slot) in self.agents.iter_mut() {
            if self.dispatch.is_remote(&slot.behavior) {
                continue;
            }
            let Some(observation) = sense(agent, slot, &self.dispatch, report) else {
                continue;
            };
            match self
                .dispatch
                .decide(agent, &slot.behavior, &observation, &slot.mask)
            {
                Decision::Ready(_) => slot.consume(),
                Decision::Recovered { error, .. } => {
                    self.metrics.local_policy_failures += 1;
                    report
                        .faults
                        .push(BridgeFault::LocalPolicyFailed { agent, error });
                    slot.consume();
                }
                Decision::Pending => {}
            }
        }
    }

    /// Install `fallback` for agents whose decision never arrived.
    /// Agents released in the meantime are forgotten instead.
    fn settle(&mut self, pending: &[PendingAgent], fallback: Fallback) {
        for (behavior, agent) in pending {
            if self.agents.contains_key(agent) {
                self.dispatch.fallback(*agent, behavior, fallback);
            } else {
                self.dispatch.forget(*agent);
            }
        }
    }

    fn resolve(&mut self, resolution: Resolution, report: &mut TickReport) {
        match resolution {
            Resolution::Applied {
                sequence,
                applied,
                missing,
                elapsed,
            } => {
                self.metrics.rounds_applied += 1;
                self.metrics.last_round_us = micros(elapsed);
                for (_, agent) in &applied {
                    if !self.agents.contains_key(agent) {
                        self.dispatch.forget(*agent);
                    }
                }
                for (behavior, agent) in missing {
                    self.metrics.missing_agents += 1;
                    self.settle(&[(behavior.clone(), agent)], Fallback::HoldLastAction);
                    report
                        .faults
                        .push(BridgeFault::MissingAgent { behavior, agent });
                }
                report.round = RoundStatus::Applied(sequence);
            }
            Resolution::TimedOut { sequence, pending } => {
                self.metrics.rounds_timed_out += 1;
                report.faults.push(BridgeFault::RoundTimedOut {
                    sequence,
                    pending: pending.len(),
                });
                self.fall_back(&pending, report);
                report.round = RoundStatus::TimedOut(sequence);
            }
            Resolution::Faulted {
                sequence,
                pending,
                reason,
            } => {
                self.metrics.rounds_timed_out += 1;
                self.channel.fault(&reason);
                report.faults.push(BridgeFault::ChannelFaulted { reason });
                self.fall_back(&pending, report);
                report.round = RoundStatus::TimedOut(sequence);
            }
        }
    }

    /// Timeout fallback for the agents of an unanswered round.
    ///
    /// Under `FatalStop` the episodes are interrupted, decision-seeking
    /// halts, and a live channel is faulted so the reconnect policy
    /// brings up a fresh connection that lifts the halt.
    fn fall_back(&mut self, pending: &[PendingAgent], report: &mut TickReport) {
        let fallback = self.cadence.fallback();
        self.settle(pending, fallback);
        if self.cadence.stops_on_timeout() {
            for (_, agent) in pending {
                if let Some(slot) = self.agents.get_mut(agent) {
                    slot.signal = EpisodeSignal::Interrupted;
                }
            }
            self.cadence.on_timeout(self.channel.connection_epoch());
            if self.channel.state().accepts_rounds() {
                let reason = "round timed out under FatalStop".to_owned();
                self.channel.fault(&reason);
                report.faults.push(BridgeFault::ChannelFaulted { reason });
            }
        }
    }

    fn drain_events(&mut self, report: &mut TickReport) {
        for event in self.exchange.take_events() {
            match event {
                ExchangeEvent::Stale { sequence } => {
                    self.metrics.stale_responses += 1;
                    report.faults.push(BridgeFault::StaleResponse { sequence });
                }
                ExchangeEvent::Malformed { detail } => {
                    self.metrics.malformed_messages += 1;
                    report.faults.push(BridgeFault::Malformed { detail });
                }
                ExchangeEvent::Control(ControlMessage::Reset(reset)) => {
                    info!("trainer reset (seed {:?})", reset.seed);
                    for slot in self.agents.values_mut() {
                        slot.reset_episode();
                    }
                    self.episode_count += 1;
                    self.metrics.episode_resets += 1;
                    if reset.seed.is_some() {
                        self.last_seed = reset.seed;
                    }
                    report.reset_requested = true;
                }
                ExchangeEvent::Control(ControlMessage::Close(close)) => {
                    report
                        .faults
                        .push(BridgeFault::RemoteClosed { reason: close.reason });
                }
                ExchangeEvent::Control(ControlMessage::HandshakeAck(_)) => {}
            }
        }
    }

    fn actuate(&mut self) {
        for (&agent, slot) in self.agents.iter_mut() {
            let action = self
                .dispatch
                .fallback(agent, &slot.behavior, Fallback::HoldLastAction);
            slot.actuator.apply(agent, &action);
        }
    }

    fn abandon_round(&mut self) {
        if let Some((sequence, pending)) = self.exchange.abandon() {
            info!("round {sequence} abandoned with {} agents pending", pending.len());
            self.metrics.rounds_timed_out += 1;
            self.settle(&pending, Fallback::HoldLastAction);
        }
    }

    /// Remote behaviors the trainer has not seen on this connection.
    fn unannounced(&mut self) -> Vec<BehaviorSpec> {
        let epoch = self.channel.connection_epoch();
        if self.announced_epoch != epoch {
            self.announced.clear();
            self.announced_epoch = epoch;
        }
        self.dispatch
            .registry()
            .iter()
            .filter(|(name, entry)| entry.source.is_remote() && !self.announced.contains(*name))
            .map(|(name, entry)| BehaviorSpec {
                name: name.clone(),
                observation: entry.observation.clone(),
                action: entry.action.clone(),
            })
            .collect()
    }

    /// Keep the handshake's behavior list in step with the registry.
    fn sync_hello(&mut self) {
        let mut behaviors: Vec<BehaviorSpec> = self
            .config
            .behaviors
            .iter()
            .map(|decl| decl.to_spec())
            .collect();
        for (name, entry) in self.dispatch.registry().iter() {
            if entry.source.is_remote() && self.config.declared(name).is_none() {
                behaviors.push(BehaviorSpec {
                    name: name.clone(),
                    observation: entry.observation.clone(),
                    action: entry.action.clone(),
                });
            }
        }
        self.channel.set_behaviors(behaviors);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.channel.state())
            .field("agents", &self.agents.len())
            .field("ticks", &self.cadence.ticks())
            .field("phase", &self.exchange.phase())
            .finish_non_exhaustive()
    }
}

/// Collect and validate one agent's observation. `None` when it does not
/// match the behavior's layout; the agent then keeps its held action.
fn sense(
    agent: AgentId,
    slot: &mut AgentSlot,
    dispatch: &PolicyDispatch,
    report: &mut TickReport,
) -> Option<Observation> {
    let observation = slot.sensor.collect(agent);
    let checked = dispatch
        .registry()
        .get(&slot.behavior)
        .map(|e| e.observation.check(&observation));
    if let Some(Err(error)) = checked {
        warn!("agent {agent} ({}): {error}", slot.behavior);
        report
            .faults
            .push(BridgeFault::InvalidObservation { agent, error });
        return None;
    }
    if !observation.is_finite() {
        warn!("agent {agent} ({}): non-finite observation", slot.behavior);
        report
            .faults
            .push(BridgeFault::NonFiniteObservation { agent });
    }
    Some(observation)
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
