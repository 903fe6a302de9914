//! The step exchange round state machine.
//!
//! [`StepExchange`] owns at most one round at a time:
//!
//! ```text
//! Idle ─begin─▶ Collecting ─send─▶ Sent ─▶ AwaitingResponse ─▶ Applying ─▶ Idle
//!                                               │
//!                                               ├──deadline / bad reply──▶ TimedOut
//!                                               └──transport lost──────────▶ Faulted
//! ```
//!
//! `TimedOut` and `Faulted` are resting phases: the next
//! [`begin`](StepExchange::begin) leaves them exactly like `Idle`.
//!
//! Sequence numbers start at 1 and are consumed by every send attempt,
//! successful or not, so a number is never reused across reconnects.
//!
//! Everything the exchange noticed besides the round outcome (stale
//! replies, undecodable messages, trainer commands) is queued as
//! [`ExchangeEvent`]s for the caller to drain.

use std::mem;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use simlink_channel::{RecvError, RpcChannel, SendError};
use simlink_codec::{
    inbound_from_envelope, step_request_envelope, BehaviorSpec, ControlMessage, Envelope, Inbound,
};
use simlink_core::{ActionBatch, AgentId, AgentRecord, BehaviorName, StepBatch, StepSequence};
use simlink_policy::PolicyDispatch;

/// An agent waiting on a remote decision.
pub type PendingAgent = (BehaviorName, AgentId);

/// Where the current round is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    /// No round.
    Idle,
    /// Records are being gathered.
    Collecting,
    /// The request is being written.
    Sent,
    /// The request is out; waiting for its response.
    AwaitingResponse,
    /// The response is being installed.
    Applying,
    /// The last round expired without a usable response.
    TimedOut,
    /// The last round was lost with the connection.
    Faulted,
}

/// How a round ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// The matching response arrived and was installed.
    Applied {
        /// The round.
        sequence: StepSequence,
        /// Agents whose action was installed.
        applied: Vec<PendingAgent>,
        /// Agents absent from the response or with a wrongly shaped
        /// action. Their last-known action stands.
        missing: Vec<PendingAgent>,
        /// Send-to-apply latency.
        elapsed: Duration,
    },
    /// No usable response before the deadline.
    TimedOut {
        /// The round.
        sequence: StepSequence,
        /// Agents left without a decision.
        pending: Vec<PendingAgent>,
    },
    /// The connection went away under the round.
    Faulted {
        /// The round.
        sequence: StepSequence,
        /// Agents left without a decision.
        pending: Vec<PendingAgent>,
        /// What happened.
        reason: String,
    },
}

/// Side observations made while reading from the trainer.
#[derive(Clone, Debug, PartialEq)]
pub enum ExchangeEvent {
    /// A response for an already resolved round was discarded.
    Stale {
        /// Its sequence.
        sequence: StepSequence,
    },
    /// A message failed to decode or violated the protocol.
    Malformed {
        /// What was wrong.
        detail: String,
    },
    /// The trainer sent a command.
    Control(ControlMessage),
}

/// Misuse of the round state machine, or a failed send.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// A round is already in flight.
    #[error("round {sequence} is still in flight")]
    RoundInFlight {
        /// The in-flight round.
        sequence: StepSequence,
    },
    /// `collect` or `send` outside the collecting phase.
    #[error("no round is collecting")]
    NotCollecting,
    /// The request could not be written. The round is abandoned.
    #[error("sending round {sequence} failed: {source}")]
    Send {
        /// The abandoned round.
        sequence: StepSequence,
        /// Agents that were in it.
        pending: Vec<PendingAgent>,
        /// The transport failure.
        #[source]
        source: SendError,
    },
}

#[derive(Debug)]
struct InFlight {
    sequence: StepSequence,
    agents: Vec<PendingAgent>,
    sent_at: Instant,
}

/// One-round-at-a-time request/response correlation.
#[derive(Debug)]
pub struct StepExchange {
    phase: RoundPhase,
    next_sequence: StepSequence,
    batch: StepBatch,
    in_flight: Option<InFlight>,
    malformed_streak: u32,
    malformed_threshold: u32,
    events: Vec<ExchangeEvent>,
}

impl StepExchange {
    /// A fresh exchange. `malformed_threshold` consecutive bad replies
    /// while awaiting force the channel to fault; values below 1 count
    /// as 1.
    pub fn new(malformed_threshold: u32) -> Self {
        Self {
            phase: RoundPhase::Idle,
            next_sequence: StepSequence::FIRST,
            batch: StepBatch::new(),
            in_flight: None,
            malformed_streak: 0,
            malformed_threshold: malformed_threshold.max(1),
            events: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Sequence of the round awaiting its response, if any.
    pub fn in_flight(&self) -> Option<StepSequence> {
        self.in_flight.as_ref().map(|f| f.sequence)
    }

    /// When the in-flight round was sent.
    pub fn sent_at(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|f| f.sent_at)
    }

    /// The sequence the next send will use.
    pub fn next_sequence(&self) -> StepSequence {
        self.next_sequence
    }

    /// Consecutive bad replies since the last applied round.
    pub fn malformed_streak(&self) -> u32 {
        self.malformed_streak
    }

    /// Start collecting a new round.
    pub fn begin(&mut self) -> Result<(), ExchangeError> {
        if let Some(flight) = &self.in_flight {
            return Err(ExchangeError::RoundInFlight {
                sequence: flight.sequence,
            });
        }
        self.batch = StepBatch::new();
        self.phase = RoundPhase::Collecting;
        Ok(())
    }

    /// Add one agent's record to the collecting round.
    pub fn collect(
        &mut self,
        behavior: BehaviorName,
        record: AgentRecord,
    ) -> Result<(), ExchangeError> {
        if self.phase != RoundPhase::Collecting {
            return Err(ExchangeError::NotCollecting);
        }
        self.batch.insert(behavior, record);
        Ok(())
    }

    /// Records collected so far.
    pub fn collected(&self) -> usize {
        self.batch.agent_count()
    }

    /// Drop a collecting round without sending it.
    pub fn cancel(&mut self) {
        if self.phase == RoundPhase::Collecting {
            self.batch = StepBatch::new();
            self.phase = RoundPhase::Idle;
        }
    }

    /// Queue the collected round for the trainer. Never blocks.
    ///
    /// The round's clock starts before the hand-off to the channel, so
    /// a deadline derived from [`sent_at`](Self::sent_at) covers the
    /// send too.
    pub fn send(
        &mut self,
        channel: &mut RpcChannel,
        new_behaviors: &[BehaviorSpec],
    ) -> Result<StepSequence, ExchangeError> {
        if let Some(flight) = &self.in_flight {
            return Err(ExchangeError::RoundInFlight {
                sequence: flight.sequence,
            });
        }
        if self.phase != RoundPhase::Collecting {
            return Err(ExchangeError::NotCollecting);
        }
        let batch = mem::take(&mut self.batch);
        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        let envelope = step_request_envelope(sequence, &batch, new_behaviors);

        self.phase = RoundPhase::Sent;
        let agents: Vec<PendingAgent> = batch.agents();
        let sent_at = Instant::now();
        match channel.send(envelope) {
            Ok(()) => {
                debug!("round {sequence}: sent {} agents", agents.len());
                self.in_flight = Some(InFlight {
                    sequence,
                    agents,
                    sent_at,
                });
                self.phase = RoundPhase::AwaitingResponse;
                Ok(sequence)
            }
            Err(source) => {
                self.phase = RoundPhase::Faulted;
                Err(ExchangeError::Send {
                    sequence,
                    pending: agents,
                    source,
                })
            }
        }
    }

    /// Block until the in-flight round resolves or `deadline` passes.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn await_response(
        &mut self,
        channel: &mut RpcChannel,
        dispatch: &mut PolicyDispatch,
        deadline: Instant,
    ) -> Option<Resolution> {
        self.in_flight.as_ref()?;
        loop {
            match channel.receive(deadline) {
                Ok(envelope) => {
                    if let Some(resolution) = self.handle_message(envelope, channel, dispatch) {
                        return Some(resolution);
                    }
                }
                Err(RecvError::Timeout) => return self.time_out(channel),
                Err(RecvError::ChannelClosed) => {
                    return self.fault("connection lost while awaiting response")
                }
            }
        }
    }

    /// Resolve the in-flight round if its response is already here.
    /// Never blocks.
    pub fn poll_response(
        &mut self,
        channel: &mut RpcChannel,
        dispatch: &mut PolicyDispatch,
    ) -> Option<Resolution> {
        self.in_flight.as_ref()?;
        loop {
            match channel.try_receive() {
                Ok(Some(envelope)) => {
                    if let Some(resolution) = self.handle_message(envelope, channel, dispatch) {
                        return Some(resolution);
                    }
                }
                Ok(None) => return None,
                Err(_) => return self.fault("connection lost while awaiting response"),
            }
        }
    }

    /// Time the in-flight round out if it was sent at least `timeout`
    /// before `now`.
    pub fn expire(
        &mut self,
        channel: &mut RpcChannel,
        now: Instant,
        timeout: Duration,
    ) -> Option<Resolution> {
        let sent_at = self.sent_at()?;
        if now.saturating_duration_since(sent_at) < timeout {
            return None;
        }
        self.time_out(channel)
    }

    /// Read whatever the trainer sent while no round is in flight.
    ///
    /// Responses are necessarily late and are discarded as stale.
    /// Malformed messages count toward the reconnect threshold exactly
    /// as they do mid-round. Never blocks.
    pub fn drain_idle(&mut self, channel: &mut RpcChannel) {
        if self.in_flight.is_some() {
            return;
        }
        while let Ok(Some(envelope)) = channel.try_receive() {
            let detail = match inbound_from_envelope(envelope) {
                Ok(Inbound::Actions { sequence, .. }) if sequence < self.next_sequence => {
                    self.stale(sequence);
                    continue;
                }
                Ok(Inbound::Actions { sequence, .. }) => {
                    format!("response for unsent round {sequence}")
                }
                Ok(Inbound::Control(control)) => {
                    self.control(control, channel);
                    continue;
                }
                Err(e) => e.to_string(),
            };
            if self.note_malformed(detail, channel) {
                return;
            }
        }
    }

    /// Abandon the in-flight round without a response, returning its
    /// agents. Used when the bridge closes.
    pub fn abandon(&mut self) -> Option<(StepSequence, Vec<PendingAgent>)> {
        self.batch = StepBatch::new();
        self.phase = RoundPhase::Idle;
        self.in_flight.take().map(|f| (f.sequence, f.agents))
    }

    /// Take the queued side events.
    pub fn take_events(&mut self) -> Vec<ExchangeEvent> {
        mem::take(&mut self.events)
    }

    fn handle_message(
        &mut self,
        envelope: Envelope,
        channel: &mut RpcChannel,
        dispatch: &mut PolicyDispatch,
    ) -> Option<Resolution> {
        let current = self.in_flight()?;
        match inbound_from_envelope(envelope) {
            Ok(Inbound::Actions { sequence, actions }) if sequence == current => {
                self.apply(actions, channel, dispatch)
            }
            Ok(Inbound::Actions { sequence, .. }) if sequence < current => {
                self.stale(sequence);
                None
            }
            Ok(Inbound::Actions { sequence, .. }) => {
                self.malformed(format!("response for unsent round {sequence}"), channel)
            }
            Ok(Inbound::Control(control)) => {
                if self.control(control, channel) {
                    self.fault("trainer closed the connection")
                } else {
                    None
                }
            }
            Err(e) => self.malformed(e.to_string(), channel),
        }
    }

    fn apply(
        &mut self,
        actions: ActionBatch,
        channel: &mut RpcChannel,
        dispatch: &mut PolicyDispatch,
    ) -> Option<Resolution> {
        let flight = self.in_flight.take()?;
        self.phase = RoundPhase::Applying;
        let sequence = flight.sequence;
        let mut applied = Vec::with_capacity(flight.agents.len());
        let mut missing = Vec::new();
        for (behavior, agent) in flight.agents {
            let Some(spec) = dispatch.action_spec(&behavior) else {
                debug!("round {sequence}: behavior '{behavior}' released meanwhile");
                continue;
            };
            match actions.get(&behavior, agent).map(|a| (spec.check(a), a)) {
                Some((Ok(()), action)) => {
                    dispatch.install(agent, action.clone());
                    applied.push((behavior, agent));
                }
                Some((Err(e), _)) => {
                    warn!("round {sequence}: agent {agent} ({behavior}) action rejected: {e}");
                    missing.push((behavior, agent));
                }
                None => {
                    warn!("round {sequence}: agent {agent} ({behavior}) missing from response");
                    missing.push((behavior, agent));
                }
            }
        }
        self.malformed_streak = 0;
        channel.end_round();
        self.phase = RoundPhase::Idle;
        let elapsed = flight.sent_at.elapsed();
        debug!("round {sequence}: applied {} agents in {elapsed:?}", applied.len());
        Some(Resolution::Applied {
            sequence,
            applied,
            missing,
            elapsed,
        })
    }

    fn time_out(&mut self, channel: &mut RpcChannel) -> Option<Resolution> {
        let flight = self.in_flight.take()?;
        channel.end_round();
        self.phase = RoundPhase::TimedOut;
        warn!(
            "round {} timed out with {} agents pending",
            flight.sequence,
            flight.agents.len()
        );
        Some(Resolution::TimedOut {
            sequence: flight.sequence,
            pending: flight.agents,
        })
    }

    fn fault(&mut self, reason: &str) -> Option<Resolution> {
        let flight = self.in_flight.take()?;
        self.phase = RoundPhase::Faulted;
        Some(Resolution::Faulted {
            sequence: flight.sequence,
            pending: flight.agents,
            reason: reason.to_string(),
        })
    }

    fn stale(&mut self, sequence: StepSequence) {
        warn!("stale response for round {sequence} discarded");
        self.events.push(ExchangeEvent::Stale { sequence });
    }

    fn malformed(&mut self, detail: String, channel: &mut RpcChannel) -> Option<Resolution> {
        let reason = format!("malformed messages: {detail}");
        if self.note_malformed(detail, channel) {
            return self.fault(&reason);
        }
        self.time_out(channel)
    }

    /// Count one malformed message. Returns true when the streak reached
    /// the threshold and the channel was faulted to force a reconnect.
    fn note_malformed(&mut self, detail: String, channel: &mut RpcChannel) -> bool {
        self.malformed_streak += 1;
        if self.malformed_streak >= self.malformed_threshold {
            error!(
                "{} consecutive malformed messages (last: {detail}); forcing reconnect",
                self.malformed_streak
            );
            self.malformed_streak = 0;
            channel.fault("malformed message threshold reached");
            self.events.push(ExchangeEvent::Malformed { detail });
            return true;
        }
        warn!("malformed message from trainer: {detail}");
        self.events.push(ExchangeEvent::Malformed { detail });
        false
    }

    /// Queue a trainer command. Returns true when the trainer closed.
    fn control(&mut self, control: ControlMessage, channel: &mut RpcChannel) -> bool {
        let closed = match &control {
            ControlMessage::Close(close) => {
                info!(
                    "trainer closed the connection: {}",
                    close.reason.as_deref().unwrap_or("no reason given")
                );
                channel.fault("trainer closed the connection");
                true
            }
            ControlMessage::Reset(reset) => {
                debug!("trainer requested reset (seed {:?})", reset.seed);
                false
            }
            ControlMessage::HandshakeAck(_) => {
                warn!("unexpected handshake ack ignored");
                return false;
            }
        };
        self.events.push(ExchangeEvent::Control(control));
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simlink_channel::{ChannelConfig, Endpoint, ReconnectPolicy};
    use simlink_codec::{Close, Message, Reset};
    use simlink_core::{Action, ActionSpec, Observation, ObservationSpec};
    use simlink_policy::PolicySource;
    use simlink_test_utils::{answer_all, MockTrainer, Reply, TrainerScript};

    fn runner() -> BehaviorName {
        BehaviorName::new("Runner")
    }

    fn connect(trainer: &MockTrainer) -> RpcChannel {
        let mut cfg = ChannelConfig::new(Endpoint::localhost(trainer.port()), "exchange-test");
        cfg.reconnect = ReconnectPolicy::disabled();
        let mut ch = RpcChannel::new(cfg).unwrap();
        ch.connect(Endpoint::localhost(trainer.port())).unwrap();
        ch
    }

    fn dispatch() -> PolicyDispatch {
        let mut d = PolicyDispatch::new();
        d.register_behavior(
            runner(),
            ObservationSpec::vector(2),
            ActionSpec::continuous(2),
            PolicySource::Remote,
        )
        .unwrap();
        d
    }

    fn open_round(ex: &mut StepExchange, ch: &mut RpcChannel, agents: &[u32]) -> StepSequence {
        ex.begin().unwrap();
        for &a in agents {
            ex.collect(
                runner(),
                AgentRecord::new(AgentId(a), Observation::from_vector(vec![0.0, 0.0]), 0.0),
            )
            .unwrap();
        }
        ex.send(ch, &[]).unwrap()
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[test]
    fn round_trip_installs_actions() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
            vec![Reply::Actions(answer_all(req, |_, a| {
                Action::continuous(vec![a.0 as f32, 1.0])
            }))]
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(3);

        let seq = open_round(&mut ex, &mut ch, &[2, 1]);
        assert_eq!(seq, StepSequence(1));
        assert_eq!(ex.phase(), RoundPhase::AwaitingResponse);

        match ex.await_response(&mut ch, &mut d, soon()).unwrap() {
            Resolution::Applied {
                sequence,
                applied,
                missing,
                ..
            } => {
                assert_eq!(sequence, seq);
                assert_eq!(applied, vec![(runner(), AgentId(1)), (runner(), AgentId(2))]);
                assert!(missing.is_empty());
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(ex.phase(), RoundPhase::Idle);
        assert_eq!(d.last_action(AgentId(2)), Some(&Action::continuous(vec![2.0, 1.0])));
        assert_eq!(ex.next_sequence(), StepSequence(2));
    }

    #[test]
    fn second_send_while_in_flight_is_refused() {
        let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
        let mut ch = connect(&trainer);
        let mut ex = StepExchange::new(3);
        open_round(&mut ex, &mut ch, &[0]);
        assert!(matches!(
            ex.begin(),
            Err(ExchangeError::RoundInFlight { sequence }) if sequence == StepSequence(1)
        ));
        assert!(matches!(ex.send(&mut ch, &[]), Err(ExchangeError::RoundInFlight { .. })));
    }

    #[test]
    fn collect_outside_round_is_refused() {
        let mut ex = StepExchange::new(3);
        let rec = AgentRecord::new(AgentId(0), Observation::default(), 0.0);
        assert!(matches!(
            ex.collect(runner(), rec),
            Err(ExchangeError::NotCollecting)
        ));
    }

    #[test]
    fn missing_and_misshapen_agents_are_reported() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|_| {
            let mut actions = ActionBatch::new();
            actions.insert(runner(), AgentId(0), Action::continuous(vec![1.0]));
            vec![Reply::Actions(actions)]
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(3);
        open_round(&mut ex, &mut ch, &[0, 1]);

        match ex.await_response(&mut ch, &mut d, soon()).unwrap() {
            Resolution::Applied { applied, missing, .. } => {
                assert!(applied.is_empty());
                assert_eq!(missing, vec![(runner(), AgentId(0)), (runner(), AgentId(1))]);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert!(d.last_action(AgentId(0)).is_none());
    }

    #[test]
    fn deadline_times_round_out_and_late_reply_is_stale() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
            vec![Reply::Delayed(
                Duration::from_millis(150),
                Box::new(Reply::Actions(answer_all(req, |_, _| {
                    Action::continuous(vec![1.0, 1.0])
                }))),
            )]
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(3);
        open_round(&mut ex, &mut ch, &[0]);

        let res = ex
            .await_response(&mut ch, &mut d, Instant::now() + Duration::from_millis(30))
            .unwrap();
        assert!(matches!(res, Resolution::TimedOut { sequence, .. } if sequence == StepSequence(1)));
        assert_eq!(ex.phase(), RoundPhase::TimedOut);

        std::thread::sleep(Duration::from_millis(300));
        ex.drain_idle(&mut ch);
        assert_eq!(
            ex.take_events(),
            vec![ExchangeEvent::Stale {
                sequence: StepSequence(1)
            }]
        );
        assert!(d.last_action(AgentId(0)).is_none());
    }

    #[test]
    fn stale_reply_does_not_resolve_current_round() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
            let acts = answer_all(req, |_, _| Action::continuous(vec![0.5, 0.5]));
            vec![
                Reply::ActionsFor {
                    sequence: StepSequence(req.sequence.0 - 1),
                    actions: acts.clone(),
                },
                Reply::Actions(acts),
            ]
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(3);
        open_round(&mut ex, &mut ch, &[0]);

        let res = ex.await_response(&mut ch, &mut d, soon()).unwrap();
        assert!(matches!(res, Resolution::Applied { sequence, .. } if sequence == StepSequence(1)));
        assert!(ex
            .take_events()
            .iter()
            .any(|e| matches!(e, ExchangeEvent::Stale { .. })));
    }

    #[test]
    fn malformed_replies_time_out_then_fault() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|_| {
            vec![Reply::Garbage]
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(2);

        open_round(&mut ex, &mut ch, &[0]);
        let first = ex.await_response(&mut ch, &mut d, soon()).unwrap();
        assert!(matches!(first, Resolution::TimedOut { .. }));
        assert_eq!(ex.malformed_streak(), 1);

        open_round(&mut ex, &mut ch, &[0]);
        let second = ex.await_response(&mut ch, &mut d, soon()).unwrap();
        assert!(matches!(second, Resolution::Faulted { .. }));
        assert_eq!(ch.state(), simlink_core::ConnectionState::Faulted);
        assert_eq!(ex.malformed_streak(), 0);
    }

    #[test]
    fn garbage_between_rounds_counts_toward_reconnect() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
            let mut replies = vec![Reply::Actions(answer_all(req, |_, _| {
                Action::continuous(vec![0.0, 0.0])
            }))];
            replies.extend(std::iter::repeat(Reply::Garbage).take(3));
            replies
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(3);

        open_round(&mut ex, &mut ch, &[0]);
        assert!(matches!(
            ex.await_response(&mut ch, &mut d, soon()),
            Some(Resolution::Applied { .. })
        ));

        let deadline = soon();
        while ch.state() != simlink_core::ConnectionState::Faulted && Instant::now() < deadline {
            ex.drain_idle(&mut ch);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ch.state(), simlink_core::ConnectionState::Faulted);
        assert_eq!(ex.malformed_streak(), 0);
        let malformed = ex
            .take_events()
            .iter()
            .filter(|e| matches!(e, ExchangeEvent::Malformed { .. }))
            .count();
        assert_eq!(malformed, 3);
    }

    #[test]
    fn trainer_close_faults_the_round() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|_| {
            vec![Reply::Message(Message::Close(Close {
                reason: Some("done".into()),
            }))]
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(3);
        open_round(&mut ex, &mut ch, &[0]);
        let res = ex.await_response(&mut ch, &mut d, soon()).unwrap();
        assert!(matches!(res, Resolution::Faulted { .. }));
        assert!(matches!(
            ex.take_events().as_slice(),
            [ExchangeEvent::Control(ControlMessage::Close(_))]
        ));
    }

    #[test]
    fn reset_while_awaiting_is_queued() {
        let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
            vec![
                Reply::Message(Message::Reset(Reset { seed: Some(4) })),
                Reply::Actions(answer_all(req, |_, _| Action::continuous(vec![0.0, 0.0]))),
            ]
        }))
        .unwrap();
        let mut ch = connect(&trainer);
        let mut d = dispatch();
        let mut ex = StepExchange::new(3);
        open_round(&mut ex, &mut ch, &[0]);
        assert!(matches!(
            ex.await_response(&mut ch, &mut d, soon()),
            Some(Resolution::Applied { .. })
        ));
        assert_eq!(
            ex.take_events(),
            vec![ExchangeEvent::Control(ControlMessage::Reset(Reset { seed: Some(4) }))]
        );
    }

    #[test]
    fn sequences_survive_failed_sends() {
        let mut ch = RpcChannel::new({
            let mut cfg = ChannelConfig::new(Endpoint::localhost(1), "offline");
            cfg.reconnect = ReconnectPolicy::disabled();
            cfg
        })
        .unwrap();
        let mut ex = StepExchange::new(3);
        ex.begin().unwrap();
        match ex.send(&mut ch, &[]) {
            Err(ExchangeError::Send { sequence, .. }) => assert_eq!(sequence, StepSequence(1)),
            other => panic!("expected send failure, got {other:?}"),
        }
        assert_eq!(ex.phase(), RoundPhase::Faulted);
        assert_eq!(ex.next_sequence(), StepSequence(2));
    }
}
