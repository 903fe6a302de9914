//! Integration test: graceful degradation when the trainer misbehaves.
//!
//! A slow, stalled, absent, disconnecting, refusing, or garbage-sending
//! trainer must never stall the simulation beyond the configured timeout, and
//! every agent must still be actuated every tick with a well-defined
//! fallback action.

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use simlink_channel::{Endpoint, ReconnectPolicy};
use simlink_core::{
    Action, ActionSpec, BehaviorName, ConnectionState, EpisodeSignal, ObservationSpec,
    StepSequence,
};
use simlink_policy::{FnHeuristic, PolicySource};
use simlink_engine::{
    AgentSetup, Bridge, BridgeConfig, BridgeError, BridgeFault, CadenceMode, RoundStatus,
    TimeoutPolicy,
};
use simlink_test_utils::{answer_all, ConstSensor, MockTrainer, RecordingActuator, Reply, TrainerScript};

// ── Helpers ──────────────────────────────────────────────────────────

const TIMEOUT_MS: u64 = 100;
const SLACK: Duration = Duration::from_millis(250);

fn runner() -> BehaviorName {
    BehaviorName::new("Runner")
}

fn runner_setup() -> AgentSetup {
    AgentSetup::remote(runner(), ObservationSpec::vector(8), ActionSpec::continuous(2))
}

fn config(port: u16) -> BridgeConfig {
    let mut cfg = BridgeConfig::default();
    cfg.endpoint = Endpoint::localhost(port);
    cfg.wait_for_trainer = true;
    cfg.cadence.timeout_ms = TIMEOUT_MS;
    cfg.reconnect = ReconnectPolicy {
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        ..ReconnectPolicy::default()
    };
    cfg
}

fn bound() -> Duration {
    Duration::from_millis(TIMEOUT_MS) + SLACK
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn zero() -> Action {
    Action::continuous(vec![0.0, 0.0])
}

/// Tick until `pred` holds on a report, or give up after `timeout`.
fn tick_until(
    bridge: &mut Bridge,
    timeout: Duration,
    mut pred: impl FnMut(&simlink_engine::TickReport) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let report = bridge.on_tick();
        assert!(report.elapsed < bound(), "tick took {:?}", report.elapsed);
        if pred(&report) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn absent_trainer_with_zero_action_never_stalls() {
    let mut cfg = config(free_port());
    cfg.wait_for_trainer = false;
    cfg.cadence.on_timeout = TimeoutPolicy::ZeroAction;
    let mut bridge = Bridge::new(cfg).unwrap();
    let actuator = RecordingActuator::new();
    let agent = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), actuator.clone())
        .unwrap();

    for _ in 0..20 {
        let report = bridge.on_tick();
        assert!(report.elapsed < bound(), "tick took {:?}", report.elapsed);
        assert_ne!(report.connection, ConnectionState::Ready);
        thread::sleep(Duration::from_millis(5));
    }
    let applied = actuator.for_agent(agent);
    assert_eq!(applied.len(), 20);
    assert!(applied.iter().all(|a| *a == zero()));
    assert_eq!(bridge.metrics().rounds_opened, 0);
    assert_eq!(bridge.metrics().rounds_skipped, 20);
    assert!(bridge.metrics().reconnect_attempts >= 1);
}

#[test]
fn waiting_for_an_absent_trainer_fails_construction() {
    let cfg = config(free_port());
    assert!(matches!(Bridge::new(cfg), Err(BridgeError::Connect(_))));
}

#[test]
fn first_timed_out_round_falls_back_to_zero() {
    let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
    let mut bridge = Bridge::new(config(trainer.port())).unwrap();
    let actuator = RecordingActuator::new();
    let agent = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), actuator.clone())
        .unwrap();

    let report = bridge.on_tick();
    assert_eq!(report.round, RoundStatus::TimedOut(StepSequence(1)));
    assert!(report.elapsed >= Duration::from_millis(TIMEOUT_MS));
    assert!(report.elapsed < bound());
    assert_eq!(
        report.faults,
        vec![BridgeFault::RoundTimedOut {
            sequence: StepSequence(1),
            pending: 1
        }]
    );
    assert_eq!(actuator.for_agent(agent), vec![zero()]);
}

#[test]
fn late_response_is_discarded() {
    let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
        vec![Reply::Delayed(
            Duration::from_millis(3 * TIMEOUT_MS),
            Box::new(Reply::Actions(answer_all(req, |_, _| {
                Action::continuous(vec![0.5, -0.5])
            }))),
        )]
    }))
    .unwrap();
    let mut bridge = Bridge::new(config(trainer.port())).unwrap();
    let actuator = RecordingActuator::new();
    let agent = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), actuator.clone())
        .unwrap();

    assert_eq!(bridge.on_tick().round, RoundStatus::TimedOut(StepSequence(1)));
    thread::sleep(Duration::from_millis(5 * TIMEOUT_MS));
    let report = bridge.on_tick();
    assert!(report
        .faults
        .contains(&BridgeFault::StaleResponse {
            sequence: StepSequence(1)
        }));
    assert_eq!(bridge.metrics().stale_responses, 1);
    assert!(actuator.for_agent(agent).iter().all(|a| *a == zero()));
}

#[test]
fn disconnect_mid_round_times_out_then_reconnects() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let trainer = MockTrainer::spawn(TrainerScript::responding(move |req| {
        if seen.fetch_add(1, Ordering::SeqCst) == 1 {
            vec![Reply::Hangup]
        } else {
            vec![Reply::Actions(answer_all(req, |_, _| {
                Action::continuous(vec![0.5, -0.5])
            }))]
        }
    }))
    .unwrap();
    let mut bridge = Bridge::new(config(trainer.port())).unwrap();
    let actuator = RecordingActuator::new();
    let agent = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), actuator.clone())
        .unwrap();

    assert_eq!(bridge.on_tick().applied(), Some(StepSequence(1)));

    let lost = bridge.on_tick();
    assert_eq!(lost.round, RoundStatus::TimedOut(StepSequence(2)));
    assert!(lost.elapsed < bound());
    assert!(lost
        .faults
        .iter()
        .any(|f| matches!(f, BridgeFault::ChannelFaulted { .. })));
    assert_eq!(lost.connection, ConnectionState::Faulted);
    // The held action survives the lost round.
    assert_eq!(
        actuator.for_agent(agent).last(),
        Some(&Action::continuous(vec![0.5, -0.5]))
    );

    assert!(tick_until(&mut bridge, Duration::from_secs(5), |r| r.reconnected));
    assert!(tick_until(&mut bridge, Duration::from_secs(2), |r| r.applied().is_some()));
    assert!(bridge.metrics().reconnect_attempts >= 1);
    assert_eq!(trainer.connection_count(), 2);

    let sequences = trainer.sequences();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{sequences:?}");
    // Sequence 2 was lost with the connection; the first request on the
    // new one announces the behavior again.
    let requests = trainer.requests();
    let resumed = requests.iter().find(|r| r.sequence.0 == 3).unwrap();
    assert_eq!(resumed.new_behaviors.len(), 1);
}

#[test]
fn fire_and_forget_never_blocks() {
    let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
        vec![Reply::Delayed(
            Duration::from_millis(60),
            Box::new(Reply::Actions(answer_all(req, |_, _| {
                Action::continuous(vec![0.5, -0.5])
            }))),
        )]
    }))
    .unwrap();
    let mut cfg = config(trainer.port());
    cfg.cadence.mode = CadenceMode::FireAndForget;
    cfg.cadence.timeout_ms = 1000;
    let mut bridge = Bridge::new(cfg).unwrap();
    let actuator = RecordingActuator::new();
    let agent = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), actuator.clone())
        .unwrap();

    let first = bridge.on_tick();
    assert_eq!(first.round, RoundStatus::InFlight(StepSequence(1)));
    assert!(first.elapsed < Duration::from_millis(50));
    assert_eq!(actuator.for_agent(agent), vec![zero()]);

    let mut ticks = 1;
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut applied = false;
    while Instant::now() < deadline && !applied {
        let report = bridge.on_tick();
        ticks += 1;
        assert!(report.elapsed < Duration::from_millis(50));
        applied = report.applied().is_some();
        thread::sleep(Duration::from_millis(5));
    }
    assert!(applied);
    assert!(ticks > 2);
    assert_eq!(
        actuator.for_agent(agent).last(),
        Some(&Action::continuous(vec![0.5, -0.5]))
    );
}

#[test]
fn fatal_stop_halts_until_reconnect() {
    let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
    let mut cfg = config(trainer.port());
    cfg.cadence.on_timeout = TimeoutPolicy::FatalStop;
    cfg.reconnect = ReconnectPolicy::disabled();
    let mut bridge = Bridge::new(cfg).unwrap();
    bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), RecordingActuator::new())
        .unwrap();

    let first = bridge.on_tick();
    assert_eq!(first.round, RoundStatus::TimedOut(StepSequence(1)));
    assert_eq!(first.connection, ConnectionState::Faulted);
    for _ in 0..3 {
        let report = bridge.on_tick();
        assert_eq!(report.round, RoundStatus::Skipped);
        assert!(report.faults.contains(&BridgeFault::DecisionsHalted));
        assert!(report.elapsed < Duration::from_millis(TIMEOUT_MS));
    }
    assert_eq!(trainer.request_count(), 1);

    bridge.connect(Endpoint::localhost(trainer.port())).unwrap();
    assert_eq!(bridge.on_tick().round, RoundStatus::TimedOut(StepSequence(2)));
    let requests = trainer.requests();
    assert_eq!(requests.len(), 2);
    let record = &requests[1].batch.get(&runner()).unwrap()[0];
    assert_eq!(record.signal, EpisodeSignal::Interrupted);
}

#[test]
fn fatal_stop_recovers_after_reconnect() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let trainer = MockTrainer::spawn(TrainerScript::responding(move |req| {
        let reply = Reply::Actions(answer_all(req, |_, _| Action::continuous(vec![0.5, -0.5])));
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            vec![Reply::Delayed(Duration::from_millis(2 * TIMEOUT_MS), Box::new(reply))]
        } else {
            vec![reply]
        }
    }))
    .unwrap();
    let mut cfg = config(trainer.port());
    cfg.cadence.on_timeout = TimeoutPolicy::FatalStop;
    let mut bridge = Bridge::new(cfg).unwrap();
    let actuator = RecordingActuator::new();
    let agent = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), actuator.clone())
        .unwrap();

    let first = bridge.on_tick();
    assert_eq!(first.round, RoundStatus::TimedOut(StepSequence(1)));
    assert!(first
        .faults
        .iter()
        .any(|f| matches!(f, BridgeFault::ChannelFaulted { .. })));

    assert!(tick_until(&mut bridge, Duration::from_secs(5), |r| r.reconnected));
    assert!(tick_until(&mut bridge, Duration::from_secs(2), |r| r.applied().is_some()));
    assert!(trainer.connection_count() >= 2);
    assert!(trainer.request_count() >= 2);
    assert_eq!(
        actuator.for_agent(agent).last(),
        Some(&Action::continuous(vec![0.5, -0.5]))
    );
}

#[test]
fn stalled_trainer_never_holds_a_lockstep_tick_past_its_timeout() {
    const WIDTH: u32 = 1 << 20;
    let trainer = MockTrainer::spawn(TrainerScript::stalled()).unwrap();
    let mut cfg = config(trainer.port());
    cfg.reconnect = ReconnectPolicy::disabled();
    let mut bridge = Bridge::new(cfg).unwrap();
    bridge
        .add_agent(
            AgentSetup::remote(runner(), ObservationSpec::vector(WIDTH), ActionSpec::continuous(2)),
            ConstSensor::new(vec![0.25; WIDTH as usize]),
            RecordingActuator::new(),
        )
        .unwrap();

    let mut faulted = false;
    for _ in 0..16 {
        let report = bridge.on_tick();
        assert!(report.elapsed < bound(), "tick took {:?}", report.elapsed);
        if report
            .faults
            .iter()
            .any(|f| matches!(f, BridgeFault::SendFailed { .. }))
        {
            assert_eq!(report.connection, ConnectionState::Faulted);
            faulted = true;
            break;
        }
    }
    assert!(faulted, "a trainer that stopped reading was never detected");
    assert_eq!(trainer.request_count(), 0);
}

#[test]
fn local_agents_decide_while_a_remote_round_is_out() {
    let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
        vec![Reply::Delayed(
            Duration::from_millis(300),
            Box::new(Reply::Actions(answer_all(req, |_, _| {
                Action::continuous(vec![0.5, -0.5])
            }))),
        )]
    }))
    .unwrap();
    let mut cfg = config(trainer.port());
    cfg.cadence.mode = CadenceMode::FireAndForget;
    cfg.cadence.timeout_ms = 1000;
    let mut bridge = Bridge::new(cfg).unwrap();
    bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), RecordingActuator::new())
        .unwrap();

    let decisions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&decisions);
    let scout = AgentSetup::new(
        "Scout",
        ObservationSpec::vector(2),
        ActionSpec::continuous(1),
        PolicySource::LocalHeuristic(Box::new(FnHeuristic::new(move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Action::continuous(vec![n as f32]))
        }))),
    );
    let actuator = RecordingActuator::new();
    let local = bridge
        .add_agent(scout, ConstSensor::new(vec![0.0; 2]), actuator.clone())
        .unwrap();

    for _ in 0..10 {
        bridge.on_tick();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(trainer.request_count(), 1);
    assert_eq!(decisions.load(Ordering::SeqCst), 10);
    let applied: Vec<Action> = (1..=10)
        .map(|n| Action::continuous(vec![n as f32]))
        .collect();
    assert_eq!(actuator.for_agent(local), applied);
}

#[test]
fn agent_released_mid_round_gets_no_fallback_action() {
    let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
    let mut cfg = config(trainer.port());
    cfg.cadence.mode = CadenceMode::FireAndForget;
    cfg.cadence.on_timeout = TimeoutPolicy::ZeroAction;
    cfg.reconnect = ReconnectPolicy::disabled();
    let mut bridge = Bridge::new(cfg).unwrap();
    let gone = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), RecordingActuator::new())
        .unwrap();
    let kept = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), RecordingActuator::new())
        .unwrap();

    assert_eq!(bridge.on_tick().round, RoundStatus::InFlight(StepSequence(1)));
    bridge.release_agent(gone).unwrap();
    assert_eq!(bridge.last_action(gone), None);

    assert!(tick_until(&mut bridge, Duration::from_secs(2), |r| {
        r.round == RoundStatus::TimedOut(StepSequence(1))
    }));
    assert_eq!(bridge.last_action(gone), None);
    assert_eq!(bridge.last_action(kept), Some(&zero()));
}

#[test]
fn repeated_garbage_forces_a_reconnect() {
    let trainer = MockTrainer::spawn(TrainerScript::responding(|_| {
        vec![Reply::Garbage]
    }))
    .unwrap();
    let mut cfg = config(trainer.port());
    cfg.malformed_threshold = 2;
    cfg.reconnect = ReconnectPolicy::disabled();
    let mut bridge = Bridge::new(cfg).unwrap();
    bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), RecordingActuator::new())
        .unwrap();

    let first = bridge.on_tick();
    assert_eq!(first.round, RoundStatus::TimedOut(StepSequence(1)));
    assert!(first
        .faults
        .iter()
        .any(|f| matches!(f, BridgeFault::Malformed { .. })));
    assert_eq!(first.connection, ConnectionState::Ready);

    let second = bridge.on_tick();
    assert!(second
        .faults
        .iter()
        .any(|f| matches!(f, BridgeFault::ChannelFaulted { .. })));
    assert_eq!(second.connection, ConnectionState::Faulted);
    assert_eq!(bridge.metrics().malformed_messages, 2);
}

#[test]
fn rejected_handshake_is_not_retried() {
    let trainer = MockTrainer::spawn(TrainerScript::rejecting("wrong environment")).unwrap();
    let mut cfg = config(trainer.port());
    cfg.wait_for_trainer = false;
    let mut bridge = Bridge::new(cfg).unwrap();
    bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), RecordingActuator::new())
        .unwrap();

    assert!(tick_until(&mut bridge, Duration::from_secs(3), |r| {
        r.faults
            .iter()
            .any(|f| matches!(f, BridgeFault::HandshakeRejected { .. }))
    }));
    for _ in 0..10 {
        let report = bridge.on_tick();
        assert_eq!(report.connection, ConnectionState::Disconnected);
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(trainer.connection_count(), 1);
}

#[test]
fn close_abandons_and_notifies() {
    let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
        vec![Reply::Actions(answer_all(req, |_, _| {
            Action::continuous(vec![0.5, -0.5])
        }))]
    }))
    .unwrap();
    let mut bridge = Bridge::new(config(trainer.port())).unwrap();
    let actuator = RecordingActuator::new();
    let agent = bridge
        .add_agent(runner_setup(), ConstSensor::new(vec![0.0; 8]), actuator.clone())
        .unwrap();
    bridge.on_tick();
    bridge.close();
    assert_eq!(bridge.state(), ConnectionState::Disconnected);
    assert!(trainer.wait_until(Duration::from_secs(2), |t| t.closes_received() == 1));

    // Offline ticks keep holding the last action.
    let report = bridge.on_tick();
    assert_eq!(report.round, RoundStatus::Skipped);
    assert_eq!(
        actuator.for_agent(agent).last(),
        Some(&Action::continuous(vec![0.5, -0.5]))
    );
}
