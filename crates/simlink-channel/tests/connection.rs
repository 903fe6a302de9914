//! Integration test: channel lifecycle against a mock trainer.
//!
//! Covers a successful handshake, rejection latching, peer loss leading
//! to `Faulted` and a background reconnect, receive deadlines, and a
//! trainer that stops draining the stream.

use std::thread;
use std::time::{Duration, Instant};

use simlink_channel::{
    ChannelConfig, ConnectError, Endpoint, ReconnectEvent, ReconnectPolicy, RecvError,
    RpcChannel, SendError,
};
use simlink_codec::{
    inbound_from_envelope, step_request_envelope, ControlMessage, Envelope, Inbound, Message, Reset,
};
use simlink_core::{
    Action, AgentId, AgentRecord, BehaviorName, ConnectionState, Observation, StepBatch,
    StepSequence,
};
use simlink_test_utils::{answer_all, MockTrainer, Reply, TrainerScript};

fn config(port: u16) -> ChannelConfig {
    let mut cfg = ChannelConfig::new(Endpoint::localhost(port), "channel-test");
    cfg.connect_timeout = Duration::from_millis(500);
    cfg.handshake_timeout = Duration::from_millis(1000);
    cfg.reconnect = ReconnectPolicy {
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        ..ReconnectPolicy::default()
    };
    cfg
}

fn one_agent_request(seq: u64) -> Envelope {
    request_with_observation(seq, vec![1.0, 2.0])
}

fn request_with_observation(seq: u64, obs: Vec<f32>) -> Envelope {
    let mut batch = StepBatch::new();
    batch.insert(
        BehaviorName::new("Runner"),
        AgentRecord::new(AgentId(0), Observation::from_vector(obs), 0.5),
    );
    step_request_envelope(StepSequence(seq), &batch, &[])
}

fn pump_until_connected(ch: &mut RpcChannel, timeout: Duration) -> Option<u64> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(ReconnectEvent::Connected { epoch, .. }) = ch.poll_reconnect(Instant::now()) {
            return Some(epoch);
        }
        thread::sleep(Duration::from_millis(2));
    }
    None
}

#[test]
fn handshake_then_request_reply() {
    let trainer = MockTrainer::spawn(TrainerScript::responding(|req| {
        vec![Reply::Actions(answer_all(req, |_, _| {
            Action::continuous(vec![0.5, -0.5])
        }))]
    }))
    .unwrap();
    let mut ch = RpcChannel::new(config(trainer.port())).unwrap();
    ch.connect(Endpoint::localhost(trainer.port())).unwrap();
    assert_eq!(ch.state(), ConnectionState::Ready);
    assert_eq!(ch.connection_epoch(), 1);
    assert_eq!(ch.trainer().unwrap().num_areas, 1);

    ch.send(one_agent_request(1)).unwrap();
    assert_eq!(ch.state(), ConnectionState::Exchanging);
    let envelope = ch.receive(Instant::now() + Duration::from_secs(2)).unwrap();
    ch.end_round();
    assert_eq!(ch.state(), ConnectionState::Ready);

    match inbound_from_envelope(envelope).unwrap() {
        Inbound::Actions { sequence, actions } => {
            assert_eq!(sequence, StepSequence(1));
            assert_eq!(
                actions.get(&BehaviorName::new("Runner"), AgentId(0)),
                Some(&Action::continuous(vec![0.5, -0.5]))
            );
        }
        other => panic!("expected actions, got {other:?}"),
    }
    assert_eq!(trainer.handshakes()[0].bridge_name, "channel-test");
}

#[test]
fn rejected_handshake_latches() {
    let trainer = MockTrainer::spawn(TrainerScript::rejecting("wrong game")).unwrap();
    let mut ch = RpcChannel::new(config(trainer.port())).unwrap();
    match ch.connect(Endpoint::localhost(trainer.port())) {
        Err(ConnectError::HandshakeRejected { reason, .. }) => assert_eq!(reason, "wrong game"),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(ch.is_rejected());
    assert_eq!(ch.state(), ConnectionState::Disconnected);

    thread::sleep(Duration::from_millis(100));
    assert!(ch.poll_reconnect(Instant::now()).is_none());
    assert_eq!(trainer.connection_count(), 1);
}

#[test]
fn incompatible_major_version_is_rejected() {
    let trainer =
        MockTrainer::spawn(TrainerScript::silent().with_version("2.0.0")).unwrap();
    let mut ch = RpcChannel::new(config(trainer.port())).unwrap();
    assert!(matches!(
        ch.connect(Endpoint::localhost(trainer.port())),
        Err(ConnectError::HandshakeRejected { .. })
    ));
}

#[test]
fn peer_loss_faults_then_reconnects() {
    let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
    let mut ch = RpcChannel::new(config(trainer.port())).unwrap();
    ch.connect(Endpoint::localhost(trainer.port())).unwrap();

    trainer.drop_connection();
    let err = ch
        .receive(Instant::now() + Duration::from_secs(2))
        .unwrap_err();
    assert_eq!(err, RecvError::ChannelClosed);
    assert_eq!(ch.state(), ConnectionState::Faulted);
    assert_eq!(ch.send(one_agent_request(2)), Err(SendError::ChannelClosed));

    let epoch = pump_until_connected(&mut ch, Duration::from_secs(5)).expect("reconnected");
    assert_eq!(epoch, 2);
    assert_eq!(ch.state(), ConnectionState::Ready);
    assert!(trainer.wait_for_connections(2, Duration::from_secs(1)));
}

#[test]
fn receive_honours_deadline() {
    let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
    let mut ch = RpcChannel::new(config(trainer.port())).unwrap();
    ch.connect(Endpoint::localhost(trainer.port())).unwrap();
    ch.send(one_agent_request(1)).unwrap();

    let start = Instant::now();
    let err = ch
        .receive(start + Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, RecvError::Timeout);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(ch.try_receive(), Ok(None));
}

#[test]
fn unsolicited_control_messages_arrive() {
    let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
    let mut ch = RpcChannel::new(config(trainer.port())).unwrap();
    ch.connect(Endpoint::localhost(trainer.port())).unwrap();

    trainer
        .send(&Message::Reset(Reset { seed: Some(9) }))
        .unwrap();
    let envelope = ch.receive(Instant::now() + Duration::from_secs(2)).unwrap();
    assert_eq!(
        inbound_from_envelope(envelope).unwrap(),
        Inbound::Control(ControlMessage::Reset(Reset { seed: Some(9) }))
    );
}

#[test]
fn close_notifies_trainer() {
    let trainer = MockTrainer::spawn(TrainerScript::silent()).unwrap();
    let mut ch = RpcChannel::new(config(trainer.port())).unwrap();
    ch.connect(Endpoint::localhost(trainer.port())).unwrap();
    ch.close();
    assert_eq!(ch.state(), ConnectionState::Disconnected);
    assert!(trainer.wait_until(Duration::from_secs(2), |t| t.closes_received() == 1));
    assert!(ch.poll_reconnect(Instant::now()).is_none());
}

#[test]
fn stalled_trainer_faults_the_channel_without_blocking_sends() {
    let trainer = MockTrainer::spawn(TrainerScript::stalled()).unwrap();
    let mut cfg = config(trainer.port());
    cfg.reconnect = ReconnectPolicy::disabled();
    let mut ch = RpcChannel::new(cfg).unwrap();
    ch.connect(Endpoint::localhost(trainer.port())).unwrap();

    // Each request is far larger than the HTTP/2 flow-control window, so
    // the unread stream backs up into the outbound queue.
    let obs = vec![0.25; 1 << 20];
    let mut outcome = Ok(());
    for seq in 1..=16 {
        let start = Instant::now();
        outcome = ch.send(request_with_observation(seq, obs.clone()));
        assert!(
            start.elapsed() < Duration::from_millis(500),
            "send {seq} blocked for {:?}",
            start.elapsed()
        );
        if outcome.is_err() {
            break;
        }
        // Give the runtime time to push what it can.
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(outcome, Err(SendError::Backpressure));
    assert_eq!(ch.state(), ConnectionState::Faulted);
    assert_eq!(trainer.request_count(), 0);
}
