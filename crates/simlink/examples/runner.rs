//! simlink Runner: a simulation loop driven by an in-process trainer.
//!
//! Demonstrates:
//!   1. Loading a `BridgeConfig` from JSON (or using defaults)
//!   2. Registering remote and local agents with sensors and actuators
//!   3. Ticking the bridge and reading `TickReport`s
//!   4. Rewards, episode ends, and trainer-requested resets
//!   5. Surviving a trainer that drops the connection mid-run
//!
//! A scripted `MockTrainer` stands in for the real trainer so the example
//! runs on its own. Set `RUST_LOG=debug` to watch every round.
//!
//! Run with:
//!   cargo run --example runner [-- path/to/config.json]

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;
use simlink::codec::{Message, Reset};
use simlink::prelude::*;
use simlink_test_utils::{answer_all, MockTrainer, Reply, TrainerScript};

// ─── Scenario ───────────────────────────────────────────────────

const TICKS: u64 = 60;
const EPISODE_LENGTH: u32 = 20;
const OBS_LEN: u32 = 8;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // ─── Trainer: pushes forward, resets at request 25, hangs up at 40 ──

    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    let trainer = MockTrainer::spawn(TrainerScript::responding(move |req| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let actions = answer_all(req, |_, agent| {
            let lean = if agent.0 % 2 == 0 { 0.5 } else { -0.5 };
            Action::continuous(vec![0.5, lean])
        });
        match n {
            25 => vec![
                Reply::Message(Message::Reset(Reset { seed: Some(7) })),
                Reply::Actions(actions),
            ],
            40 => vec![Reply::Hangup],
            _ => vec![Reply::Actions(actions)],
        }
    }))?;

    // ─── Bridge ─────────────────────────────────────────────────

    let mut config = match env::args().nth(1) {
        Some(path) => BridgeConfig::from_json_file(path)?,
        None => BridgeConfig::default(),
    };
    config.endpoint = Endpoint::localhost(trainer.port());
    config.wait_for_trainer = true;
    config.cadence.timeout_ms = 250;
    config.reconnect.initial_backoff_ms = 20;
    let mut bridge = Bridge::new(config)?;

    // ─── Agents ─────────────────────────────────────────────────

    let mut runners = Vec::new();
    for i in 0..3u32 {
        let sensor = move |agent: AgentId| {
            let mut obs = vec![0.0; OBS_LEN as usize];
            obs[0] = agent.0 as f32;
            obs[1] = i as f32;
            Observation::from_vector(obs)
        };
        let actuator = |agent: AgentId, action: &Action| {
            log::trace!("agent {agent} applies {:?}", action.continuous);
        };
        let id = bridge.add_agent(
            AgentSetup::remote(
                "Runner",
                ObservationSpec::vector(OBS_LEN),
                ActionSpec::continuous(2),
            ),
            sensor,
            actuator,
        )?;
        bridge.set_max_step(id, EPISODE_LENGTH)?;
        runners.push(id);
    }

    let scripted = bridge.add_agent(
        AgentSetup::new(
            "Scripted",
            ObservationSpec::vector(OBS_LEN),
            ActionSpec::discrete(&[3]),
            PolicySource::LocalHeuristic(Box::new(FnHeuristic::new(|_, obs: &Observation| {
                let choice = if obs.flatten()[0] > 0.0 { 2 } else { 0 };
                Ok(Action::discrete(vec![choice]))
            }))),
        ),
        |_agent: AgentId| Observation::from_vector(vec![1.0; OBS_LEN as usize]),
        |_agent: AgentId, _action: &Action| {},
    )?;
    info!("registered {} agents", bridge.agent_count());

    // ─── Loop ───────────────────────────────────────────────────

    for tick in 0..TICKS {
        for (i, &id) in runners.iter().enumerate() {
            bridge.add_reward(id, 0.01 * (i as f32 + 1.0))?;
        }
        if tick % 15 == 14 {
            bridge.end_episode(runners[0])?;
        }

        let report = bridge.on_tick();
        if report.reset_requested {
            info!("tick {tick}: trainer reset, seed {:?}", bridge.last_seed());
        }
        for fault in &report.faults {
            info!("tick {tick}: {fault}");
        }
        if report.reconnected {
            info!("tick {tick}: trainer reconnected");
        }
        thread::sleep(Duration::from_millis(5));
    }

    let metrics = bridge.metrics();
    info!(
        "done: {} rounds applied, {} timed out, {} skipped, {} reconnects, {} resets",
        metrics.rounds_applied,
        metrics.rounds_timed_out,
        metrics.rounds_skipped,
        metrics.reconnects,
        metrics.episode_resets,
    );
    info!("scripted agent's last action: {:?}", bridge.last_action(scripted));
    println!("{metrics:#?}");

    bridge.close();
    Ok(())
}
