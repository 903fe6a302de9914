//! Mapping between domain [`Message`]s and protobuf [`Envelope`]s.
//!
//! Encoding is total. Decoding checks the envelope's format version,
//! the fields the protocol requires, and every tensor's shape, so
//! whatever reaches the engine is well formed. Unknown fields are
//! skipped by prost itself.

use prost::Message as _;
use simlink_core::{
    Action, ActionBatch, ActionSpec, AgentId, AgentRecord, BehaviorName, EpisodeSignal,
    Observation, ObservationSpec, ObservationTensor, Shape, StepBatch, StepSequence,
};

use crate::error::CodecError;
use crate::message::*;
use crate::proto::{self as pb, envelope::Payload, Envelope};
use crate::{FORMAT_VERSION, MIN_FORMAT_VERSION};

// ── Public entry points ─────────────────────────────────────────

/// Wrap any message in a current-version envelope.
pub fn to_envelope(msg: &Message) -> Envelope {
    let payload = match msg {
        Message::Handshake(m) => Payload::Handshake(pb::Handshake {
            bridge_version: m.bridge_version.clone(),
            package_version: m.package_version.clone(),
            bridge_name: m.bridge_name.clone(),
            behaviors: m.behaviors.iter().map(spec_to_pb).collect(),
        }),
        Message::HandshakeAck(m) => Payload::HandshakeAck(pb::HandshakeAck {
            accepted: m.accepted,
            trainer_version: m.trainer_version.clone(),
            seed: m.seed,
            num_areas: m.num_areas,
            reason: m.reason.clone(),
        }),
        Message::StepRequest(m) => {
            Payload::StepRequest(request_to_pb(m.sequence, &m.batch, &m.new_behaviors))
        }
        Message::StepResponse(m) => Payload::StepResponse(response_to_pb(m)),
        Message::Reset(m) => Payload::Reset(pb::Reset { seed: m.seed }),
        Message::Close(m) => Payload::Close(pb::Close {
            reason: m.reason.clone(),
        }),
    };
    seal(payload)
}

/// Envelope for one outbound step, built without cloning the batch
/// into a [`StepRequest`] first.
pub fn step_request_envelope(
    sequence: StepSequence,
    batch: &StepBatch,
    new_behaviors: &[BehaviorSpec],
) -> Envelope {
    seal(Payload::StepRequest(request_to_pb(
        sequence,
        batch,
        new_behaviors,
    )))
}

/// Encode any message into a self-contained protobuf buffer.
pub fn encode(msg: &Message) -> Vec<u8> {
    to_envelope(msg).encode_to_vec()
}

/// Encode one outbound step.
pub fn encode_step_request(
    sequence: StepSequence,
    batch: &StepBatch,
    new_behaviors: &[BehaviorSpec],
) -> Vec<u8> {
    step_request_envelope(sequence, batch, new_behaviors).encode_to_vec()
}

/// Decode any message from a protobuf buffer.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    from_envelope(parse(bytes)?)
}

/// Validate an envelope and convert it into a domain message.
pub fn from_envelope(envelope: Envelope) -> Result<Message, CodecError> {
    match open(envelope)? {
        Payload::Handshake(m) => handshake_from_pb(m).map(Message::Handshake),
        Payload::HandshakeAck(m) => ack_from_pb(m).map(Message::HandshakeAck),
        Payload::StepRequest(m) => request_from_pb(m).map(Message::StepRequest),
        Payload::StepResponse(m) => response_from_pb(m).map(Message::StepResponse),
        Payload::Reset(m) => Ok(Message::Reset(Reset { seed: m.seed })),
        Payload::Close(m) => Ok(Message::Close(Close { reason: m.reason })),
    }
}

/// Decode a message addressed to the bridge.
pub fn decode_inbound(bytes: &[u8]) -> Result<Inbound, CodecError> {
    inbound_from_envelope(parse(bytes)?)
}

/// Validate an envelope addressed to the bridge.
///
/// Bridge-to-trainer kinds (`Handshake`, `StepRequest`) are rejected as
/// malformed before their payload is examined, since a trainer never
/// sends them.
pub fn inbound_from_envelope(envelope: Envelope) -> Result<Inbound, CodecError> {
    match open(envelope)? {
        Payload::StepResponse(m) => {
            let r = response_from_pb(m)?;
            Ok(Inbound::Actions {
                sequence: r.sequence,
                actions: r.actions,
            })
        }
        Payload::HandshakeAck(m) => Ok(Inbound::Control(ControlMessage::HandshakeAck(
            ack_from_pb(m)?,
        ))),
        Payload::Reset(m) => Ok(Inbound::Control(ControlMessage::Reset(Reset {
            seed: m.seed,
        }))),
        Payload::Close(m) => Ok(Inbound::Control(ControlMessage::Close(Close {
            reason: m.reason,
        }))),
        Payload::Handshake(_) => Err(CodecError::malformed("unexpected Handshake from trainer")),
        Payload::StepRequest(_) => {
            Err(CodecError::malformed("unexpected StepRequest from trainer"))
        }
    }
}

// ── Envelope ────────────────────────────────────────────────────

fn seal(payload: Payload) -> Envelope {
    Envelope {
        format_version: FORMAT_VERSION,
        payload: Some(payload),
    }
}

fn parse(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Envelope::decode(bytes).map_err(|e| CodecError::malformed(e.to_string()))
}

fn open(envelope: Envelope) -> Result<Payload, CodecError> {
    let version = envelope.format_version;
    if version == 0 {
        return Err(CodecError::malformed("envelope has no format version"));
    }
    if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
        return Err(CodecError::UnsupportedVersion { found: version });
    }
    envelope
        .payload
        .ok_or_else(|| CodecError::malformed("envelope has no payload"))
}

// ── Domain to protobuf ──────────────────────────────────────────

fn spec_to_pb(spec: &BehaviorSpec) -> pb::BehaviorSpec {
    pb::BehaviorSpec {
        name: spec.name.as_str().to_owned(),
        observation_shapes: spec
            .observation
            .shapes
            .iter()
            .map(|s| pb::Shape { dims: s.to_vec() })
            .collect(),
        continuous: spec.action.continuous,
        discrete_branches: spec.action.discrete_branches.to_vec(),
    }
}

fn signal_to_pb(signal: EpisodeSignal) -> pb::EpisodeSignal {
    match signal {
        EpisodeSignal::Running => pb::EpisodeSignal::Running,
        EpisodeSignal::Done => pb::EpisodeSignal::Done,
        EpisodeSignal::Interrupted => pb::EpisodeSignal::Interrupted,
    }
}

fn record_to_pb(r: &AgentRecord) -> pb::AgentRecord {
    pb::AgentRecord {
        agent_id: r.agent.0,
        observations: r
            .observation
            .tensors()
            .iter()
            .map(|t| pb::Tensor {
                shape: t.shape.to_vec(),
                data: t.data.clone(),
            })
            .collect(),
        reward: r.reward,
        signal: signal_to_pb(r.signal) as i32,
        group_id: r.group_id,
        group_reward: r.group_reward,
        action_mask: r.action_mask.clone(),
    }
}

fn request_to_pb(
    sequence: StepSequence,
    batch: &StepBatch,
    new_behaviors: &[BehaviorSpec],
) -> pb::StepRequest {
    pb::StepRequest {
        sequence: sequence.0,
        behaviors: batch
            .iter()
            .map(|(name, records)| pb::BehaviorRecords {
                name: name.as_str().to_owned(),
                agents: records.iter().map(record_to_pb).collect(),
            })
            .collect(),
        new_behaviors: new_behaviors.iter().map(spec_to_pb).collect(),
    }
}

fn response_to_pb(m: &StepResponse) -> pb::StepResponse {
    pb::StepResponse {
        sequence: m.sequence.0,
        behaviors: m
            .actions
            .iter()
            .map(|(name, actions)| pb::BehaviorActions {
                name: name.as_str().to_owned(),
                agents: actions
                    .iter()
                    .map(|(agent, action)| pb::AgentAction {
                        agent_id: agent.0,
                        continuous: action.continuous.clone(),
                        discrete: action.discrete.clone(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

// ── Protobuf to domain ──────────────────────────────────────────

fn required(value: String, field: &str) -> Result<String, CodecError> {
    if value.is_empty() {
        return Err(CodecError::malformed(format!("missing {field}")));
    }
    Ok(value)
}

fn behavior_name(name: String) -> Result<BehaviorName, CodecError> {
    required(name, "behavior.name").map(BehaviorName::new)
}

fn sequence(raw: u64) -> Result<StepSequence, CodecError> {
    // Sequences start at 1, so 0 is an unset field.
    if raw == 0 {
        return Err(CodecError::malformed("missing sequence"));
    }
    Ok(StepSequence(raw))
}

fn spec_from_pb(spec: pb::BehaviorSpec) -> Result<BehaviorSpec, CodecError> {
    Ok(BehaviorSpec {
        name: behavior_name(spec.name)?,
        observation: ObservationSpec {
            shapes: spec
                .observation_shapes
                .into_iter()
                .map(|s| Shape::from_vec(s.dims))
                .collect(),
        },
        action: ActionSpec {
            continuous: spec.continuous,
            discrete_branches: spec.discrete_branches.into_iter().collect(),
        },
    })
}

fn handshake_from_pb(m: pb::Handshake) -> Result<Handshake, CodecError> {
    Ok(Handshake {
        bridge_version: required(m.bridge_version, "bridge_version")?,
        package_version: m.package_version,
        bridge_name: m.bridge_name,
        behaviors: m
            .behaviors
            .into_iter()
            .map(spec_from_pb)
            .collect::<Result<_, _>>()?,
    })
}

fn ack_from_pb(m: pb::HandshakeAck) -> Result<HandshakeAck, CodecError> {
    Ok(HandshakeAck {
        accepted: m.accepted,
        trainer_version: required(m.trainer_version, "trainer_version")?,
        seed: m.seed,
        // Unset means a single area.
        num_areas: m.num_areas.max(1),
        reason: m.reason,
    })
}

fn tensor_from_pb(t: pb::Tensor) -> Result<ObservationTensor, CodecError> {
    let tensor = ObservationTensor {
        shape: Shape::from_vec(t.shape),
        data: t.data,
    };
    match tensor.element_count() {
        Some(n) if n == tensor.data.len() => Ok(tensor),
        Some(_) => Err(CodecError::malformed(format!(
            "tensor data length {} does not match shape {:?}",
            tensor.data.len(),
            tensor.shape.as_slice()
        ))),
        None => Err(CodecError::malformed(format!(
            "tensor shape {:?} is too large",
            tensor.shape.as_slice()
        ))),
    }
}

fn record_from_pb(r: pb::AgentRecord) -> Result<AgentRecord, CodecError> {
    let signal = match pb::EpisodeSignal::try_from(r.signal) {
        Ok(pb::EpisodeSignal::Running) => EpisodeSignal::Running,
        Ok(pb::EpisodeSignal::Done) => EpisodeSignal::Done,
        Ok(pb::EpisodeSignal::Interrupted) => EpisodeSignal::Interrupted,
        Err(_) => {
            return Err(CodecError::malformed(format!(
                "invalid episode signal {}",
                r.signal
            )))
        }
    };
    let tensors = r
        .observations
        .into_iter()
        .map(tensor_from_pb)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AgentRecord {
        agent: AgentId(r.agent_id),
        observation: Observation::new(tensors),
        reward: r.reward,
        signal,
        group_id: r.group_id,
        group_reward: r.group_reward,
        action_mask: r.action_mask,
    })
}

fn request_from_pb(m: pb::StepRequest) -> Result<StepRequest, CodecError> {
    let sequence = sequence(m.sequence)?;
    let mut batch = StepBatch::new();
    for group in m.behaviors {
        let name = behavior_name(group.name)?;
        for record in group.agents {
            batch.insert(name.clone(), record_from_pb(record)?);
        }
    }
    Ok(StepRequest {
        sequence,
        batch,
        new_behaviors: m
            .new_behaviors
            .into_iter()
            .map(spec_from_pb)
            .collect::<Result<_, _>>()?,
    })
}

fn response_from_pb(m: pb::StepResponse) -> Result<StepResponse, CodecError> {
    let sequence = sequence(m.sequence)?;
    let mut actions = ActionBatch::new();
    for group in m.behaviors {
        let name = behavior_name(group.name)?;
        for a in group.agents {
            actions.insert(
                name.clone(),
                AgentId(a.agent_id),
                Action {
                    continuous: a.continuous,
                    discrete: a.discrete,
                },
            );
        }
    }
    Ok(StepResponse { sequence, actions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use proptest::prelude::*;
    use smallvec::smallvec;

    // ── Proptest strategies ─────────────────────────────────────

    fn arb_tensor() -> impl Strategy<Value = ObservationTensor> {
        prop::collection::vec(1u32..4, 1..=3).prop_flat_map(|dims| {
            let n: usize = dims.iter().map(|&d| d as usize).product();
            prop::collection::vec(-1.0e6f32..1.0e6, n).prop_map(move |data| ObservationTensor {
                shape: Shape::from_slice(&dims),
                data,
            })
        })
    }

    fn arb_signal() -> impl Strategy<Value = EpisodeSignal> {
        prop_oneof![
            Just(EpisodeSignal::Running),
            Just(EpisodeSignal::Done),
            Just(EpisodeSignal::Interrupted),
        ]
    }

    fn arb_record() -> impl Strategy<Value = AgentRecord> {
        (
            any::<u32>(),
            prop::collection::vec(arb_tensor(), 0..3),
            -100.0f32..100.0,
            arb_signal(),
            prop_oneof![Just(0u32), any::<u32>()],
            -10.0f32..10.0,
            prop::collection::vec(any::<bool>(), 0..6),
        )
            .prop_map(
                |(id, tensors, reward, signal, group_id, group_reward, action_mask)| AgentRecord {
                    agent: AgentId(id),
                    observation: Observation::new(tensors),
                    reward,
                    signal,
                    group_id,
                    group_reward,
                    action_mask,
                },
            )
    }

    fn arb_batch() -> impl Strategy<Value = StepBatch> {
        prop::collection::vec(
            (
                prop_oneof![
                    Just("Runner".to_string()),
                    Just("Striker?team=1".to_string()),
                    "[A-Za-z]{1,12}",
                ],
                prop::collection::vec(arb_record(), 0..5),
            ),
            0..4,
        )
        .prop_map(|groups| {
            let mut batch = StepBatch::new();
            for (name, records) in groups {
                for r in records {
                    batch.insert(BehaviorName::new(name.clone()), r);
                }
            }
            batch
        })
    }

    fn runner_spec() -> BehaviorSpec {
        BehaviorSpec {
            name: BehaviorName::new("Runner"),
            observation: ObservationSpec::vector(8),
            action: ActionSpec::continuous(2),
        }
    }

    fn one_tensor_request(shape: Vec<u32>, data: Vec<f32>) -> Envelope {
        seal(Payload::StepRequest(pb::StepRequest {
            sequence: 1,
            behaviors: vec![pb::BehaviorRecords {
                name: "Runner".into(),
                agents: vec![pb::AgentRecord {
                    observations: vec![pb::Tensor { shape, data }],
                    ..Default::default()
                }],
            }],
            new_behaviors: Vec::new(),
        }))
    }

    proptest! {
        #[test]
        fn step_batch_roundtrip(seq in 1u64..u64::MAX, batch in arb_batch()) {
            let bytes = encode_step_request(StepSequence(seq), &batch, &[]);
            match decode(&bytes).unwrap() {
                Message::StepRequest(req) => {
                    prop_assert_eq!(req.sequence, StepSequence(seq));
                    prop_assert_eq!(req.batch, batch);
                }
                other => prop_assert!(false, "expected StepRequest, got {:?}", other),
            }
        }

        #[test]
        fn encoding_is_deterministic(batch in arb_batch()) {
            let a = encode_step_request(StepSequence(9), &batch, &[]);
            let b = encode_step_request(StepSequence(9), &batch, &[]);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn truncation_never_panics(batch in arb_batch(), cut in 0usize..512) {
            let bytes = encode_step_request(StepSequence(1), &batch, &[]);
            let cut = cut.min(bytes.len());
            // Any prefix either decodes (fields end on a boundary) or is Malformed.
            if let Err(e) = decode(&bytes[..cut]) {
                let is_malformed = matches!(e, CodecError::Malformed { .. });
                prop_assert!(is_malformed);
            }
        }
    }

    #[test]
    fn response_decodes_as_inbound_actions() {
        let mut actions = ActionBatch::new();
        actions.insert(
            BehaviorName::new("Runner"),
            AgentId(0),
            Action::continuous(vec![0.5, -0.5]),
        );
        let bytes = encode(&Message::StepResponse(StepResponse {
            sequence: StepSequence(4),
            actions: actions.clone(),
        }));
        assert_eq!(
            decode_inbound(&bytes).unwrap(),
            Inbound::Actions {
                sequence: StepSequence(4),
                actions,
            }
        );
    }

    #[test]
    fn handshake_and_ack_survive_encoding() {
        let hs = Message::Handshake(Handshake {
            bridge_version: "1.0.0".into(),
            package_version: "0.1.0".into(),
            bridge_name: "test".into(),
            behaviors: vec![runner_spec()],
        });
        assert_eq!(decode(&encode(&hs)).unwrap(), hs);

        let ack = Message::HandshakeAck(HandshakeAck {
            accepted: false,
            trainer_version: "2.0.0".into(),
            seed: 77,
            num_areas: 4,
            reason: Some("version mismatch".into()),
        });
        assert_eq!(from_envelope(to_envelope(&ack)).unwrap(), ack);
    }

    #[test]
    fn stacked_behavior_spec_survives_encoding() {
        let spec = BehaviorSpec {
            name: BehaviorName::new("Swarm"),
            observation: ObservationSpec {
                shapes: vec![smallvec![0, 3], smallvec![4]],
            },
            action: ActionSpec {
                continuous: 1,
                discrete_branches: smallvec![3, 2],
            },
        };
        let bytes = encode_step_request(StepSequence(1), &StepBatch::new(), &[spec.clone()]);
        match decode(&bytes).unwrap() {
            Message::StepRequest(req) => assert_eq!(req.new_behaviors, vec![spec]),
            other => panic!("expected StepRequest, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut bytes = encode(&Message::Close(Close {
            reason: Some("bye".into()),
        }));
        // Fields a newer peer might add, under numbers this schema lacks.
        prost::encoding::uint64::encode(15, &7, &mut bytes);
        prost::encoding::string::encode(16, &"future".to_string(), &mut bytes);
        assert_eq!(
            decode(&bytes).unwrap(),
            Message::Close(Close {
                reason: Some("bye".into())
            })
        );
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut envelope = to_envelope(&Message::Reset(Reset { seed: Some(3) }));
        envelope.format_version = FORMAT_VERSION + 1;
        assert_eq!(
            decode(&envelope.encode_to_vec()),
            Err(CodecError::UnsupportedVersion {
                found: FORMAT_VERSION + 1
            })
        );
    }

    #[test]
    fn envelope_without_version_or_payload_is_malformed() {
        let mut envelope = to_envelope(&Message::Close(Close::default()));
        envelope.format_version = 0;
        assert!(matches!(
            from_envelope(envelope),
            Err(CodecError::Malformed { .. })
        ));

        let empty = Envelope {
            format_version: FORMAT_VERSION,
            payload: None,
        };
        assert!(matches!(
            inbound_from_envelope(empty),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn undecodable_bytes_are_malformed() {
        assert!(matches!(
            decode(&[0xff, 0xff, 0xff]),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn missing_sequence_is_malformed() {
        let envelope = seal(Payload::StepResponse(pb::StepResponse::default()));
        match inbound_from_envelope(envelope) {
            Err(CodecError::Malformed { detail }) => assert!(detail.contains("sequence")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn unnamed_behavior_is_malformed() {
        let envelope = seal(Payload::StepResponse(pb::StepResponse {
            sequence: 1,
            behaviors: vec![pb::BehaviorActions::default()],
        }));
        assert!(matches!(
            inbound_from_envelope(envelope),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn tensor_data_must_fill_shape() {
        let envelope = one_tensor_request(vec![4], vec![1.0, 2.0]);
        assert!(matches!(
            from_envelope(envelope),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn overflowing_tensor_shape_is_malformed() {
        let bytes = one_tensor_request(vec![u32::MAX; 3], vec![1.0]).encode_to_vec();
        match decode(&bytes) {
            Err(CodecError::Malformed { detail }) => assert!(detail.contains("too large")),
            other => panic!("expected Malformed, got {other:?}"),
        }
        assert!(matches!(
            decode_inbound(&bytes),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_episode_signal_is_malformed() {
        let mut envelope = one_tensor_request(vec![1], vec![0.0]);
        if let Some(Payload::StepRequest(req)) = envelope.payload.as_mut() {
            req.behaviors[0].agents[0].signal = 9;
        }
        match from_envelope(envelope) {
            Err(CodecError::Malformed { detail }) => assert!(detail.contains("signal")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn trainer_bound_kinds_rejected_inbound() {
        let bytes = encode_step_request(StepSequence(1), &StepBatch::new(), &[]);
        assert!(matches!(
            decode_inbound(&bytes),
            Err(CodecError::Malformed { .. })
        ));
    }
}
