//! Handshake run on a freshly opened `TrainerLink` stream.

use std::time::Duration;

use log::{debug, info};
use simlink_codec::proto::trainer_link_client::TrainerLinkClient;
use simlink_codec::{from_envelope, is_compatible, to_envelope, Envelope, Handshake, Message};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::Streaming;

use crate::channel::TrainerInfo;
use crate::error::ConnectError;

/// Messages queued for the trainer but not yet written. A trainer that
/// falls this far behind is treated as stalled.
pub(crate) const OUTBOUND_CAPACITY: usize = 2;

/// Both directions of an accepted stream.
pub(crate) struct Accepted {
    pub outbound: mpsc::Sender<Envelope>,
    pub inbound: Streaming<Envelope>,
    pub trainer: TrainerInfo,
}

/// Open the stream with `hello` queued first and wait up to `timeout`
/// for the trainer's ack.
pub(crate) async fn perform(
    client: &mut TrainerLinkClient<Channel>,
    endpoint: &str,
    hello: &Handshake,
    timeout: Duration,
) -> Result<Accepted, ConnectError> {
    let failed = |detail: String| ConnectError::HandshakeFailed {
        endpoint: endpoint.to_string(),
        detail,
    };

    debug!(
        "handshake -> {endpoint}: bridge_version={} behaviors={}",
        hello.bridge_version,
        hello.behaviors.len()
    );
    let (outbound, requests) = mpsc::channel(OUTBOUND_CAPACITY);
    outbound
        .try_send(to_envelope(&Message::Handshake(hello.clone())))
        .map_err(|e| failed(format!("queueing handshake: {e}")))?;

    let exchange = async {
        let mut inbound = client.link(ReceiverStream::new(requests)).await?.into_inner();
        let first = inbound.message().await?;
        Ok::<_, tonic::Status>((inbound, first))
    };
    let (inbound, first) = match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(opened)) => opened,
        Ok(Err(status)) => return Err(failed(format!("stream refused: {status}"))),
        Err(_) => return Err(failed(format!("no ack within {timeout:?}"))),
    };
    let envelope = first.ok_or_else(|| failed("trainer closed the stream".into()))?;

    let ack = match from_envelope(envelope) {
        Ok(Message::HandshakeAck(ack)) => ack,
        Ok(other) => return Err(failed(format!("expected HandshakeAck, got {}", other.kind_name()))),
        Err(e) => return Err(failed(e.to_string())),
    };

    if !ack.accepted {
        return Err(ConnectError::HandshakeRejected {
            reason: ack
                .reason
                .unwrap_or_else(|| "trainer refused the bridge".into()),
            trainer_version: ack.trainer_version,
        });
    }
    if !is_compatible(&hello.bridge_version, &ack.trainer_version) {
        return Err(ConnectError::HandshakeRejected {
            reason: format!(
                "bridge speaks {} but trainer speaks {}",
                hello.bridge_version, ack.trainer_version
            ),
            trainer_version: ack.trainer_version,
        });
    }

    info!(
        "connected to trainer {} at {endpoint} (seed={}, areas={})",
        ack.trainer_version, ack.seed, ack.num_areas
    );
    Ok(Accepted {
        outbound,
        inbound,
        trainer: TrainerInfo {
            version: ack.trainer_version,
            seed: ack.seed,
            num_areas: ack.num_areas,
        },
    })
}
