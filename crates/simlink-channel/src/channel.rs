//! [`RpcChannel`]: the single connection to the trainer.
//!
//! # Ownership model
//!
//! The channel exclusively owns the I/O runtime, the `TrainerLink`
//! stream, the reader thread's inbox, and the [`ConnectionCell`].
//! Callers observe the state through [`RpcChannel::status`]. Only one
//! send and one receive are logically in flight; the exchange protocol
//! above serialises its own rounds.
//!
//! The channel is driven from plain threads. Its blocking calls must not
//! be made from inside another async runtime.
//!
//! # Failure and recovery
//!
//! Any transport error moves the channel to `Faulted`, tears the link
//! down, and schedules a reconnect per the [`ReconnectPolicy`]. Sends
//! never block: a trainer that stops draining the stream fills the
//! outbound queue, and the next send faults the channel. Until a
//! reconnect succeeds every operation fails with `ChannelClosed`.
//! Reconnects run on a background thread driven by
//! [`RpcChannel::poll_reconnect`], so the tick never waits on a TCP
//! connect. A rejected handshake latches: no further automatic attempts
//! are made until [`RpcChannel::connect`] is called explicitly.
//!
//! # Shutdown
//!
//! [`RpcChannel::close`] (or drop) moves through `Closing` to
//! `Disconnected`. The trainer gets a best-effort `Close` and a short
//! grace period to end the stream. Unread messages are discarded. A pending background
//! attempt is abandoned and its result, if any, dropped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, error, info, warn};
use simlink_codec::proto::trainer_link_client::TrainerLinkClient;
use simlink_codec::{
    to_envelope, BehaviorSpec, Close, Envelope, Handshake, Message, MAX_MESSAGE_SIZE,
};
use simlink_core::{ConnectionCell, ConnectionState, ConnectionStatus};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tonic::transport::Channel;

use crate::backoff::{ReconnectBackoff, ReconnectPolicy};
use crate::endpoint::Endpoint;
use crate::error::{ConnectError, RecvError, SendError};
use crate::{handshake, reader};

/// How long [`RpcChannel::close`] waits for the trainer to end the
/// stream after the `Close` notice.
const CLOSE_GRACE: Duration = Duration::from_millis(200);

// ── Configuration ────────────────────────────────────────────────

/// Everything needed to open and re-open the channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Where the trainer listens.
    pub endpoint: Endpoint,
    /// Bound on opening the transport. Default: 1000 ms.
    pub connect_timeout: Duration,
    /// Bound on the handshake round trip. Default: 2000 ms.
    pub handshake_timeout: Duration,
    /// Retry behaviour after failures.
    pub reconnect: ReconnectPolicy,
    /// Identity sent in every handshake.
    pub hello: Handshake,
}

impl ChannelConfig {
    /// Defaults for `endpoint`, identifying the bridge as `bridge_name`.
    pub fn new(endpoint: Endpoint, bridge_name: impl Into<String>) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_millis(1000),
            handshake_timeout: Duration::from_millis(2000),
            reconnect: ReconnectPolicy::default(),
            hello: Handshake {
                bridge_version: simlink_codec::COMMUNICATION_VERSION.to_string(),
                package_version: env!("CARGO_PKG_VERSION").to_string(),
                bridge_name: bridge_name.into(),
                behaviors: Vec::new(),
            },
        }
    }
}

/// What the trainer told us in its handshake ack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainerInfo {
    /// Trainer's communication version.
    pub version: String,
    /// Seed requested by the trainer, 0 when unspecified.
    pub seed: u64,
    /// Number of training areas requested.
    pub num_areas: u32,
}

/// Progress reported by [`RpcChannel::poll_reconnect`].
#[derive(Debug)]
pub enum ReconnectEvent {
    /// A background attempt was started.
    Attempting {
        /// 1-based count of consecutive attempts.
        attempt: u32,
    },
    /// An attempt succeeded; the channel is `Ready`.
    Connected {
        /// Connection epoch, incremented on every success.
        epoch: u64,
        /// The trainer's handshake details.
        trainer: TrainerInfo,
    },
    /// An attempt failed.
    Failed {
        /// Why.
        error: ConnectError,
        /// Delay before the next attempt, `None` when no further
        /// automatic attempt will be made.
        retry_in: Option<Duration>,
    },
}

// ── Link ─────────────────────────────────────────────────────────

/// One established connection: outbound queue, inbox, reader thread.
struct Link {
    outbound: Option<mpsc::Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    stop: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    trainer: TrainerInfo,
    _client: TrainerLinkClient<Channel>,
}

impl Link {
    /// Queue a `Close` notice, end the request stream, and give the
    /// trainer [`CLOSE_GRACE`] to hang up.
    fn finish(&mut self, reason: &str) {
        if let Some(outbound) = self.outbound.take() {
            let bye = to_envelope(&Message::Close(Close {
                reason: Some(reason.into()),
            }));
            if let Err(e) = outbound.try_send(bye) {
                debug!("close notice not delivered: {e}");
            }
        }
        let deadline = Instant::now() + CLOSE_GRACE;
        while self.inbox.recv_deadline(deadline).is_ok() {}
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // End the request stream and stop the reader, then drop the
        // inbox so a reader blocked on a full slot wakes too, then join.
        self.outbound = None;
        self.stop = None;
        drop(std::mem::replace(&mut self.inbox, crossbeam_channel::never()));
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                error!("reader thread panicked");
            }
        }
    }
}

/// Open, handshake, and start the reader. Runs on whichever thread
/// connects: the caller for [`RpcChannel::connect`], the connector
/// thread otherwise.
async fn establish(
    runtime: Handle,
    endpoint: &Endpoint,
    hello: &Handshake,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    mut on_handshaking: impl FnMut(),
) -> Result<Link, ConnectError> {
    let name = endpoint.to_string();
    let channel = endpoint
        .open(connect_timeout)
        .await
        .map_err(|source| ConnectError::Unreachable {
            endpoint: name.clone(),
            source,
        })?;
    on_handshaking();
    let mut client = TrainerLinkClient::new(channel)
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE);
    let accepted = handshake::perform(&mut client, &name, hello, handshake_timeout).await?;
    let (tx, inbox) = crossbeam_channel::bounded(1);
    let (stop, stopped) = oneshot::channel();
    let reader = reader::spawn(runtime, accepted.inbound, tx, stopped).map_err(|e| {
        ConnectError::HandshakeFailed {
            endpoint: name.clone(),
            detail: format!("spawning reader thread: {e}"),
        }
    })?;
    Ok(Link {
        outbound: Some(accepted.outbound),
        inbox,
        stop: Some(stop),
        reader: Some(reader),
        trainer: accepted.trainer,
        _client: client,
    })
}

enum AttemptEvent {
    Handshaking,
    Done(Result<Link, ConnectError>),
}

/// A background connection attempt in progress.
struct Attempt {
    events: Receiver<AttemptEvent>,
    /// State to fall back to if the attempt fails.
    resting: ConnectionState,
}

// ── RpcChannel ───────────────────────────────────────────────────

/// The bridge's single connection to the trainer.
pub struct RpcChannel {
    config: ChannelConfig,
    runtime: Arc<Runtime>,
    cell: ConnectionCell,
    link: Option<Link>,
    attempt: Option<Attempt>,
    backoff: ReconnectBackoff,
    next_attempt_at: Option<Instant>,
    rejected: bool,
    epoch: u64,
}

impl RpcChannel {
    /// A disconnected channel with its own I/O runtime.
    ///
    /// When the reconnect policy is enabled, the first background attempt
    /// is due immediately on the next [`poll_reconnect`](Self::poll_reconnect).
    pub fn new(config: ChannelConfig) -> Result<Self, ConnectError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("simlink-io")
            .enable_all()
            .build()
            .map_err(|source| ConnectError::Runtime { source })?;
        let next_attempt_at = config.reconnect.enabled.then(Instant::now);
        let backoff = ReconnectBackoff::new(config.reconnect.clone());
        Ok(Self {
            config,
            runtime: Arc::new(runtime),
            cell: ConnectionCell::new(),
            link: None,
            attempt: None,
            backoff,
            next_attempt_at,
            rejected: false,
            epoch: 0,
        })
    }

    /// Read-only handle onto the connection state.
    pub fn status(&self) -> ConnectionStatus {
        self.cell.status()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.cell.get()
    }

    /// Number of successful handshakes so far.
    pub fn connection_epoch(&self) -> u64 {
        self.epoch
    }

    /// Handshake details of the current connection.
    pub fn trainer(&self) -> Option<&TrainerInfo> {
        self.link.as_ref().map(|l| &l.trainer)
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    /// Whether the last handshake was rejected.
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Replace the behavior list announced in future handshakes.
    pub fn set_behaviors(&mut self, behaviors: Vec<BehaviorSpec>) {
        self.config.hello.behaviors = behaviors;
    }

    /// Connect to `endpoint` now, blocking for at most the connect plus
    /// handshake timeouts.
    ///
    /// Drops any existing link or pending attempt and clears a latched
    /// handshake rejection. On a retryable failure a background retry is
    /// scheduled per the reconnect policy.
    pub fn connect(&mut self, endpoint: Endpoint) -> Result<(), ConnectError> {
        self.attempt = None;
        self.link = None;
        self.rejected = false;
        self.config.endpoint = endpoint;
        let resting = ConnectionState::Disconnected;
        self.cell.set(ConnectionState::Connecting);

        let cell = &self.cell;
        let result = self.runtime.block_on(establish(
            self.runtime.handle().clone(),
            &self.config.endpoint,
            &self.config.hello,
            self.config.connect_timeout,
            self.config.handshake_timeout,
            || {
                cell.set(ConnectionState::Handshaking);
            },
        ));
        match result {
            Ok(link) => {
                self.install(link);
                Ok(())
            }
            Err(e) => {
                self.after_failure(&e, resting);
                Err(e)
            }
        }
    }

    /// Queue one message for the trainer. Never blocks.
    ///
    /// Only allowed while `Ready` or `Exchanging`. On success the state
    /// becomes `Exchanging` until [`end_round`](Self::end_round). When
    /// the trainer has stopped draining the stream and the outbound
    /// queue is full, the channel faults and `Backpressure` is returned.
    pub fn send(&mut self, envelope: Envelope) -> Result<(), SendError> {
        if !self.cell.get().accepts_rounds() {
            return Err(SendError::ChannelClosed);
        }
        let outbound = self
            .link
            .as_ref()
            .and_then(|l| l.outbound.as_ref())
            .ok_or(SendError::ChannelClosed)?;
        match outbound.try_send(envelope) {
            Ok(()) => {
                self.cell.set(ConnectionState::Exchanging);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.fault("trainer is not draining the stream");
                Err(SendError::Backpressure)
            }
            Err(TrySendError::Closed(_)) => {
                self.fault("outbound stream closed");
                Err(SendError::ChannelClosed)
            }
        }
    }

    /// Block until a message arrives, the channel closes, or `deadline`.
    pub fn receive(&mut self, deadline: Instant) -> Result<Envelope, RecvError> {
        let link = self.link.as_ref().ok_or(RecvError::ChannelClosed)?;
        match link.inbox.recv_deadline(deadline) {
            Ok(envelope) => Ok(envelope),
            Err(RecvTimeoutError::Timeout) => Err(RecvError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                self.fault("trainer connection lost");
                Err(RecvError::ChannelClosed)
            }
        }
    }

    /// Take a message if one is waiting. Never blocks.
    pub fn try_receive(&mut self) -> Result<Option<Envelope>, RecvError> {
        let link = self.link.as_ref().ok_or(RecvError::ChannelClosed)?;
        match link.inbox.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.fault("trainer connection lost");
                Err(RecvError::ChannelClosed)
            }
        }
    }

    /// Mark the outstanding round resolved: `Exchanging` → `Ready`.
    pub fn end_round(&mut self) {
        self.cell
            .transition(ConnectionState::Exchanging, ConnectionState::Ready);
    }

    /// Tear the link down after an unrecoverable error and schedule a
    /// reconnect.
    pub fn fault(&mut self, reason: &str) {
        if self.link.take().is_none() {
            return;
        }
        warn!("channel to {} faulted: {reason}", self.config.endpoint);
        self.cell.set(ConnectionState::Faulted);
        self.schedule_retry();
    }

    /// Drive background reconnection. Never blocks.
    ///
    /// Call once per tick. Returns an event when something happened.
    pub fn poll_reconnect(&mut self, now: Instant) -> Option<ReconnectEvent> {
        if let Some(attempt) = &self.attempt {
            loop {
                match attempt.events.try_recv() {
                    Ok(AttemptEvent::Handshaking) => {
                        self.cell.set(ConnectionState::Handshaking);
                    }
                    Ok(AttemptEvent::Done(Ok(link))) => {
                        self.attempt = None;
                        let trainer = link.trainer.clone();
                        self.install(link);
                        return Some(ReconnectEvent::Connected {
                            epoch: self.epoch,
                            trainer,
                        });
                    }
                    Ok(AttemptEvent::Done(Err(error))) => {
                        let resting = attempt.resting;
                        self.attempt = None;
                        let retry_in = self.after_failure(&error, resting);
                        return Some(ReconnectEvent::Failed { error, retry_in });
                    }
                    Err(TryRecvError::Empty) => return None,
                    Err(TryRecvError::Disconnected) => {
                        let resting = attempt.resting;
                        self.attempt = None;
                        let error = ConnectError::HandshakeFailed {
                            endpoint: self.config.endpoint.to_string(),
                            detail: "connector thread exited without a result".into(),
                        };
                        let retry_in = self.after_failure(&error, resting);
                        return Some(ReconnectEvent::Failed { error, retry_in });
                    }
                }
            }
        }

        if self.link.is_some() || self.rejected {
            return None;
        }
        let due = self.next_attempt_at?;
        if now < due {
            return None;
        }
        self.next_attempt_at = None;
        Some(self.spawn_attempt())
    }

    /// Close the connection: `Closing` → `Disconnected`.
    ///
    /// Sends a best-effort `Close` to the trainer, waits briefly for it
    /// to end the stream, and discards anything unread. No reconnect is
    /// scheduled afterwards.
    pub fn close(&mut self) {
        let prev = self.cell.set(ConnectionState::Closing);
        self.attempt = None;
        self.next_attempt_at = None;
        if let Some(mut link) = self.link.take() {
            link.finish("bridge closing");
            drop(link);
            info!("channel to {} closed", self.config.endpoint);
        } else {
            debug!("close from {prev} with no live link");
        }
        self.cell.set(ConnectionState::Disconnected);
    }

    fn install(&mut self, link: Link) {
        self.link = Some(link);
        self.epoch += 1;
        self.backoff.reset();
        self.next_attempt_at = None;
        self.cell.set(ConnectionState::Ready);
    }

    fn schedule_retry(&mut self) -> Option<Duration> {
        let delay = self.backoff.record_failure();
        match delay {
            Some(d) => {
                self.next_attempt_at = Some(Instant::now() + d);
                debug!("reconnect to {} in {d:?}", self.config.endpoint);
            }
            None => {
                self.next_attempt_at = None;
                warn!(
                    "giving up on {} after {} attempts",
                    self.config.endpoint,
                    self.backoff.failures()
                );
            }
        }
        delay
    }

    fn after_failure(&mut self, e: &ConnectError, resting: ConnectionState) -> Option<Duration> {
        if let ConnectError::HandshakeRejected { .. } = e {
            error!("{e}; not retrying until connect() is called");
            self.rejected = true;
            self.next_attempt_at = None;
            self.cell.set(ConnectionState::Disconnected);
            return None;
        }
        warn!("{e}");
        self.cell.set(resting);
        self.schedule_retry()
    }

    fn spawn_attempt(&mut self) -> ReconnectEvent {
        let resting = match self.cell.get() {
            ConnectionState::Faulted => ConnectionState::Faulted,
            _ => ConnectionState::Disconnected,
        };
        let attempt_no = self.backoff.failures() + 1;
        self.cell.set(ConnectionState::Connecting);
        debug!(
            "connection attempt {attempt_no} to {}",
            self.config.endpoint
        );

        let (tx, events) = crossbeam_channel::bounded(2);
        let endpoint = self.config.endpoint.clone();
        let hello = self.config.hello.clone();
        let connect_timeout = self.config.connect_timeout;
        let handshake_timeout = self.config.handshake_timeout;
        let runtime = Arc::clone(&self.runtime);
        let spawned = thread::Builder::new()
            .name("simlink-connect".into())
            .spawn(move || {
                let progress = tx.clone();
                let result = runtime.block_on(establish(
                    runtime.handle().clone(),
                    &endpoint,
                    &hello,
                    connect_timeout,
                    handshake_timeout,
                    || {
                        let _ = progress.try_send(AttemptEvent::Handshaking);
                    },
                ));
                // If the channel went away meanwhile, the link drops here.
                let _ = tx.send(AttemptEvent::Done(result));
            });

        match spawned {
            Ok(_detached) => {
                self.attempt = Some(Attempt { events, resting });
                ReconnectEvent::Attempting {
                    attempt: attempt_no,
                }
            }
            Err(e) => {
                let error = ConnectError::HandshakeFailed {
                    endpoint: self.config.endpoint.to_string(),
                    detail: format!("spawning connector thread: {e}"),
                };
                let retry_in = self.after_failure(&error, resting);
                ReconnectEvent::Failed { error, retry_in }
            }
        }
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        if self.cell.get() != ConnectionState::Disconnected || self.link.is_some() {
            self.close();
        }
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.cell.get())
            .field("epoch", &self.epoch)
            .field("rejected", &self.rejected)
            .finish()
    }
}
