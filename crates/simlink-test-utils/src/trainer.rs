//! A scripted in-process trainer.
//!
//! [`MockTrainer::spawn`] serves the `TrainerLink` gRPC service on a
//! loopback port from its own tokio runtime, so a bridge that reconnects
//! is served again by the same script. Every handshake and step request
//! is recorded for later assertions.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use simlink_codec::proto::trainer_link_server::{TrainerLink, TrainerLinkServer};
use simlink_codec::{
    from_envelope, to_envelope, Envelope, Handshake, HandshakeAck, Message, StepRequest,
    StepResponse, COMMUNICATION_VERSION, FORMAT_VERSION, MAX_MESSAGE_SIZE,
};
use simlink_core::{Action, ActionBatch, AgentId, BehaviorName, StepSequence};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

/// What the trainer does in answer to one step request.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Answer with the request's own sequence.
    Actions(ActionBatch),
    /// Answer with an arbitrary sequence.
    ActionsFor {
        sequence: StepSequence,
        actions: ActionBatch,
    },
    /// Wait, then perform the inner reply.
    Delayed(Duration, Box<Reply>),
    /// Send any message, e.g. a reset.
    Message(Message),
    /// Send an envelope that carries no message.
    Garbage,
    /// End the stream with an error status.
    Hangup,
}

type Responder = Box<dyn FnMut(&StepRequest) -> Vec<Reply> + Send>;

/// How the mock trainer behaves.
pub struct TrainerScript {
    pub accept: bool,
    pub trainer_version: String,
    pub reject_reason: Option<String>,
    pub seed: u64,
    pub num_areas: u32,
    /// Stop reading the bridge's stream once the handshake is done.
    pub stall: bool,
    pub responder: Responder,
}

impl Default for TrainerScript {
    fn default() -> Self {
        Self {
            accept: true,
            trainer_version: COMMUNICATION_VERSION.to_string(),
            reject_reason: None,
            seed: 0,
            num_areas: 1,
            stall: false,
            responder: Box::new(|_| Vec::new()),
        }
    }
}

impl TrainerScript {
    /// Accept every handshake and answer requests with `f`.
    pub fn responding(f: impl FnMut(&StepRequest) -> Vec<Reply> + Send + 'static) -> Self {
        Self {
            responder: Box::new(f),
            ..Self::default()
        }
    }

    /// Accept every handshake and never answer a request.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Accept every handshake, then never read another message.
    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Self::default()
        }
    }

    /// Refuse every handshake.
    pub fn rejecting(reason: &str) -> Self {
        Self {
            accept: false,
            reject_reason: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.trainer_version = version.to_string();
        self
    }
}

/// Build an action batch answering every agent in `req`.
pub fn answer_all(
    req: &StepRequest,
    mut f: impl FnMut(&BehaviorName, AgentId) -> Action,
) -> ActionBatch {
    let mut out = ActionBatch::new();
    for (behavior, records) in req.batch.iter() {
        for record in records {
            out.insert(behavior.clone(), record.agent, f(behavior, record.agent));
        }
    }
    out
}

#[derive(Default)]
struct Recorded {
    handshakes: Vec<Handshake>,
    requests: Vec<StepRequest>,
    connections: usize,
    closes: usize,
}

type Outbox = mpsc::Sender<Result<Envelope, Status>>;

/// The stream currently being served.
#[derive(Clone)]
struct Live {
    outbox: Outbox,
    hangup: Arc<Notify>,
}

struct Shared {
    script: Mutex<TrainerScript>,
    recorded: Mutex<Recorded>,
    current: Mutex<Option<Live>>,
}

impl Shared {
    fn script(&self) -> MutexGuard<'_, TrainerScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> MutexGuard<'_, Option<Live>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget `outbox` if it is still the live stream.
    fn release(&self, outbox: &Outbox) {
        let mut current = self.current();
        if current
            .as_ref()
            .is_some_and(|live| live.outbox.same_channel(outbox))
        {
            *current = None;
        }
    }

    fn hang_up(&self) {
        if let Some(live) = self.current().take() {
            live.hangup.notify_one();
        }
    }
}

struct MockService {
    shared: Arc<Shared>,
}

#[tonic::async_trait]
impl TrainerLink for MockService {
    type LinkStream = ReceiverStream<Result<Envelope, Status>>;

    async fn link(
        &self,
        request: Request<Streaming<Envelope>>,
    ) -> Result<Response<Self::LinkStream>, Status> {
        let (outbox, replies) = mpsc::channel(16);
        tokio::spawn(serve_link(
            request.into_inner(),
            outbox,
            Arc::clone(&self.shared),
        ));
        Ok(Response::new(ReceiverStream::new(replies)))
    }
}

/// An in-process trainer listening on `127.0.0.1`.
pub struct MockTrainer {
    port: u16,
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    runtime: Option<Runtime>,
}

impl MockTrainer {
    pub fn spawn(script: TrainerScript) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mock-trainer")
            .enable_all()
            .build()?;
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0"))?;
        let port = listener.local_addr()?.port();
        let shared = Arc::new(Shared {
            script: Mutex::new(script),
            recorded: Mutex::new(Recorded::default()),
            current: Mutex::new(None),
        });
        let service = TrainerLinkServer::new(MockService {
            shared: Arc::clone(&shared),
        })
        .max_decoding_message_size(MAX_MESSAGE_SIZE)
        .max_encoding_message_size(MAX_MESSAGE_SIZE);
        let (shutdown, stopped) = oneshot::channel::<()>();
        runtime.spawn(async move {
            let served = Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = stopped.await;
                })
                .await;
            if let Err(e) = served {
                debug!("mock trainer: server ended: {e}");
            }
        });
        Ok(Self {
            port,
            shared,
            shutdown: Some(shutdown),
            runtime: Some(runtime),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.shared.recorded().handshakes.clone()
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.shared.recorded().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.shared.recorded().requests.len()
    }

    /// Sequence numbers of every request received, in arrival order.
    pub fn sequences(&self) -> Vec<u64> {
        self.shared
            .recorded()
            .requests
            .iter()
            .map(|r| r.sequence.0)
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.recorded().connections
    }

    /// Close messages received from the bridge.
    pub fn closes_received(&self) -> usize {
        self.shared.recorded().closes
    }

    /// Push a message to the bridge outside the request/reply script.
    pub fn send(&self, msg: &Message) -> io::Result<()> {
        let outbox = self
            .shared
            .current()
            .as_ref()
            .map(|live| live.outbox.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no live connection"))?;
        outbox
            .try_send(Ok(to_envelope(msg)))
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
    }

    /// End the live stream, if any. The trainer keeps listening.
    pub fn drop_connection(&self) {
        self.shared.hang_up();
    }

    /// Poll until `pred` holds or `timeout` elapses.
    pub fn wait_until(&self, timeout: Duration, mut pred: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn wait_for_requests(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |t| t.request_count() >= n)
    }

    pub fn wait_for_connections(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |t| t.connection_count() >= n)
    }
}

impl Drop for MockTrainer {
    fn drop(&mut self) {
        self.shared.hang_up();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_millis(500));
        }
    }
}

/// Serve one `Link` stream: handshake, then the script.
async fn serve_link(mut inbound: Streaming<Envelope>, outbox: Outbox, shared: Arc<Shared>) {
    let hello = match inbound.message().await {
        Ok(Some(envelope)) => match from_envelope(envelope) {
            Ok(Message::Handshake(h)) => h,
            _ => return,
        },
        _ => return,
    };
    let (ack, stall) = {
        let script = shared.script();
        let ack = HandshakeAck {
            accepted: script.accept,
            trainer_version: script.trainer_version.clone(),
            seed: script.seed,
            num_areas: script.num_areas,
            reason: script.reject_reason.clone(),
        };
        (ack, script.stall)
    };
    {
        let mut rec = shared.recorded();
        rec.connections += 1;
        rec.handshakes.push(hello);
    }

    let accepted = ack.accepted;
    let hangup = Arc::new(Notify::new());
    if accepted {
        // Live before the ack goes out, so a test may push right after
        // the bridge connects.
        *shared.current() = Some(Live {
            outbox: outbox.clone(),
            hangup: Arc::clone(&hangup),
        });
    }
    let acked = outbox
        .send(Ok(to_envelope(&Message::HandshakeAck(ack))))
        .await
        .is_ok();
    if !acked || !accepted {
        shared.release(&outbox);
        return;
    }

    if stall {
        hangup.notified().await;
        let _ = outbox.send(Err(Status::unavailable("trainer hung up"))).await;
        return;
    }

    loop {
        let next = tokio::select! {
            _ = hangup.notified() => {
                let _ = outbox.send(Err(Status::unavailable("trainer hung up"))).await;
                return;
            }
            next = inbound.message() => next,
        };
        let envelope = match next {
            Ok(Some(envelope)) => envelope,
            Ok(None) | Err(_) => break,
        };
        match from_envelope(envelope) {
            Ok(Message::StepRequest(req)) => {
                shared.recorded().requests.push(req.clone());
                let replies = {
                    let mut script = shared.script();
                    (script.responder)(&req)
                };
                for reply in replies {
                    if !perform(reply, req.sequence, &outbox).await {
                        shared.release(&outbox);
                        return;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                shared.recorded().closes += 1;
                break;
            }
            Ok(other) => debug!("mock trainer: ignoring {}", other.kind_name()),
            Err(e) => debug!("mock trainer: undecodable message: {e}"),
        }
    }
    shared.release(&outbox);
}

/// Carry out one reply. Returns false when the stream should end.
async fn perform(mut reply: Reply, sequence: StepSequence, outbox: &Outbox) -> bool {
    loop {
        let envelope = match reply {
            Reply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
                continue;
            }
            Reply::Actions(actions) => {
                to_envelope(&Message::StepResponse(StepResponse { sequence, actions }))
            }
            Reply::ActionsFor { sequence, actions } => {
                to_envelope(&Message::StepResponse(StepResponse { sequence, actions }))
            }
            Reply::Message(msg) => to_envelope(&msg),
            Reply::Garbage => Envelope {
                format_version: FORMAT_VERSION,
                payload: None,
            },
            Reply::Hangup => {
                let _ = outbox.send(Err(Status::unavailable("trainer hung up"))).await;
                return false;
            }
        };
        return outbox.send(Ok(envelope)).await.is_ok();
    }
}
