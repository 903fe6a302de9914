//! Transport endpoints and the gRPC channels they open.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint as GrpcEndpoint};

use crate::error::BoxError;

#[cfg(unix)]
use hyper_util::rt::TokioIo;
#[cfg(unix)]
use tokio::net::UnixStream;
#[cfg(unix)]
use tonic::transport::Uri;
#[cfg(unix)]
use tower::service_fn;

/// Port a trainer listens on when driving an interactive editor session.
pub const DEFAULT_EDITOR_PORT: u16 = 5004;

/// Base port for headless training workers; worker `n` uses `base + n`.
pub const DEFAULT_TRAINING_PORT: u16 = 5005;

/// Where the trainer listens.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// A TCP host and port.
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// A Unix domain socket path.
    Unix(PathBuf),
}

impl Endpoint {
    /// TCP endpoint on the loopback interface.
    pub fn localhost(port: u16) -> Self {
        Self::Tcp {
            host: "127.0.0.1".into(),
            port,
        }
    }

    /// The loopback endpoint of training worker `worker_id`.
    pub fn for_worker(worker_id: u16) -> Self {
        Self::localhost(DEFAULT_TRAINING_PORT.saturating_add(worker_id))
    }

    /// Open a gRPC channel to this endpoint, giving up after `timeout`.
    pub(crate) async fn open(&self, timeout: Duration) -> Result<Channel, BoxError> {
        match tokio::time::timeout(timeout, self.dial(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no connection within {timeout:?}"),
            )
            .into()),
        }
    }

    async fn dial(&self, timeout: Duration) -> Result<Channel, BoxError> {
        match self {
            Self::Tcp { host, port } => {
                let authority = if host.contains(':') {
                    format!("[{host}]:{port}")
                } else {
                    format!("{host}:{port}")
                };
                let channel = GrpcEndpoint::from_shared(format!("http://{authority}"))?
                    .connect_timeout(timeout)
                    .tcp_nodelay(true)
                    .connect()
                    .await?;
                Ok(channel)
            }
            #[cfg(unix)]
            Self::Unix(path) => {
                let path = path.clone();
                // The builder needs a URI; the connector ignores it.
                let channel = GrpcEndpoint::from_static("http://[::]:50051")
                    .connect_timeout(timeout)
                    .connect_with_connector(service_fn(move |_: Uri| {
                        let path = path.clone();
                        async move {
                            let stream = UnixStream::connect(path).await?;
                            Ok::<_, io::Error>(TokioIo::new(stream))
                        }
                    }))
                    .await?;
                Ok(channel)
            }
            #[cfg(not(unix))]
            Self::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )
            .into()),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::localhost(DEFAULT_EDITOR_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// An endpoint string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint '{input}': {reason}")]
pub struct EndpointError {
    input: String,
    reason: &'static str,
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    /// Accepts `tcp://host:port`, bare `host:port`, and `unix:///path`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| EndpointError {
            input: s.to_string(),
            reason,
        };
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(err("empty socket path"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let hostport = s.strip_prefix("tcp://").unwrap_or(s);
        let (host, port) = hostport.rsplit_once(':').ok_or_else(|| err("missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(err("empty host"));
        }
        let port = port.parse().map_err(|_| err("port is not a number"))?;
        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(e: Endpoint) -> Self {
        e.to_string()
    }
}
