//! Background reader thread: envelopes from the stream into the inbox.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use log::debug;
use simlink_codec::Envelope;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tonic::Streaming;

/// Spawn the reader for one connection.
///
/// Each envelope is handed over through `inbox`, a one-slot channel, so
/// the thread blocks until the tick side has taken the previous one.
/// The thread exits when the trainer ends the stream, on a stream
/// error, when the receiving side is dropped, or when `stop` fires or
/// is dropped. In every case `inbox` is dropped with it, which the tick
/// side observes as a closed channel.
pub(crate) fn spawn(
    runtime: Handle,
    mut inbound: Streaming<Envelope>,
    inbox: Sender<Envelope>,
    mut stop: oneshot::Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("simlink-rx".into())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    let next = tokio::select! {
                        _ = &mut stop => {
                            debug!("reader: link dropped, exiting");
                            return;
                        }
                        next = inbound.message() => next,
                    };
                    match next {
                        Ok(Some(envelope)) => {
                            if inbox.send(envelope).is_err() {
                                debug!("reader: inbox dropped, exiting");
                                return;
                            }
                        }
                        Ok(None) => {
                            debug!("reader: trainer closed the stream");
                            return;
                        }
                        Err(status) => {
                            debug!("reader: stream error: {status}");
                            return;
                        }
                    }
                }
            })
        })
}
