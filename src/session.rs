//! Session task owning the device link.
//!
//! Every protocol I/O operation goes through one task, which owns the
//! transport, the [`FrameBuffer`] and the pending-measurement slot. Callers
//! talk to it through a cheap, cloneable [`SessionHandle`] backed by an mpsc
//! queue, so no protocol state is ever shared across tasks.
//!
//! # Architecture
//!
//! ```text
//! Client ──┐
//! Poller ──┴─► mpsc::Sender<Request> ─► Session Task ─► Transport::write
//!                                           ▲
//!                    Transport notifications┘ ─► FrameBuffer ─► Response ─► on_sample
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::command::Command;
use crate::error::{Result, WattchError};
use crate::measurement::{Measurement, Response};
use crate::protocol::{FeedResult, FrameBuffer};
use crate::transport::Transport;

/// Default request queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Consumer of decoded samples. Runs on the session task.
pub type SampleHandler = Box<dyn FnMut(Measurement) + Send + 'static>;

/// Work item for the session task.
enum Request {
    Command {
        command: Command,
        done: oneshot::Sender<Result<()>>,
    },
    Measure {
        reply: oneshot::Sender<Result<Measurement>>,
    },
    Shutdown {
        done: oneshot::Sender<Result<()>>,
    },
}

/// Handle for submitting work to the session task.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::Sender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Command { command, .. } => write!(f, "Command({})", command.name()),
            Request::Measure { .. } => f.write_str("Measure"),
            Request::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl SessionHandle {
    async fn submit(&self, request: Request) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| WattchError::SessionClosed)
    }

    /// Write a command and wait until the transport accepted it.
    pub async fn send(&self, command: Command) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.submit(Request::Command { command, done }).await?;
        rx.await.map_err(|_| WattchError::SessionClosed)?
    }

    /// Request one measurement and wait up to `timeout` for the reply.
    ///
    /// Returns `Ok(None)` when no valid reply arrived in time; the reply may
    /// have been lost or dropped as corrupt.
    pub async fn measure(&self, timeout: Duration) -> Result<Option<Measurement>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Request::Measure { reply }).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result.map(Some),
            Ok(Err(_)) => Err(WattchError::SessionClosed),
            Err(_) => Ok(None),
        }
    }

    /// Disconnect the transport and stop the session task.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.submit(Request::Shutdown { done }).await?;
        rx.await.map_err(|_| WattchError::SessionClosed)?
    }

    /// Check whether the session task has terminated.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// State owned by the session task.
struct Session<T: Transport> {
    transport: T,
    frames: FrameBuffer,
    /// Reply slot of the one outstanding measurement request.
    pending: Option<oneshot::Sender<Result<Measurement>>>,
    on_sample: SampleHandler,
}

/// Spawn the session task and return a handle for submitting work.
///
/// # Arguments
///
/// * `transport` - Connected link; the session disconnects it on shutdown
/// * `notifications` - Stream obtained from `transport.subscribe()`
/// * `on_sample` - Called on the session task for every decoded sample
/// * `capacity` - Request queue capacity
pub fn spawn_session<T: Transport>(
    transport: T,
    notifications: mpsc::Receiver<Bytes>,
    on_sample: SampleHandler,
    capacity: usize,
) -> (SessionHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let session = Session {
        transport,
        frames: FrameBuffer::new(),
        pending: None,
        on_sample,
    };
    let task = tokio::spawn(session.run(rx, notifications));

    (SessionHandle { tx }, task)
}

impl<T: Transport> Session<T> {
    /// Main loop - serve requests and notifications until shutdown.
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut notifications: mpsc::Receiver<Bytes>,
    ) -> Result<()> {
        let mut notifications_open = true;

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Command { command, done }) => {
                        let result = self.write(command).await;
                        let _ = done.send(result);
                    }
                    Some(Request::Measure { reply }) => {
                        match self.write(Command::RequestMeasurement).await {
                            Ok(()) => {
                                // A reply that missed the previous caller's
                                // timeout completes this request instead.
                                if self.pending.replace(reply).is_some() {
                                    tracing::debug!("Superseding unanswered measurement request");
                                }
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(Request::Shutdown { done }) => {
                        let result = self.transport.disconnect().await;
                        tracing::info!("Session closed");
                        let _ = done.send(result);
                        return Ok(());
                    }
                    None => {
                        // Every handle dropped without an explicit shutdown.
                        tracing::debug!("Session handles dropped, disconnecting");
                        return self.transport.disconnect().await;
                    }
                },
                chunk = notifications.recv(), if notifications_open => match chunk {
                    Some(chunk) => self.on_notification(&chunk),
                    None => {
                        tracing::warn!("Notification stream ended");
                        notifications_open = false;
                    }
                },
            }
        }
    }

    async fn write(&mut self, command: Command) -> Result<()> {
        let frame = Bytes::from(command.encode());
        tracing::debug!("Writing {} ({} bytes)", command.name(), frame.len());
        self.transport.write(frame, true).await
    }

    /// Feed one notification fragment and dispatch a completed frame.
    fn on_notification(&mut self, chunk: &[u8]) {
        let frame = match self.frames.feed(chunk) {
            FeedResult::Incomplete => return,
            FeedResult::Desync => {
                tracing::warn!(
                    "Discarding desynchronized notification data ({} so far)",
                    self.frames.desync_count()
                );
                return;
            }
            FeedResult::Complete(frame) => frame,
        };

        match Response::decode(&frame) {
            Ok(Response::EnergyUsage(sample)) => {
                tracing::debug!(
                    "Sample {}: {:.3} W, {:.2} V, {:.0} mA",
                    sample.timestamp,
                    sample.wattage,
                    sample.voltage,
                    sample.current
                );
                (self.on_sample)(sample);
                if let Some(reply) = self.pending.take() {
                    let _ = reply.send(Ok(sample));
                }
            }
            Ok(Response::Unrecognized(kind)) => {
                tracing::debug!("Ignoring response kind {:?}", kind);
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
            }
        }
    }
}
