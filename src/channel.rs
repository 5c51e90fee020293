//! Progress and control messages exchanged with the requesting client.
//!
//! Long-running operations (pulls, builds, deployments) report progress as
//! [`ProgressMessage`] values through a [`ProgressSink`]. The client can send
//! a [`ControlMessage`] back; the only recognised action is [`CANCEL_PULL`],
//! which the cancellation watcher turns into a cancelled
//! [`CancellationToken`]. The transport (WebSocket, SSE, a terminal) is not
//! this crate's concern; [`progress_channel`] and [`control_channel`] give an
//! in-process realization backed by tokio channels.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ComposeError, FilesystemError, LabError, VulnlabError};

/// The control action that cancels an in-flight pull or build.
pub const CANCEL_PULL: &str = "CANCEL_PULL";

/// Status code for a normal progress event.
pub const CODE_OK: u16 = 200;
/// Status code for a rejected request (validation or conflict).
pub const CODE_BAD_REQUEST: u16 = 400;
/// Status code for a request the client cancelled.
pub const CODE_CANCELLED: u16 = 499;
/// Status code for an internal failure.
pub const CODE_ERROR: u16 = 500;

/// A server-to-client progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// HTTP-like status code.
    pub code: u16,
    /// Human-readable status line.
    pub message: String,
    /// Structured payload; `null` when there is nothing to add.
    #[serde(default)]
    pub data: Value,
}

impl ProgressMessage {
    /// A `200` event.
    #[must_use]
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            code: CODE_OK,
            message: message.into(),
            data,
        }
    }

    /// A `500` event carrying an error line.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: CODE_ERROR,
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Map a terminal error to the event the client should see.
    #[must_use]
    pub fn from_error(error: &VulnlabError) -> Self {
        let code = if error.is_cancelled() {
            CODE_CANCELLED
        } else if error.is_conflict() || is_validation(error) {
            CODE_BAD_REQUEST
        } else {
            CODE_ERROR
        };
        Self {
            code,
            message: error.to_string(),
            data: Value::Null,
        }
    }
}

fn is_validation(error: &VulnlabError) -> bool {
    matches!(
        error,
        VulnlabError::Lab(
            LabError::MissingField { .. }
                | LabError::InvalidComposePath { .. }
                | LabError::EnvNotOpen { .. }
                | LabError::InsufficientBalance { .. }
                | LabError::EnvNotFound { .. }
        ) | VulnlabError::Compose(
            ComposeError::MissingImage { .. }
                | ComposeError::UnknownDependency { .. }
                | ComposeError::InvalidValue { .. }
                | ComposeError::InvalidVolume { .. }
        ) | VulnlabError::Filesystem(
            FilesystemError::PathTraversal { .. } | FilesystemError::InvalidCatalogFile { .. }
        )
    )
}

/// A client-to-server control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// The requested action, e.g. [`CANCEL_PULL`].
    pub action: String,
}

impl ControlMessage {
    /// A cancellation request.
    #[must_use]
    pub fn cancel_pull() -> Self {
        Self {
            action: String::from(CANCEL_PULL),
        }
    }

    /// Whether this message asks for cancellation.
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        self.action == CANCEL_PULL
    }
}

/// Destination for progress events.
///
/// Sending never blocks and never fails from the caller's point of view: a
/// client that went away simply stops receiving.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event.
    fn send(&self, message: ProgressMessage);
}

/// Future returned by [`ControlSource::next_message`].
pub type ControlFuture<'a> = Pin<Box<dyn Future<Output = Option<ControlMessage>> + Send + 'a>>;

/// Source of client control messages.
pub trait ControlSource: Send {
    /// Wait for the next message; `None` once the client has hung up.
    fn next_message(&mut self) -> ControlFuture<'_>;
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn send(&self, _message: ProgressMessage) {}
}

/// Sink that writes every event to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn send(&self, message: ProgressMessage) {
        if message.code == CODE_OK {
            info!(code = message.code, data = %message.data, "{}", message.message);
        } else {
            warn!(code = message.code, data = %message.data, "{}", message.message);
        }
    }
}

/// Sending half of an in-process progress channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressMessage>,
}

impl ProgressSink for ChannelSink {
    fn send(&self, message: ProgressMessage) {
        if self.tx.send(message).is_err() {
            debug!("progress receiver dropped; discarding event");
        }
    }
}

/// Create an in-process progress channel.
#[must_use]
pub fn progress_channel() -> (ChannelSink, mpsc::UnboundedReceiver<ProgressMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}

/// Receiving half of an in-process control channel.
#[derive(Debug)]
pub struct ChannelControl {
    rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl ControlSource for ChannelControl {
    fn next_message(&mut self) -> ControlFuture<'_> {
        Box::pin(self.rx.recv())
    }
}

/// Create an in-process control channel.
#[must_use]
pub fn control_channel() -> (mpsc::UnboundedSender<ControlMessage>, ChannelControl) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelControl { rx })
}

/// A running cancellation watcher; aborted when dropped.
#[derive(Debug)]
pub struct CancelWatcher {
    handle: JoinHandle<()>,
}

impl CancelWatcher {
    /// Whether the watcher task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CancelWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a task that reads one control message and cancels `token` if it is
/// [`CANCEL_PULL`].
///
/// The task also exits when the token is cancelled by someone else or when
/// the control source closes. Must be called from within a tokio runtime.
pub fn spawn_cancel_watcher<S>(mut control: S, token: CancellationToken) -> CancelWatcher
where
    S: ControlSource + 'static,
{
    let handle = tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            received = control.next_message() => match received {
                Some(message) if message.is_cancel() => {
                    info!("client requested cancellation");
                    token.cancel();
                }
                Some(message) => {
                    debug!(action = %message.action, "ignoring unrecognised control message");
                }
                None => debug!("control channel closed"),
            },
        }
    });
    CancelWatcher { handle }
}
