//! Media engine worker and RPC bridge.
//!
//! The engine runs as a single long-lived worker task. The bridge multiplexes
//! concurrent logical calls (`probe`, `transcode`, `remux`) over one message
//! channel, correlates responses by id, and delivers out-of-band progress and
//! log streams to the caller. The worker may serialize requests internally;
//! the bridge still guarantees each call resolves or rejects exactly once.

mod bridge;
mod ffmpeg;
pub mod protocol;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use bridge::{EngineBridge, EngineError, EngineEvents, TranscodeOptions};
pub use ffmpeg::FfmpegWorker;
pub use protocol::{EngineAction, EngineMessage, EngineRequest, RequestPayload, ResponsePayload};

/// Failures produced by a media worker while servicing one request.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The FFmpeg invocation failed; the reason carries FFmpeg's own
    /// diagnostics so callers can pattern-match on them.
    #[error("FFmpeg {operation} failed: {reason}")]
    Ffmpeg { operation: String, reason: String },

    /// Scratch-file I/O failed.
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker context cannot continue. Terminates the worker and rejects
    /// every pending job.
    #[error("worker fatal: {reason}")]
    Fatal { reason: String },
}

/// A media worker servicing probe/transcode/remux requests.
///
/// Implementations run inside the single worker task spawned by
/// [`spawn_engine`] and communicate progress and log lines through the
/// provided [`EventSink`].
#[async_trait]
pub trait MediaWorker: Send {
    async fn handle(
        &mut self,
        request: EngineRequest,
        events: &EventSink,
    ) -> Result<ResponsePayload, WorkerError>;
}

/// Sends out-of-band progress and log messages from the worker.
#[derive(Clone)]
pub struct EventSink {
    outbound: mpsc::UnboundedSender<EngineMessage>,
}

impl EventSink {
    fn new(outbound: mpsc::UnboundedSender<EngineMessage>) -> Self {
        Self { outbound }
    }

    /// Reports a progress ratio. Values are clamped by the receiver.
    pub fn progress(&self, ratio: f64) {
        let _ = self.outbound.send(EngineMessage::Progress { ratio });
    }

    /// Emits a log line.
    pub fn log(&self, message: impl Into<String>) {
        let _ = self.outbound.send(EngineMessage::Log {
            message: message.into(),
        });
    }
}

/// Spawns the media engine worker and returns its bridge and event streams.
///
/// The worker task processes requests sequentially in arrival order. A fatal
/// worker failure rejects every pending job exactly once and leaves the
/// bridge unusable; a fresh bridge (and worker) is required to continue.
pub fn spawn_engine<W>(worker: W) -> (EngineBridge, EngineEvents)
where
    W: MediaWorker + 'static,
{
    let (request_sender, request_receiver) = mpsc::unbounded_channel();
    let (message_sender, message_receiver) = mpsc::unbounded_channel();

    tokio::spawn(run_worker_loop(worker, request_receiver, message_sender));

    bridge::connect(request_sender, message_receiver)
}

/// Runs the worker message loop until the request channel closes or the
/// worker reports a fatal failure.
async fn run_worker_loop<W>(
    mut worker: W,
    mut requests: mpsc::UnboundedReceiver<EngineRequest>,
    messages: mpsc::UnboundedSender<EngineMessage>,
) where
    W: MediaWorker,
{
    tracing::debug!("media engine worker started");
    let sink = EventSink::new(messages.clone());

    while let Some(request) = requests.recv().await {
        let id = request.id;
        let action = request.action;
        tracing::debug!("worker handling {} request {}", action, id);

        match worker.handle(request, &sink).await {
            Ok(payload) => {
                let _ = messages.send(EngineMessage::Result { id, payload });
            }
            Err(WorkerError::Fatal { reason }) => {
                tracing::error!("media engine worker terminating: {}", reason);
                let _ = messages.send(EngineMessage::Fatal { reason });
                return;
            }
            Err(err) => {
                let _ = messages.send(EngineMessage::Error {
                    id,
                    message: err.to_string(),
                });
            }
        }
    }

    tracing::debug!("media engine worker stopped");
}
