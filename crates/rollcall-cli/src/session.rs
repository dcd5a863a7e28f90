//! Batch session runner.
//!
//! Runs the matching engine on a dedicated OS thread behind a request
//! channel, so one photo's profile commits are fully applied before
//! the next photo's begin (single-writer ordering). Cancellation is
//! all-or-nothing per photo: a job cancelled before commit leaves no
//! trace in the profile store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use rollcall_core::types::FaceObservation;
use rollcall_core::{MatchingEngine, PhotoReport};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session thread exited")]
    ChannelClosed,
    #[error("photo job {0} cancelled before commit")]
    Cancelled(Uuid),
}

/// Cooperative cancellation flag for one photo job.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct PhotoJob {
    id: Uuid,
    faces: Vec<FaceObservation>,
    cancel: CancelToken,
    reply: oneshot::Sender<Result<PhotoReport, SessionError>>,
}

/// Clone-safe handle to the session thread.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<PhotoJob>,
}

impl SessionHandle {
    /// Submit one photo and wait for its report.
    pub async fn process(
        &self,
        faces: Vec<FaceObservation>,
        cancel: CancelToken,
    ) -> Result<PhotoReport, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = PhotoJob {
            id: Uuid::new_v4(),
            faces,
            cancel,
            reply: reply_tx,
        };
        self.tx.send(job).await.map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }
}

/// Spawn the session worker on a dedicated OS thread.
///
/// The thread takes ownership of the engine; dropping every handle
/// shuts it down after the queue drains.
pub fn spawn_session(engine: MatchingEngine, queue: usize) -> SessionHandle {
    let (tx, mut rx) = mpsc::channel::<PhotoJob>(queue.max(1));

    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            tracing::info!("session thread started");
            while let Some(job) = rx.blocking_recv() {
                let report = engine.evaluate(&job.faces, Utc::now());

                // Commit is skipped entirely for a cancelled job; a
                // partially evaluated photo must never reach the store.
                let result = if job.cancel.is_cancelled() {
                    tracing::info!(job = %job.id, "job cancelled; report discarded");
                    Err(SessionError::Cancelled(job.id))
                } else {
                    let summary = engine.commit(&report);
                    tracing::debug!(
                        job = %job.id,
                        applied = summary.applied,
                        failed = summary.failed,
                        "job committed"
                    );
                    Ok(report)
                };
                let _ = job.reply.send(result);
            }
            tracing::info!("session thread exiting");
        })
        .expect("failed to spawn session thread");

    SessionHandle { tx }
}
