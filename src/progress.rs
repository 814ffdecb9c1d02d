//! Progress events for a hosting layer.
//!
//! A research run reports what it is doing through a [`ProgressReporter`].
//! The reporter never blocks the run: when the bounded queue is full the
//! event is dropped. The host drains a [`ProgressStream`] at its own pace.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{EpisodeId, SessionId};

/// One step of a research run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        topic: String,
        session_id: SessionId,
    },
    SkillSelected {
        skill: Option<String>,
    },
    SubquestionsReady {
        questions: Vec<String>,
    },
    DecisionMade {
        needs_web: bool,
        missing: usize,
    },
    Searching {
        question: String,
    },
    SourceIngested {
        url: String,
        episode_id: EpisodeId,
        facts: usize,
    },
    SourceSkipped {
        url: String,
        reason: String,
    },
    RunFinished {
        session_id: SessionId,
        sources_used: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error("Progress stream disconnected")]
    Disconnected,

    #[error("No progress event within {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Sending half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Sender<ProgressEvent>,
}

impl ProgressReporter {
    /// Queues `event` without blocking. Overflow and a gone receiver both
    /// drop the event.
    pub fn report(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(event = ?dropped, "progress queue full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct ProgressStream {
    rx: Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Blocks until the next event. Fails once every reporter is gone and
    /// the queue is drained.
    pub fn recv(&self) -> Result<ProgressEvent, ProgressError> {
        self.rx.recv().map_err(|_| ProgressError::Disconnected)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<ProgressEvent, ProgressError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ProgressError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => ProgressError::Disconnected,
        })
    }

    /// Events queued right now, without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        self.rx.try_iter()
    }
}

/// Creates a bounded progress queue.
#[must_use]
pub fn channel(capacity: usize) -> (ProgressReporter, ProgressStream) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (ProgressReporter { tx }, ProgressStream { rx })
}
