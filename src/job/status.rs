//! Generation status of an image.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a pyramid generation job.
///
/// ```text
/// PENDING ──▶ PROCESSING ──┬──▶ READY
///                          └──▶ ERROR
/// ```
///
/// Accepting a new job moves any status back to PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, no pixels read yet
    Pending,
    /// Tiles are being generated
    Processing,
    /// Every tile written
    Ready,
    /// Generation stopped on an unrecoverable error
    Error,
}

impl JobStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Error)
    }

    /// Whether the orchestrator may move from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match next {
            JobStatus::Pending => true,
            JobStatus::Processing => *self == JobStatus::Pending,
            JobStatus::Ready | JobStatus::Error => *self == JobStatus::Processing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Ready => "READY",
            JobStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
