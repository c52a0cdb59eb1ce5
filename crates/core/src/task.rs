//! Transfer task types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use time::OffsetDateTime;

/// Identity of one file revision awaiting transfer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub user_id: String,
    pub volume_id: String,
    pub share_id: String,
    pub link_id: String,
    pub revision_id: String,
}

impl TaskKey {
    /// Create a task key.
    pub fn new(
        user_id: impl Into<String>,
        volume_id: impl Into<String>,
        share_id: impl Into<String>,
        link_id: impl Into<String>,
        revision_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            volume_id: volume_id.into(),
            share_id: share_id.into(),
            link_id: link_id.into(),
            revision_id: revision_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.user_id, self.volume_id, self.share_id, self.link_id, self.revision_id
        )
    }
}

/// Task lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker slot.
    Enqueued,
    /// Claimed by a worker.
    Running,
    /// Transferred; eligible for deletion.
    Done,
    /// Failed transiently; waits for `run_at`.
    FailedRetryable,
    /// Failed for good; surfaced to the caller.
    FailedPermanent,
}

impl TaskState {
    /// Stable string form used in persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Done => "done",
            Self::FailedRetryable => "failed_retryable",
            Self::FailedPermanent => "failed_permanent",
        }
    }

    /// No further automatic transitions happen from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::FailedPermanent)
    }
}

impl FromStr for TaskState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "enqueued" => Ok(Self::Enqueued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed_retryable" => Ok(Self::FailedRetryable),
            "failed_permanent" => Ok(Self::FailedPermanent),
            other => Err(crate::Error::UnknownTaskState(other.to_string())),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way the content moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    /// Stable string form used in persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

impl FromStr for TransferDirection {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            other => Err(crate::Error::Serialization(format!(
                "unknown transfer direction: {other}"
            ))),
        }
    }
}

/// The network a device is currently on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Metered,
    Unmetered,
}

/// Networks a task may run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkConstraint {
    /// Any connected network.
    #[default]
    Any,
    /// Only unmetered networks (e.g. Wi-Fi).
    UnmeteredOnly,
}

impl NetworkConstraint {
    /// Stable string form used in persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::UnmeteredOnly => "unmetered_only",
        }
    }

    /// Whether a task with this constraint may run on `network`.
    pub fn allows(&self, network: NetworkType) -> bool {
        match self {
            Self::Any => true,
            Self::UnmeteredOnly => network == NetworkType::Unmetered,
        }
    }
}

impl FromStr for NetworkConstraint {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "any" => Ok(Self::Any),
            "unmetered_only" => Ok(Self::UnmeteredOnly),
            other => Err(crate::Error::Serialization(format!(
                "unknown network constraint: {other}"
            ))),
        }
    }
}

/// A persistent queue entry for one file revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    /// Unique key.
    pub key: TaskKey,
    /// Upload or download.
    pub direction: TransferDirection,
    /// Lower runs first; ties go to the earlier insertion.
    pub priority: i64,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Retryable failures so far.
    pub retry_count: u32,
    /// Not eligible before this instant.
    #[serde(with = "time::serde::rfc3339::option")]
    pub run_at: Option<OffsetDateTime>,
    /// Networks the task may run on.
    pub network_constraint: NetworkConstraint,
    /// Source file for uploads, destination file for downloads.
    pub local_path: PathBuf,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Manifest signature, set once all blocks of an upload are transferred.
    pub manifest_signature: Option<String>,
    /// When the task was enqueued.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the task last changed state.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TransferTask {
    /// Create a freshly enqueued task with priority 0 and no network constraint.
    pub fn new(key: TaskKey, direction: TransferDirection, local_path: impl Into<PathBuf>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            key,
            direction,
            priority: 0,
            state: TaskState::Enqueued,
            retry_count: 0,
            run_at: None,
            network_constraint: NetworkConstraint::Any,
            local_path: local_path.into(),
            last_error: None,
            manifest_signature: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the network constraint.
    pub fn with_network_constraint(mut self, constraint: NetworkConstraint) -> Self {
        self.network_constraint = constraint;
        self
    }

    /// Whether the backoff gate has opened.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.run_at.is_none_or(|at| at <= now)
    }
}
