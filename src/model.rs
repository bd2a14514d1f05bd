use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProducerFailure, SkipReason};

/// Unique identifier of a task within one executor.
///
/// Example: "iam/admins", "cluster", "nodegroup/standard"
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Arc<str>);

impl TaskId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for TaskId {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for TaskId {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl From<&String> for TaskId {
    fn from(id: &String) -> Self {
        Self::new(id)
    }
}

impl From<&TaskId> for TaskId {
    fn from(id: &TaskId) -> Self {
        id.clone()
    }
}

/// Per-task execution policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// How many times to retry the producer on failure.
    /// Default: 0 (no retries).
    #[serde(default)]
    pub retry: usize,

    /// Optional per-attempt timeout.
    ///
    /// If None => no timeout.
    /// If Some(d) => the attempt fails if the producer runs longer than d.
    #[serde(default, with = "opt_secs", rename = "timeout_secs")]
    pub timeout: Option<Duration>,
}

impl TaskOptions {
    pub fn with_retry(mut self, retry: usize) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// Terminal state of a task after a run.
#[derive(Debug, Clone)]
pub enum TaskStatus<V> {
    Succeeded(Arc<V>),
    Failed(ProducerFailure),
    Skipped(SkipReason),
}

impl<V> TaskStatus<V> {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded(_))
    }
}

/// Outcome of a whole run.
///
/// Every registered task appears in exactly one of the three maps.
#[derive(Debug, Clone)]
pub struct RunReport<V> {
    pub succeeded: BTreeMap<TaskId, Arc<V>>,
    pub failed: BTreeMap<TaskId, ProducerFailure>,
    pub skipped: BTreeMap<TaskId, SkipReason>,
}

impl<V> Default for RunReport<V> {
    fn default() -> Self {
        Self {
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
            skipped: BTreeMap::new(),
        }
    }
}

impl<V> RunReport<V> {
    pub(crate) fn record(&mut self, id: TaskId, status: TaskStatus<V>) {
        match status {
            TaskStatus::Succeeded(value) => {
                self.succeeded.insert(id, value);
            }
            TaskStatus::Failed(failure) => {
                self.failed.insert(id, failure);
            }
            TaskStatus::Skipped(reason) => {
                self.skipped.insert(id, reason);
            }
        }
    }

    /// True only if every task succeeded.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        self.skipped.values().any(SkipReason::is_cancelled)
    }

    pub fn succeeded_ids(&self) -> BTreeSet<&str> {
        self.succeeded.keys().map(TaskId::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.succeeded.get(id).map(|v| v.as_ref())
    }

    /// Flattened, serializable view of the report.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            succeeded: self.succeeded.keys().cloned().collect(),
            failed: self
                .failed
                .iter()
                .map(|(id, failure)| (id.clone(), format!("{failure:#}")))
                .collect(),
            skipped: self
                .skipped
                .iter()
                .map(|(id, reason)| (id.clone(), reason.to_string()))
                .collect(),
        }
    }
}

/// What gets written by `--report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: BTreeSet<TaskId>,
    pub failed: BTreeMap<TaskId, String>,
    pub skipped: BTreeMap<TaskId, String>,
}
