use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::model::TaskId;

/// Errors raised while turning the registered tasks into a runnable graph.
///
/// All of these are fatal: no task runs when graph construction fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    /// Two tasks were registered under the same identifier.
    #[error("task '{0}' is already registered")]
    DuplicateTask(TaskId),

    /// A task names a dependency that was never registered.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    /// The dependency edges contain a cycle. Members are listed in the order
    /// the traversal entered them.
    #[error("cyclic dependency: {}", display_cycle(.cycle))]
    CyclicDependency { cycle: Vec<TaskId> },
}

fn display_cycle(cycle: &[TaskId]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(TaskId::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

/// Failure returned by a task's producer, shared between the report and every
/// reader of the task's output.
#[derive(Clone)]
pub struct ProducerFailure(Arc<anyhow::Error>);

impl ProducerFailure {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// The underlying error, including its context chain.
    pub fn cause(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for ProducerFailure {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Display for ProducerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "{:#}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for ProducerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for ProducerFailure {}

/// Why a task never had its producer invoked.
#[derive(Debug, Error, Clone)]
pub enum SkipReason {
    /// A dependency failed or was itself skipped because of a failure.
    /// `origin` is the task whose producer actually failed, `via` the direct
    /// dependency through which the failure arrived.
    #[error("dependency {origin} failed")]
    DependencyFailed {
        origin: TaskId,
        via: TaskId,
        cause: ProducerFailure,
    },

    /// The run was cancelled before the task started.
    #[error("cancelled")]
    Cancelled,
}

impl SkipReason {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SkipReason::Cancelled)
    }
}

/// Errors surfaced by [`crate::output::Output`] and its resolver.
#[derive(Debug, Error, Clone)]
pub enum OutputError {
    #[error("output of task '{0}' is already resolved")]
    AlreadyResolved(TaskId),

    #[error("task '{task}' failed: {cause}")]
    Failed {
        task: TaskId,
        #[source]
        cause: ProducerFailure,
    },

    #[error("task '{task}' was skipped: {reason}")]
    Skipped { task: TaskId, reason: SkipReason },

    /// Every resolver was dropped without assigning a value.
    #[error("output of task '{0}' was abandoned before it resolved")]
    Abandoned(TaskId),
}
