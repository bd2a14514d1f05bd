//! Single-assignment values that become available once their task finishes.
//!
//! An [`Output`] is the read side: cheap to clone, readable any number of
//! times. The matching [`Resolver`] is the write side and is held only by
//! whoever produces the value (the scheduler, for registered tasks).

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{OutputError, ProducerFailure, SkipReason};
use crate::model::TaskId;

#[derive(Debug)]
enum Settled<T> {
    Value(Arc<T>),
    Failed(ProducerFailure),
    Skipped(SkipReason),
}

impl<T> Clone for Settled<T> {
    fn clone(&self) -> Self {
        match self {
            Settled::Value(v) => Settled::Value(Arc::clone(v)),
            Settled::Failed(f) => Settled::Failed(f.clone()),
            Settled::Skipped(r) => Settled::Skipped(r.clone()),
        }
    }
}

type Slot<T> = Option<Settled<T>>;

/// Create an unresolved output owned by `task`.
pub fn channel<T>(task: impl Into<TaskId>) -> (Resolver<T>, Output<T>) {
    let task = task.into();
    let (tx, rx) = watch::channel::<Slot<T>>(None);
    (
        Resolver {
            task: task.clone(),
            tx,
        },
        Output { task, rx },
    )
}

/// Write side of an [`Output`]. Exactly one settle call succeeds.
pub struct Resolver<T> {
    task: TaskId,
    tx: watch::Sender<Slot<T>>,
}

impl<T> Resolver<T> {
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    /// Assign the value. Fails with [`OutputError::AlreadyResolved`] on any
    /// call after the first settle.
    pub fn resolve(&self, value: T) -> Result<(), OutputError> {
        self.resolve_shared(Arc::new(value))
    }

    pub(crate) fn resolve_shared(&self, value: Arc<T>) -> Result<(), OutputError> {
        self.settle(Settled::Value(value))
    }

    /// Record that the producer failed. Readers get the failure instead of a
    /// value.
    pub fn fail(&self, failure: ProducerFailure) -> Result<(), OutputError> {
        self.settle(Settled::Failed(failure))
    }

    pub(crate) fn skip(&self, reason: SkipReason) -> Result<(), OutputError> {
        self.settle(Settled::Skipped(reason))
    }

    fn settle(&self, settled: Settled<T>) -> Result<(), OutputError> {
        let mut incoming = Some(settled);
        let changed = self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = incoming.take();
            true
        });
        if changed {
            Ok(())
        } else {
            Err(OutputError::AlreadyResolved(self.task.clone()))
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("task", &self.task).finish()
    }
}

/// Read side of a task's result.
pub struct Output<T> {
    task: TaskId,
    rx: watch::Receiver<Slot<T>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Output<T> {
    /// The task that owns this output.
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Non-blocking read. `None` while the owning task is still pending.
    pub fn try_get(&self) -> Option<Result<Arc<T>, OutputError>> {
        self.rx.borrow().as_ref().map(|settled| self.unpack(settled.clone()))
    }

    /// Suspend until the owning task reaches a terminal state.
    ///
    /// Every caller observes the same `Arc`. A failed or skipped task yields
    /// its failure instead of a value; a resolver dropped without settling
    /// yields [`OutputError::Abandoned`].
    pub async fn wait(&self) -> Result<Arc<T>, OutputError> {
        let mut rx = self.rx.clone();
        let settled = match rx.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        match settled {
            Some(settled) => self.unpack(settled),
            None => Err(OutputError::Abandoned(self.task.clone())),
        }
    }

    fn unpack(&self, settled: Settled<T>) -> Result<Arc<T>, OutputError> {
        match settled {
            Settled::Value(v) => Ok(v),
            Settled::Failed(cause) => Err(OutputError::Failed {
                task: self.task.clone(),
                cause,
            }),
            Settled::Skipped(reason) => Err(OutputError::Skipped {
                task: self.task.clone(),
                reason,
            }),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("task", &self.task)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
