use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::model::{TaskId, TaskOptions};
use crate::output::{Output, Resolver};

/// Boxed future returned by a producer.
pub type ProducerFuture<V> = Pin<Box<dyn Future<Output = Result<V>> + Send + 'static>>;

/// Type-erased producer. Called once per attempt with the resolved values of
/// the task's dependencies.
pub type Producer<V> = Arc<dyn Fn(Inputs<V>) -> ProducerFuture<V> + Send + Sync>;

/// Resolved dependency values handed to a producer, in declaration order.
pub struct Inputs<V> {
    values: Vec<(TaskId, Arc<V>)>,
}

impl<V> Clone for Inputs<V> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
        }
    }
}

impl<V> Inputs<V> {
    pub(crate) fn new(values: Vec<(TaskId, Arc<V>)>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.values
            .iter()
            .find(|(dep, _)| dep.as_str() == id)
            .map(|(_, v)| v.as_ref())
    }

    /// Like [`Inputs::get`] but turns a missing dependency into a producer
    /// error, so producers can use `?`.
    pub fn require(&self, id: &str) -> Result<&V> {
        self.get(id)
            .ok_or_else(|| anyhow!("'{}' is not a declared dependency", id))
    }

    pub fn shared(&self, id: &str) -> Option<Arc<V>> {
        self.values
            .iter()
            .find(|(dep, _)| dep.as_str() == id)
            .map(|(_, v)| Arc::clone(v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &V)> {
        self.values.iter().map(|(id, v)| (id, v.as_ref()))
    }
}

impl<V: fmt::Debug> fmt::Debug for Inputs<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A registered task. Immutable once registered.
pub(crate) struct Task<V> {
    pub(crate) id: TaskId,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) options: TaskOptions,
    pub(crate) producer: Producer<V>,
    pub(crate) resolver: Resolver<V>,
}

impl<V> fmt::Debug for Task<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Returned by registration. Gives read access to the task's output and can be
/// passed as a dependency of later registrations.
pub struct TaskHandle<V> {
    id: TaskId,
    output: Output<V>,
}

impl<V> Clone for TaskHandle<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            output: self.output.clone(),
        }
    }
}

impl<V> TaskHandle<V> {
    pub(crate) fn new(id: TaskId, output: Output<V>) -> Self {
        Self { id, output }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn output(&self) -> Output<V> {
        self.output.clone()
    }
}

impl<V> fmt::Debug for TaskHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

impl<V> From<&TaskHandle<V>> for TaskId {
    fn from(handle: &TaskHandle<V>) -> Self {
        handle.id.clone()
    }
}

impl<V> From<TaskHandle<V>> for TaskId {
    fn from(handle: TaskHandle<V>) -> Self {
        handle.id
    }
}

pub(crate) fn boxed<V, F, Fut>(producer: F) -> Producer<V>
where
    V: Send + Sync + 'static,
    F: Fn(Inputs<V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    Arc::new(move |inputs| Box::pin(producer(inputs)) as ProducerFuture<V>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_lookup_by_id() {
        let inputs = Inputs::new(vec![
            ("role".into(), Arc::new("arn:role:1".to_string())),
            ("cluster".into(), Arc::new("cluster-xyz".to_string())),
        ]);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.get("cluster").map(String::as_str), Some("cluster-xyz"));
        assert!(inputs.get("nodegroup").is_none());

        let err = inputs.require("nodegroup").unwrap_err();
        assert!(err.to_string().contains("nodegroup"));

        let order: Vec<&str> = inputs.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, ["role", "cluster"]);
    }
}
