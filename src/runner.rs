use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::dag::DependencyGraph;
use crate::error::{GraphError, ProducerFailure, SkipReason};
use crate::executor::execute_task;
use crate::model::{RunReport, TaskId, TaskOptions, TaskStatus};
use crate::output;
use crate::task::{boxed, Inputs, Task, TaskHandle};

/// Shared cancellation flag. Cloning yields another handle to the same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Knobs for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Maximum number of producers running at the same time.
    /// None => unbounded.
    pub max_concurrency: Option<usize>,
    pub cancel: Option<CancelToken>,
}

impl RunOptions {
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Collects tasks, then runs them in dependency order.
///
/// ```no_run
/// # async fn demo() -> anyhow::Result<()> {
/// use eksplan::{Executor, RunOptions};
///
/// let mut exec = Executor::<String>::new();
/// let role = exec.register("role", Vec::<&str>::new(), |_| async { Ok("arn:role:1".to_string()) })?;
/// exec.register("cluster", [&role], |inputs| async move {
///     Ok(format!("cluster for {}", inputs.require("role")?))
/// })?;
/// let report = exec.run(RunOptions::default()).await?;
/// assert!(report.is_success());
/// # Ok(())
/// # }
/// ```
pub struct Executor<V> {
    tasks: Vec<Task<V>>,
    defaults: TaskOptions,
}

impl<V> Default for Executor<V> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            defaults: TaskOptions::default(),
        }
    }
}

impl<V> std::fmt::Debug for Executor<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("tasks", &self.tasks)
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Message sent by a spawned task back to the scheduling loop.
enum Completion<V> {
    Finished(Result<Arc<V>>),
    Cancelled,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Running,
    Done,
}

impl<V> Executor<V>
where
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Options applied to tasks registered with [`Executor::register`].
    pub fn with_defaults(mut self, defaults: TaskOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Register a task using the executor's default options.
    ///
    /// Dependencies may name tasks registered later; they are checked when
    /// the graph is built.
    pub fn register<I, D, F, Fut>(
        &mut self,
        id: impl Into<TaskId>,
        dependencies: I,
        producer: F,
    ) -> Result<TaskHandle<V>, GraphError>
    where
        I: IntoIterator<Item = D>,
        D: Into<TaskId>,
        F: Fn(Inputs<V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let defaults = self.defaults;
        self.register_with(id, dependencies, defaults, producer)
    }

    /// Register a task with explicit retry/timeout options.
    pub fn register_with<I, D, F, Fut>(
        &mut self,
        id: impl Into<TaskId>,
        dependencies: I,
        options: TaskOptions,
        producer: F,
    ) -> Result<TaskHandle<V>, GraphError>
    where
        I: IntoIterator<Item = D>,
        D: Into<TaskId>,
        F: Fn(Inputs<V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let id = id.into();
        if self.tasks.iter().any(|t| t.id == id) {
            return Err(GraphError::DuplicateTask(id));
        }

        let mut deps: Vec<TaskId> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        let (resolver, output) = output::channel(id.clone());
        debug!(task = %id, dependencies = deps.len(), "registered task");
        self.tasks.push(Task {
            id: id.clone(),
            dependencies: deps,
            options,
            producer: boxed(producer),
            resolver,
        });
        Ok(TaskHandle::new(id, output))
    }

    /// Validate the registered tasks and return the dependency graph without
    /// running anything.
    pub fn plan(&self) -> Result<DependencyGraph, GraphError> {
        DependencyGraph::build(
            self.tasks
                .iter()
                .map(|t| (&t.id, t.dependencies.as_slice())),
        )
    }

    /// Run every registered task.
    ///
    /// Graph errors are returned before any producer is invoked. Otherwise the
    /// run always completes with a report covering every task.
    pub async fn run(self, options: RunOptions) -> Result<RunReport<V>, GraphError> {
        let graph = self.plan()?;
        Ok(Scheduler::new(self.tasks, graph, options).run().await)
    }
}

/// State for one run. Tasks are addressed by registration position, which is
/// also their node index in the graph.
struct Scheduler<V> {
    tasks: Vec<Task<V>>,
    graph: DependencyGraph,
    /// Positions of each task's dependencies, in declaration order.
    dep_positions: Vec<Vec<usize>>,
    progress: Vec<Progress>,
    remaining: Vec<usize>,
    values: Vec<Option<Arc<V>>>,
    /// Why a terminal, non-successful task did not produce a value:
    /// (originating task, failure).
    failures: Vec<Option<(TaskId, ProducerFailure)>>,
    report: RunReport<V>,
    semaphore: Option<Arc<Semaphore>>,
    max_concurrency: Option<usize>,
    cancel: CancelToken,
    terminal: usize,
}

impl<V> Scheduler<V>
where
    V: Send + Sync + 'static,
{
    fn new(tasks: Vec<Task<V>>, graph: DependencyGraph, options: RunOptions) -> Self {
        let n = tasks.len();
        let remaining = (0..n).map(|pos| graph.dependency_count_at(pos)).collect();
        let position: HashMap<&TaskId, usize> =
            tasks.iter().enumerate().map(|(pos, t)| (&t.id, pos)).collect();
        let dep_positions = tasks
            .iter()
            .map(|t| {
                t.dependencies
                    .iter()
                    .filter_map(|dep| position.get(dep).copied())
                    .collect()
            })
            .collect();
        let max_concurrency = options.max_concurrency.map(|limit| limit.max(1));
        Self {
            tasks,
            graph,
            dep_positions,
            progress: vec![Progress::Pending; n],
            remaining,
            values: vec![None; n],
            failures: vec![None; n],
            report: RunReport::default(),
            semaphore: max_concurrency.map(|limit| Arc::new(Semaphore::new(limit))),
            max_concurrency,
            cancel: options.cancel.unwrap_or_default(),
            terminal: 0,
        }
    }

    async fn run(mut self) -> RunReport<V> {
        let total_tasks = self.tasks.len();
        if total_tasks == 0 {
            info!("No tasks registered - nothing to do.");
            return self.report;
        }

        info!(
            tasks = total_tasks,
            edges = self.graph.edge_count(),
            max_concurrency = ?self.max_concurrency,
            "starting run"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Completion<V>)>();

        // Ready queue: tasks with no unmet dependencies
        let mut ready: VecDeque<usize> = (0..total_tasks)
            .filter(|pos| self.remaining[*pos] == 0)
            .collect();

        if self.cancel.is_cancelled() {
            self.cancel_pending();
            ready.clear();
        }

        let cancel = self.cancel.clone();
        let mut cancel_seen = cancel.is_cancelled();

        while self.terminal < total_tasks {
            while let Some(pos) = ready.pop_front() {
                self.spawn(pos, tx.clone());
            }
            if self.terminal == total_tasks {
                break;
            }

            tokio::select! {
                completion = rx.recv() => {
                    // The loop holds a sender, so the channel never closes here.
                    let Some((pos, completion)) = completion else { break };
                    self.complete(pos, completion, &mut ready);
                }
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    warn!("run cancelled - skipping tasks that have not started");
                    self.cancel_pending();
                    ready.clear();
                }
            }
        }

        info!(
            succeeded = self.report.succeeded.len(),
            failed = self.report.failed.len(),
            skipped = self.report.skipped.len(),
            "run finished"
        );
        self.report
    }

    fn spawn(&mut self, pos: usize, tx: mpsc::UnboundedSender<(usize, Completion<V>)>) {
        let task = &self.tasks[pos];
        self.progress[pos] = Progress::Running;

        // Every dependency succeeded, otherwise this task would have been skipped
        let inputs = Inputs::new(
            self.dep_positions[pos]
                .iter()
                .filter_map(|dep_pos| {
                    let value = self.values[*dep_pos].as_ref()?;
                    Some((self.tasks[*dep_pos].id.clone(), Arc::clone(value)))
                })
                .collect(),
        );

        let id = task.id.clone();
        let producer = Arc::clone(&task.producer);
        let options = task.options;
        let semaphore = self.semaphore.clone();
        let cancel = self.cancel.clone();

        info!(task = %id, "spawning task");

        tokio::spawn(async move {
            // Acquire a permit if the run is bounded; give up on cancellation
            let _permit = match semaphore {
                Some(semaphore) => {
                    tokio::select! {
                        permit = semaphore.acquire_owned() => permit.ok(),
                        _ = cancel.cancelled() => None,
                    }
                }
                None => None,
            };

            let completion = if cancel.is_cancelled() {
                Completion::Cancelled
            } else {
                Completion::Finished(execute_task(&id, &producer, inputs, options).await)
            };

            if tx.send((pos, completion)).is_err() {
                error!(task = %id, "scheduler went away before completion was delivered");
            }
        });
    }

    fn complete(&mut self, pos: usize, completion: Completion<V>, ready: &mut VecDeque<usize>) {
        let id = self.tasks[pos].id.clone();
        match completion {
            Completion::Finished(Ok(value)) => {
                info!(task = %id, "task succeeded");
                self.values[pos] = Some(Arc::clone(&value));
                if let Err(e) = self.tasks[pos].resolver.resolve_shared(Arc::clone(&value)) {
                    warn!(task = %id, "{}", e);
                }
                self.finish(pos, TaskStatus::Succeeded(value));
            }
            Completion::Finished(Err(e)) => {
                let failure = ProducerFailure::new(e);
                error!(task = %id, "task failed: {:#}", failure);
                self.failures[pos] = Some((id.clone(), failure.clone()));
                if let Err(e) = self.tasks[pos].resolver.fail(failure.clone()) {
                    warn!(task = %id, "{}", e);
                }
                self.finish(pos, TaskStatus::Failed(failure));
            }
            Completion::Cancelled => {
                self.skip(pos, SkipReason::Cancelled);
            }
        }

        self.release_dependents(pos, ready);
    }

    /// Decrement the dependents of a terminal task. Dependents whose last
    /// dependency just finished become ready, or are skipped when any of
    /// their dependencies did not succeed. Skips cascade.
    fn release_dependents(&mut self, pos: usize, ready: &mut VecDeque<usize>) {
        let mut settled = vec![pos];
        while let Some(parent) = settled.pop() {
            let dependents: Vec<usize> = self.graph.dependents_at(parent).collect();
            for child in dependents {
                self.remaining[child] = self.remaining[child].saturating_sub(1);
                if self.remaining[child] != 0 || self.progress[child] != Progress::Pending {
                    continue;
                }

                match self.blocking_failure(child) {
                    None => ready.push_back(child),
                    Some(reason) => {
                        self.skip(child, reason);
                        settled.push(child);
                    }
                }
            }
        }
    }

    /// First dependency (in declaration order) that did not succeed.
    fn blocking_failure(&self, pos: usize) -> Option<SkipReason> {
        for &dep_pos in &self.dep_positions[pos] {
            if self.values[dep_pos].is_some() {
                continue;
            }
            return Some(match &self.failures[dep_pos] {
                Some((origin, cause)) => SkipReason::DependencyFailed {
                    origin: origin.clone(),
                    via: self.tasks[dep_pos].id.clone(),
                    cause: cause.clone(),
                },
                None => SkipReason::Cancelled,
            });
        }
        None
    }

    fn skip(&mut self, pos: usize, reason: SkipReason) {
        let id = self.tasks[pos].id.clone();
        warn!(task = %id, "task skipped: {}", reason);
        if let SkipReason::DependencyFailed { origin, cause, .. } = &reason {
            self.failures[pos] = Some((origin.clone(), cause.clone()));
        }
        if let Err(e) = self.tasks[pos].resolver.skip(reason.clone()) {
            warn!(task = %id, "{}", e);
        }
        self.finish(pos, TaskStatus::Skipped(reason));
    }

    /// Every task that has not started yet is skipped as cancelled.
    fn cancel_pending(&mut self) {
        for pos in 0..self.tasks.len() {
            if self.progress[pos] == Progress::Pending {
                self.skip(pos, SkipReason::Cancelled);
            }
        }
    }

    fn finish(&mut self, pos: usize, status: TaskStatus<V>) {
        self.progress[pos] = Progress::Done;
        self.terminal += 1;
        self.report.record(self.tasks[pos].id.clone(), status);
    }
}
