//! Dependency-ordered provisioning with deferred values.
//!
//! Tasks are registered with the ids of the tasks they depend on and an async
//! producer. The [`Executor`] validates the graph (unknown ids, cycles), then
//! runs producers concurrently as soon as their dependencies have succeeded,
//! handing each producer the resolved values of its dependencies. A failure
//! skips every transitive dependent without invoking it.
//!
//! Key modules:
//! - `dag`: graph construction, cycle detection, topological order.
//! - `output`: single-assignment values readers can `wait()` on.
//! - `runner`: the executor and its scheduling loop.
//! - `provision`: the cloud provisioning client interface and a dry-run
//!   implementation.
//! - `stack`: the EKS cluster composition expressed as executor tasks.

pub mod config;
pub mod dag;
pub mod error;
mod executor;
pub mod model;
pub mod output;
pub mod provision;
pub mod runner;
pub mod stack;
pub mod task;
pub mod template;

pub use crate::dag::DependencyGraph;
pub use crate::error::{GraphError, OutputError, ProducerFailure, SkipReason};
pub use crate::model::{RunReport, RunSummary, TaskId, TaskOptions, TaskStatus};
pub use crate::output::{Output, Resolver};
pub use crate::runner::{CancelToken, Executor, RunOptions};
pub use crate::task::{Inputs, TaskHandle};
