//! The EKS stack expressed as executor tasks.
//!
//! Each resource is one task whose producer builds a [`ResourceSpec`] from the
//! resolved outputs of its dependencies and applies it through the
//! [`ProvisioningClient`]. Configuration is captured by the producers at
//! registration time; nothing reads process-wide state.

mod autoscaler;
mod cluster;
mod iam;
mod ingress;
mod logging;
mod pipeline;
mod workers;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::StackConfig;
use crate::error::GraphError;
use crate::model::{RunReport, TaskId};
use crate::provision::{ProvisioningClient, Resource, ResourceSpec};
use crate::runner::Executor;
use crate::task::{Inputs, TaskHandle};

pub use crate::stack::iam::NODEGROUP_MANAGED_POLICIES;

/// Task ids other parts of the program refer to.
pub mod ids {
    pub const CLUSTER: &str = "cluster";
    pub const PIPELINE: &str = "pipeline/pipeline";
    pub const AUTOSCALER: &str = "autoscaler";
}

/// Handles to the tasks whose outputs are exported after a run.
#[derive(Debug, Clone)]
pub struct StackHandles {
    pub cluster: TaskHandle<Resource>,
    pub node_groups: Vec<TaskHandle<Resource>>,
    pub autoscaler: Option<TaskHandle<Resource>>,
    pub pipeline: Option<TaskHandle<Resource>>,
}

/// Values exported by the stack once it has run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackOutputs {
    pub cluster_name: Option<String>,
    pub kubeconfig: Option<String>,
    pub pipeline: Option<String>,
}

impl StackOutputs {
    pub fn from_report(report: &RunReport<Resource>) -> Self {
        let cluster = report.get(ids::CLUSTER);
        Self {
            cluster_name: cluster.map(|c| c.physical_name().to_string()),
            kubeconfig: cluster.and_then(|c| c.attr("kubeconfig")).map(str::to_string),
            pipeline: report
                .get(ids::PIPELINE)
                .map(|p| p.physical_name().to_string()),
        }
    }
}

/// Register every resource of the stack on `exec`.
pub fn compose(
    exec: &mut Executor<Resource>,
    config: &StackConfig,
    client: Arc<dyn ProvisioningClient>,
) -> Result<StackHandles, GraphError> {
    let config = Arc::new(config.clone());
    let mut stack = Stack {
        exec,
        config,
        client,
    };

    let roles = iam::declare(&mut stack)?;
    let cluster = cluster::declare(&mut stack, &roles)?;
    let node_groups = workers::declare(&mut stack, &cluster, &roles)?;

    let autoscaler = match &roles.autoscaler {
        Some(role) => Some(autoscaler::declare(&mut stack, &cluster, role)?),
        None => None,
    };
    if let Some(role) = &roles.alb_controller {
        ingress::declare(&mut stack, &cluster, role)?;
    }
    logging::declare(&mut stack, &cluster)?;

    let pipeline = match stack.config.github_connection_id.clone() {
        Some(connection_id) => Some(pipeline::declare(&mut stack, &connection_id)?),
        None => None,
    };

    Ok(StackHandles {
        cluster,
        node_groups,
        autoscaler,
        pipeline,
    })
}

/// Registration context shared by the per-area modules.
struct Stack<'a> {
    exec: &'a mut Executor<Resource>,
    config: Arc<StackConfig>,
    client: Arc<dyn ProvisioningClient>,
}

impl Stack<'_> {
    /// Register a task that applies the spec built by `build`.
    ///
    /// `build` runs inside the producer, so it only ever sees resolved
    /// dependency outputs.
    fn resource<F>(
        &mut self,
        id: impl Into<TaskId>,
        dependencies: &[&TaskHandle<Resource>],
        build: F,
    ) -> Result<TaskHandle<Resource>, GraphError>
    where
        F: Fn(&StackConfig, &Inputs<Resource>) -> Result<ResourceSpec> + Send + Sync + 'static,
    {
        let build = Arc::new(build);
        self.resource_async(id, dependencies, move |config, inputs| {
            let build = Arc::clone(&build);
            async move { build(&config, &inputs) }
        })
    }

    /// Like [`Stack::resource`], for specs whose construction has to await,
    /// e.g. on file IO.
    fn resource_async<F, Fut>(
        &mut self,
        id: impl Into<TaskId>,
        dependencies: &[&TaskHandle<Resource>],
        build: F,
    ) -> Result<TaskHandle<Resource>, GraphError>
    where
        F: Fn(Arc<StackConfig>, Inputs<Resource>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceSpec>> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let config = Arc::clone(&self.config);
        let deps: Vec<TaskId> = dependencies.iter().map(|h| h.id().clone()).collect();

        self.exec.register(id, deps, move |inputs| {
            let client = Arc::clone(&client);
            let spec = build(Arc::clone(&config), inputs);
            async move {
                let spec = spec.await?;
                let what = format!("{} '{}'", spec.kind, spec.name);
                client
                    .apply(spec)
                    .await
                    .with_context(|| format!("applying {what}"))
            }
        })
    }
}

/// Physical name of dependency `id`, for producers that reference it.
fn name_of<'a>(inputs: &'a Inputs<Resource>, id: &str) -> Result<&'a str> {
    Ok(inputs.require(id)?.physical_name())
}

fn arn_of<'a>(inputs: &'a Inputs<Resource>, id: &str) -> Result<&'a str> {
    inputs.require(id)?.arn()
}

/// IAM policy document with a single statement list.
fn policy_document(statements: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

fn assume_role_for_service(service: &str) -> serde_json::Value {
    policy_document(serde_json::json!([{
        "Effect": "Allow",
        "Principal": { "Service": service },
        "Action": "sts:AssumeRole",
    }]))
}

fn assume_role_for_account(account_id: &str) -> serde_json::Value {
    policy_document(serde_json::json!([{
        "Effect": "Allow",
        "Principal": { "AWS": format!("arn:aws:iam::{account_id}:root") },
        "Action": "sts:AssumeRole",
    }]))
}
