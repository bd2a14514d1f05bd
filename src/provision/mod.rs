//! Interface to the external provisioning engine.
//!
//! The executor never talks to a cloud API itself. Stack producers describe
//! the desired resource as a [`ResourceSpec`] and hand it to a
//! [`ProvisioningClient`], which returns the resolved identifying attributes.

mod dry_run;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::provision::dry_run::DryRunClient;

/// Resource kinds the stack declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    IamRole,
    RolePolicy,
    RolePolicyAttachment,
    Cluster,
    NodeGroup,
    ClusterRole,
    ClusterRoleBinding,
    ConfigMap,
    /// Kubernetes manifest applied from a file or URL.
    ConfigFile,
    HelmChart,
    LogGroup,
    Bucket,
    BuildProject,
    Pipeline,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::IamRole => "iam-role",
            ResourceKind::RolePolicy => "role-policy",
            ResourceKind::RolePolicyAttachment => "role-policy-attachment",
            ResourceKind::Cluster => "cluster",
            ResourceKind::NodeGroup => "node-group",
            ResourceKind::ClusterRole => "cluster-role",
            ResourceKind::ClusterRoleBinding => "cluster-role-binding",
            ResourceKind::ConfigMap => "config-map",
            ResourceKind::ConfigFile => "config-file",
            ResourceKind::HelmChart => "helm-chart",
            ResourceKind::LogGroup => "log-group",
            ResourceKind::Bucket => "bucket",
            ResourceKind::BuildProject => "build-project",
            ResourceKind::Pipeline => "pipeline",
        }
    }

    /// Kubernetes objects live inside the cluster and have no ARN.
    pub fn is_kubernetes(&self) -> bool {
        matches!(
            self,
            ResourceKind::ClusterRole
                | ResourceKind::ClusterRoleBinding
                | ResourceKind::ConfigMap
                | ResourceKind::ConfigFile
                | ResourceKind::HelmChart
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Logical name, unique per kind.
    pub name: String,
    #[serde(default)]
    pub properties: Value,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>, properties: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            properties,
        }
    }
}

/// A provisioned resource as reported back by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    /// Logical name the resource was declared with.
    pub name: String,
    /// Resolved attributes, e.g. `arn`, `name` (physical), `endpoint`.
    pub attributes: BTreeMap<String, String>,
}

impl Resource {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn require_attr(&self, key: &str) -> Result<&str> {
        self.attr(key)
            .ok_or_else(|| anyhow!("{} '{}' has no '{}' attribute", self.kind, self.name, key))
    }

    pub fn arn(&self) -> Result<&str> {
        self.require_attr("arn")
    }

    /// Physical name, falling back to the logical one.
    pub fn physical_name(&self) -> &str {
        self.attr("name").unwrap_or(&self.name)
    }
}

/// Idempotent access to the provisioning engine.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Create the resource, or update it in place if it already exists.
    /// Applying an unchanged spec returns the existing resource.
    async fn apply(&self, spec: ResourceSpec) -> Result<Resource>;

    /// Current state of a resource, if it exists.
    async fn read(&self, kind: ResourceKind, name: &str) -> Result<Option<Resource>>;
}
