use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::provision::{ProvisioningClient, Resource, ResourceKind, ResourceSpec};

/// In-memory provisioning client.
///
/// Fabricates deterministic identifiers (ARNs, generated names, endpoints)
/// instead of calling cloud APIs. Faults can be injected per logical resource
/// name to exercise failure propagation.
#[derive(Debug)]
pub struct DryRunClient {
    account_id: String,
    region: String,
    latency: Duration,
    faults: HashMap<String, String>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    resources: HashMap<(ResourceKind, String), Stored>,
    /// Every create/update in the order it happened.
    journal: Vec<(ResourceKind, String)>,
}

#[derive(Debug)]
struct Stored {
    properties: Value,
    resource: Resource,
}

impl DryRunClient {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            latency: Duration::ZERO,
            faults: HashMap::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// Delay every `apply` to make concurrency visible.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `apply` of the resource with logical name `name` fail with
    /// `message`.
    pub fn with_fault(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.faults.insert(name.into(), message.into());
        self
    }

    pub fn with_faults<I, K, M>(mut self, faults: I) -> Self
    where
        I: IntoIterator<Item = (K, M)>,
        K: Into<String>,
        M: Into<String>,
    {
        self.faults
            .extend(faults.into_iter().map(|(k, m)| (k.into(), m.into())));
        self
    }

    /// Logical names of applied resources, in apply order.
    pub fn journal(&self) -> Vec<(ResourceKind, String)> {
        self.lock().map(|s| s.journal.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("dry-run state is poisoned"))
    }

    fn materialize(&self, spec: &ResourceSpec, generation: u32) -> Resource {
        let mut attributes = BTreeMap::new();
        let physical = if spec.kind.is_kubernetes() {
            spec.name.clone()
        } else {
            generated_name(&spec.name)
        };

        match spec.kind {
            ResourceKind::IamRole => {
                attributes.insert("arn".into(), self.iam_arn("role", &physical));
            }
            ResourceKind::RolePolicy | ResourceKind::RolePolicyAttachment => {
                attributes.insert("id".into(), physical.clone());
            }
            ResourceKind::Cluster => {
                let endpoint = format!(
                    "https://{:08X}.gr7.{}.eks.amazonaws.com",
                    fnv1a(&physical) as u32,
                    self.region
                );
                attributes.insert("arn".into(), self.arn("eks", &format!("cluster/{physical}")));
                attributes.insert("kubeconfig".into(), kubeconfig(&physical, &endpoint));
                attributes.insert("endpoint".into(), endpoint);
                if let Some(version) = spec.properties.get("version").and_then(Value::as_str) {
                    attributes.insert("version".into(), version.to_string());
                }
            }
            ResourceKind::NodeGroup => {
                let cluster = spec
                    .properties
                    .get("clusterName")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                attributes.insert(
                    "arn".into(),
                    self.arn("eks", &format!("nodegroup/{cluster}/{physical}")),
                );
                attributes.insert("status".into(), "ACTIVE".into());
            }
            ResourceKind::LogGroup => {
                attributes.insert("arn".into(), self.arn("logs", &format!("log-group:{physical}")));
            }
            ResourceKind::Bucket => {
                attributes.insert("arn".into(), format!("arn:aws:s3:::{physical}"));
                attributes.insert("bucket".into(), physical.clone());
            }
            ResourceKind::BuildProject => {
                attributes.insert("arn".into(), self.arn("codebuild", &format!("project/{physical}")));
            }
            ResourceKind::Pipeline => {
                attributes.insert("arn".into(), self.arn("codepipeline", &physical));
            }
            ResourceKind::ClusterRole
            | ResourceKind::ClusterRoleBinding
            | ResourceKind::ConfigMap
            | ResourceKind::ConfigFile
            | ResourceKind::HelmChart => {
                if let Some(ns) = spec.properties.get("namespace").and_then(Value::as_str) {
                    attributes.insert("namespace".into(), ns.to_string());
                }
                attributes.insert("uid".into(), format!("{:016x}", fnv1a(&spec.name)));
            }
        }

        attributes.insert("name".into(), physical);
        attributes.insert("generation".into(), generation.to_string());
        Resource {
            kind: spec.kind,
            name: spec.name.clone(),
            attributes,
        }
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{service}:{}:{}:{resource}", self.region, self.account_id)
    }

    fn iam_arn(&self, kind: &str, name: &str) -> String {
        format!("arn:aws:iam::{}:{kind}/{name}", self.account_id)
    }
}

#[async_trait]
impl ProvisioningClient for DryRunClient {
    async fn apply(&self, spec: ResourceSpec) -> Result<Resource> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(message) = self.faults.get(&spec.name) {
            return Err(anyhow!("{}", message));
        }

        let mut state = self.lock()?;
        let key = (spec.kind, spec.name.clone());

        let generation = match state.resources.get(&key) {
            Some(stored) if stored.properties == spec.properties => {
                debug!(kind = %spec.kind, name = %spec.name, "unchanged");
                return Ok(stored.resource.clone());
            }
            Some(stored) => stored
                .resource
                .attr("generation")
                .and_then(|g| g.parse::<u32>().ok())
                .unwrap_or(1)
                + 1,
            None => 1,
        };

        let resource = self.materialize(&spec, generation);
        info!(
            kind = %spec.kind,
            name = %spec.name,
            physical = resource.physical_name(),
            "{}",
            if generation == 1 { "created" } else { "updated" }
        );
        state.journal.push(key.clone());
        state.resources.insert(
            key,
            Stored {
                properties: spec.properties,
                resource: resource.clone(),
            },
        );
        Ok(resource)
    }

    async fn read(&self, kind: ResourceKind, name: &str) -> Result<Option<Resource>> {
        let state = self.lock()?;
        Ok(state
            .resources
            .get(&(kind, name.to_string()))
            .map(|stored| stored.resource.clone()))
    }
}

/// Auto-generated physical name: logical name plus a stable suffix.
fn generated_name(name: &str) -> String {
    format!("{name}-{:07x}", fnv1a(name) & 0x0fff_ffff)
}

fn fnv1a(input: &str) -> u64 {
    input.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn kubeconfig(cluster: &str, endpoint: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": cluster, "cluster": { "server": endpoint } }],
        "contexts": [{ "name": "aws", "context": { "cluster": cluster, "user": "aws" } }],
        "current-context": "aws",
        "users": [{
            "name": "aws",
            "user": { "exec": {
                "apiVersion": "client.authentication.k8s.io/v1beta1",
                "command": "aws",
                "args": ["eks", "get-token", "--cluster-name", cluster],
            }},
        }],
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn client() -> DryRunClient {
        DryRunClient::new("123456789012", "eu-central-1")
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let client = client();
        let spec = ResourceSpec::new(ResourceKind::IamRole, "admins", json!({ "a": 1 }));

        let first = client.apply(spec.clone()).await.unwrap();
        let second = client.apply(spec).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.journal().len(), 1);
        assert!(first
            .arn()
            .unwrap()
            .starts_with("arn:aws:iam::123456789012:role/admins-"));
    }

    #[tokio::test]
    async fn changed_properties_update_in_place() {
        let client = client();
        client
            .apply(ResourceSpec::new(ResourceKind::LogGroup, "logs", json!({ "days": 7 })))
            .await
            .unwrap();
        let updated = client
            .apply(ResourceSpec::new(ResourceKind::LogGroup, "logs", json!({ "days": 30 })))
            .await
            .unwrap();
        assert_eq!(updated.attr("generation"), Some("2"));

        let read = client.read(ResourceKind::LogGroup, "logs").await.unwrap();
        assert_eq!(read, Some(updated));
    }

    #[tokio::test]
    async fn injected_fault_fails_apply() {
        let client = client().with_fault("cluster", "quota exceeded");
        let err = client
            .apply(ResourceSpec::new(ResourceKind::Cluster, "cluster", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert!(client.read(ResourceKind::Cluster, "cluster").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cluster_gets_generated_name_and_kubeconfig() {
        let cluster = client()
            .apply(ResourceSpec::new(
                ResourceKind::Cluster,
                "pulumi-eks-cluster",
                json!({ "version": "1.21" }),
            ))
            .await
            .unwrap();
        let name = cluster.physical_name();
        assert!(name.starts_with("pulumi-eks-cluster-"));
        assert!(cluster.attr("kubeconfig").unwrap().contains(name));
        assert_eq!(cluster.attr("version"), Some("1.21"));
    }
}
