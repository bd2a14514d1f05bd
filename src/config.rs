use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::TaskOptions;

/// Stack configuration, read once at startup.
///
/// This is how the stack looks in `stack.json`:
///
/// ```json
/// {
///   "cluster_name": "pulumi-eks-cluster",
///   "out_dir": "out",
///   "region": "eu-central-1",
///   "account_id": "123456789012",
///   "github_connection_id": "0a1b2c3d",
///   "addons": { "logging": "fluent-bit" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    pub cluster_name: String,

    /// Where generated manifests are written. Recreated on every run.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    pub region: String,
    pub account_id: String,

    /// Project name used as prefix for node group names.
    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default = "default_kubernetes_version")]
    pub kubernetes_version: String,

    /// CodeStar connection id. The CI pipeline is declared only when set.
    #[serde(default)]
    pub github_connection_id: Option<String>,

    #[serde(default = "default_repository")]
    pub repository: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default = "default_node_groups")]
    pub node_groups: Vec<NodeGroupConfig>,

    #[serde(default)]
    pub addons: Addons,

    /// Autoscaler manifest template. The bundled one is used when unset.
    #[serde(default)]
    pub autoscaler_template: Option<PathBuf>,

    /// Retry/timeout applied to every provisioning task.
    #[serde(default)]
    pub task_defaults: TaskOptions,

    #[serde(default)]
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroupConfig {
    /// Short name, e.g. "standard". Also the suffix of task ids.
    pub name: String,
    pub instance_types: Vec<String>,
    #[serde(default = "default_capacity_type")]
    pub capacity_type: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
    /// Leave `desired_size` to the cluster autoscaler after creation.
    #[serde(default)]
    pub autoscaled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addons {
    #[serde(default = "yes")]
    pub autoscaler: bool,
    #[serde(default = "yes")]
    pub ingress: bool,
    #[serde(default)]
    pub logging: LoggingAddon,
}

impl Default for Addons {
    fn default() -> Self {
        Self {
            autoscaler: true,
            ingress: true,
            logging: LoggingAddon::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingAddon {
    #[default]
    FluentBit,
    Fluentd,
    None,
}

/// Settings for the in-memory provisioning client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunConfig {
    /// Logical resource name -> error message returned by `apply`.
    #[serde(default)]
    pub faults: BTreeMap<String, String>,
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_project() -> String {
    "pulumi-eks-stack".to_string()
}

fn default_kubernetes_version() -> String {
    "1.21".to_string()
}

fn default_repository() -> String {
    "macostea/pulumi-eks-stack".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_capacity_type() -> String {
    "ON_DEMAND".to_string()
}

fn yes() -> bool {
    true
}

fn default_node_groups() -> Vec<NodeGroupConfig> {
    vec![
        NodeGroupConfig {
            name: "standard".to_string(),
            instance_types: vec!["t2.medium".to_string()],
            capacity_type: default_capacity_type(),
            min_size: 1,
            max_size: 10,
            desired_size: 1,
            autoscaled: true,
        },
        NodeGroupConfig {
            name: "2xlarge".to_string(),
            instance_types: vec!["t3.2xlarge".to_string()],
            capacity_type: default_capacity_type(),
            min_size: 0,
            max_size: 10,
            desired_size: 0,
            autoscaled: false,
        },
    ]
}

impl StackConfig {
    /// Read and validate a JSON stack file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading stack file {}", path.display()))?;
        let config: StackConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing stack file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            bail!("cluster_name must not be empty");
        }
        if self.region.trim().is_empty() {
            bail!("region must not be empty");
        }
        if self.account_id.trim().is_empty() {
            bail!("account_id must not be empty");
        }
        let mut seen = Vec::new();
        for ng in &self.node_groups {
            if seen.contains(&&ng.name) {
                bail!("node group '{}' is declared twice", ng.name);
            }
            seen.push(&ng.name);
            if ng.instance_types.is_empty() {
                bail!("node group '{}' has no instance types", ng.name);
            }
            if !(ng.min_size <= ng.desired_size && ng.desired_size <= ng.max_size) {
                bail!(
                    "node group '{}' needs min_size <= desired_size <= max_size",
                    ng.name
                );
            }
        }
        Ok(())
    }

    /// Minimal config for the given cluster, everything else defaulted.
    pub fn new(
        cluster_name: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            out_dir: default_out_dir(),
            region: region.into(),
            account_id: account_id.into(),
            project: default_project(),
            kubernetes_version: default_kubernetes_version(),
            github_connection_id: None,
            repository: default_repository(),
            branch: default_branch(),
            node_groups: default_node_groups(),
            addons: Addons::default(),
            autoscaler_template: None,
            task_defaults: TaskOptions::default(),
            dry_run: DryRunConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let config: StackConfig = serde_json::from_str(
            r#"{ "cluster_name": "c", "region": "eu-central-1", "account_id": "1" }"#,
        )
        .unwrap();
        assert_eq!(config, StackConfig::new("c", "eu-central-1", "1"));
        assert_eq!(config.node_groups.len(), 2);
        assert!(config.addons.autoscaler);
        assert_eq!(config.addons.logging, LoggingAddon::FluentBit);
        config.validate().unwrap();
    }

    #[test]
    fn parses_addons_and_faults() {
        let config: StackConfig = serde_json::from_str(
            r#"{
                "cluster_name": "c", "region": "r", "account_id": "1",
                "addons": { "ingress": false, "logging": "fluentd" },
                "task_defaults": { "retry": 1, "timeout_secs": 600 },
                "dry_run": { "faults": { "cluster": "quota exceeded" }, "latency_ms": 5 }
            }"#,
        )
        .unwrap();
        assert!(!config.addons.ingress);
        assert!(config.addons.autoscaler);
        assert_eq!(config.addons.logging, LoggingAddon::Fluentd);
        assert_eq!(config.task_defaults.retry, 1);
        assert_eq!(config.dry_run.faults["cluster"], "quota exceeded");
    }

    #[test]
    fn rejects_bad_scaling() {
        let mut config = StackConfig::new("c", "r", "1");
        config.node_groups[0].desired_size = 20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("standard"));
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.json");
        fs::write(&path, "{ not json").unwrap();
        let err = StackConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("stack.json"));
    }
}
