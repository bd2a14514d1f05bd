//! Manifest templating and file materialization.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const CLUSTER_NAME_PLACEHOLDER: &str = "<YOUR CLUSTER NAME>";
pub const AUTOSCALER_ROLE_PLACEHOLDER: &str = "<CLUSTER AUTOSCALER ROLE>";

/// File name the rendered autoscaler manifest is written to.
pub const AUTOSCALER_MANIFEST: &str = "cluster-autoscaler-autodiscovery.yaml";

/// Bundled autoscaler manifest used when no template path is configured.
pub const DEFAULT_AUTOSCALER_TEMPLATE: &str =
    include_str!("../assets/cluster-autoscaler-autodiscovery.yaml");

/// Read the autoscaler template from `path`, or fall back to the bundled one.
pub async fn load_template(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading autoscaler template {}", path.display())),
        None => Ok(DEFAULT_AUTOSCALER_TEMPLATE.to_string()),
    }
}

/// Substitute every occurrence of the cluster name and role placeholders.
pub fn render_autoscaler(template: &str, cluster_name: &str, role_arn: &str) -> String {
    template
        .replace(CLUSTER_NAME_PLACEHOLDER, cluster_name)
        .replace(AUTOSCALER_ROLE_PLACEHOLDER, role_arn)
}

/// Write `contents` to `out_dir/file_name`, returning the written path.
pub async fn materialize(out_dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf> {
    let path = out_dir.join(file_name);
    tokio::fs::write(&path, contents)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Start from an empty output directory: remove it if present, then create it.
pub fn prepare_out_dir(out_dir: &Path) -> Result<()> {
    if out_dir.exists() {
        fs::remove_dir_all(out_dir)
            .with_context(|| format!("clearing output directory {}", out_dir.display()))?;
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_every_placeholder() {
        let rendered = render_autoscaler(DEFAULT_AUTOSCALER_TEMPLATE, "eks-1a2b", "arn:aws:iam::1:role/as");
        assert!(!rendered.contains(CLUSTER_NAME_PLACEHOLDER));
        assert!(!rendered.contains(AUTOSCALER_ROLE_PLACEHOLDER));
        assert!(rendered.contains("k8s.io/cluster-autoscaler/eks-1a2b"));
        assert!(rendered.contains("eks.amazonaws.com/role-arn: arn:aws:iam::1:role/as"));
    }

    #[tokio::test]
    async fn prepare_clears_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.yaml"), "old").unwrap();

        prepare_out_dir(&out).unwrap();
        assert!(out.is_dir());
        assert!(!out.join("stale.yaml").exists());

        let written = materialize(&out, AUTOSCALER_MANIFEST, "kind: Deployment")
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(written).unwrap(), "kind: Deployment");
    }

    #[tokio::test]
    async fn missing_template_names_the_path() {
        let err = load_template(Some(Path::new("/nonexistent/autoscaler.yaml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/autoscaler.yaml"));
    }
}
