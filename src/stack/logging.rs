use serde_json::json;

use crate::config::LoggingAddon;
use crate::error::GraphError;
use crate::provision::{Resource, ResourceKind, ResourceSpec};
use crate::stack::{ids, name_of, Stack};
use crate::task::TaskHandle;

const INSIGHTS_TEMPLATES: &str = "https://raw.githubusercontent.com/aws-samples/amazon-cloudwatch-container-insights/latest/k8s-deployment-manifest-templates/deployment-mode/daemonset/container-insights-monitoring";

/// Log shipping add-on, selected by `addons.logging`.
pub(super) fn declare(stack: &mut Stack<'_>, cluster: &TaskHandle<Resource>) -> Result<(), GraphError> {
    match stack.config.addons.logging {
        LoggingAddon::FluentBit => fluent_bit(stack, cluster),
        LoggingAddon::Fluentd => fluentd(stack, cluster),
        LoggingAddon::None => Ok(()),
    }
}

fn fluent_bit(stack: &mut Stack<'_>, cluster: &TaskHandle<Resource>) -> Result<(), GraphError> {
    let namespace = stack.resource("logging/namespace", &[cluster], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::ConfigFile,
            "amazon-cloudwatch-namespace",
            json!({ "file": format!("{INSIGHTS_TEMPLATES}/cloudwatch-namespace.yaml") }),
        ))
    })?;

    let cluster_info = stack.resource("logging/cluster-info", &[cluster, &namespace], |config, inputs| {
        Ok(ResourceSpec::new(
            ResourceKind::ConfigMap,
            "fluent-bit-cluster-info",
            json!({
                "namespace": "amazon-cloudwatch",
                "data": {
                    "cluster.name": name_of(inputs, ids::CLUSTER)?,
                    "http.server": "On",
                    "http.port": "2020",
                    "logs.region": config.region,
                    "read.head": "Off",
                    "read.tail": "On",
                },
            }),
        ))
    })?;

    stack.resource("logging/fluent-bit", &[cluster, &cluster_info], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::ConfigFile,
            "amazon-cloudwatch-fluent-bit-daemon-set",
            json!({ "file": format!("{INSIGHTS_TEMPLATES}/fluent-bit/fluent-bit.yaml") }),
        ))
    })?;
    Ok(())
}

fn fluentd(stack: &mut Stack<'_>, cluster: &TaskHandle<Resource>) -> Result<(), GraphError> {
    let log_group = stack.resource("logging/log-group", &[], |config, _| {
        Ok(ResourceSpec::new(
            ResourceKind::LogGroup,
            format!("{}-fluentd-logs", config.cluster_name),
            json!({}),
        ))
    })?;

    stack.resource("logging/fluentd", &[cluster, &log_group], |config, inputs| {
        Ok(ResourceSpec::new(
            ResourceKind::HelmChart,
            "fluentd",
            json!({
                "chart": "fluentd-cloudwatch",
                "namespace": "kube-system",
                "repo": "https://charts.helm.sh/incubator",
                "version": "0.11.0",
                "values": {
                    "extraVars": ["{ name: FLUENT_UID, value: '0' }"],
                    "rbac": { "create": true },
                    "awsRegion": config.region,
                    "logGroupName": name_of(inputs, "logging/log-group")?,
                },
            }),
        ))
    })?;
    Ok(())
}
