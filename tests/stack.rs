use std::fs;
use std::sync::Arc;

use eksplan::config::{LoggingAddon, StackConfig};
use eksplan::provision::{DryRunClient, ProvisioningClient, Resource, ResourceKind};
use eksplan::stack::{self, ids, StackOutputs};
use eksplan::{template, Executor, RunOptions, RunReport};

fn config_in(dir: &tempfile::TempDir) -> StackConfig {
    let mut config = StackConfig::new("pulumi-eks-cluster", "eu-central-1", "123456789012");
    config.out_dir = dir.path().join("out");
    config
}

async fn provision(config: &StackConfig, client: Arc<DryRunClient>) -> RunReport<Resource> {
    template::prepare_out_dir(&config.out_dir).unwrap();
    let mut exec = Executor::new().with_defaults(config.task_defaults);
    stack::compose(&mut exec, config, client).unwrap();
    exec.run(RunOptions::default().with_max_concurrency(4))
        .await
        .unwrap()
}

#[tokio::test]
async fn dry_run_provisions_the_whole_stack() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let client = Arc::new(DryRunClient::new(&config.account_id, &config.region));

    let report = provision(&config, Arc::clone(&client)).await;

    assert!(report.is_success(), "{:?}", report.summary());
    for id in [
        "iam/admins",
        "iam/devs",
        "cluster",
        "nodegroup/standard",
        "nodegroup/2xlarge",
        "autoscaler",
        "ingress/alb",
        "logging/fluent-bit",
    ] {
        assert!(report.get(id).is_some(), "missing {id}");
    }
    assert!(report.get(ids::PIPELINE).is_none());

    let outputs = StackOutputs::from_report(&report);
    let cluster_name = outputs.cluster_name.clone().unwrap();
    assert!(cluster_name.starts_with("pulumi-eks-cluster-"));
    assert!(outputs.kubeconfig.unwrap().contains(&cluster_name));
    assert_eq!(outputs.pipeline, None);

    let node_group = client
        .read(ResourceKind::NodeGroup, "pulumi-eks-stack-ng-standard")
        .await
        .unwrap()
        .unwrap();
    assert!(node_group.arn().unwrap().contains(&cluster_name));
}

#[tokio::test]
async fn autoscaler_manifest_is_rendered_into_out_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let client = Arc::new(DryRunClient::new(&config.account_id, &config.region));

    let report = provision(&config, client).await;

    let cluster_name = report.get(ids::CLUSTER).unwrap().physical_name().to_string();
    let role_arn = report.get("iam/autoscaler").unwrap().arn().unwrap().to_string();

    let manifest = config.out_dir.join(template::AUTOSCALER_MANIFEST);
    let text = fs::read_to_string(&manifest).unwrap();
    assert!(!text.contains(template::CLUSTER_NAME_PLACEHOLDER));
    assert!(!text.contains(template::AUTOSCALER_ROLE_PLACEHOLDER));
    assert!(text.contains(&format!("k8s.io/cluster-autoscaler/{cluster_name}")));
    assert!(text.contains(&role_arn));

    let applied = report.get(ids::AUTOSCALER).unwrap();
    assert_eq!(applied.kind, ResourceKind::ConfigFile);
}

#[tokio::test]
async fn cluster_fault_skips_everything_built_on_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let client = Arc::new(
        DryRunClient::new(&config.account_id, &config.region)
            .with_fault("pulumi-eks-cluster", "quota exceeded"),
    );

    let report = provision(&config, client).await;

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    let failure = format!("{:#}", report.failed["cluster"]);
    assert!(failure.contains("quota exceeded"), "{failure}");

    for id in [
        "nodegroup/standard",
        "nodegroup/2xlarge",
        "autoscaler",
        "ingress/alb",
        "logging/namespace",
        "logging/cluster-info",
        "logging/fluent-bit",
        "cluster/admin-role",
        "cluster/admin-binding",
    ] {
        let reason = report.skipped.get(id).unwrap_or_else(|| panic!("{id} not skipped"));
        assert_eq!(reason.to_string(), "dependency cluster failed");
    }

    // Roles do not depend on the cluster.
    assert!(report.get("iam/admins").is_some());
    assert!(report.get("iam/autoscaler/policy").is_some());

    // Nothing reached the output directory.
    assert!(!config.out_dir.join(template::AUTOSCALER_MANIFEST).exists());
    assert_eq!(StackOutputs::from_report(&report), StackOutputs::default());
}

#[tokio::test]
async fn pipeline_is_declared_with_a_connection() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.github_connection_id = Some("0a1b2c3d".to_string());

    let mut exec = Executor::new();
    let client = Arc::new(DryRunClient::new(&config.account_id, &config.region));
    let handles = stack::compose(&mut exec, &config, client.clone()).unwrap();
    assert!(handles.pipeline.is_some());
    assert_eq!(handles.node_groups.len(), 2);

    let graph = exec.plan().unwrap();
    let pipeline_deps: Vec<&str> = graph
        .dependencies(ids::PIPELINE)
        .into_iter()
        .map(|id| id.as_str())
        .collect();
    assert!(pipeline_deps.contains(&"pipeline/build-project"));

    let report = provision(&config, client).await;
    assert!(report.is_success(), "{:?}", report.summary());
    let outputs = StackOutputs::from_report(&report);
    assert!(outputs
        .pipeline
        .unwrap()
        .starts_with("pulumi-eks-stack-codepipeline-"));
}

#[tokio::test]
async fn logging_addon_selects_its_tasks() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = config_in(&dir);
    config.addons.logging = LoggingAddon::Fluentd;
    let mut exec = Executor::new();
    let client = Arc::new(DryRunClient::new(&config.account_id, &config.region));
    stack::compose(&mut exec, &config, client).unwrap();
    let graph = exec.plan().unwrap();
    assert!(graph.contains("logging/fluentd"));
    assert!(graph.contains("logging/log-group"));
    assert!(!graph.contains("logging/fluent-bit"));

    config.addons.logging = LoggingAddon::None;
    config.addons.ingress = false;
    config.addons.autoscaler = false;
    let mut exec = Executor::new();
    let client = Arc::new(DryRunClient::new(&config.account_id, &config.region));
    let handles = stack::compose(&mut exec, &config, client).unwrap();
    assert!(handles.autoscaler.is_none());
    let graph = exec.plan().unwrap();
    assert!(graph.topological_order().all(|id| {
        !id.as_str().starts_with("logging/")
            && !id.as_str().starts_with("ingress/")
            && id.as_str() != "iam/autoscaler"
    }));
}

#[tokio::test]
async fn worker_policy_attachments_are_named_per_node_group() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let client = Arc::new(DryRunClient::new(&config.account_id, &config.region));

    let report = provision(&config, Arc::clone(&client)).await;
    assert!(report.is_success(), "{:?}", report.summary());

    for name in [
        "standardNodeGroup-AmazonEKSWorkerNodePolicy",
        "standardNodeGroup-AmazonEKS_CNI_Policy",
        "2xlargeNodeGroup-AmazonEC2ContainerRegistryReadOnly",
    ] {
        let attachment = client
            .read(ResourceKind::RolePolicyAttachment, name)
            .await
            .unwrap();
        assert!(attachment.is_some(), "missing attachment {name}");
    }
}

#[tokio::test]
async fn unreadable_autoscaler_template_fails_only_the_autoscaler() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.autoscaler_template = Some(dir.path().join("missing-template.yaml"));
    let client = Arc::new(DryRunClient::new(&config.account_id, &config.region));

    let report = provision(&config, client).await;

    assert_eq!(report.failed.len(), 1);
    let failure = format!("{:#}", report.failed[ids::AUTOSCALER]);
    assert!(failure.contains("missing-template.yaml"), "{failure}");
    assert!(report.skipped.is_empty());
    assert!(report.get(ids::CLUSTER).is_some());
    assert!(!config.out_dir.join(template::AUTOSCALER_MANIFEST).exists());
}
