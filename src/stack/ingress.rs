use serde_json::json;

use crate::error::GraphError;
use crate::provision::{Resource, ResourceKind, ResourceSpec};
use crate::stack::{ids, name_of, Stack};
use crate::task::TaskHandle;

const ECR_ACCOUNT: &str = "602401143452";

/// AWS load balancer controller, installed from its Helm chart with the
/// service account named after the controller role.
pub(super) fn declare(
    stack: &mut Stack<'_>,
    cluster: &TaskHandle<Resource>,
    role: &TaskHandle<Resource>,
) -> Result<TaskHandle<Resource>, GraphError> {
    let role_id = role.id().to_string();

    stack.resource("ingress/alb", &[cluster, role], move |config, inputs| {
        Ok(ResourceSpec::new(
            ResourceKind::HelmChart,
            "alb",
            json!({
                "chart": "aws-load-balancer-controller",
                "namespace": "kube-system",
                "repo": "https://aws.github.io/eks-charts",
                "values": {
                    "clusterName": name_of(inputs, ids::CLUSTER)?,
                    "image": {
                        "repository": format!(
                            "{ECR_ACCOUNT}.dkr.ecr.{}.amazonaws.com/amazon/aws-load-balancer-controller",
                            config.region
                        ),
                    },
                    "serviceAccount": {
                        "create": false,
                        "name": name_of(inputs, &role_id)?,
                    },
                },
            }),
        ))
    })
}
