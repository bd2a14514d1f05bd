use serde_json::json;

use crate::config::NodeGroupConfig;
use crate::error::GraphError;
use crate::provision::{Resource, ResourceKind, ResourceSpec};
use crate::stack::iam::Roles;
use crate::stack::{arn_of, ids, name_of, Stack};
use crate::task::TaskHandle;

/// One managed node group per configured entry.
pub(super) fn declare(
    stack: &mut Stack<'_>,
    cluster: &TaskHandle<Resource>,
    roles: &Roles,
) -> Result<Vec<TaskHandle<Resource>>, GraphError> {
    let node_groups: Vec<NodeGroupConfig> = stack.config.node_groups.clone();
    let mut handles = Vec::with_capacity(node_groups.len());

    for ng in node_groups {
        // Every configured node group has a role; see iam::declare.
        let Some(role) = roles.node_group(&ng.name) else {
            continue;
        };
        let role_id = role.id().to_string();
        let task_id = format!("nodegroup/{}", ng.name);

        let handle = stack.resource(task_id, &[cluster, role], move |config, inputs| {
            let mut options = json!({});
            if ng.autoscaled {
                // Let the cluster autoscaler own the desired size.
                options = json!({ "ignoreChanges": ["scalingConfig.desiredSize"] });
            }
            Ok(ResourceSpec::new(
                ResourceKind::NodeGroup,
                format!("{}-ng-{}", config.project, ng.name),
                json!({
                    "clusterName": name_of(inputs, ids::CLUSTER)?,
                    "instanceTypes": ng.instance_types,
                    "capacityType": ng.capacity_type,
                    "scalingConfig": {
                        "desiredSize": ng.desired_size,
                        "maxSize": ng.max_size,
                        "minSize": ng.min_size,
                    },
                    "nodeRoleArn": arn_of(inputs, &role_id)?,
                    "options": options,
                }),
            ))
        })?;
        handles.push(handle);
    }

    Ok(handles)
}
