use anyhow::Result;
use serde_json::json;

use crate::error::GraphError;
use crate::provision::{Resource, ResourceKind, ResourceSpec};
use crate::stack::iam::Roles;
use crate::stack::{arn_of, ids, Stack};
use crate::task::TaskHandle;

const ADMIN_CLUSTER_ROLE: &str = "clusterAdminRole";

/// The cluster itself plus the RBAC objects granting the admin user access.
pub(super) fn declare(stack: &mut Stack<'_>, roles: &Roles) -> Result<TaskHandle<Resource>, GraphError> {
    let instance_roles: Vec<String> = roles
        .instance_roles()
        .iter()
        .map(|h| h.id().to_string())
        .collect();

    let cluster = stack.resource(ids::CLUSTER, &roles.instance_roles(), move |config, inputs| {
        let instance_role_arns = instance_roles
            .iter()
            .map(|id| arn_of(inputs, id).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;

        // The devs role is created but not mapped yet.
        Ok(ResourceSpec::new(
            ResourceKind::Cluster,
            config.cluster_name.clone(),
            json!({
                "version": config.kubernetes_version,
                "roleMappings": [{
                    "roleArn": arn_of(inputs, "iam/admins")?,
                    "groups": ["system:masters"],
                    "username": "admin",
                }],
                "instanceRoles": instance_role_arns,
                "skipDefaultNodeGroup": true,
            }),
        ))
    })?;

    let admin_role = stack.resource("cluster/admin-role", &[&cluster], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::ClusterRole,
            ADMIN_CLUSTER_ROLE,
            json!({
                "rules": [{ "apiGroups": [""], "resources": ["*"], "verbs": ["*"] }],
            }),
        ))
    })?;

    stack.resource("cluster/admin-binding", &[&cluster, &admin_role], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::ClusterRoleBinding,
            "clusterAdminBinding",
            json!({
                "subjects": [{ "kind": "User", "name": "admin" }],
                "roleRef": {
                    "kind": "ClusterRole",
                    "name": ADMIN_CLUSTER_ROLE,
                    "apiGroup": "rbac.authorization.k8s.io",
                },
            }),
        ))
    })?;

    Ok(cluster)
}
