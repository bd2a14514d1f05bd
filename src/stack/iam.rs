use serde_json::json;

use crate::error::GraphError;
use crate::provision::{Resource, ResourceKind, ResourceSpec};
use crate::stack::{assume_role_for_account, assume_role_for_service, name_of, policy_document, Stack};
use crate::task::TaskHandle;

/// Managed policies EKS requires of node group workers to join a cluster.
pub const NODEGROUP_MANAGED_POLICIES: [&str; 3] = [
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

pub(super) struct Roles {
    pub admins: TaskHandle<Resource>,
    pub devs: TaskHandle<Resource>,
    /// One worker role per configured node group, in config order.
    pub node_groups: Vec<(String, TaskHandle<Resource>)>,
    pub autoscaler: Option<TaskHandle<Resource>>,
    pub alb_controller: Option<TaskHandle<Resource>>,
}

impl Roles {
    /// Every role the cluster must know about as an instance role.
    pub fn instance_roles(&self) -> Vec<&TaskHandle<Resource>> {
        let mut roles = vec![&self.admins, &self.devs];
        roles.extend(self.node_groups.iter().map(|(_, role)| role));
        roles
    }

    pub fn node_group(&self, name: &str) -> Option<&TaskHandle<Resource>> {
        self.node_groups
            .iter()
            .find(|(ng, _)| ng == name)
            .map(|(_, role)| role)
    }
}

pub(super) fn declare(stack: &mut Stack<'_>) -> Result<Roles, GraphError> {
    let admins = stack.resource("iam/admins", &[], |config, _| {
        Ok(ResourceSpec::new(
            ResourceKind::IamRole,
            "admins-eksClusterAdmin",
            json!({ "assumeRolePolicy": assume_role_for_account(&config.account_id) }),
        ))
    })?;
    stack.resource("iam/admins/policy", &[&admins], |_, inputs| {
        Ok(ResourceSpec::new(
            ResourceKind::RolePolicy,
            "admins-eksClusterAdminPolicy",
            json!({
                "role": name_of(inputs, "iam/admins")?,
                "policy": policy_document(json!([
                    { "Effect": "Allow", "Action": ["eks:*", "ec2:DescribeImages"], "Resource": "*" },
                    { "Effect": "Allow", "Action": "iam:PassRole", "Resource": "*" },
                ])),
            }),
        ))
    })?;

    let devs = stack.resource("iam/devs", &[], |config, _| {
        Ok(ResourceSpec::new(
            ResourceKind::IamRole,
            "devs-eksClusterDeveloper",
            json!({ "assumeRolePolicy": assume_role_for_account(&config.account_id) }),
        ))
    })?;

    let mut node_groups = Vec::new();
    let names: Vec<String> = stack.config.node_groups.iter().map(|ng| ng.name.clone()).collect();
    for name in names {
        let role = worker_role(stack, &name)?;
        node_groups.push((name, role));
    }

    let autoscaler = if stack.config.addons.autoscaler {
        Some(autoscaler_role(stack)?)
    } else {
        None
    };

    let alb_controller = if stack.config.addons.ingress {
        Some(stack.resource("iam/alb-controller", &[], |_, _| {
            Ok(ResourceSpec::new(
                ResourceKind::IamRole,
                "alb-ingress-controller",
                json!({ "assumeRolePolicy": assume_role_for_service("ec2.amazonaws.com") }),
            ))
        })?)
    } else {
        None
    };

    Ok(Roles {
        admins,
        devs,
        node_groups,
        autoscaler,
        alb_controller,
    })
}

/// Worker role for one node group, with the managed policies attached.
fn worker_role(stack: &mut Stack<'_>, node_group: &str) -> Result<TaskHandle<Resource>, GraphError> {
    let role_id = format!("iam/{node_group}");
    let role_name = format!("{node_group}NodeGroup-eksClusterWorkerNode");
    let role = stack.resource(role_id.clone(), &[], move |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::IamRole,
            role_name.clone(),
            json!({ "assumeRolePolicy": assume_role_for_service("ec2.amazonaws.com") }),
        ))
    })?;

    for policy_arn in NODEGROUP_MANAGED_POLICIES {
        let short = policy_arn.rsplit('/').next().unwrap_or(policy_arn);
        let attachment_name = format!("{node_group}NodeGroup-{short}");
        let role_id = role_id.clone();
        stack.resource(format!("{role_id}/{short}"), &[&role], move |_, inputs| {
            Ok(ResourceSpec::new(
                ResourceKind::RolePolicyAttachment,
                attachment_name.clone(),
                json!({ "role": name_of(inputs, &role_id)?, "policyArn": policy_arn }),
            ))
        })?;
    }

    Ok(role)
}

fn autoscaler_role(stack: &mut Stack<'_>) -> Result<TaskHandle<Resource>, GraphError> {
    let role = stack.resource("iam/autoscaler", &[], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::IamRole,
            "autoscaler-eksClusterAutoscaler",
            json!({ "assumeRolePolicy": assume_role_for_service("ec2.amazonaws.com") }),
        ))
    })?;
    stack.resource("iam/autoscaler/policy", &[&role], |_, inputs| {
        Ok(ResourceSpec::new(
            ResourceKind::RolePolicy,
            "clusterautoscaler-full-access",
            json!({
                "role": name_of(inputs, "iam/autoscaler")?,
                "policy": policy_document(json!([{
                    "Effect": "Allow",
                    "Action": ["autoscaling:*", "ec2:DescribeLaunchTemplateVersions"],
                    "Resource": "*",
                }])),
            }),
        ))
    })?;
    Ok(role)
}
