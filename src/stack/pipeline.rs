use serde_json::json;

use crate::error::GraphError;
use crate::provision::{Resource, ResourceKind, ResourceSpec};
use crate::stack::{arn_of, assume_role_for_service, ids, name_of, policy_document, Stack};
use crate::task::TaskHandle;

const BUILD_POLICIES: [(&str, &str); 3] = [
    ("codebuild-access", "arn:aws:iam::aws:policy/AWSCodeBuildDeveloperAccess"),
    ("cloudwatch-access", "arn:aws:iam::aws:policy/CloudWatchFullAccess"),
    ("s3-access", "arn:aws:iam::aws:policy/AmazonS3FullAccess"),
];

/// CI pipeline: GitHub source through a CodeStar connection, then a CodeBuild
/// stage running the stack's buildspec.
pub(super) fn declare(stack: &mut Stack<'_>, connection_id: &str) -> Result<TaskHandle<Resource>, GraphError> {
    let connection_arn = format!(
        "arn:aws:codestar-connections:{}:{}:connection/{}",
        stack.config.region, stack.config.account_id, connection_id
    );

    let pipeline_role = stack.resource("pipeline/role", &[], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::IamRole,
            "pipeline-role",
            json!({ "assumeRolePolicy": assume_role_for_service("codepipeline.amazonaws.com") }),
        ))
    })?;

    let bucket = stack.resource("pipeline/bucket", &[], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::Bucket,
            "pulumi-eks-stack-pipeline-bucket",
            json!({ "acl": "private" }),
        ))
    })?;

    let build_role = stack.resource("pipeline/build-role", &[], |_, _| {
        Ok(ResourceSpec::new(
            ResourceKind::IamRole,
            "build-policy",
            json!({ "assumeRolePolicy": assume_role_for_service("codebuild.amazonaws.com") }),
        ))
    })?;

    for (name, policy_arn) in BUILD_POLICIES {
        stack.resource(format!("pipeline/build-role/{name}"), &[&build_role], move |_, inputs| {
            Ok(ResourceSpec::new(
                ResourceKind::RolePolicyAttachment,
                name,
                json!({ "role": name_of(inputs, "pipeline/build-role")?, "policyArn": policy_arn }),
            ))
        })?;
    }

    stack.resource("pipeline/secret-access", &[&build_role], |_, inputs| {
        Ok(ResourceSpec::new(
            ResourceKind::RolePolicy,
            "secret-access-policy",
            json!({
                "role": name_of(inputs, "pipeline/build-role")?,
                "policy": policy_document(json!([{
                    "Effect": "Allow",
                    "Action": [
                        "secretsmanager:GetSecretValue",
                        "secretsmanager:DescribeSecret",
                        "secretsmanager:ListSecretVersionIds",
                        "secretsmanager:ListSecrets",
                    ],
                    "Resource": "*",
                }])),
            }),
        ))
    })?;

    let project = stack.resource("pipeline/build-project", &[&build_role], |_, inputs| {
        Ok(ResourceSpec::new(
            ResourceKind::BuildProject,
            "pulumi-eks-stack-build",
            json!({
                "artifacts": { "type": "CODEPIPELINE" },
                "buildTimeout": 10,
                "serviceRole": arn_of(inputs, "pipeline/build-role")?,
                "environment": {
                    "computeType": "BUILD_GENERAL1_SMALL",
                    "image": "aws/codebuild/standard:5.0",
                    "type": "LINUX_CONTAINER",
                    "environmentVariables": [{
                        "name": "PULUMI_ACCESS_TOKEN",
                        "value": "PulumiStackSecret:PULUMI_ACCESS_TOKEN",
                        "type": "SECRETS_MANAGER",
                    }],
                    "privilegedMode": true,
                },
                "source": {
                    "type": "CODEPIPELINE",
                    "buildspec": "./codepipeline/buildspec.yml",
                },
            }),
        ))
    })?;

    let source_arn = connection_arn.clone();
    let pipeline = stack.resource(
        ids::PIPELINE,
        &[&pipeline_role, &bucket, &project],
        move |config, inputs| {
            Ok(ResourceSpec::new(
                ResourceKind::Pipeline,
                "pulumi-eks-stack-codepipeline",
                json!({
                    "roleArn": arn_of(inputs, "pipeline/role")?,
                    "artifactStore": {
                        "location": inputs.require("pipeline/bucket")?.require_attr("bucket")?,
                        "type": "S3",
                    },
                    "stages": [
                        {
                            "name": "Source",
                            "actions": [{
                                "name": "Source",
                                "category": "Source",
                                "owner": "AWS",
                                "provider": "CodeStarSourceConnection",
                                "version": "1",
                                "outputArtifacts": ["source_output"],
                                "configuration": {
                                    "ConnectionArn": source_arn,
                                    "FullRepositoryId": config.repository,
                                    "BranchName": config.branch,
                                },
                            }],
                        },
                        {
                            "name": "Build",
                            "actions": [{
                                "name": "Build",
                                "category": "Build",
                                "owner": "AWS",
                                "provider": "CodeBuild",
                                "inputArtifacts": ["source_output"],
                                "outputArtifacts": ["build_output"],
                                "version": "1",
                                "configuration": {
                                    "ProjectName": name_of(inputs, "pipeline/build-project")?,
                                },
                            }],
                        },
                    ],
                }),
            ))
        },
    )?;

    stack.resource("pipeline/role-policy", &[&pipeline_role, &bucket], move |_, inputs| {
        let bucket_arn = arn_of(inputs, "pipeline/bucket")?;
        Ok(ResourceSpec::new(
            ResourceKind::RolePolicy,
            "pipeline-role-policy",
            json!({
                "role": name_of(inputs, "pipeline/role")?,
                "policy": policy_document(json!([
                    {
                        "Effect": "Allow",
                        "Action": [
                            "s3:GetObject",
                            "s3:GetObjectVersion",
                            "s3:GetBucketVersioning",
                            "s3:PutObjectAcl",
                            "s3:PutObject",
                        ],
                        "Resource": [bucket_arn, format!("{bucket_arn}/*")],
                    },
                    {
                        "Effect": "Allow",
                        "Action": ["codestar-connections:UseConnection"],
                        "Resource": connection_arn,
                    },
                    {
                        "Effect": "Allow",
                        "Action": ["codebuild:BatchGetBuilds", "codebuild:StartBuild"],
                        "Resource": "*",
                    },
                ])),
            }),
        ))
    })?;

    Ok(pipeline)
}
