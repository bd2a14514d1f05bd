use serde_json::json;

use crate::error::GraphError;
use crate::provision::{Resource, ResourceKind, ResourceSpec};
use crate::stack::{arn_of, ids, name_of, Stack};
use crate::task::TaskHandle;
use crate::template;

/// Cluster autoscaler: render the manifest once the cluster name and the
/// autoscaler role ARN are known, write it to the output directory, apply it.
pub(super) fn declare(
    stack: &mut Stack<'_>,
    cluster: &TaskHandle<Resource>,
    role: &TaskHandle<Resource>,
) -> Result<TaskHandle<Resource>, GraphError> {
    let role_id = role.id().to_string();

    stack.resource_async(ids::AUTOSCALER, &[cluster, role], move |config, inputs| {
        let role_id = role_id.clone();
        async move {
            let cluster_name = name_of(&inputs, ids::CLUSTER)?;
            let role_arn = arn_of(&inputs, &role_id)?;

            let manifest_template =
                template::load_template(config.autoscaler_template.as_deref()).await?;
            let rendered = template::render_autoscaler(&manifest_template, cluster_name, role_arn);
            let path =
                template::materialize(&config.out_dir, template::AUTOSCALER_MANIFEST, &rendered)
                    .await?;

            Ok(ResourceSpec::new(
                ResourceKind::ConfigFile,
                "autoscaler",
                json!({ "file": path.display().to_string() }),
            ))
        }
    })
}
