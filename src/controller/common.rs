//! Shared controller helpers.
//!
//! Utilities used by both the MachineSet and Machine synchronizers.

use kube::{Api, Resource, ResourceExt, api::PatchParams};
use serde::de::DeserializeOwned;

use crate::controller::error::Error;
use crate::crd::MIRROR_OF_ANNOTATION;

/// Add a finalizer to a resource.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    // Get current resource to check existing finalizers
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();

    // Only add if not already present
    if !finalizers.contains(&finalizer.to_string()) {
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::default(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    }
    Ok(())
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    // Get current resource to check existing finalizers
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            // Resource already deleted, nothing to do
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();

    // Only patch if the finalizer exists
    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &PatchParams::default(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    }
    Ok(())
}

/// Whether an object on the other side is a mirror managed by this operator,
/// as opposed to an unrelated resource that happens to share the name.
pub fn is_managed_mirror<T>(resource: &T) -> bool
where
    T: Resource,
{
    resource.meta().annotations.as_ref().is_some_and(|a| {
        a.contains_key(MIRROR_OF_ANNOTATION)
    })
}

/// The `{namespace}/{name}` value written into the mirror-of annotation.
pub fn mirror_of_value(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Whether the last synchronized write covered the current generation. A
/// sync recorded at an older generation does not satisfy the authority
/// handoff guard: the pending change must propagate first.
pub fn generation_synchronized(
    synchronized_generation: Option<i64>,
    generation: Option<i64>,
) -> bool {
    match (synchronized_generation, generation) {
        (Some(synced), Some(current)) => synced == current,
        _ => false,
    }
}
