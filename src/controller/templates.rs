//! Infra template lifecycle: content-addressed naming, rotation planning,
//! and garbage collection.
//!
//! Templates are never mutated in place. A provider-spec change produces a
//! new template name; the MachineSet reference is swapped first, and only a
//! later pass deletes templates that are no longer referenced. Splitting the
//! decision (pure plan) from the execution keeps rotation testable without a
//! cluster and safe to re-run at any step.

use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Error;
use crate::crd::{infra, InfraMachineTemplate, TEMPLATE_OWNER_LABEL};

/// Content-addressed template name: `{machineset}-{8 hex chars of sha256}`.
/// Equal payloads map to equal names, which is what makes template creation
/// idempotent across reconcile passes.
pub fn template_name(machine_set: &str, payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut suffix = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        suffix.push_str(&format!("{:02x}", byte));
    }
    format!("{}-{}", machine_set, suffix)
}

/// One pass of the rotation protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    /// Create the desired template (it does not exist yet).
    pub create: bool,
    /// Point the MachineSet's infrastructureRef at the desired template.
    pub repoint: bool,
    /// Templates safe to delete this pass (superseded and unreferenced).
    pub delete: Vec<String>,
}

impl RotationPlan {
    /// Whether this pass changes anything.
    pub fn is_noop(&self) -> bool {
        !self.create && !self.repoint && self.delete.is_empty()
    }
}

/// Compute the rotation steps for one reconcile pass.
///
/// Old templates are only deleted once the reference already points at the
/// desired one; a pass that still needs to create or repoint deletes nothing,
/// so a crash between steps never leaves the MachineSet pointing at a
/// deleted template.
pub fn plan_rotation(
    desired: &str,
    current_ref: Option<&str>,
    existing: &[String],
) -> RotationPlan {
    let create = !existing.iter().any(|t| t == desired);
    let repoint = current_ref != Some(desired);
    let delete = if create || repoint {
        Vec::new()
    } else {
        existing
            .iter()
            .filter(|t| t.as_str() != desired)
            .cloned()
            .collect()
    };
    RotationPlan {
        create,
        repoint,
        delete,
    }
}

/// Apply the desired template via server-side apply. Creation is idempotent:
/// re-applying an identical template is a no-op, and the payload for a given
/// name never changes (the name is derived from the payload).
pub async fn ensure_template(
    ctx: &Context,
    machine_set: &str,
    name: &str,
    payload: &Value,
) -> Result<(), Error> {
    let api: Api<InfraMachineTemplate> =
        Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);

    let mut template = InfraMachineTemplate::new(
        name,
        infra::MachineTemplateSpec {
            template: infra::MachineTemplateResource {
                spec: payload.clone(),
            },
        },
    );
    template
        .labels_mut()
        .insert(TEMPLATE_OWNER_LABEL.to_string(), machine_set.to_string());

    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&template),
    )
    .await?;
    debug!(template = %name, machine_set = %machine_set, "Applied infra template");
    Ok(())
}

/// List the names of templates generated for a MachineSet.
pub async fn list_owned_templates(
    ctx: &Context,
    machine_set: &str,
) -> Result<Vec<String>, Error> {
    let api: Api<InfraMachineTemplate> =
        Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);
    let lp =
        ListParams::default().labels(&format!("{}={}", TEMPLATE_OWNER_LABEL, machine_set));
    let templates = api.list(&lp).await?;
    Ok(templates.iter().map(|t| t.name_any()).collect())
}

/// Delete superseded templates named by a rotation plan.
pub async fn delete_templates(ctx: &Context, names: &[String]) -> Result<(), Error> {
    let api: Api<InfraMachineTemplate> =
        Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);
    for name in names {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => info!(template = %name, "Deleted superseded infra template"),
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_name_is_deterministic() {
        let payload = json!({ "instanceType": "m6i.large" });
        let a = template_name("worker-a", &payload);
        let b = template_name("worker-a", &payload);
        assert_eq!(a, b);
        assert!(a.starts_with("worker-a-"));
        assert_eq!(a.len(), "worker-a-".len() + 8);
    }

    #[test]
    fn test_template_name_changes_with_payload() {
        let a = template_name("worker-a", &json!({ "instanceType": "m6i.large" }));
        let b = template_name("worker-a", &json!({ "instanceType": "m6i.xlarge" }));
        assert_ne!(a, b);
    }

    #[test]
    fn test_first_pass_creates_without_deleting() {
        let plan = plan_rotation("worker-a-new1", Some("worker-a-old1"), &["worker-a-old1".into()]);
        assert!(plan.create);
        assert!(plan.repoint);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_repoint_pass_still_deletes_nothing() {
        // Template exists but the reference has not moved yet.
        let existing = vec!["worker-a-old1".to_string(), "worker-a-new1".to_string()];
        let plan = plan_rotation("worker-a-new1", Some("worker-a-old1"), &existing);
        assert!(!plan.create);
        assert!(plan.repoint);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_old_template_collected_after_swap() {
        let existing = vec!["worker-a-old1".to_string(), "worker-a-new1".to_string()];
        let plan = plan_rotation("worker-a-new1", Some("worker-a-new1"), &existing);
        assert!(!plan.create);
        assert!(!plan.repoint);
        assert_eq!(plan.delete, vec!["worker-a-old1".to_string()]);
    }

    #[test]
    fn test_converged_state_is_noop() {
        let existing = vec!["worker-a-new1".to_string()];
        let plan = plan_rotation("worker-a-new1", Some("worker-a-new1"), &existing);
        assert!(plan.is_noop());
    }
}
