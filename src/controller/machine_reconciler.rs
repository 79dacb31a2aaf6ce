//! Reconciliation loop for Machine mirror pairs.
//!
//! Machines follow the same protocol as MachineSets but with a smaller
//! surface: no replica counts and no infra template rotation. A Machine's
//! authority can diverge from its owning MachineSet's, because new Machines
//! take the template-level authority value, so each Machine pair runs its own
//! authority state machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, ResourceExt,
    api::{DeleteParams, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, info, warn};

use crate::controller::{
    authority::{determine_event, AuthorityStateMachine, TransitionContext, TransitionResult},
    common::{
        add_finalizer, generation_synchronized, is_managed_mirror, mirror_of_value,
        remove_finalizer,
    },
    context::{Context, FIELD_MANAGER},
    convert,
    deletion::{plan_deletion, DeletionView, PairRole, FINALIZER},
    error::Error,
    status::ConditionBuilder,
};
use crate::crd::{
    is_condition_true, mapi, AuthoritativeApi, AuthorityState, CapiMachine, MapiMachine,
    AUTHORITY_ANNOTATION, CONDITION_PAUSED, MIRROR_OF_ANNOTATION, REASON_NAME_CONFLICT,
};

const KIND: &str = "Machine";

const REQUEUE_CONVERGED: Duration = Duration::from_secs(60);
const REQUEUE_PROGRESSING: Duration = Duration::from_secs(2);
const REQUEUE_DEGRADED: Duration = Duration::from_secs(300);

/// Reconcile a MAPI Machine and its CAPI mirror.
pub async fn reconcile(obj: Arc<MapiMachine>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    debug!(name = %name, "Reconciling Machine pair");

    let mapi_api: Api<MapiMachine> = Api::namespaced(ctx.client.clone(), &ctx.mapi_namespace);
    let capi_api: Api<CapiMachine> = Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &mapi_api, &capi_api).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        add_finalizer(&mapi_api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let authority = obj.spec.authoritative_api;
    let generation = obj.metadata.generation;

    let mirror = match capi_api.get_opt(&name).await? {
        Some(m) if !is_managed_mirror(&m) => {
            warn!(name = %name, "CAPI Machine with the same name exists and is not our mirror");
            ctx.publish_warning_event(
                obj.as_ref(),
                "NameConflict",
                "Synchronizing",
                Some(format!(
                    "A CAPI Machine named {} already exists in {} and is not managed by this operator",
                    name, ctx.capi_namespace
                )),
            )
            .await;
            let mut builder = ConditionBuilder::from_existing(
                &obj.status
                    .as_ref()
                    .map(|s| s.conditions.clone())
                    .unwrap_or_default(),
            );
            builder.paused_mapi(authority, generation).not_synchronized(
                REASON_NAME_CONFLICT,
                &format!(
                    "A CAPI Machine named {} already exists in {} under a different lifecycle",
                    name, ctx.capi_namespace
                ),
                generation,
            );
            patch_mapi_status(
                &mapi_api,
                &name,
                serde_json::json!({
                    "conditions": builder.build(),
                }),
            )
            .await?;
            return Ok(Action::requeue(REQUEUE_DEGRADED));
        }
        Some(m) if m.metadata.deletion_timestamp.is_some() => {
            debug!(name = %name, "Mirror is terminating; waiting before recreation");
            return Ok(Action::requeue(REQUEUE_PROGRESSING));
        }
        Some(m) => Some(m),
        None => None,
    };

    let mirror = match mirror {
        Some(m) => m,
        None => {
            if authority == AuthoritativeApi::ClusterApi {
                return Err(Error::Transient(format!(
                    "authoritative CAPI Machine {} not found",
                    name
                )));
            }
            return create_mirror(&obj, &ctx, &capi_api).await;
        }
    };

    match authority {
        AuthoritativeApi::MachineApi => {
            propagate_mapi_to_capi(&obj, &mirror, &ctx, &capi_api, &mapi_api).await?
        }
        AuthoritativeApi::ClusterApi => {
            propagate_capi_to_mapi(&obj, &mirror, &ctx, &mapi_api).await?
        }
    }

    update_capi_status(&obj, &mirror, &capi_api, authority).await?;

    let next_authority = advance_authority(&obj, &mirror, &ctx, authority).await;

    let phase = match authority {
        AuthoritativeApi::MachineApi => obj.status.as_ref().and_then(|s| s.phase.clone()),
        AuthoritativeApi::ClusterApi => mirror.status.as_ref().and_then(|s| s.phase.clone()),
    };
    let mut builder = ConditionBuilder::from_existing(
        &obj.status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default(),
    );
    builder
        .paused_mapi(authority, generation)
        .synchronized(KIND, authority, generation);
    let mut status = serde_json::json!({
        "authoritativeAPI": next_authority,
        "synchronizedGeneration": generation,
        "conditions": builder.build(),
    });
    if let Some(phase) = phase {
        status["phase"] = serde_json::Value::String(phase);
    }
    patch_mapi_status(&mapi_api, &name, status).await?;

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state.metrics.record_sync(KIND, &name, duration);
    }

    if next_authority.matches(authority) {
        Ok(Action::requeue(REQUEUE_CONVERGED))
    } else {
        Ok(Action::requeue(REQUEUE_PROGRESSING))
    }
}

/// Error policy for the Machine controller
pub fn error_policy(obj: Arc<MapiMachine>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(KIND, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        tracing::error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Create the CAPI mirror for an authoritative MAPI Machine. The mirror's
/// infrastructure reference carries the Machine's own name; the provider-side
/// infra object is the infra provider's concern, not the synchronizer's.
async fn create_mirror(
    obj: &MapiMachine,
    ctx: &Context,
    capi_api: &Api<CapiMachine>,
) -> Result<Action, Error> {
    let name = obj.name_any();

    let spec = convert::desired_capi_machine_spec(&ctx.cluster_name, &name);
    let mut mirror = CapiMachine::new(&name, spec);
    mirror.labels_mut().extend(obj.labels().clone());
    mirror.annotations_mut().insert(
        MIRROR_OF_ANNOTATION.to_string(),
        mirror_of_value(&ctx.mapi_namespace, &name),
    );
    mirror.annotations_mut().insert(
        AUTHORITY_ANNOTATION.to_string(),
        obj.spec.authoritative_api.to_string(),
    );

    capi_api
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&mirror),
        )
        .await?;

    info!(name = %name, "Created CAPI mirror Machine");
    ctx.publish_normal_event(
        obj,
        "MirrorCreated",
        "Synchronizing",
        Some(format!("Created CAPI Machine {}/{}", ctx.capi_namespace, name)),
    )
    .await;

    Ok(Action::requeue(REQUEUE_PROGRESSING))
}

/// Push metadata from the authoritative MAPI Machine onto the mirror, and
/// merged additions back. Provider IDs never travel in either direction.
async fn propagate_mapi_to_capi(
    obj: &MapiMachine,
    mirror: &CapiMachine,
    ctx: &Context,
    capi_api: &Api<CapiMachine>,
    mapi_api: &Api<MapiMachine>,
) -> Result<(), Error> {
    let name = obj.name_any();

    let merged_labels = convert::merge_pair_metadata(obj.labels(), mirror.labels());
    let merged_annotations = convert::merge_pair_metadata(obj.annotations(), mirror.annotations());

    let mut desired_spec = mirror.spec.clone();
    desired_spec.cluster_name = ctx.cluster_name.clone();
    desired_spec.provider_id = None;

    let mut desired_mirror = CapiMachine::new(&name, desired_spec);
    desired_mirror.labels_mut().extend(merged_labels.clone());
    desired_mirror.annotations_mut().extend(merged_annotations.clone());
    desired_mirror.annotations_mut().insert(
        MIRROR_OF_ANNOTATION.to_string(),
        mirror_of_value(&ctx.mapi_namespace, &name),
    );
    desired_mirror.annotations_mut().insert(
        AUTHORITY_ANNOTATION.to_string(),
        AuthoritativeApi::MachineApi.to_string(),
    );

    capi_api
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&desired_mirror),
        )
        .await?;

    // Mirror-side metadata additions flow back.
    if obj.labels() != &merged_labels
        || obj
            .annotations()
            .iter()
            .filter(|(k, _)| !k.starts_with("machinesync.openshift.io/"))
            .ne(merged_annotations.iter())
    {
        let patch = serde_json::json!({
            "metadata": {
                "labels": merged_labels,
                "annotations": merged_annotations,
            }
        });
        mapi_api
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
    }

    Ok(())
}

/// Pull metadata from the authoritative CAPI Machine onto the MAPI mirror.
async fn propagate_capi_to_mapi(
    obj: &MapiMachine,
    mirror: &CapiMachine,
    _ctx: &Context,
    mapi_api: &Api<MapiMachine>,
) -> Result<(), Error> {
    let name = obj.name_any();

    let merged_labels = convert::merge_pair_metadata(mirror.labels(), obj.labels());
    let merged_annotations = convert::merge_pair_metadata(mirror.annotations(), obj.annotations());

    let patch = serde_json::json!({
        "metadata": {
            "labels": merged_labels,
            "annotations": merged_annotations,
        }
    });
    mapi_api
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

    Ok(())
}

/// Write the mirror-side status: paused condition and, when the Machine API
/// drives the instance, the observed phase.
async fn update_capi_status(
    obj: &MapiMachine,
    mirror: &CapiMachine,
    capi_api: &Api<CapiMachine>,
    authority: AuthoritativeApi,
) -> Result<(), Error> {
    let name = obj.name_any();

    let mut builder = ConditionBuilder::from_existing(
        &mirror
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default(),
    );
    builder.paused_capi(authority, mirror.metadata.generation);

    let mut status = serde_json::json!({ "conditions": builder.build() });
    if authority == AuthoritativeApi::MachineApi {
        if let Some(phase) = obj.status.as_ref().and_then(|s| s.phase.clone()) {
            status["phase"] = serde_json::Value::String(phase);
        }
    }

    capi_api
        .patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await?;

    let current = mirror.annotations().get(AUTHORITY_ANNOTATION);
    if current.map(String::as_str) != Some(&authority.to_string()) {
        let patch = serde_json::json!({
            "metadata": { "annotations": { AUTHORITY_ANNOTATION: authority.to_string() } }
        });
        capi_api
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
    }
    Ok(())
}

/// Advance the Machine pair's authority state machine one step.
async fn advance_authority(
    obj: &MapiMachine,
    mirror: &CapiMachine,
    ctx: &Context,
    authority: AuthoritativeApi,
) -> AuthorityState {
    let name = obj.name_any();
    let current = obj
        .status
        .as_ref()
        .and_then(|s| s.authoritative_api)
        .unwrap_or_else(|| AuthorityState::settled(authority));

    let Some(event) = determine_event(&current, authority) else {
        return current;
    };

    let outgoing_paused = match authority {
        AuthoritativeApi::MachineApi => mirror
            .status
            .as_ref()
            .map(|s| is_condition_true(&s.conditions, CONDITION_PAUSED))
            .unwrap_or(false),
        AuthoritativeApi::ClusterApi => obj
            .status
            .as_ref()
            .map(|s| is_condition_true(&s.conditions, CONDITION_PAUSED))
            .unwrap_or(false),
    };
    let synchronized = generation_synchronized(
        obj.status.as_ref().and_then(|s| s.synchronized_generation),
        obj.metadata.generation,
    );

    let sm = AuthorityStateMachine::new();
    let transition_ctx = TransitionContext::new(authority)
        .with_outgoing_paused(outgoing_paused)
        .with_synchronized(synchronized);

    match sm.transition(&current, event, &transition_ctx) {
        TransitionResult::Success {
            from,
            to,
            description,
            ..
        } => {
            info!(name = %name, from = %from, to = %to, "{}", description);
            ctx.publish_normal_event(
                obj,
                "AuthoritySwitch",
                "Migrating",
                Some(description.to_string()),
            )
            .await;
            if let Some(ref health_state) = ctx.health_state {
                if !matches!(to, AuthorityState::Migrating) {
                    health_state
                        .metrics
                        .record_authority_switch(KIND, &to.to_string());
                }
            }
            to
        }
        TransitionResult::GuardFailed { reason, .. } => {
            debug!(name = %name, reason = %reason, "Authority handoff not yet safe");
            current
        }
        TransitionResult::InvalidTransition { .. } => current,
    }
}

async fn patch_mapi_status(
    mapi_api: &Api<MapiMachine>,
    name: &str,
    status: serde_json::Value,
) -> Result<(), Error> {
    mapi_api
        .patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await?;
    Ok(())
}

/// Handle deletion of the MAPI Machine. An authoritative Machine takes its
/// mirror with it; a non-authoritative mirror goes alone and is recreated.
async fn handle_deletion(
    obj: &MapiMachine,
    ctx: &Context,
    mapi_api: &Api<MapiMachine>,
    capi_api: &Api<CapiMachine>,
) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, authority = %obj.spec.authoritative_api, "Handling Machine deletion");

    let counterpart = capi_api.get_opt(&name).await?;
    let role = match obj.spec.authoritative_api {
        AuthoritativeApi::MachineApi => PairRole::Authoritative,
        AuthoritativeApi::ClusterApi => PairRole::Mirror,
    };
    let view = DeletionView {
        role,
        counterpart_exists: counterpart.as_ref().is_some_and(is_managed_mirror),
        counterpart_terminating: counterpart
            .as_ref()
            .is_some_and(|c| c.metadata.deletion_timestamp.is_some()),
    };
    let mut plan = plan_deletion(&view);
    // Machines own no infra templates.
    plan.delete_templates = false;

    if plan.delete_counterpart {
        match capi_api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name = %name, "Deleted CAPI mirror as part of cascade");
                ctx.publish_normal_event(
                    obj,
                    "MirrorDeleted",
                    "Deleting",
                    Some(format!(
                        "Deleted CAPI Machine {}/{}",
                        ctx.capi_namespace, name
                    )),
                )
                .await;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }

    if plan.remove_finalizer {
        remove_finalizer(mapi_api, &name, FINALIZER).await?;
        return Ok(Action::await_change());
    }

    Ok(Action::requeue(Duration::from_secs(5)))
}

/// Seed reconciler anchored on the CAPI side, covering the CAPI-originated
/// flows for Machines: mirror seeding, finalizer, deletion cascade.
pub async fn reconcile_capi(obj: Arc<CapiMachine>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj.name_any();

    let mapi_api: Api<MapiMachine> = Api::namespaced(ctx.client.clone(), &ctx.mapi_namespace);
    let capi_api: Api<CapiMachine> = Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);

    let counterpart = mapi_api.get_opt(&name).await?;
    let authoritative = match &counterpart {
        Some(c) => c.spec.authoritative_api == AuthoritativeApi::ClusterApi,
        None => !is_managed_mirror(obj.as_ref()),
    };

    if obj.metadata.deletion_timestamp.is_some() {
        let view = DeletionView {
            role: if authoritative {
                PairRole::Authoritative
            } else {
                PairRole::Mirror
            },
            counterpart_exists: counterpart.is_some(),
            counterpart_terminating: counterpart
                .as_ref()
                .is_some_and(|c| c.metadata.deletion_timestamp.is_some()),
        };
        let plan = plan_deletion(&view);

        if plan.delete_counterpart {
            match mapi_api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => info!(name = %name, "Deleted MAPI mirror as part of cascade"),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        if plan.remove_finalizer {
            remove_finalizer(&capi_api, &name, FINALIZER).await?;
            return Ok(Action::await_change());
        }
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    if authoritative && !obj.finalizers().iter().any(|f| f == FINALIZER) {
        add_finalizer(&capi_api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    if counterpart.is_some() || !authoritative {
        return Ok(Action::requeue(REQUEUE_CONVERGED));
    }

    // CAPI-originated Machine: create the MAPI mirror.
    let spec = mapi::MachineSpec {
        authoritative_api: AuthoritativeApi::ClusterApi,
        provider_spec: mapi::ProviderSpec {
            value: serde_json::json!({}),
        },
        provider_id: None,
    };
    let mut mirror = MapiMachine::new(&name, spec);
    mirror.labels_mut().extend(obj.labels().clone());
    mirror.annotations_mut().insert(
        MIRROR_OF_ANNOTATION.to_string(),
        mirror_of_value(&ctx.capi_namespace, &name),
    );

    mapi_api
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&mirror),
        )
        .await?;
    info!(name = %name, "Created MAPI mirror for CAPI-originated Machine");
    ctx.publish_normal_event(
        obj.as_ref(),
        "MirrorCreated",
        "Synchronizing",
        Some(format!("Created MAPI Machine {}/{}", ctx.mapi_namespace, name)),
    )
    .await;

    Ok(Action::requeue(REQUEUE_PROGRESSING))
}

/// Error policy for the CAPI-anchored Machine seed controller
pub fn error_policy_capi(obj: Arc<CapiMachine>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(KIND, &name);
    }
    if error.is_not_found() {
        return Action::await_change();
    }
    Action::requeue(error.requeue_after())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_authoritative_machine_deletion_spares_counterpart() {
        // A ClusterAPI-authoritative MAPI Machine is a mirror; deleting it
        // must never cascade to the CAPI side.
        let plan = plan_deletion(&DeletionView {
            role: PairRole::Mirror,
            counterpart_exists: true,
            counterpart_terminating: false,
        });
        assert!(!plan.delete_counterpart);
        assert!(plan.remove_finalizer);
    }
}
