//! Reconciliation loop for MachineSet mirror pairs.
//!
//! The MAPI MachineSet is the anchor of a pair: it carries
//! `spec.authoritativeAPI`, and CAPI-side events are mapped onto the
//! same-named MAPI object. Each pass is a full, idempotent convergence step:
//! ensure the mirror exists, propagate spec and replicas in the authoritative
//! direction, merge metadata bidirectionally, rotate infra templates, write
//! the `Paused`/`Synchronized` conditions on both sides, and advance the
//! authority state machine. A pass never requires a multi-object transaction;
//! anything incomplete is picked up by the next requeue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, ResourceExt,
    api::{DeleteParams, Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, info, warn};

use crate::controller::{
    authority::{determine_event, ApiSide, AuthorityStateMachine, TransitionContext, TransitionResult},
    common::{
        add_finalizer, generation_synchronized, is_managed_mirror, mirror_of_value,
        remove_finalizer,
    },
    context::{Context, FIELD_MANAGER},
    convert,
    deletion::{plan_deletion, DeletionView, PairRole, FINALIZER},
    error::Error,
    status::{synced_replicas, ConditionBuilder},
    templates,
};
use crate::crd::{
    capi, is_condition_true, mapi, AuthoritativeApi, AuthorityState, CapiMachineSet,
    MapiMachineSet, AUTHORITY_ANNOTATION, CONDITION_PAUSED, MIRROR_OF_ANNOTATION,
    REASON_MAPPING_FAILED, REASON_NAME_CONFLICT,
};

const KIND: &str = "MachineSet";

/// Requeue interval while a pair is converged.
const REQUEUE_CONVERGED: Duration = Duration::from_secs(60);
/// Requeue interval while a pass left work behind.
const REQUEUE_PROGRESSING: Duration = Duration::from_secs(2);
/// Requeue interval for persistent, spec-correctable failures.
const REQUEUE_DEGRADED: Duration = Duration::from_secs(300);

/// Reconcile a MAPI MachineSet and its CAPI mirror.
pub async fn reconcile(obj: Arc<MapiMachineSet>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    debug!(name = %name, "Reconciling MachineSet pair");

    let mapi_api: Api<MapiMachineSet> =
        Api::namespaced(ctx.client.clone(), &ctx.mapi_namespace);
    let capi_api: Api<CapiMachineSet> =
        Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);

    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &mapi_api, &capi_api).await;
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&mapi_api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let authority = obj.spec.authoritative_api;
    let generation = obj.metadata.generation;

    // Locate the mirror. A same-named CAPI object under a different lifecycle
    // is a conflict, never merged.
    let mirror = capi_api.get_opt(&name).await?;
    let mirror = match mirror {
        Some(m) if !is_managed_mirror(&m) => {
            warn!(name = %name, "CAPI MachineSet with the same name exists and is not our mirror");
            ctx.publish_warning_event(
                obj.as_ref(),
                "NameConflict",
                "Synchronizing",
                Some(format!(
                    "A CAPI MachineSet named {} already exists in {} and is not managed by this operator",
                    name, ctx.capi_namespace
                )),
            )
            .await;
            update_mapi_status_conflict(&mapi_api, &name, &obj, &ctx).await?;
            return Ok(Action::requeue(REQUEUE_DEGRADED));
        }
        Some(m) if m.metadata.deletion_timestamp.is_some() => {
            // Mirror is going away (direct deletion of the non-authoritative
            // side); wait for it to disappear, then recreate.
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
                // The authoritative side is missing entirely; its own
                // controller handles cascades, we just retry.
                return Err(Error::Transient(format!(
                    "authoritative CAPI MachineSet {} not found",
                    name
                )));
            }
            return create_mirror(&obj, &ctx, &capi_api, &mapi_api).await;
        }
    };

    // Propagate in the authoritative direction. A mapping failure is
    // persistent: surface it as Synchronized=False and wait for a corrected
    // spec.
    let sync_result = match authority {
        AuthoritativeApi::MachineApi => {
            propagate_mapi_to_capi(&obj, &mirror, &ctx, &capi_api, &mapi_api).await
        }
        AuthoritativeApi::ClusterApi => {
            propagate_capi_to_mapi(&obj, &mirror, &ctx, &mapi_api).await
        }
    };
    if let Err(Error::Mapping(msg)) = &sync_result {
        warn!(name = %name, error = %msg, "Provider spec mapping failed");
        ctx.publish_warning_event(
            obj.as_ref(),
            "MappingFailed",
            "Synchronizing",
            Some(msg.clone()),
        )
        .await;
        let mut builder =
            ConditionBuilder::from_existing(&obj.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default());
        builder
            .paused_mapi(authority, generation)
            .not_synchronized(REASON_MAPPING_FAILED, msg, generation);
        patch_mapi_status(
            &mapi_api,
            &name,
            serde_json::json!({
                "conditions": builder.build(),
                "observedGeneration": generation,
            }),
        )
        .await?;
        return Ok(Action::requeue(REQUEUE_DEGRADED));
    }
    sync_result?;

    // Mirror status: both sides' status.replicas converge to the
    // authoritative value, and the mirror carries the paused condition for
    // the current authority.
    update_capi_status(&obj, &mirror, &capi_api, authority).await?;

    // Anchor status: conditions, synchronized generation, observed authority.
    let next_authority = advance_authority(&obj, &mirror, &ctx, authority).await;
    update_mapi_status(&mapi_api, &name, &obj, &mirror, authority, next_authority).await?;

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state.metrics.record_sync(KIND, &name, duration);
    }

    let converged = next_authority.matches(authority);
    if converged {
        Ok(Action::requeue(REQUEUE_CONVERGED))
    } else {
        Ok(Action::requeue(REQUEUE_PROGRESSING))
    }
}

/// Error policy for the MachineSet controller
pub fn error_policy(obj: Arc<MapiMachineSet>, error: &Error, ctx: Arc<Context>) -> Action {
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

/// Create the CAPI mirror for an authoritative MAPI MachineSet. Also the
/// recreation path after a direct deletion of the non-authoritative mirror.
async fn create_mirror(
    obj: &MapiMachineSet,
    ctx: &Context,
    capi_api: &Api<CapiMachineSet>,
    mapi_api: &Api<MapiMachineSet>,
) -> Result<Action, Error> {
    let name = obj.name_any();
    let generation = obj.metadata.generation;

    let payload =
        match convert::template_payload_from_provider_spec(&obj.spec.template.spec.provider_spec.value)
        {
            Ok(p) => p,
            Err(Error::Mapping(msg)) => {
                let mut builder = ConditionBuilder::new();
                builder
                    .paused_mapi(obj.spec.authoritative_api, generation)
                    .not_synchronized(REASON_MAPPING_FAILED, &msg, generation);
                patch_mapi_status(
                    mapi_api,
                    &name,
                    serde_json::json!({ "conditions": builder.build() }),
                )
                .await?;
                return Ok(Action::requeue(REQUEUE_DEGRADED));
            }
            Err(e) => return Err(e),
        };

    let template_name = templates::template_name(&name, &payload);
    templates::ensure_template(ctx, &name, &template_name, &payload).await?;

    let spec = convert::desired_capi_machine_set_spec(&obj.spec, &ctx.cluster_name, &template_name);
    let mut mirror = CapiMachineSet::new(&name, spec);
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

    info!(name = %name, "Created CAPI mirror MachineSet");
    ctx.publish_normal_event(
        obj,
        "MirrorCreated",
        "Synchronizing",
        Some(format!(
            "Created CAPI MachineSet {}/{}",
            ctx.capi_namespace, name
        )),
    )
    .await;

    Ok(Action::requeue(REQUEUE_PROGRESSING))
}

/// Push spec, replicas, template rotation, and metadata from the
/// authoritative MAPI side onto the CAPI mirror.
async fn propagate_mapi_to_capi(
    obj: &MapiMachineSet,
    mirror: &CapiMachineSet,
    ctx: &Context,
    capi_api: &Api<CapiMachineSet>,
    mapi_api: &Api<MapiMachineSet>,
) -> Result<(), Error> {
    let name = obj.name_any();

    let payload =
        convert::template_payload_from_provider_spec(&obj.spec.template.spec.provider_spec.value)?;
    let desired_template = templates::template_name(&name, &payload);

    let current_ref = mirror.spec.template.spec.infrastructure_ref.name.clone();
    let current_ref = (!current_ref.is_empty()).then_some(current_ref);
    let existing = templates::list_owned_templates(ctx, &name).await?;
    let plan = templates::plan_rotation(&desired_template, current_ref.as_deref(), &existing);

    if plan.create {
        templates::ensure_template(ctx, &name, &desired_template, &payload).await?;
        info!(name = %name, template = %desired_template, "Created rotated infra template");
        ctx.publish_normal_event(
            obj,
            "TemplateRotated",
            "Synchronizing",
            Some(format!("Created infra template {}", desired_template)),
        )
        .await;
    }

    // Desired mirror spec, including the (possibly repointed) template
    // reference. Applied with force: any drift on the non-authoritative spec
    // is illegal by the capability predicate, so overwriting it is the
    // eventual self-healing backstop behind the admission guard.
    let desired_spec =
        convert::desired_capi_machine_set_spec(&obj.spec, &ctx.cluster_name, &desired_template);
    if mirror_spec_drifted(obj, mirror, &desired_spec) {
        warn!(name = %name, "Reverting drift on non-authoritative CAPI mirror spec");
        ctx.publish_warning_event(
            obj,
            "DriftReverted",
            "Synchronizing",
            Some("Reverted a direct modification of the non-authoritative CAPI mirror".to_string()),
        )
        .await;
    }

    let merged_labels = convert::merge_pair_metadata(obj.labels(), mirror.labels());
    let merged_annotations = convert::merge_pair_metadata(obj.annotations(), mirror.annotations());
    let merged_template_meta =
        convert::merge_template_meta(&obj.spec.template.metadata, &mirror.spec.template.metadata);

    let mut desired_spec = desired_spec;
    desired_spec.template.metadata = merged_template_meta.clone();

    let mut desired_mirror = CapiMachineSet::new(&name, desired_spec);
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

    if !plan.delete.is_empty() {
        templates::delete_templates(ctx, &plan.delete).await?;
    }

    // Metadata additions made on the mirror flow back into the MAPI resource,
    // both at the top level and in the machine template. This write is
    // tracked like any other: the synchronized generation advances with it.
    propagate_metadata_to_mapi(
        obj,
        mapi_api,
        &merged_labels,
        &merged_annotations,
        &merged_template_meta,
    )
    .await?;

    Ok(())
}

/// Whether a delta between the mirror's spec and the desired state is
/// external drift. A delta while the anchor's last sync already covered its
/// current generation cannot be this pass's own pending propagation (a scale
/// or template repoint mid-flight), so it originated on the mirror.
fn mirror_spec_drifted(
    obj: &MapiMachineSet,
    mirror: &CapiMachineSet,
    desired: &capi::MachineSetSpec,
) -> bool {
    let delta = mirror.spec.replicas != desired.replicas
        || mirror.spec.template.spec.infrastructure_ref
            != desired.template.spec.infrastructure_ref;
    delta
        && generation_synchronized(
            obj.status.as_ref().and_then(|s| s.synchronized_generation),
            obj.metadata.generation,
        )
}

/// Pull replicas, provider spec, and metadata from the authoritative CAPI
/// side onto the MAPI mirror.
async fn propagate_capi_to_mapi(
    obj: &MapiMachineSet,
    mirror: &CapiMachineSet,
    ctx: &Context,
    mapi_api: &Api<MapiMachineSet>,
) -> Result<(), Error> {
    let name = obj.name_any();

    // Regenerate the provider spec from the currently referenced template so
    // the MAPI spec stays representative of what CAPI would provision.
    let template_ref = &mirror.spec.template.spec.infrastructure_ref.name;
    let mut spec_patch = serde_json::json!({ "replicas": mirror.spec.replicas });
    if !template_ref.is_empty() {
        let templates_api: Api<crate::crd::InfraMachineTemplate> =
            Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);
        if let Some(template) = templates_api.get_opt(template_ref).await? {
            let provider_value =
                convert::provider_spec_from_template_payload(&template.spec.template.spec)?;
            if obj.spec.template.spec.provider_spec.value != provider_value
                || obj.spec.replicas != mirror.spec.replicas
            {
                debug!(name = %name, "Regenerating non-authoritative MAPI spec from CAPI");
            }
            spec_patch["template"] = serde_json::json!({
                "spec": { "providerSpec": { "value": provider_value } }
            });
        }
    }

    let merged_labels = convert::merge_pair_metadata(mirror.labels(), obj.labels());
    let merged_annotations = convert::merge_pair_metadata(mirror.annotations(), obj.annotations());
    let merged_template_meta =
        convert::merge_template_meta(&mirror.spec.template.metadata, &obj.spec.template.metadata);

    if let Some(template) = spec_patch.get_mut("template") {
        template["metadata"] = serde_json::to_value(&merged_template_meta)?;
    } else {
        spec_patch["template"] =
            serde_json::json!({ "metadata": serde_json::to_value(&merged_template_meta)? });
    }

    let patch = serde_json::json!({
        "metadata": {
            "labels": merged_labels,
            "annotations": merged_annotations,
        },
        "spec": spec_patch,
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

/// Write merged metadata back to the MAPI anchor (top level and template).
async fn propagate_metadata_to_mapi(
    obj: &MapiMachineSet,
    mapi_api: &Api<MapiMachineSet>,
    labels: &std::collections::BTreeMap<String, String>,
    annotations: &std::collections::BTreeMap<String, String>,
    template_meta: &crate::crd::TemplateMeta,
) -> Result<(), Error> {
    let name = obj.name_any();
    let unchanged = obj.labels() == labels
        && obj
            .annotations()
            .iter()
            .filter(|(k, _)| !k.starts_with("machinesync.openshift.io/"))
            .eq(annotations.iter())
        && &obj.spec.template.metadata == template_meta;
    if unchanged {
        return Ok(());
    }

    let patch = serde_json::json!({
        "metadata": {
            "labels": labels,
            "annotations": annotations,
        },
        "spec": {
            "template": { "metadata": serde_json::to_value(template_meta)? }
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

/// Write the mirror-side status: converged replica count, paused condition,
/// authority annotation refresh.
async fn update_capi_status(
    obj: &MapiMachineSet,
    mirror: &CapiMachineSet,
    capi_api: &Api<CapiMachineSet>,
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

    let mut status = serde_json::json!({
        "observedGeneration": mirror.metadata.generation,
        "conditions": builder.build(),
    });
    // Paused mirror only: an authoritative CAPI side's own controllers own
    // its replica count.
    if let Some(replicas) = synced_replicas(
        ApiSide::ClusterApi,
        authority,
        obj.status.as_ref().map(|s| s.replicas),
        obj.spec.replicas,
    ) {
        status["replicas"] = replicas.into();
    }
    capi_api
        .patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await?;

    // Keep the authority annotation current so the admission guard can judge
    // CAPI-side writes locally.
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

/// Advance the authority state machine one step, based on what this pass
/// successfully wrote. A switch takes at least two passes: settled →
/// Migrating, then Migrating → settled once the handoff guards hold.
async fn advance_authority(
    obj: &MapiMachineSet,
    mirror: &CapiMachineSet,
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

    // The outgoing side's paused condition was written earlier in this pass;
    // the observed (pre-write) state still feeds the guard so a crashed pass
    // resumes correctly.
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

/// Write the MAPI anchor's status for this pass.
async fn update_mapi_status(
    mapi_api: &Api<MapiMachineSet>,
    name: &str,
    obj: &MapiMachineSet,
    mirror: &CapiMachineSet,
    authority: AuthoritativeApi,
    observed_authority: AuthorityState,
) -> Result<(), Error> {
    let generation = obj.metadata.generation;

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
        "authoritativeAPI": observed_authority,
        "synchronizedGeneration": generation,
        "observedGeneration": generation,
        "conditions": builder.build(),
    });
    // While CAPI is authoritative the MAPI machine controllers are paused,
    // so the synchronizer converges the mirror's count itself.
    if let Some(replicas) = synced_replicas(
        ApiSide::MachineApi,
        authority,
        mirror.status.as_ref().map(|s| s.replicas),
        mirror.spec.replicas,
    ) {
        status["replicas"] = replicas.into();
    }

    patch_mapi_status(mapi_api, name, status).await
}

/// Write a name-conflict status: Synchronized=False, never merged.
async fn update_mapi_status_conflict(
    mapi_api: &Api<MapiMachineSet>,
    name: &str,
    obj: &MapiMachineSet,
    ctx: &Context,
) -> Result<(), Error> {
    let generation = obj.metadata.generation;
    let mut builder = ConditionBuilder::from_existing(
        &obj.status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default(),
    );
    builder
        .paused_mapi(obj.spec.authoritative_api, generation)
        .not_synchronized(
            REASON_NAME_CONFLICT,
            &format!(
                "A CAPI MachineSet named {} already exists in {} under a different lifecycle",
                name, ctx.capi_namespace
            ),
            generation,
        );
    patch_mapi_status(
        mapi_api,
        name,
        serde_json::json!({ "conditions": builder.build(), "observedGeneration": generation }),
    )
    .await
}

async fn patch_mapi_status(
    mapi_api: &Api<MapiMachineSet>,
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

/// Handle deletion of the MAPI anchor. The cascade follows authority: an
/// authoritative MAPI MachineSet takes its mirror, templates, and machines
/// with it; a non-authoritative one leaves the CAPI side untouched.
async fn handle_deletion(
    obj: &MapiMachineSet,
    ctx: &Context,
    mapi_api: &Api<MapiMachineSet>,
    capi_api: &Api<CapiMachineSet>,
) -> Result<Action, Error> {
    let name = obj.name_any();
    info!(name = %name, authority = %obj.spec.authoritative_api, "Handling MachineSet deletion");

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
    let plan = plan_deletion(&view);

    if plan.delete_counterpart {
        match capi_api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name = %name, "Deleted CAPI mirror as part of cascade");
                ctx.publish_normal_event(
                    obj,
                    "MirrorDeleted",
                    "Deleting",
                    Some(format!(
                        "Deleted CAPI MachineSet {}/{}",
                        ctx.capi_namespace, name
                    )),
                )
                .await;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }

    if plan.delete_templates {
        let owned = templates::list_owned_templates(ctx, &name).await?;
        templates::delete_templates(ctx, &owned).await?;
    }

    if plan.remove_finalizer {
        remove_finalizer(mapi_api, &name, FINALIZER).await?;
        return Ok(Action::await_change());
    }

    Ok(Action::requeue(Duration::from_secs(5)))
}

/// Seed reconciler anchored on the CAPI side. Responsible only for the
/// CAPI-originated flows: creating a MAPI mirror for an authoritative CAPI
/// MachineSet, holding a finalizer on it, and cascading its deletion. All
/// ongoing synchronization runs through the MAPI-anchored reconciler.
pub async fn reconcile_capi(obj: Arc<CapiMachineSet>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj.name_any();

    let mapi_api: Api<MapiMachineSet> =
        Api::namespaced(ctx.client.clone(), &ctx.mapi_namespace);
    let capi_api: Api<CapiMachineSet> =
        Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);

    let counterpart = mapi_api.get_opt(&name).await?;
    // A CAPI MachineSet with no MAPI counterpart and no mirror annotation is
    // CAPI-originated and ClusterAPI-authoritative.
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
        if plan.delete_templates {
            let owned = templates::list_owned_templates(&ctx, &name).await?;
            templates::delete_templates(&ctx, &owned).await?;
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
        // Pair exists (or this is a mirror awaiting its anchor); nothing to
        // seed here.
        return Ok(Action::requeue(REQUEUE_CONVERGED));
    }

    // CAPI-originated MachineSet: create the MAPI mirror.
    let template_ref = &obj.spec.template.spec.infrastructure_ref.name;
    let provider_value = if template_ref.is_empty() {
        serde_json::json!({})
    } else {
        let templates_api: Api<crate::crd::InfraMachineTemplate> =
            Api::namespaced(ctx.client.clone(), &ctx.capi_namespace);
        match templates_api.get_opt(template_ref).await? {
            Some(t) => convert::provider_spec_from_template_payload(&t.spec.template.spec)?,
            None => {
                return Err(Error::Transient(format!(
                    "infra template {} not found yet",
                    template_ref
                )))
            }
        }
    };

    let spec = mapi::MachineSetSpec {
        replicas: obj.spec.replicas,
        authoritative_api: AuthoritativeApi::ClusterApi,
        selector: obj.spec.selector.clone(),
        template: mapi::MachineTemplate {
            metadata: obj.spec.template.metadata.clone(),
            spec: mapi::MachineSpec {
                authoritative_api: AuthoritativeApi::ClusterApi,
                provider_spec: mapi::ProviderSpec {
                    value: provider_value,
                },
                provider_id: None,
            },
        },
    };
    let mut mirror = MapiMachineSet::new(&name, spec);
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
    info!(name = %name, "Created MAPI mirror for CAPI-originated MachineSet");
    ctx.publish_normal_event(
        obj.as_ref(),
        "MirrorCreated",
        "Synchronizing",
        Some(format!(
            "Created MAPI MachineSet {}/{}",
            ctx.mapi_namespace, name
        )),
    )
    .await;

    Ok(Action::requeue(REQUEUE_PROGRESSING))
}

/// Error policy for the CAPI-anchored seed controller
pub fn error_policy_capi(obj: Arc<CapiMachineSet>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(KIND, &name);
    }
    if error.is_not_found() {
        return Action::await_change();
    }
    Action::requeue(error.requeue_after())
}
