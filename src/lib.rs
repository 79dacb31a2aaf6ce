//! machine-sync-operator library crate
//!
//! Keeps MachineSet and Machine resources mirrored between the Machine API
//! (machine.openshift.io) and the Cluster API (cluster.x-k8s.io) under a
//! single-authority protocol. This module exports the controllers, the CRD
//! definitions, the admission guard, and the health server.

pub mod controller;
pub mod crd;
pub mod health;
pub mod webhooks;

pub use health::HealthState;
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::{machine_reconciler, machine_set_reconciler};
use crd::{CapiMachine, CapiMachineSet, MapiMachine, MapiMachineSet};

/// Create the default watcher configuration for all controllers.
///
/// This ensures consistent behavior across all controllers:
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Log one controller result in a uniform way.
fn log_result<K>(
    result: Result<(ObjectRef<K>, kube::runtime::controller::Action), kube::runtime::controller::Error<controller::error::Error, watcher::Error>>,
) where
    K: kube::runtime::reflector::Lookup,
    K::DynamicType: std::fmt::Debug,
{
    match result {
        Ok((obj, _action)) => {
            debug!("Reconciled: {}", obj.name);
        }
        Err(e) => {
            // ObjectNotFound/NotFound errors are expected after deletion when
            // related watch events trigger reconciliation for a deleted object.
            let is_not_found = match &e {
                kube::runtime::controller::Error::ObjectNotFound(_) => true,
                kube::runtime::controller::Error::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!("Object no longer exists (likely deleted): {:?}", e);
            } else {
                error!("Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Run all synchronization controllers.
///
/// Four controllers run concurrently:
/// - a MAPI-anchored MachineSet controller owning the ongoing pair sync,
///   with CAPI MachineSet events mapped onto the same-named MAPI object
/// - a CAPI-anchored MachineSet seed controller for CAPI-originated flows
/// - the same pair for Machines
///
/// If health_state is provided, metrics will be recorded for sync passes.
pub async fn run_controllers(client: Client, health_state: Option<Arc<HealthState>>) {
    let ctx = Arc::new(Context::new(client.clone(), health_state));
    info!(
        mapi_namespace = %ctx.mapi_namespace,
        capi_namespace = %ctx.capi_namespace,
        cluster = %ctx.cluster_name,
        "Starting synchronization controllers"
    );

    // Mark as ready once we start the controllers
    if let Some(ref state) = ctx.health_state {
        state.set_ready(true).await;
    }

    let mapi_machinesets: Api<MapiMachineSet> =
        Api::namespaced(client.clone(), &ctx.mapi_namespace);
    let capi_machinesets: Api<CapiMachineSet> =
        Api::namespaced(client.clone(), &ctx.capi_namespace);
    let mapi_machines: Api<MapiMachine> = Api::namespaced(client.clone(), &ctx.mapi_namespace);
    let capi_machines: Api<CapiMachine> = Api::namespaced(client.clone(), &ctx.capi_namespace);

    let watcher_config = default_watcher_config();

    // MAPI-anchored MachineSet controller. Mirror events are mapped back to
    // the same-named anchor so drift on the CAPI side triggers a pass.
    let (ms_reader, ms_stream) =
        create_filtered_stream(mapi_machinesets.clone(), watcher_config.clone());
    let mapi_ns = ctx.mapi_namespace.clone();
    let machineset_sync = Controller::for_stream(ms_stream, ms_reader)
        .watches(
            capi_machinesets.clone(),
            watcher_config.clone(),
            move |capi_ms: CapiMachineSet| {
                Some(ObjectRef::<MapiMachineSet>::new(&capi_ms.name_any()).within(&mapi_ns))
            },
        )
        .run(
            machine_set_reconciler::reconcile,
            machine_set_reconciler::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move { log_result(result) });

    // CAPI-anchored MachineSet seed controller. MAPI events map onto the
    // same-named CAPI object so counterpart changes re-trigger seeding.
    let (capi_ms_reader, capi_ms_stream) =
        create_filtered_stream(capi_machinesets, watcher_config.clone());
    let capi_ns = ctx.capi_namespace.clone();
    let machineset_seed = Controller::for_stream(capi_ms_stream, capi_ms_reader)
        .watches(
            mapi_machinesets,
            watcher_config.clone(),
            move |mapi_ms: MapiMachineSet| {
                Some(ObjectRef::<CapiMachineSet>::new(&mapi_ms.name_any()).within(&capi_ns))
            },
        )
        .run(
            machine_set_reconciler::reconcile_capi,
            machine_set_reconciler::error_policy_capi,
            ctx.clone(),
        )
        .for_each(|result| async move { log_result(result) });

    // MAPI-anchored Machine controller.
    let (m_reader, m_stream) =
        create_filtered_stream(mapi_machines.clone(), watcher_config.clone());
    let mapi_ns = ctx.mapi_namespace.clone();
    let machine_sync = Controller::for_stream(m_stream, m_reader)
        .watches(
            capi_machines.clone(),
            watcher_config.clone(),
            move |capi_m: CapiMachine| {
                Some(ObjectRef::<MapiMachine>::new(&capi_m.name_any()).within(&mapi_ns))
            },
        )
        .run(
            machine_reconciler::reconcile,
            machine_reconciler::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move { log_result(result) });

    // CAPI-anchored Machine seed controller.
    let (capi_m_reader, capi_m_stream) =
        create_filtered_stream(capi_machines, watcher_config.clone());
    let capi_ns = ctx.capi_namespace.clone();
    let machine_seed = Controller::for_stream(capi_m_stream, capi_m_reader)
        .watches(
            mapi_machines,
            watcher_config,
            move |mapi_m: MapiMachine| {
                Some(ObjectRef::<CapiMachine>::new(&mapi_m.name_any()).within(&capi_ns))
            },
        )
        .run(
            machine_reconciler::reconcile_capi,
            machine_reconciler::error_policy_capi,
            ctx,
        )
        .for_each(|result| async move { log_result(result) });

    futures::join!(machineset_sync, machineset_seed, machine_sync, machine_seed);

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}
