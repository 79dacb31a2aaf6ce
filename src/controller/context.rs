//! Shared context for the synchronization controllers.
//!
//! Holds the Kubernetes client, the MAPI/CAPI namespace configuration, the
//! event recorder identity, and the optional health state used for metrics.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::health::HealthState;

/// Field manager name for the operator's server-side apply writes. Also the
/// identity the admission guard recognizes as the synchronizer itself.
pub const FIELD_MANAGER: &str = "machine-sync-operator";

/// Default namespace hosting MAPI resources.
pub const DEFAULT_MAPI_NAMESPACE: &str = "openshift-machine-api";

/// Default namespace hosting CAPI resources.
pub const DEFAULT_CAPI_NAMESPACE: &str = "openshift-cluster-api";

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace hosting the MAPI side of every pair
    pub mapi_namespace: String,
    /// Namespace hosting the CAPI side of every pair
    pub capi_namespace: String,
    /// Name of the CAPI Cluster that mirror resources are attached to
    pub cluster_name: String,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context. Namespaces default to the OpenShift conventions
    /// and can be overridden via MAPI_NAMESPACE / CAPI_NAMESPACE.
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        let mapi_namespace = std::env::var("MAPI_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_MAPI_NAMESPACE.to_string());
        let capi_namespace = std::env::var("CAPI_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_CAPI_NAMESPACE.to_string());
        Self::with_namespaces(client, health_state, mapi_namespace, capi_namespace)
    }

    /// Create a context with explicit namespaces (used by tests).
    pub fn with_namespaces(
        client: Client,
        health_state: Option<Arc<HealthState>>,
        mapi_namespace: String,
        capi_namespace: String,
    ) -> Self {
        Self {
            client,
            mapi_namespace,
            capi_namespace,
            cluster_name: std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "cluster".to_string()),
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish<K>(
        &self,
        resource: &K,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        let recorder = self.recorder();
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
