//! Machine API (machine.openshift.io) resource definitions.
//!
//! These are the legacy-side kinds of a mirror pair. Their specs carry the
//! `authoritativeAPI` fields that drive the synchronization protocol, and
//! their statuses expose the observed authority, the synchronized generation,
//! and the `Paused`/`Synchronized` conditions.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{AuthoritativeApi, AuthorityState, TemplateMeta};
use super::condition::Condition;

/// MachineSet in the Machine API group.
///
/// Example:
/// ```yaml
/// apiVersion: machine.openshift.io/v1beta1
/// kind: MachineSet
/// metadata:
///   name: worker-a
/// spec:
///   replicas: 1
///   authoritativeAPI: MachineAPI
///   template:
///     spec:
///       authoritativeAPI: MachineAPI
///       providerSpec:
///         value:
///           instanceType: m6i.large
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "MachineSet",
    plural = "machinesets",
    status = "MachineSetStatus",
    namespaced,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Authority", "type":"string", "jsonPath":".status.authoritativeAPI"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired number of machines (default 1). Only writable while the
    /// Machine API is authoritative for this MachineSet.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Which API family owns this MachineSet object.
    #[serde(default, rename = "authoritativeAPI")]
    pub authoritative_api: AuthoritativeApi,

    /// Label selector matching the Machines owned by this MachineSet.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Template for Machines stamped out by this MachineSet.
    #[serde(default)]
    pub template: MachineTemplate,
}

fn default_replicas() -> i32 {
    1
}

impl Default for MachineSetSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            authoritative_api: AuthoritativeApi::default(),
            selector: BTreeMap::new(),
            template: MachineTemplate::default(),
        }
    }
}

/// Template for Machines created by a MachineSet.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplate {
    /// Labels and annotations inherited by stamped-out Machines. Metadata
    /// propagation targets this in addition to top-level metadata.
    #[serde(default)]
    pub metadata: TemplateMeta,

    /// Spec applied to stamped-out Machines.
    #[serde(default)]
    pub spec: MachineSpec,
}

/// Machine in the Machine API group.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    status = "MachineStatus",
    namespaced,
    printcolumn = r#"{"name":"Authority", "type":"string", "jsonPath":".status.authoritativeAPI"}"#,
    printcolumn = r#"{"name":"ProviderID", "type":"string", "jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Which API family owns this Machine. May diverge from the owning
    /// MachineSet's authority: new Machines take the template-level value.
    #[serde(default, rename = "authoritativeAPI")]
    pub authoritative_api: AuthoritativeApi,

    /// Opaque cloud-provider configuration. Translated into the CAPI infra
    /// template payload; instance-unique fields are stripped on the way.
    #[serde(default)]
    pub provider_spec: ProviderSpec,

    /// Cloud provider instance identifier, set by the actuator once the
    /// instance exists. Never copied between pair members.
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Envelope for the provider-specific machine configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// The raw provider payload (e.g. an AWSMachineProviderConfig).
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Status of a MAPI MachineSet.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    /// Observed number of machines.
    #[serde(default)]
    pub replicas: i32,

    /// Number of ready machines.
    #[serde(default)]
    pub ready_replicas: i32,

    /// Authority as observed and processed by the synchronizer. Lags the
    /// spec field: it passes through `Migrating` during a switch.
    #[serde(rename = "authoritativeAPI", skip_serializing_if = "Option::is_none")]
    pub authoritative_api: Option<AuthorityState>,

    /// The generation most recently propagated to the mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronized_generation: Option<i64>,

    /// The generation most recently observed by the synchronizer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state (`Paused`, `Synchronized`).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Status of a MAPI Machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Lifecycle phase reported by the actuator (Provisioning, Running, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Authority as observed and processed by the synchronizer.
    #[serde(rename = "authoritativeAPI", skip_serializing_if = "Option::is_none")]
    pub authoritative_api: Option<AuthorityState>,

    /// The generation most recently propagated to the mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronized_generation: Option<i64>,

    /// Conditions describing the current state (`Paused`, `Synchronized`).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
