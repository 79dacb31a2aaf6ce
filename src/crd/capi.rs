//! Cluster API (cluster.x-k8s.io) resource definitions.
//!
//! The upstream-side kinds of a mirror pair. CAPI resources do not carry an
//! `authoritativeAPI` spec field; the pair's authority is stamped on mirrors
//! via the `machinesync.openshift.io/authoritative-api` annotation, and the
//! paused state is exposed through v1beta2-style conditions.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::TemplateMeta;
use super::condition::Condition;

/// Reference from a CAPI MachineSet/Machine to its provider-specific
/// infrastructure object (e.g. an AWSMachineTemplate).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureRef {
    /// API group of the referenced object.
    #[serde(default = "default_infra_group")]
    pub api_group: String,

    /// Kind of the referenced object.
    #[serde(default = "default_infra_kind")]
    pub kind: String,

    /// Name of the referenced object.
    #[serde(default)]
    pub name: String,
}

fn default_infra_group() -> String {
    "infrastructure.cluster.x-k8s.io".to_string()
}

fn default_infra_kind() -> String {
    "MachineTemplate".to_string()
}

/// MachineSet in the Cluster API group.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineSet",
    plural = "machinesets",
    status = "MachineSetStatus",
    namespaced,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired number of machines (default 1). Only writable while the
    /// Cluster API is authoritative for this MachineSet.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Name of the owning Cluster object.
    #[serde(default)]
    pub cluster_name: String,

    /// Label selector matching the Machines owned by this MachineSet.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Template for Machines stamped out by this MachineSet.
    #[serde(default)]
    pub template: CapiMachineTemplate,
}

fn default_replicas() -> i32 {
    1
}

/// Template for Machines created by a CAPI MachineSet.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapiMachineTemplate {
    /// Labels and annotations inherited by stamped-out Machines.
    #[serde(default)]
    pub metadata: TemplateMeta,

    /// Spec applied to stamped-out Machines.
    #[serde(default)]
    pub spec: MachineSpec,
}

/// Machine in the Cluster API group.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    status = "MachineStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"ProviderID", "type":"string", "jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the owning Cluster object.
    #[serde(default)]
    pub cluster_name: String,

    /// Reference to the provider-specific infrastructure object.
    #[serde(default)]
    pub infrastructure_ref: InfrastructureRef,

    /// Cloud provider instance identifier. Set by the infra provider once
    /// the instance exists; never copied between pair members.
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Status of a CAPI MachineSet.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    /// Observed number of machines.
    #[serde(default)]
    pub replicas: i32,

    /// Number of ready machines.
    #[serde(default)]
    pub ready_replicas: i32,

    /// The generation most recently observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// v1beta2-style conditions (`Paused` with reasons Paused/NotPaused).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Status of a CAPI Machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Lifecycle phase reported by the infra provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// v1beta2-style conditions (`Paused` with reasons Paused/NotPaused).
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
