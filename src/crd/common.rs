//! Types shared by the MAPI and CAPI resource families.
//!
//! The authority enum is the core of the synchronization protocol: exactly one
//! side of a mirrored pair is authoritative at any time, and every other field
//! in this crate is derived from it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which API family owns a resource's spec and drives the cloud actuator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum AuthoritativeApi {
    /// The legacy Machine API (machine.openshift.io) is authoritative.
    #[default]
    #[serde(rename = "MachineAPI")]
    MachineApi,
    /// The upstream Cluster API (cluster.x-k8s.io) is authoritative.
    #[serde(rename = "ClusterAPI")]
    ClusterApi,
}

impl AuthoritativeApi {
    /// The other side of the pair.
    pub fn other(self) -> Self {
        match self {
            AuthoritativeApi::MachineApi => AuthoritativeApi::ClusterApi,
            AuthoritativeApi::ClusterApi => AuthoritativeApi::MachineApi,
        }
    }
}

impl std::fmt::Display for AuthoritativeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthoritativeApi::MachineApi => write!(f, "MachineAPI"),
            AuthoritativeApi::ClusterApi => write!(f, "ClusterAPI"),
        }
    }
}

/// Observed authority as reported in `.status.authoritativeAPI`.
///
/// Unlike the spec field this includes `Migrating`: an authority switch is a
/// multi-step handoff, and the status only lands on the new value once the
/// outgoing side is paused and the pair is synchronized.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum AuthorityState {
    #[serde(rename = "MachineAPI")]
    MachineApi,
    #[serde(rename = "ClusterAPI")]
    ClusterApi,
    Migrating,
}

impl AuthorityState {
    /// The settled state corresponding to a spec-level authority value.
    pub fn settled(api: AuthoritativeApi) -> Self {
        match api {
            AuthoritativeApi::MachineApi => AuthorityState::MachineApi,
            AuthoritativeApi::ClusterApi => AuthorityState::ClusterApi,
        }
    }

    /// Whether this state matches a spec-level authority value.
    pub fn matches(self, api: AuthoritativeApi) -> bool {
        self == Self::settled(api)
    }
}

impl std::fmt::Display for AuthorityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthorityState::MachineApi => write!(f, "MachineAPI"),
            AuthorityState::ClusterApi => write!(f, "ClusterAPI"),
            AuthorityState::Migrating => write!(f, "Migrating"),
        }
    }
}

/// Annotation on a mirror pointing back at its authoritative counterpart
/// (`{namespace}/{name}`). Pair linkage is annotation-based on purpose:
/// owner references cannot span namespaces, and a GC-visible link between
/// pair members would let a mirror deletion cascade to the authoritative side.
pub const MIRROR_OF_ANNOTATION: &str = "machinesync.openshift.io/mirror-of";

/// Annotation stamped on mirrors recording the pair's current authority, so
/// the admission guard can evaluate CAPI-side writes without a cross-namespace
/// lookup.
pub const AUTHORITY_ANNOTATION: &str = "machinesync.openshift.io/authoritative-api";

/// Label on infra templates naming the MachineSet they were generated for.
/// Used to garbage-collect superseded templates after a reference swap.
pub const TEMPLATE_OWNER_LABEL: &str = "machinesync.openshift.io/machine-set";

/// Prefix of annotations reserved for the Machine API; the admission guard
/// rejects changes to these on non-authoritative resources.
pub const MAPI_ANNOTATION_PREFIX: &str = "machine.openshift.io/";

/// Template metadata carried inside MachineSet specs (labels/annotations that
/// stamped-out Machines inherit).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMeta {
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_serialization_uses_api_suffix() {
        // Wire format is "MachineAPI"/"ClusterAPI", not camelCase.
        let json = serde_json::to_string(&AuthoritativeApi::MachineApi).unwrap();
        assert_eq!(json, "\"MachineAPI\"");
        let json = serde_json::to_string(&AuthoritativeApi::ClusterApi).unwrap();
        assert_eq!(json, "\"ClusterAPI\"");
    }

    #[test]
    fn test_authority_other_is_involutive() {
        assert_eq!(
            AuthoritativeApi::MachineApi.other().other(),
            AuthoritativeApi::MachineApi
        );
        assert_eq!(
            AuthoritativeApi::ClusterApi.other(),
            AuthoritativeApi::MachineApi
        );
    }

    #[test]
    fn test_authority_state_settled() {
        assert_eq!(
            AuthorityState::settled(AuthoritativeApi::MachineApi),
            AuthorityState::MachineApi
        );
        assert!(AuthorityState::ClusterApi.matches(AuthoritativeApi::ClusterApi));
        assert!(!AuthorityState::Migrating.matches(AuthoritativeApi::MachineApi));
        assert!(!AuthorityState::Migrating.matches(AuthoritativeApi::ClusterApi));
    }

    #[test]
    fn test_default_authority_is_machine_api() {
        assert_eq!(AuthoritativeApi::default(), AuthoritativeApi::MachineApi);
    }
}
