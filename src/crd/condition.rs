//! Status conditions exposed by both sides of a mirror pair.
//!
//! The `Paused` and `Synchronized` conditions are the externally observable
//! contract of the synchronizer: tests and operators poll them to decide when
//! an authority switch or a spec propagation has converged.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::AuthoritativeApi;

/// Condition type set on the non-driving side of a pair.
pub const CONDITION_PAUSED: &str = "Paused";
/// Condition type set once the mirror reflects the authoritative generation.
pub const CONDITION_SYNCHRONIZED: &str = "Synchronized";

/// MAPI-side paused reasons.
pub const REASON_AUTHORITATIVE_API_NOT_MACHINE_API: &str = "AuthoritativeAPINotMachineAPI";
pub const REASON_AUTHORITATIVE_API_MACHINE_API: &str = "AuthoritativeAPIMachineAPI";

/// CAPI-side (v1beta2) paused reasons.
pub const REASON_PAUSED: &str = "Paused";
pub const REASON_NOT_PAUSED: &str = "NotPaused";

/// Synchronized reasons.
pub const REASON_RESOURCE_SYNCHRONIZED: &str = "ResourceSynchronized";
pub const REASON_NAME_CONFLICT: &str = "NameConflict";
pub const REASON_MAPPING_FAILED: &str = "MappingFailed";

/// Condition describes an aspect of resource state at a point in time.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Paused condition for a MAPI resource. `True` exactly when the Machine
    /// API is not the authoritative side.
    pub fn paused_mapi(authority: AuthoritativeApi, generation: Option<i64>) -> Self {
        match authority {
            AuthoritativeApi::MachineApi => Self::new(
                CONDITION_PAUSED,
                false,
                REASON_AUTHORITATIVE_API_MACHINE_API,
                "The Machine API is authoritative; the machine controllers are active",
                generation,
            ),
            AuthoritativeApi::ClusterApi => Self::new(
                CONDITION_PAUSED,
                true,
                REASON_AUTHORITATIVE_API_NOT_MACHINE_API,
                "The AuthoritativeAPI is set to ClusterAPI; the machine controllers are paused",
                generation,
            ),
        }
    }

    /// Paused condition for a CAPI resource, using v1beta2 reasons.
    pub fn paused_capi(authority: AuthoritativeApi, generation: Option<i64>) -> Self {
        match authority {
            AuthoritativeApi::ClusterApi => Self::new(
                CONDITION_PAUSED,
                false,
                REASON_NOT_PAUSED,
                "The Cluster API is authoritative; the resource is reconciled normally",
                generation,
            ),
            AuthoritativeApi::MachineApi => Self::new(
                CONDITION_PAUSED,
                true,
                REASON_PAUSED,
                "The resource is a mirror of a Machine API resource and is paused",
                generation,
            ),
        }
    }

    /// Synchronized condition reporting a completed propagation pass.
    /// `authority` names the source side of the copy.
    pub fn synchronized(kind: &str, authority: AuthoritativeApi, generation: Option<i64>) -> Self {
        let message = match authority {
            AuthoritativeApi::MachineApi => {
                format!("Successfully synchronized MAPI {} to CAPI", kind)
            }
            AuthoritativeApi::ClusterApi => {
                format!("Successfully synchronized CAPI {} to MAPI", kind)
            }
        };
        Self::new(
            CONDITION_SYNCHRONIZED,
            true,
            REASON_RESOURCE_SYNCHRONIZED,
            &message,
            generation,
        )
    }

    /// Synchronized=False with a persistent, diagnosable reason. Used for
    /// name conflicts and irrecoverable mapping failures; the resource stays
    /// in this state until its spec is corrected.
    pub fn not_synchronized(reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(CONDITION_SYNCHRONIZED, false, reason, message, generation)
    }
}

/// Check if a condition type is true.
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition.
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}
