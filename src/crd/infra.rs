//! Infrastructure template definition (infrastructure.cluster.x-k8s.io).
//!
//! Infra templates are immutable by convention: the synchronizer never updates
//! one in place. A provider-spec change on the authoritative side produces a
//! new, content-addressed template, the MachineSet reference is swapped, and
//! the superseded template is garbage-collected once unreferenced.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provider-specific machine template referenced by CAPI MachineSets.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineTemplate",
    plural = "machinetemplates",
    namespaced,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    /// The template body stamped onto provisioned infra machines.
    #[serde(default)]
    pub template: MachineTemplateResource,
}

/// Inner template resource holding the provider payload.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateResource {
    /// Opaque provider payload, translated from the MAPI providerSpec with
    /// instance-unique fields stripped.
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_payload_round_trip() {
        let spec = MachineTemplateSpec {
            template: MachineTemplateResource {
                spec: serde_json::json!({ "instanceType": "m6i.large", "ami": {"id": "ami-123"} }),
            },
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["template"]["spec"]["instanceType"], "m6i.large");
        let parsed: MachineTemplateSpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.template, spec.template);
    }
}
