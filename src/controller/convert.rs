//! Spec translation between the MAPI and CAPI resource families.
//!
//! Translation is mechanical by design: the provider payload travels as an
//! opaque object, minus the fields that identify a particular cloud instance.
//! Copying those would make a mirror claim an instance it does not own.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::controller::error::Error;
use crate::crd::{capi, mapi, TemplateMeta};

/// Fields describing one concrete instance rather than the machine class.
/// Stripped whenever a provider payload crosses between pair members.
const INSTANCE_UNIQUE_FIELDS: &[&str] = &[
    "providerID",
    "instanceID",
    "instanceState",
    "creationTimestamp",
    "resourceVersion",
    "uid",
];

/// Prefix of the operator's own control annotations; never propagated as user
/// metadata.
const CONTROL_ANNOTATION_PREFIX: &str = "machinesync.openshift.io/";

/// Translate a MAPI providerSpec payload into a CAPI infra template payload.
pub fn template_payload_from_provider_spec(value: &Value) -> Result<Value, Error> {
    let obj = value.as_object().ok_or_else(|| {
        Error::Mapping("providerSpec.value is not an object; cannot translate".to_string())
    })?;
    let stripped: serde_json::Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !INSTANCE_UNIQUE_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(Value::Object(stripped))
}

/// Regenerate a MAPI providerSpec payload from an infra template payload.
/// Template payloads are already instance-free, so this is the identity plus
/// the same defensive strip.
pub fn provider_spec_from_template_payload(value: &Value) -> Result<Value, Error> {
    template_payload_from_provider_spec(value)
}

/// Build the desired CAPI MachineSet spec mirroring an authoritative MAPI
/// MachineSet, pointing at the given infra template.
pub fn desired_capi_machine_set_spec(
    source: &mapi::MachineSetSpec,
    cluster_name: &str,
    template_name: &str,
) -> capi::MachineSetSpec {
    capi::MachineSetSpec {
        replicas: source.replicas,
        cluster_name: cluster_name.to_string(),
        selector: source.selector.clone(),
        template: capi::CapiMachineTemplate {
            metadata: source.template.metadata.clone(),
            spec: capi::MachineSpec {
                cluster_name: cluster_name.to_string(),
                infrastructure_ref: capi::InfrastructureRef {
                    name: template_name.to_string(),
                    ..Default::default()
                },
                provider_id: None,
            },
        },
    }
}

/// Build the desired CAPI Machine spec mirroring an authoritative MAPI
/// Machine. The provider ID is intentionally not copied.
pub fn desired_capi_machine_spec(cluster_name: &str, infra_name: &str) -> capi::MachineSpec {
    capi::MachineSpec {
        cluster_name: cluster_name.to_string(),
        infrastructure_ref: capi::InfrastructureRef {
            name: infra_name.to_string(),
            ..Default::default()
        },
        provider_id: None,
    }
}

/// Merge pair metadata: the union of both sides, with the authoritative side
/// winning on conflicting keys. Control annotations never travel. Both pair
/// members converge to the returned maps, which is what makes label and
/// annotation edits on either side propagate to the other.
pub fn merge_pair_metadata(
    authoritative: &BTreeMap<String, String>,
    mirror: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = mirror
        .iter()
        .filter(|(k, _)| !k.starts_with(CONTROL_ANNOTATION_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (k, v) in authoritative {
        if !k.starts_with(CONTROL_ANNOTATION_PREFIX) {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Merged template metadata for a MachineSet pair.
pub fn merge_template_meta(authoritative: &TemplateMeta, mirror: &TemplateMeta) -> TemplateMeta {
    TemplateMeta {
        labels: merge_pair_metadata(&authoritative.labels, &mirror.labels),
        annotations: merge_pair_metadata(&authoritative.annotations, &mirror.annotations),
    }
}
