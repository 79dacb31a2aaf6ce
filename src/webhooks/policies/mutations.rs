//! Mutation classification for admission requests.
//!
//! An UPDATE is reduced to the set of guarded mutations it performs, by
//! diffing the old and new objects. The diff is structural and kind-agnostic:
//! it works on metadata maps and the serialized spec, so all four guarded
//! kinds share it.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::controller::authority::Mutation;
use crate::crd::MAPI_ANNOTATION_PREFIX;

/// The parts of an object the guard cares about.
#[derive(Debug, Clone, Default)]
pub struct GuardedView {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Serialized `.spec`.
    pub spec: Value,
}

/// Classify the guarded mutations between two versions of an object.
pub fn classify(old: &GuardedView, new: &GuardedView) -> Vec<Mutation> {
    let mut mutations = Vec::new();

    let old_replicas = old.spec.get("replicas");
    let new_replicas = new.spec.get("replicas");
    if old_replicas != new_replicas {
        mutations.push(Mutation::SpecReplicas);
    }

    if strip_replicas(&old.spec) != strip_replicas(&new.spec) {
        mutations.push(Mutation::SpecOther);
    }

    if old.labels.keys().any(|k| !new.labels.contains_key(k)) {
        mutations.push(Mutation::LabelRemoval);
    }

    for key in old.annotations.keys().chain(new.annotations.keys()) {
        if !key.starts_with(MAPI_ANNOTATION_PREFIX) {
            continue;
        }
        if old.annotations.get(key) != new.annotations.get(key) {
            mutations.push(Mutation::MapiAnnotation(key.clone()));
            // One denial per request is enough; further annotation diffs
            // would produce the same message.
            break;
        }
    }

    mutations
}

fn strip_replicas(spec: &Value) -> Value {
    match spec {
        Value::Object(map) => {
            let stripped: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, _)| k.as_str() != "replicas")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}
