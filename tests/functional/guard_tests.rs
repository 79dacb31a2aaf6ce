//! Admission guard decisions for every guarded mutation class.
//!
//! These drive the real classification and policy code the webhook server
//! uses, asserting on the exact denial messages surfaced to API callers.

use serde_json::json;

use machine_sync_operator::controller::authority::{ApiSide, SYNC_CONTROLLER_USERNAME};
use machine_sync_operator::crd::AuthoritativeApi;
use machine_sync_operator::webhooks::policies::{
    mutations::{classify, GuardedView},
    validate_all, ValidationContext,
};

fn mapi_machineset_view(replicas: i32, instance_type: &str) -> GuardedView {
    GuardedView {
        labels: [("role".to_string(), "worker".to_string())].into(),
        annotations: Default::default(),
        spec: json!({
            "replicas": replicas,
            "authoritativeAPI": "ClusterAPI",
            "template": {
                "spec": { "providerSpec": { "value": { "instanceType": instance_type } } }
            }
        }),
    }
}

fn judge(
    username: &str,
    side: ApiSide,
    authority: AuthoritativeApi,
    old: &GuardedView,
    new: &GuardedView,
) -> machine_sync_operator::webhooks::ValidationResult {
    let mutations = classify(old, new);
    validate_all(&ValidationContext {
        username,
        side,
        authority,
        mutations: &mutations,
    })
}

#[test]
fn test_replicas_edit_on_non_authoritative_mapi_denied() {
    let old = mapi_machineset_view(3, "m6i.large");
    let new = mapi_machineset_view(5, "m6i.large");

    let result = judge(
        "system:admin",
        ApiSide::MachineApi,
        AuthoritativeApi::ClusterApi,
        &old,
        &new,
    );
    assert!(!result.allowed);
    assert!(result
        .message
        .unwrap()
        .contains("Changing .spec.replicas is not allowed"));
}

#[test]
fn test_provider_spec_edit_on_non_authoritative_mapi_denied() {
    let old = mapi_machineset_view(3, "m6i.large");
    let new = mapi_machineset_view(3, "m6i.xlarge");

    let result = judge(
        "system:admin",
        ApiSide::MachineApi,
        AuthoritativeApi::ClusterApi,
        &old,
        &new,
    );
    assert!(!result.allowed);
    assert!(result
        .message
        .unwrap()
        .contains("Any other change inside .spec is not allowed"));
}

#[test]
fn test_spec_edit_on_capi_mirror_denied() {
    let old = mapi_machineset_view(3, "m6i.large");
    let new = mapi_machineset_view(3, "m6i.xlarge");

    let result = judge(
        "system:admin",
        ApiSide::ClusterApi,
        AuthoritativeApi::MachineApi,
        &old,
        &new,
    );
    assert!(!result.allowed);
    assert!(result
        .message
        .unwrap()
        .contains("Changing .spec is not allowed"));
}

#[test]
fn test_authoritative_side_edits_allowed() {
    let old = mapi_machineset_view(3, "m6i.large");
    let new = mapi_machineset_view(5, "m6i.xlarge");

    let result = judge(
        "system:admin",
        ApiSide::MachineApi,
        AuthoritativeApi::MachineApi,
        &old,
        &new,
    );
    assert!(result.allowed);
}

#[test]
fn test_sync_controller_bypasses_every_rule() {
    let mut old = mapi_machineset_view(3, "m6i.large");
    old.annotations.insert(
        "machine.openshift.io/instance-type".to_string(),
        "m6i.large".to_string(),
    );
    let new = mapi_machineset_view(5, "m6i.xlarge");

    let result = judge(
        SYNC_CONTROLLER_USERNAME,
        ApiSide::MachineApi,
        AuthoritativeApi::ClusterApi,
        &old,
        &new,
    );
    assert!(result.allowed);
}

#[test]
fn test_label_addition_allowed_on_non_authoritative() {
    let old = mapi_machineset_view(3, "m6i.large");
    let mut new = old.clone();
    new.labels.insert("team".to_string(), "platform".to_string());

    let result = judge(
        "system:admin",
        ApiSide::MachineApi,
        AuthoritativeApi::ClusterApi,
        &old,
        &new,
    );
    assert!(result.allowed);
}

#[test]
fn test_label_removal_denied_on_non_authoritative() {
    let old = mapi_machineset_view(3, "m6i.large");
    let mut new = old.clone();
    new.labels.clear();

    let result = judge(
        "system:admin",
        ApiSide::MachineApi,
        AuthoritativeApi::ClusterApi,
        &old,
        &new,
    );
    assert!(!result.allowed);
    assert_eq!(result.reason.unwrap(), "NotAuthoritative");
}

#[test]
fn test_mapi_annotation_guarded_on_both_sides() {
    let old = mapi_machineset_view(3, "m6i.large");
    let mut new = old.clone();
    new.annotations.insert(
        "machine.openshift.io/memory-mb".to_string(),
        "16384".to_string(),
    );

    for side in [ApiSide::MachineApi, ApiSide::ClusterApi] {
        let authority = match side {
            ApiSide::MachineApi => AuthoritativeApi::ClusterApi,
            ApiSide::ClusterApi => AuthoritativeApi::MachineApi,
        };
        let result = judge("system:admin", side, authority, &old, &new);
        assert!(!result.allowed, "side {:?} should deny", side);
        assert!(result
            .message
            .unwrap()
            .contains("Cannot add, modify or delete any machine.openshift.io/* annotation"));
    }
}

#[test]
fn test_non_mapi_annotation_changes_allowed() {
    let old = mapi_machineset_view(3, "m6i.large");
    let mut new = old.clone();
    new.annotations
        .insert("team".to_string(), "platform".to_string());

    let result = judge(
        "system:admin",
        ApiSide::MachineApi,
        AuthoritativeApi::ClusterApi,
        &old,
        &new,
    );
    assert!(result.allowed);
}
