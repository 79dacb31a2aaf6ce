//! Authority switch scenarios for mirror pairs.
//!
//! These verify the handoff protocol end to end: the observed authority
//! passes through Migrating, the outgoing side pauses before the new side
//! takes over, and interrupted or redirected switches converge on the spec.

use crate::mock_state::MockPairState;
use machine_sync_operator::controller::authority::TransitionResult;
use machine_sync_operator::crd::{AuthoritativeApi, AuthorityState};

#[test]
fn test_converged_pair_is_a_noop() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);
    assert!(pair.step().is_none());
    assert_eq!(pair.status_authority, AuthorityState::MachineApi);
    assert!(pair.pause_exclusive());
}

#[test]
fn test_switch_to_cluster_api_passes_through_migrating() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);
    pair.request_switch(AuthoritativeApi::ClusterApi);

    let observed = pair.run_until_settled(5);

    // Migrating must be externally observable before the new value lands.
    assert!(observed.contains(&AuthorityState::Migrating));
    assert_eq!(*observed.last().unwrap(), AuthorityState::ClusterApi);
    // After convergence, only the MAPI side is paused.
    assert!(pair.mapi_paused);
    assert!(!pair.capi_paused);
}

#[test]
fn test_switch_back_to_machine_api() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::ClusterApi);
    pair.request_switch(AuthoritativeApi::MachineApi);

    let observed = pair.run_until_settled(5);

    assert!(observed.contains(&AuthorityState::Migrating));
    assert_eq!(pair.status_authority, AuthorityState::MachineApi);
    assert!(pair.capi_paused);
    assert!(!pair.mapi_paused);
}

#[test]
fn test_round_trip_restores_original_state() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);

    pair.request_switch(AuthoritativeApi::ClusterApi);
    pair.run_until_settled(5);

    pair.request_switch(AuthoritativeApi::MachineApi);
    pair.run_until_settled(5);

    let reference = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);
    assert_eq!(pair.status_authority, reference.status_authority);
    assert_eq!(pair.mapi_paused, reference.mapi_paused);
    assert_eq!(pair.capi_paused, reference.capi_paused);
    assert!(pair.synchronized);
}

#[test]
fn test_pause_exclusivity_holds_at_every_pass() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);
    pair.request_switch(AuthoritativeApi::ClusterApi);

    for _ in 0..5 {
        pair.step();
        assert!(
            pair.pause_exclusive(),
            "both sides paused (or active) simultaneously at {:?}",
            pair.status_authority
        );
        if pair.status_authority.matches(pair.spec_authority) {
            break;
        }
    }
}

#[test]
fn test_completion_blocked_until_outgoing_side_paused() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);
    pair.request_switch(AuthoritativeApi::ClusterApi);

    // First pass: switch is requested while the outgoing (MAPI) side is
    // still active, so the pass can only reach Migrating.
    let result = pair.step().unwrap();
    assert!(matches!(result, TransitionResult::Success { .. }));
    assert_eq!(pair.status_authority, AuthorityState::Migrating);

    // The completion pass observes the pause written by the previous pass.
    pair.step();
    assert_eq!(pair.status_authority, AuthorityState::ClusterApi);
}

#[test]
fn test_spec_reverted_mid_migration_converges_on_original() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);

    pair.request_switch(AuthoritativeApi::ClusterApi);
    pair.step();
    assert_eq!(pair.status_authority, AuthorityState::Migrating);

    // Operator changes their mind before the handoff completes.
    pair.request_switch(AuthoritativeApi::MachineApi);
    let observed = pair.run_until_settled(5);

    assert_eq!(*observed.last().unwrap(), AuthorityState::MachineApi);
    assert!(pair.capi_paused);
    assert!(!pair.mapi_paused);
}

#[test]
fn test_repeated_switch_requests_are_idempotent() {
    let mut pair = MockPairState::settled("worker-a", AuthoritativeApi::MachineApi);
    pair.request_switch(AuthoritativeApi::ClusterApi);
    pair.run_until_settled(5);

    // Requesting the already-current authority changes nothing.
    let before = pair.status_authority;
    pair.request_switch(AuthoritativeApi::ClusterApi);
    pair.step();
    assert_eq!(pair.status_authority, before);
}
