// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for machine-sync-operator.
//!
//! Uses proptest to generate random inputs and verify invariants of the
//! authority state machine, the mutation capability predicate, and the
//! template rotation planner.

use proptest::prelude::*;

use machine_sync_operator::controller::authority::{
    can_mutate, determine_event, ApiSide, AuthorityEvent, AuthorityStateMachine, Mutation,
    TransitionContext, TransitionResult, SYNC_CONTROLLER_USERNAME,
};
use machine_sync_operator::controller::templates::plan_rotation;
use machine_sync_operator::crd::{AuthoritativeApi, AuthorityState, Condition};

/// Strategy for generating authority values.
fn any_authority() -> impl Strategy<Value = AuthoritativeApi> {
    prop_oneof![
        Just(AuthoritativeApi::MachineApi),
        Just(AuthoritativeApi::ClusterApi),
    ]
}

/// Strategy for generating observed authority states.
fn any_state() -> impl Strategy<Value = AuthorityState> {
    prop_oneof![
        Just(AuthorityState::MachineApi),
        Just(AuthorityState::ClusterApi),
        Just(AuthorityState::Migrating),
    ]
}

/// Strategy for generating state machine events.
fn any_event() -> impl Strategy<Value = AuthorityEvent> {
    prop_oneof![
        Just(AuthorityEvent::SwitchRequested),
        Just(AuthorityEvent::SynchronizedToMachineApi),
        Just(AuthorityEvent::SynchronizedToClusterApi),
    ]
}

/// Strategy for generating guarded mutations.
fn any_mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        Just(Mutation::SpecReplicas),
        Just(Mutation::SpecOther),
        Just(Mutation::LabelRemoval),
        "[a-z-]{1,20}".prop_map(|s| Mutation::MapiAnnotation(format!(
            "machine.openshift.io/{}",
            s
        ))),
    ]
}

/// Strategy for generating API sides.
fn any_side() -> impl Strategy<Value = ApiSide> {
    prop_oneof![Just(ApiSide::MachineApi), Just(ApiSide::ClusterApi)]
}

proptest! {
    /// Property: a transition can never land directly on a settled state that
    /// contradicts the spec's requested target.
    #[test]
    fn test_success_never_contradicts_target(
        state in any_state(),
        event in any_event(),
        target in any_authority(),
        paused in any::<bool>(),
        synchronized in any::<bool>(),
    ) {
        let sm = AuthorityStateMachine::new();
        let ctx = TransitionContext::new(target)
            .with_outgoing_paused(paused)
            .with_synchronized(synchronized);
        if let TransitionResult::Success { to, .. } = sm.transition(&state, event, &ctx) {
            if to != AuthorityState::Migrating {
                prop_assert!(to.matches(target));
            }
        }
    }

    /// Property: the state machine is deterministic.
    #[test]
    fn test_transitions_are_deterministic(
        state in any_state(),
        event in any_event(),
        target in any_authority(),
        paused in any::<bool>(),
        synchronized in any::<bool>(),
    ) {
        let sm = AuthorityStateMachine::new();
        let ctx = TransitionContext::new(target)
            .with_outgoing_paused(paused)
            .with_synchronized(synchronized);
        let a = sm.transition(&state, event, &ctx);
        let b = sm.transition(&state, event, &ctx);
        prop_assert_eq!(format!("{:?}", a), format!("{:?}", b));
    }

    /// Property: `determine_event` returns `None` exactly for converged pairs.
    #[test]
    fn test_event_determination_matches_convergence(
        state in any_state(),
        spec in any_authority(),
    ) {
        let event = determine_event(&state, spec);
        prop_assert_eq!(event.is_none(), state.matches(spec));
    }

    /// Property: completing a migration requires both guard inputs.
    #[test]
    fn test_migration_completion_requires_safe_handoff(
        target in any_authority(),
        paused in any::<bool>(),
        synchronized in any::<bool>(),
    ) {
        let sm = AuthorityStateMachine::new();
        let event = determine_event(&AuthorityState::Migrating, target).unwrap();
        let ctx = TransitionContext::new(target)
            .with_outgoing_paused(paused)
            .with_synchronized(synchronized);
        let result = sm.transition(&AuthorityState::Migrating, event, &ctx);
        match result {
            TransitionResult::Success { .. } => prop_assert!(paused && synchronized),
            TransitionResult::GuardFailed { .. } => prop_assert!(!(paused && synchronized)),
            TransitionResult::InvalidTransition { .. } => {
                prop_assert!(false, "completion event must be defined for Migrating")
            }
        }
    }

    /// Property: exactly one side of a pair reports Paused=True.
    #[test]
    fn test_pause_exclusivity(authority in any_authority(), generation in any::<i64>()) {
        let mapi = Condition::paused_mapi(authority, Some(generation));
        let capi = Condition::paused_capi(authority, Some(generation));
        prop_assert_ne!(mapi.status, capi.status);
    }

    /// Property: the synchronizer's own identity is never denied.
    #[test]
    fn test_sync_controller_never_denied(
        side in any_side(),
        authority in any_authority(),
        mutation in any_mutation(),
    ) {
        prop_assert!(
            can_mutate(SYNC_CONTROLLER_USERNAME, side, authority, &mutation).is_ok()
        );
    }

    /// Property: the authoritative side is never denied, and every denial on
    /// the non-authoritative side carries the NotAuthoritative reason.
    #[test]
    fn test_guard_decisions_follow_authority(
        username in "[a-z0-9:-]{1,30}",
        side in any_side(),
        authority in any_authority(),
        mutation in any_mutation(),
    ) {
        prop_assume!(username != SYNC_CONTROLLER_USERNAME);
        match can_mutate(&username, side, authority, &mutation) {
            Ok(()) => prop_assert!(side.is_authoritative(authority)),
            Err(denial) => {
                prop_assert!(!side.is_authoritative(authority));
                prop_assert_eq!(denial.reason, "NotAuthoritative");
            }
        }
    }

    /// Property: a rotation plan never deletes the desired template, and
    /// deletes nothing while a create or repoint is still pending.
    #[test]
    fn test_rotation_never_deletes_desired(
        desired in "[a-z]{1,10}-[0-9a-f]{8}",
        current in proptest::option::of("[a-z]{1,10}-[0-9a-f]{8}"),
        existing in proptest::collection::vec("[a-z]{1,10}-[0-9a-f]{8}", 0..5),
    ) {
        let plan = plan_rotation(&desired, current.as_deref(), &existing);
        prop_assert!(!plan.delete.contains(&desired));
        if plan.create || plan.repoint {
            prop_assert!(plan.delete.is_empty());
        }
        for name in &plan.delete {
            prop_assert!(existing.contains(name));
        }
    }
}
