//! Mock infrastructure for simulating a mirror pair in functional tests.
//!
//! This module provides a `MockPairState` struct that simulates the observed
//! state of a MAPI/CAPI mirror pair without requiring a live Kubernetes
//! cluster.
//!
//! ## Design Philosophy
//!
//! Instead of duplicating production logic, this mock:
//! 1. Uses the actual `determine_event` function and state machine from
//!    production code
//! 2. Simulates only the external state (conditions, generations, mirrors)
//! 3. Replays the reconciler's pass structure: propagate, write conditions,
//!    then advance the state machine on the pre-pass observations
//!
//! This ensures tests stay in sync with production behavior automatically.

use machine_sync_operator::controller::authority::{
    determine_event, AuthorityStateMachine, TransitionContext, TransitionResult,
};
use machine_sync_operator::crd::{AuthoritativeApi, AuthorityState};

/// Observed state of a mirror pair across reconcile passes.
#[derive(Debug, Clone)]
pub struct MockPairState {
    /// Pair name (shared by both sides).
    pub name: String,
    /// `spec.authoritativeAPI` on the MAPI anchor.
    pub spec_authority: AuthoritativeApi,
    /// `status.authoritativeAPI` as processed by the synchronizer.
    pub status_authority: AuthorityState,
    /// MAPI-side Paused condition.
    pub mapi_paused: bool,
    /// CAPI-side Paused condition.
    pub capi_paused: bool,
    /// Whether `synchronizedGeneration` matches the current generation.
    pub synchronized: bool,
    /// Generation of the MAPI anchor.
    pub generation: i64,
    /// The CAPI mirror object exists.
    pub mirror_exists: bool,
}

impl MockPairState {
    /// A settled, converged pair under the given authority.
    pub fn settled(name: &str, authority: AuthoritativeApi) -> Self {
        Self {
            name: name.to_string(),
            spec_authority: authority,
            status_authority: AuthorityState::settled(authority),
            mapi_paused: authority == AuthoritativeApi::ClusterApi,
            capi_paused: authority == AuthoritativeApi::MachineApi,
            synchronized: true,
            generation: 1,
            mirror_exists: true,
        }
    }

    /// Request an authority switch by updating the spec field.
    pub fn request_switch(&mut self, target: AuthoritativeApi) {
        self.spec_authority = target;
        self.generation += 1;
        self.synchronized = false;
    }

    /// Whether both sides report the pause state the current spec demands.
    pub fn pause_exclusive(&self) -> bool {
        self.mapi_paused != self.capi_paused
    }

    /// Run one reconcile pass: propagate, write conditions for the target
    /// authority, then advance the state machine using the observations made
    /// at the start of the pass (exactly like a crashed-and-resumed pass
    /// would). Returns the transition result, if an event applied.
    pub fn step(&mut self) -> Option<TransitionResult> {
        // Observations at the start of the pass.
        let observed_outgoing_paused = match self.spec_authority {
            AuthoritativeApi::MachineApi => self.capi_paused,
            AuthoritativeApi::ClusterApi => self.mapi_paused,
        };
        let observed_synchronized = self.synchronized;

        // Propagation and condition writes for the requested authority.
        self.mapi_paused = self.spec_authority == AuthoritativeApi::ClusterApi;
        self.capi_paused = self.spec_authority == AuthoritativeApi::MachineApi;
        self.synchronized = true;

        let event = determine_event(&self.status_authority, self.spec_authority)?;
        let ctx = TransitionContext::new(self.spec_authority)
            .with_outgoing_paused(observed_outgoing_paused)
            .with_synchronized(observed_synchronized);

        let sm = AuthorityStateMachine::new();
        let result = sm.transition(&self.status_authority, event, &ctx);
        if let TransitionResult::Success { to, .. } = &result {
            self.status_authority = *to;
        }
        Some(result)
    }

    /// Run passes until the observed authority settles on the spec value.
    /// Returns the sequence of observed status values after each pass.
    /// Panics if convergence takes more than `max_steps` passes.
    pub fn run_until_settled(&mut self, max_steps: usize) -> Vec<AuthorityState> {
        let mut observed = Vec::new();
        for _ in 0..max_steps {
            self.step();
            observed.push(self.status_authority);
            if self.status_authority.matches(self.spec_authority) {
                return observed;
            }
        }
        panic!(
            "pair {} did not settle on {:?} within {} passes (observed: {:?})",
            self.name, self.spec_authority, max_steps, observed
        );
    }
}
