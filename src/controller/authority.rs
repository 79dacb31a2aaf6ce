//! Authority state machine and mutation capability predicate.
//!
//! An authority switch is a handoff, not a flag flip: the outgoing side's
//! controllers must be paused and the pair synchronized before the new side
//! takes over, so the observed authority passes through `Migrating`. The
//! transition table makes the exclusivity invariant explicit and keeps every
//! reconcile pass idempotent: re-delivering an event for a state it does not
//! apply to is an `InvalidTransition`, not a side effect.
//!
//! `can_mutate` is the single predicate deciding whether an actor may write a
//! field given the pair's authority. The admission webhook evaluates it
//! synchronously; the reconciler evaluates it again when it detects drift on
//! legacy clusters where the webhook is not installed, and reverts.

use std::fmt;

use crate::crd::{AuthoritativeApi, AuthorityState};

/// Events that drive the authority state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorityEvent {
    /// `spec.authoritativeAPI` no longer matches the settled status value
    SwitchRequested,
    /// Migration converged with the Machine API as the new authority
    SynchronizedToMachineApi,
    /// Migration converged with the Cluster API as the new authority
    SynchronizedToClusterApi,
}

impl fmt::Display for AuthorityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityEvent::SwitchRequested => write!(f, "SwitchRequested"),
            AuthorityEvent::SynchronizedToMachineApi => write!(f, "SynchronizedToMachineApi"),
            AuthorityEvent::SynchronizedToClusterApi => write!(f, "SynchronizedToClusterApi"),
        }
    }
}

/// Context information available during authority transitions
#[derive(Debug, Clone)]
pub struct TransitionContext {
    /// Authority requested by the spec
    pub target: AuthoritativeApi,
    /// Whether the side losing authority is observed paused
    pub outgoing_side_paused: bool,
    /// Whether the mirror reflects the authoritative side's latest generation
    pub synchronized: bool,
}

impl TransitionContext {
    pub fn new(target: AuthoritativeApi) -> Self {
        Self {
            target,
            outgoing_side_paused: false,
            synchronized: false,
        }
    }

    pub fn with_outgoing_paused(mut self, paused: bool) -> Self {
        self.outgoing_side_paused = paused;
        self
    }

    pub fn with_synchronized(mut self, synchronized: bool) -> Self {
        self.synchronized = synchronized;
        self
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: AuthorityState,
    pub to: AuthorityState,
    pub event: AuthorityEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: AuthorityState,
        to: AuthorityState,
        event: AuthorityEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting an authority transition
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: AuthorityState,
        to: AuthorityState,
        event: AuthorityEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: AuthorityState,
        event: AuthorityEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: AuthorityState,
        to: AuthorityState,
        event: AuthorityEvent,
        reason: String,
    },
}

/// Authority state machine for a mirror pair
pub struct AuthorityStateMachine {
    transitions: Vec<Transition>,
}

impl Default for AuthorityStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorityStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        Self {
            transitions: vec![
                Transition::new(
                    AuthorityState::MachineApi,
                    AuthorityState::Migrating,
                    AuthorityEvent::SwitchRequested,
                    "Authority switch away from MachineAPI requested",
                ),
                Transition::new(
                    AuthorityState::ClusterApi,
                    AuthorityState::Migrating,
                    AuthorityEvent::SwitchRequested,
                    "Authority switch away from ClusterAPI requested",
                ),
                Transition::new(
                    AuthorityState::Migrating,
                    AuthorityState::MachineApi,
                    AuthorityEvent::SynchronizedToMachineApi,
                    "Handoff complete, MachineAPI is authoritative",
                ),
                Transition::new(
                    AuthorityState::Migrating,
                    AuthorityState::ClusterApi,
                    AuthorityEvent::SynchronizedToClusterApi,
                    "Handoff complete, ClusterAPI is authoritative",
                ),
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: &AuthorityState,
        event: AuthorityEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &AuthorityState, event: &AuthorityEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Check guard conditions for a transition
    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match (&transition.to, &transition.event) {
            // Completing a migration requires the handoff to be safe: the
            // outgoing side paused, the pair synchronized, and the spec still
            // requesting the target this event lands on.
            (AuthorityState::MachineApi, AuthorityEvent::SynchronizedToMachineApi)
            | (AuthorityState::ClusterApi, AuthorityEvent::SynchronizedToClusterApi) => {
                if !transition.to.matches(ctx.target) {
                    Some(format!(
                        "Spec now requests {} authority, not {}",
                        ctx.target, transition.to
                    ))
                } else if !ctx.outgoing_side_paused {
                    Some("Outgoing side has not relinquished control (not paused)".to_string())
                } else if !ctx.synchronized {
                    Some("Pair is not synchronized at the current generation".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Determine the appropriate event for the observed state.
/// Returns `None` when the pair has converged and no transition applies.
pub fn determine_event(
    current: &AuthorityState,
    spec_authority: AuthoritativeApi,
) -> Option<AuthorityEvent> {
    match current {
        AuthorityState::Migrating => match spec_authority {
            AuthoritativeApi::MachineApi => Some(AuthorityEvent::SynchronizedToMachineApi),
            AuthoritativeApi::ClusterApi => Some(AuthorityEvent::SynchronizedToClusterApi),
        },
        settled if settled.matches(spec_authority) => None,
        _ => Some(AuthorityEvent::SwitchRequested),
    }
}

// ---------------------------------------------------------------------------
// Mutation capability predicate
// ---------------------------------------------------------------------------

/// Identity of the synchronizer's own service account; exempt from the guard.
pub const SYNC_CONTROLLER_USERNAME: &str =
    "system:serviceaccount:openshift-machine-api:machine-sync-operator";

/// Which API family a guarded resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSide {
    MachineApi,
    ClusterApi,
}

impl ApiSide {
    /// Whether this side is the authoritative one for the given authority.
    pub fn is_authoritative(self, authority: AuthoritativeApi) -> bool {
        matches!(
            (self, authority),
            (ApiSide::MachineApi, AuthoritativeApi::MachineApi)
                | (ApiSide::ClusterApi, AuthoritativeApi::ClusterApi)
        )
    }
}

/// A write the guard must decide on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// `.spec.replicas` changed
    SpecReplicas,
    /// Any other field inside `.spec` changed
    SpecOther,
    /// An existing label was removed
    LabelRemoval,
    /// A `machine.openshift.io/*` annotation was added, changed, or removed
    MapiAnnotation(String),
}

/// A denied write, with the policy-style reason and message surfaced to the
/// caller of the admission API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: &'static str,
    pub message: String,
}

/// Decide whether `actor` may apply `mutation` to a resource on `side`, given
/// the pair's current authority. Pure; shared by the admission webhook and
/// the reconciler's drift revert.
pub fn can_mutate(
    actor: &str,
    side: ApiSide,
    authority: AuthoritativeApi,
    mutation: &Mutation,
) -> Result<(), Denial> {
    if actor == SYNC_CONTROLLER_USERNAME {
        return Ok(());
    }
    if side.is_authoritative(authority) {
        return Ok(());
    }

    let denial = match (side, mutation) {
        (ApiSide::ClusterApi, Mutation::SpecReplicas | Mutation::SpecOther) => Denial {
            reason: "NotAuthoritative",
            message: "Changing .spec is not allowed: the resource is a paused mirror of a \
                      MachineAPI resource"
                .to_string(),
        },
        (ApiSide::MachineApi, Mutation::SpecReplicas) => Denial {
            reason: "NotAuthoritative",
            message: "Changing .spec.replicas is not allowed: the replica count is owned by the \
                      authoritative ClusterAPI resource"
                .to_string(),
        },
        (ApiSide::MachineApi, Mutation::SpecOther) => Denial {
            reason: "NotAuthoritative",
            message: "Any other change inside .spec is not allowed while the resource is not \
                      authoritative"
                .to_string(),
        },
        (_, Mutation::LabelRemoval) => Denial {
            reason: "NotAuthoritative",
            message: "Deleting labels is not allowed on a non-authoritative resource".to_string(),
        },
        (_, Mutation::MapiAnnotation(key)) => Denial {
            reason: "NotAuthoritative",
            message: format!(
                "Cannot add, modify or delete any machine.openshift.io/* annotation on a \
                 non-authoritative resource (annotation: {})",
                key
            ),
        },
    };
    Err(denial)
}
