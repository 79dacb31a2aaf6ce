//! Validation policies for the synchronization admission guard.
//!
//! The guard protects the non-authoritative side of a mirror pair from
//! writes the synchronizer would immediately revert. Policies are pure:
//! the server extracts the actor, side, authority, and the classified
//! mutations from the admission request, and `validate_all` judges them
//! with the same capability predicate the reconcilers use for drift
//! detection.

pub mod authority_guard;
pub mod mutations;

use crate::controller::authority::{ApiSide, Mutation};
use crate::crd::AuthoritativeApi;

/// Result of a validation check
#[derive(Debug)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Detailed message (if not allowed)
    pub message: Option<String>,
}

impl ValidationResult {
    /// Create an allowed result
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        }
    }
}

/// Context for validating one admission request
pub struct ValidationContext<'a> {
    /// Username of the requesting actor
    pub username: &'a str,
    /// API family of the resource being written
    pub side: ApiSide,
    /// Current authority of the pair the resource belongs to
    pub authority: AuthoritativeApi,
    /// Mutations classified from the old/new object diff
    pub mutations: &'a [Mutation],
}

/// Run all validation policies
pub fn validate_all(ctx: &ValidationContext<'_>) -> ValidationResult {
    authority_guard::validate(ctx)
}
