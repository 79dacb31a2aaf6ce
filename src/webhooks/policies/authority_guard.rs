//! Authority guard policy.
//!
//! Every classified mutation is judged by the capability predicate; the
//! first denial wins and its message is returned verbatim to the caller of
//! the Kubernetes API.

use crate::controller::authority::can_mutate;
use crate::webhooks::policies::{ValidationContext, ValidationResult};

/// Validate all classified mutations against the pair's authority.
pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    for mutation in ctx.mutations {
        if let Err(denial) = can_mutate(ctx.username, ctx.side, ctx.authority, mutation) {
            return ValidationResult::denied(denial.reason, &denial.message);
        }
    }
    ValidationResult::allowed()
}
