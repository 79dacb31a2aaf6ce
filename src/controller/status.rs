//! Status management utilities.
//!
//! Helpers for building the `Paused`/`Synchronized` condition set written to
//! both sides of a mirror pair.

use crate::controller::authority::ApiSide;
use crate::crd::{AuthoritativeApi, Condition};

/// The `status.replicas` value the synchronizer writes on one side of a
/// MachineSet pair, or `None` when that side's own machine controllers own
/// the count. The paused mirror follows the authoritative side's observed
/// count; until the first authoritative status lands, the spec value stands
/// in so a fresh pair does not report zero.
pub fn synced_replicas(
    side: ApiSide,
    authority: AuthoritativeApi,
    authoritative_observed: Option<i32>,
    authoritative_spec: i32,
) -> Option<i32> {
    if side.is_authoritative(authority) {
        return None;
    }
    Some(authoritative_observed.unwrap_or(authoritative_spec))
}

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from an existing conditions list, preserving condition types the
    /// synchronizer does not own.
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        // Find and replace existing condition of same type
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set the MAPI-side Paused condition for the given authority.
    pub fn paused_mapi(
        &mut self,
        authority: AuthoritativeApi,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::paused_mapi(authority, generation))
    }

    /// Set the CAPI-side Paused condition for the given authority.
    pub fn paused_capi(
        &mut self,
        authority: AuthoritativeApi,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::paused_capi(authority, generation))
    }

    /// Set Synchronized=True for a completed propagation pass.
    pub fn synchronized(
        &mut self,
        kind: &str,
        authority: AuthoritativeApi,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::synchronized(kind, authority, generation))
    }

    /// Set Synchronized=False with a persistent reason.
    pub fn not_synchronized(
        &mut self,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::not_synchronized(reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
