//! Deletion coordination for mirror pairs.
//!
//! Deletion cascades follow authority, never namespace: deleting the
//! authoritative resource removes the mirror, its machines, and ultimately
//! the cloud instance; deleting a non-authoritative mirror removes only that
//! mirror, and the synchronizer recreates it. The decision is a pure function
//! over an observed view of the pair so the asymmetry is testable without a
//! cluster.

/// Finalizer owned by the synchronizer, placed on pair anchors so cascade
/// ordering completes before the object disappears.
pub const FINALIZER: &str = "machinesync.openshift.io/sync-finalizer";

/// The deleted resource's role within its pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairRole {
    /// The deleted resource is the authoritative side.
    Authoritative,
    /// The deleted resource is a passive mirror.
    Mirror,
}

/// Observed state of the pair at deletion time.
#[derive(Debug, Clone)]
pub struct DeletionView {
    pub role: PairRole,
    /// The counterpart object still exists on the other side.
    pub counterpart_exists: bool,
    /// The counterpart already has a deletion timestamp.
    pub counterpart_terminating: bool,
}

/// Actions for one deletion reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionPlan {
    /// Issue a delete for the counterpart.
    pub delete_counterpart: bool,
    /// Garbage-collect infra templates generated for this resource.
    pub delete_templates: bool,
    /// Remove our finalizer, letting the object go.
    pub remove_finalizer: bool,
    /// Requeue and re-observe before finishing.
    pub requeue: bool,
}

/// Compute the deletion actions for the observed pair state.
///
/// The finalizer on an authoritative resource is only released once the
/// counterpart is gone, so the cascade is ordered: mirror first, then the
/// authoritative object. A mirror's deletion never touches the counterpart.
pub fn plan_deletion(view: &DeletionView) -> DeletionPlan {
    match view.role {
        PairRole::Authoritative => {
            if view.counterpart_exists && !view.counterpart_terminating {
                DeletionPlan {
                    delete_counterpart: true,
                    delete_templates: false,
                    remove_finalizer: false,
                    requeue: true,
                }
            } else if view.counterpart_exists {
                // Delete already issued; wait for the counterpart to go.
                DeletionPlan {
                    delete_counterpart: false,
                    delete_templates: false,
                    remove_finalizer: false,
                    requeue: true,
                }
            } else {
                DeletionPlan {
                    delete_counterpart: false,
                    delete_templates: true,
                    remove_finalizer: true,
                    requeue: false,
                }
            }
        }
        PairRole::Mirror => DeletionPlan {
            delete_counterpart: false,
            delete_templates: false,
            remove_finalizer: true,
            requeue: false,
        },
    }
}
