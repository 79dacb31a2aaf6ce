//! Deletion cascade scenarios for mirror pairs.
//!
//! The cascade follows authority: deleting the authoritative side removes
//! the whole pair in order (mirror first, finalizer last), while deleting a
//! non-authoritative mirror removes only that object and the synchronizer
//! recreates it.

use machine_sync_operator::controller::deletion::{
    plan_deletion, DeletionPlan, DeletionView, PairRole,
};

/// Replay the deletion of an authoritative resource across reconcile passes,
/// simulating the counterpart disappearing between passes.
#[test]
fn test_authoritative_cascade_ordering() {
    // Pass 1: counterpart alive, issue the delete and keep the finalizer.
    let plan = plan_deletion(&DeletionView {
        role: PairRole::Authoritative,
        counterpart_exists: true,
        counterpart_terminating: false,
    });
    assert_eq!(
        plan,
        DeletionPlan {
            delete_counterpart: true,
            delete_templates: false,
            remove_finalizer: false,
            requeue: true,
        }
    );

    // Pass 2: counterpart terminating, wait.
    let plan = plan_deletion(&DeletionView {
        role: PairRole::Authoritative,
        counterpart_exists: true,
        counterpart_terminating: true,
    });
    assert!(!plan.delete_counterpart);
    assert!(!plan.remove_finalizer);
    assert!(plan.requeue);

    // Pass 3: counterpart gone, collect templates and release the finalizer.
    let plan = plan_deletion(&DeletionView {
        role: PairRole::Authoritative,
        counterpart_exists: false,
        counterpart_terminating: false,
    });
    assert_eq!(
        plan,
        DeletionPlan {
            delete_counterpart: false,
            delete_templates: true,
            remove_finalizer: true,
            requeue: false,
        }
    );
}

#[test]
fn test_mirror_deletion_is_contained() {
    // Whatever the counterpart looks like, a mirror's deletion touches
    // nothing beyond the mirror itself.
    for (exists, terminating) in [(true, false), (true, true), (false, false)] {
        let plan = plan_deletion(&DeletionView {
            role: PairRole::Mirror,
            counterpart_exists: exists,
            counterpart_terminating: terminating,
        });
        assert!(!plan.delete_counterpart);
        assert!(!plan.delete_templates);
        assert!(plan.remove_finalizer);
        assert!(!plan.requeue);
    }
}

#[test]
fn test_finalizer_never_released_while_counterpart_alive() {
    for terminating in [false, true] {
        let plan = plan_deletion(&DeletionView {
            role: PairRole::Authoritative,
            counterpart_exists: true,
            counterpart_terminating: terminating,
        });
        assert!(
            !plan.remove_finalizer,
            "finalizer released while counterpart still exists (terminating: {})",
            terminating
        );
    }
}

#[test]
fn test_templates_collected_exactly_once_at_the_end() {
    // Templates are only garbage-collected on the final pass, after the
    // counterpart is confirmed gone.
    let views = [
        (true, false, false),
        (true, true, false),
        (false, false, true),
    ];
    for (exists, terminating, expect_templates) in views {
        let plan = plan_deletion(&DeletionView {
            role: PairRole::Authoritative,
            counterpart_exists: exists,
            counterpart_terminating: terminating,
        });
        assert_eq!(plan.delete_templates, expect_templates);
    }
}
