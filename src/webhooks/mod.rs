//! Webhook module for validating admission requests.
//!
//! Implements the synchronization admission guard: UPDATEs to the
//! non-authoritative side of a mirror pair are rejected synchronously, with
//! the same predicate the reconcilers use for after-the-fact drift reverts.

pub mod policies;
mod server;

pub use policies::{ValidationContext, ValidationResult};
pub use server::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
