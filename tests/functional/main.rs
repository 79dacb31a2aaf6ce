// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the mirror-pair synchronization protocol.
//!
//! These tests verify the authority state machine, the admission guard, the
//! template rotation protocol, and the deletion cascade WITHOUT requiring a
//! live Kubernetes cluster. They simulate the observed pair state and drive
//! the same pure functions the reconcilers use.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_switch_to_cluster_api_passes_through_migrating
//!
//! # Run with verbose output
//! cargo test --test functional -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Authority tests**: Authority switches in both directions, including
//!   interrupted and redirected migrations
//! - **Guard tests**: Admission decisions for every guarded mutation class
//! - **Sync tests**: Provider spec translation and template rotation
//! - **Deletion tests**: Cascade ordering and the deletion asymmetry
//!
//! ## Design Principles
//!
//! - **No K8s Required**: Tests run without any cluster infrastructure
//! - **Fast Execution**: All tests complete in milliseconds
//! - **Production Logic**: Event determination, guards, and planning are the
//!   real implementations, not reimplementations

mod authority_tests;
mod deletion_tests;
mod guard_tests;
mod mock_state;
mod sync_tests;

// Re-export for use in tests
pub use mock_state::*;
