//! Controllers synchronizing MAPI and CAPI mirror pairs.
//!
//! Two resource kinds (MachineSet, Machine), each driven by a MAPI-anchored
//! reconciler that owns the ongoing synchronization, plus a CAPI-anchored
//! seed reconciler covering the CAPI-originated flows.

pub mod authority;
pub mod common;
pub mod context;
pub mod convert;
pub mod deletion;
pub mod error;
pub mod machine_reconciler;
pub mod machine_set_reconciler;
pub mod status;
pub mod templates;
