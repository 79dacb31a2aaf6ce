//! Custom Resource Definitions for machine-sync-operator.
//!
//! Two parallel resource families plus the provider template kind:
//! - `mapi`: MachineSet/Machine in machine.openshift.io (legacy side)
//! - `capi`: MachineSet/Machine in cluster.x-k8s.io (upstream side)
//! - `infra`: MachineTemplate in infrastructure.cluster.x-k8s.io
//!
//! The MAPI and CAPI kinds intentionally share names (both families define a
//! `MachineSet` and a `Machine`); use the module paths or the aliased
//! re-exports to disambiguate.

pub mod capi;
mod common;
mod condition;
pub mod infra;
pub mod mapi;

pub use common::{
    AuthoritativeApi, AuthorityState, TemplateMeta, AUTHORITY_ANNOTATION, MAPI_ANNOTATION_PREFIX,
    MIRROR_OF_ANNOTATION, TEMPLATE_OWNER_LABEL,
};
pub use condition::{
    get_condition_reason, is_condition_true, Condition, CONDITION_PAUSED, CONDITION_SYNCHRONIZED,
    REASON_AUTHORITATIVE_API_MACHINE_API, REASON_AUTHORITATIVE_API_NOT_MACHINE_API,
    REASON_MAPPING_FAILED, REASON_NAME_CONFLICT, REASON_NOT_PAUSED, REASON_PAUSED,
    REASON_RESOURCE_SYNCHRONIZED,
};

pub use capi::{MachineSet as CapiMachineSet, Machine as CapiMachine};
pub use infra::MachineTemplate as InfraMachineTemplate;
pub use mapi::{MachineSet as MapiMachineSet, Machine as MapiMachine};
