//! Trellis trait pipeline.
//!
//! A [`Registry`] of trait constructors feeds a per-pass [`Catalog`], which filters the
//! traits by profile, orders them by `(order, id)` and drives the configure/apply
//! protocol over a single-owner [`Environment`]. [`apply`] is the reconcile entry point;
//! [`new_synthetic_environment`] replays the pipeline for imported workloads.

#![forbid(unsafe_code)]

pub mod builtin;
mod catalog;
mod entry;
mod environment;
mod error;
mod protocol;
mod registry;

pub use catalog::{is_addon, Catalog, ADDON_TRAITS};
pub use entry::{apply, new_synthetic_environment};
pub use environment::{Collection, Environment, Hook, HookStage, KeyValues};
pub use error::{ConfigureError, PipelineError, RegistryError};
pub use protocol::{BaseTrait, Trait, TraitCondition, TraitId, CONDITION_TRAIT_INFO, REASON_TRAIT_CONFIGURATION};
pub use registry::{Registry, TraitFactory};

pub mod prelude {
    pub use super::{Catalog, Environment, PipelineError, Registry, Trait, TraitCondition, TraitId};
}
