//! Trait registration table.

use tracing::error;

use crate::error::RegistryError;
use crate::protocol::{Trait, TraitId};

/// Zero-argument constructor returning a fresh, unconfigured trait.
pub type TraitFactory = fn() -> Box<dyn Trait>;

/// Append-only table of trait constructors, built once at startup and then shared
/// read-only with every [`crate::Catalog`].
#[derive(Debug, Default, Clone)]
pub struct Registry {
    factories: Vec<(TraitId, TraitFactory)>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// Registry holding every built-in trait.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        for factory in crate::builtin::FACTORIES {
            if let Err(e) = reg.register(*factory) {
                error!(error = %e, "skipping built-in trait");
                debug_assert!(false, "built-in trait ids must be distinct: {}", e);
            }
        }
        reg
    }

    pub fn register(&mut self, factory: TraitFactory) -> Result<&mut Self, RegistryError> {
        let id = factory().id().clone();
        if self.factories.iter().any(|(known, _)| *known == id) {
            return Err(RegistryError::Duplicate(id.to_string()));
        }
        self.factories.push((id, factory));
        Ok(self)
    }

    pub fn len(&self) -> usize { self.factories.len() }
    pub fn is_empty(&self) -> bool { self.factories.is_empty() }

    /// Ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &TraitId> { self.factories.iter().map(|(id, _)| id) }

    /// One fresh instance per registered trait.
    pub fn instantiate(&self) -> Vec<Box<dyn Trait>> {
        self.factories.iter().map(|(_, factory)| factory()).collect()
    }
}
