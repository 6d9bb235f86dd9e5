//! Built-in traits.

mod cron;
mod environment;
mod owner;
mod service;
mod threescale;

pub use cron::CronTrait;
pub use environment::EnvironmentTrait;
pub use owner::OwnerTrait;
pub use service::ServiceTrait;
pub use threescale::ThreeScaleTrait;

use crate::protocol::Trait;
use crate::registry::TraitFactory;

fn environment() -> Box<dyn Trait> { Box::new(EnvironmentTrait::new()) }
fn cron() -> Box<dyn Trait> { Box::new(CronTrait::new()) }
fn service() -> Box<dyn Trait> { Box::new(ServiceTrait::new()) }
fn threescale() -> Box<dyn Trait> { Box::new(ThreeScaleTrait::new()) }
fn owner() -> Box<dyn Trait> { Box::new(OwnerTrait::new()) }

/// Constructors registered by [`crate::Registry::builtin`].
pub const FACTORIES: &[TraitFactory] = &[environment, cron, service, threescale, owner];

/// Decode a configuration map into a typed struct.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(config: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(config.clone()))?)
}
