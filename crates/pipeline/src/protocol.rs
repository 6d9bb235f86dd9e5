//! The contract every trait implements.

use std::borrow::Cow;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::{Map, Value as Json};
use trellis_core::{Condition, ConditionStatus, TraitProfile};
use trellis_kubehub::SharedClient;

use crate::environment::Environment;
use crate::error::ConfigureError;

/// Condition type carrying trait information (per-trait notices and the roll-up).
pub const CONDITION_TRAIT_INFO: &str = "TraitInfo";
pub const REASON_TRAIT_CONFIGURATION: &str = "TraitConfiguration";

/// Stable, case-sensitive trait identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraitId(Cow<'static, str>);

impl TraitId {
    pub const fn from_static(id: &'static str) -> Self { Self(Cow::Borrowed(id)) }
    pub fn new(id: impl Into<String>) -> Self { Self(Cow::Owned(id.into())) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for TraitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&'static str> for TraitId {
    fn from(id: &'static str) -> Self { Self::from_static(id) }
}

impl PartialEq<str> for TraitId {
    fn eq(&self, other: &str) -> bool { self.as_str() == other }
}

/// Outcome record of a pipeline step, folded into integration or kit status.
#[derive(Debug, Clone, PartialEq)]
pub struct TraitCondition {
    /// `None` for conditions synthesized by the catalog itself.
    pub trait_id: Option<TraitId>,
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: Time,
}

impl TraitCondition {
    pub fn new(
        trait_id: Option<TraitId>,
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            trait_id,
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Time(k8s_openapi::chrono::Utc::now()),
        }
    }

    /// Informational condition emitted by a trait.
    pub fn info(id: &TraitId, message: impl Into<String>) -> Self {
        Self::new(Some(id.clone()), CONDITION_TRAIT_INFO, ConditionStatus::True, REASON_TRAIT_CONFIGURATION, message)
    }

    /// Condition explaining why a trait could not be configured.
    pub fn rejected(id: &TraitId, message: impl Into<String>) -> Self {
        Self::new(Some(id.clone()), CONDITION_TRAIT_INFO, ConditionStatus::False, REASON_TRAIT_CONFIGURATION, message)
    }

    /// Condition reported when configuration explicitly turns a trait off.
    pub fn user_disabled(id: &TraitId) -> Self {
        Self::info(id, format!("{} trait explicitly disabled by the user", id))
    }

    pub fn to_condition(&self) -> Condition {
        Condition {
            type_: self.condition_type.clone(),
            status: self.status,
            last_update_time: Some(self.last_transition_time.clone()),
            last_transition_time: Some(self.last_transition_time.clone()),
            reason: self.reason.clone(),
            message: self.message.clone(),
        }
    }
}

/// A pluggable capability.
///
/// Instances are created fresh for every catalog; the only state carried into
/// [`Trait::configure`] is the configuration loaded by [`Trait::configure_from`].
pub trait Trait: Send + Sync + fmt::Debug {
    fn id(&self) -> &TraitId;

    /// Lower runs earlier; ties are broken by [`Trait::id`].
    fn order(&self) -> i32;

    fn is_allowed_in_profile(&self, _profile: TraitProfile) -> bool { true }

    /// Whether the trait needs a ready platform to run.
    fn requires_integration_platform(&self) -> bool { true }

    /// Called once at catalog construction.
    fn inject_client(&mut self, _client: SharedClient) {}

    /// Load the typed configuration from its `spec.traits` entry.
    fn configure_from(&mut self, config: &Map<String, Json>) -> anyhow::Result<()>;

    /// Decide whether the trait runs. Must only read `env`.
    ///
    /// A condition returned alongside an error is still recorded.
    fn configure(&mut self, env: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError>;

    /// Mutate `env`. Only called after `configure` returned `true`.
    fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()>;

    /// Current field state as persisted in status. Unset fields are omitted.
    fn status_fields(&self) -> Map<String, Json>;
}

/// Identity, ordering and the `enabled` switch shared by built-in traits.
#[derive(Debug, Clone)]
pub struct BaseTrait {
    id: TraitId,
    order: i32,
    pub enabled: Option<bool>,
}

impl BaseTrait {
    pub const fn new(id: &'static str, order: i32) -> Self {
        Self { id: TraitId::from_static(id), order, enabled: None }
    }

    pub fn id(&self) -> &TraitId { &self.id }
    pub fn order(&self) -> i32 { self.order }

    pub fn explicitly_disabled(&self) -> bool { self.enabled == Some(false) }
    pub fn explicitly_enabled(&self) -> bool { self.enabled == Some(true) }

    /// Read `enabled` from a configuration map.
    pub fn load(&mut self, config: &Map<String, Json>) -> anyhow::Result<()> {
        self.enabled = match config.get("enabled") {
            None | Some(Json::Null) => None,
            Some(Json::Bool(b)) => Some(*b),
            Some(other) => anyhow::bail!("{}: enabled must be a boolean, got {}", self.id, other),
        };
        Ok(())
    }

    pub fn fields(&self) -> Map<String, Json> {
        let mut m = Map::new();
        put(&mut m, "enabled", self.enabled);
        m
    }
}

/// Insert `value` under `key` when set.
pub(crate) fn put<T: Into<Json>>(m: &mut Map<String, Json>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        m.insert(key.to_string(), v.into());
    }
}
