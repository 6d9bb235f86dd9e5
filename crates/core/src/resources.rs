//! Custom resources consumed by the trait pipeline (only the fields it reads or writes).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::condition::{set_condition, Condition};
use crate::{ClusterType, IntegrationPhase, KitPhase, PlatformPhase, TraitProfile, Traits};

fn default_api_version() -> String { crate::API_VERSION.to_string() }

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KitReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

// ---- Integration ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "Integration::kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IntegrationSpec,
    #[serde(default)]
    pub status: IntegrationStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<TraitProfile>,
    #[serde(default, skip_serializing_if = "Traits::is_empty")]
    pub traits: Traits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_kit: Option<KitReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatus {
    #[serde(default)]
    pub phase: IntegrationPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<TraitProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_kit: Option<KitReference>,
    #[serde(default, skip_serializing_if = "Traits::is_empty")]
    pub traits: Traits,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl IntegrationStatus {
    pub fn set_condition(&mut self, cond: Condition) { set_condition(&mut self.conditions, cond) }
}

impl Integration {
    fn kind() -> String { "Integration".to_string() }

    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: default_api_version(),
            kind: Self::kind(),
            metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), ..Default::default() },
            spec: IntegrationSpec::default(),
            status: IntegrationStatus::default(),
        }
    }

    pub fn name(&self) -> &str { self.metadata.name.as_deref().unwrap_or("") }
    pub fn namespace(&self) -> &str { self.metadata.namespace.as_deref().unwrap_or("") }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.as_ref()?.get(key).map(|s| s.as_str())
    }

    /// Kit bound in status wins over the one requested in spec.
    pub fn kit_reference(&self) -> Option<&KitReference> {
        self.status.integration_kit.as_ref().or(self.spec.integration_kit.as_ref())
    }
}

// ---- IntegrationKit ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationKit {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "IntegrationKit::kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IntegrationKitSpec,
    #[serde(default)]
    pub status: IntegrationKitStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationKitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<TraitProfile>,
    #[serde(default, skip_serializing_if = "Traits::is_empty")]
    pub traits: Traits,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationKitStatus {
    #[serde(default)]
    pub phase: KitPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl IntegrationKitStatus {
    pub fn set_condition(&mut self, cond: Condition) { set_condition(&mut self.conditions, cond) }
}

impl IntegrationKit {
    fn kind() -> String { "IntegrationKit".to_string() }

    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: default_api_version(),
            kind: Self::kind(),
            metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), ..Default::default() },
            spec: IntegrationKitSpec::default(),
            status: IntegrationKitStatus::default(),
        }
    }

    pub fn name(&self) -> &str { self.metadata.name.as_deref().unwrap_or("") }
    pub fn namespace(&self) -> &str { self.metadata.namespace.as_deref().unwrap_or("") }
}

// ---- IntegrationPlatform ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationPlatform {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "IntegrationPlatform::kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: IntegrationPlatformSpec,
    #[serde(default)]
    pub status: IntegrationPlatformStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationPlatformSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<TraitProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationPlatformStatus {
    #[serde(default)]
    pub phase: PlatformPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<TraitProfile>,
}

impl IntegrationPlatform {
    fn kind() -> String { "IntegrationPlatform".to_string() }

    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: default_api_version(),
            kind: Self::kind(),
            metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), ..Default::default() },
            spec: IntegrationPlatformSpec::default(),
            status: IntegrationPlatformStatus::default(),
        }
    }

    pub fn name(&self) -> &str { self.metadata.name.as_deref().unwrap_or("") }

    pub fn is_ready(&self) -> bool { self.status.phase == PlatformPhase::Ready }

    /// Status profile, then spec profile, then derived from the cluster flavour.
    pub fn profile(&self) -> TraitProfile {
        if let Some(p) = self.status.profile.or(self.spec.profile) {
            return p;
        }
        match self.status.cluster.or(self.spec.cluster) {
            Some(ClusterType::OpenShift) => TraitProfile::OpenShift,
            _ => TraitProfile::Kubernetes,
        }
    }
}
