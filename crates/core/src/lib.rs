//! Trellis core types: integration resources, trait profiles, conditions.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod condition;
pub mod resources;
pub mod traits;

pub use condition::{Condition, ConditionStatus};
pub use resources::{
    Integration, IntegrationKit, IntegrationKitSpec, IntegrationKitStatus, IntegrationPlatform,
    IntegrationPlatformSpec, IntegrationPlatformStatus, IntegrationSpec, IntegrationStatus,
    KitReference,
};
pub use traits::Traits;

/// API group shared by every custom resource handled by the operator.
pub const API_GROUP: &str = "camel.apache.org";
/// API version shared by every custom resource handled by the operator.
pub const API_VERSION: &str = "camel.apache.org/v1";

/// Ownership label carried by every resource generated for (or adopted by) an integration.
pub const INTEGRATION_LABEL: &str = "camel.apache.org/integration";
/// Annotation naming the kind of an imported workload.
pub const IMPORTED_KIND_ANNOTATION: &str = "camel.apache.org/imported-from-kind";
/// Annotation naming an imported workload.
pub const IMPORTED_NAME_ANNOTATION: &str = "camel.apache.org/imported-from-name";
/// Annotation selecting the platform an integration is bound to.
pub const PLATFORM_SELECTOR_ANNOTATION: &str = "camel.apache.org/platform.id";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown trait profile: {0}")]
    UnknownProfile(String),
    #[error("unsupported workload kind: {0}")]
    UnknownWorkloadKind(String),
}

/// Deployment target shape; filters which traits are eligible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TraitProfile {
    Kubernetes,
    Knative,
    OpenShift,
}

impl TraitProfile {
    pub const ALL: [TraitProfile; 3] = [TraitProfile::Kubernetes, TraitProfile::Knative, TraitProfile::OpenShift];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraitProfile::Kubernetes => "Kubernetes",
            TraitProfile::Knative => "Knative",
            TraitProfile::OpenShift => "OpenShift",
        }
    }
}

impl Default for TraitProfile {
    fn default() -> Self { TraitProfile::Kubernetes }
}

impl fmt::Display for TraitProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for TraitProfile {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TraitProfile::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownProfile(s.to_string()))
    }
}

/// Cluster flavour a platform runs on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClusterType {
    #[default]
    Kubernetes,
    OpenShift,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlatformPhase {
    #[default]
    #[serde(rename = "")]
    None,
    Creating,
    Warming,
    Ready,
    Error,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum IntegrationPhase {
    #[default]
    #[serde(rename = "")]
    None,
    Initialization,
    #[serde(rename = "Building Kit")]
    BuildingKit,
    Deploying,
    Running,
    Error,
}

impl IntegrationPhase {
    /// Phases in which the integration owns live workload resources.
    pub fn is_running(&self) -> bool {
        matches!(self, IntegrationPhase::Deploying | IntegrationPhase::Running)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum KitPhase {
    #[default]
    #[serde(rename = "")]
    None,
    Initialization,
    #[serde(rename = "Build Submitted")]
    BuildSubmitted,
    #[serde(rename = "Build Running")]
    BuildRunning,
    Ready,
    Error,
}

/// Workload kinds an integration may be imported from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    CronJob,
    KnativeService,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::KnativeService => "KnativeService",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for WorkloadKind {
    type Err = CoreError;

    // Annotation values are matched exactly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deployment" => Ok(WorkloadKind::Deployment),
            "CronJob" => Ok(WorkloadKind::CronJob),
            "KnativeService" => Ok(WorkloadKind::KnativeService),
            other => Err(CoreError::UnknownWorkloadKind(other.to_string())),
        }
    }
}

pub mod prelude {
    pub use super::{
        ClusterType, Condition, ConditionStatus, Integration, IntegrationKit, IntegrationPhase, IntegrationPlatform,
        KitPhase, PlatformPhase, TraitProfile, Traits, WorkloadKind, INTEGRATION_LABEL,
    };
}
