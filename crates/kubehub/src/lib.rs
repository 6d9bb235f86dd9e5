//! Trellis kubehub: cluster access consumed by the trait pipeline.
//!
//! The pipeline only talks to the cluster through [`ClusterClient`]. [`KubeClient`]
//! implements it on top of kube-rs; [`MockClient`] serves fixtures from memory.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use k8s_openapi::api::{apps::v1::Deployment, batch::v1::CronJob};
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use trellis_core::{IntegrationKit, IntegrationPlatform, WorkloadKind, API_GROUP};

/// Errors callers may want to match on; everything else travels as `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum KubehubError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: String, namespace: String, name: String },
}

/// True when the error chain carries a [`KubehubError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|e| matches!(e.downcast_ref::<KubehubError>(), Some(KubehubError::NotFound { .. })))
}

/// Cluster operations the pipeline depends on.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Platform governing `namespace`: the `selected` one when named, otherwise the
    /// first ready platform, otherwise the first one listed. `None` when there is none.
    async fn platform_for(&self, namespace: &str, selected: Option<&str>) -> Result<Option<IntegrationPlatform>>;

    async fn integration_kit(&self, namespace: &str, name: &str) -> Result<Option<IntegrationKit>>;

    /// Fetch a workload by kind. The result is always a dynamic object with type meta set.
    async fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<DynamicObject>;
}

pub type SharedClient = Arc<dyn ClusterClient>;

/// Serialize a typed object into a [`DynamicObject`].
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    let raw = serde_json::to_value(obj).context("serializing object")?;
    serde_json::from_value(raw).context("converting object to DynamicObject")
}

/// Parse a [`DynamicObject`] into a typed resource.
pub fn from_dynamic<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T> {
    let raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    serde_json::from_value(raw).context("parsing DynamicObject")
}

fn camel_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(API_GROUP, "v1", kind))
}

fn knative_service_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("serving.knative.dev", "v1", "Service"))
}

fn map_get_err(e: kube::Error, kind: &str, namespace: &str, name: &str) -> anyhow::Error {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => KubehubError::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
        .into(),
        other => anyhow::Error::new(other).context(format!("getting {} {}/{}", kind, namespace, name)),
    }
}

/// [`ClusterClient`] backed by a kube-rs client.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self { Self { client } }

    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClient {
    async fn platform_for(&self, namespace: &str, selected: Option<&str>) -> Result<Option<IntegrationPlatform>> {
        counter!("kube_requests_total", 1u64, "op" => "platform");
        let ar = camel_resource("IntegrationPlatform");
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        if let Some(name) = selected {
            return match api.get_opt(name).await.with_context(|| format!("getting platform {}/{}", namespace, name))? {
                Some(obj) => Ok(Some(from_dynamic(&obj)?)),
                None => Ok(None),
            };
        }
        let list = api.list(&ListParams::default()).await.context("listing platforms")?;
        let mut platforms = Vec::with_capacity(list.items.len());
        for obj in list.items.iter() {
            platforms.push(from_dynamic::<IntegrationPlatform>(obj)?);
        }
        debug!(namespace = %namespace, count = platforms.len(), "platforms listed");
        Ok(pick_platform(platforms))
    }

    async fn integration_kit(&self, namespace: &str, name: &str) -> Result<Option<IntegrationKit>> {
        counter!("kube_requests_total", 1u64, "op" => "kit");
        let ar = camel_resource("IntegrationKit");
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        match api.get_opt(name).await.with_context(|| format!("getting kit {}/{}", namespace, name))? {
            Some(obj) => Ok(Some(from_dynamic(&obj)?)),
            None => Ok(None),
        }
    }

    async fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<DynamicObject> {
        counter!("kube_requests_total", 1u64, "op" => "workload");
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let obj = api.get(name).await.map_err(|e| map_get_err(e, kind.as_str(), namespace, name))?;
                to_dynamic(&obj)
            }
            WorkloadKind::CronJob => {
                let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
                let obj = api.get(name).await.map_err(|e| map_get_err(e, kind.as_str(), namespace, name))?;
                to_dynamic(&obj)
            }
            WorkloadKind::KnativeService => {
                let ar = knative_service_resource();
                let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
                let mut obj = api.get(name).await.map_err(|e| map_get_err(e, kind.as_str(), namespace, name))?;
                if obj.types.is_none() {
                    obj.types = Some(kube::core::TypeMeta { api_version: ar.api_version.clone(), kind: ar.kind.clone() });
                }
                Ok(obj)
            }
        }
    }
}

fn pick_platform(mut platforms: Vec<IntegrationPlatform>) -> Option<IntegrationPlatform> {
    match platforms.iter().position(|p| p.is_ready()) {
        Some(idx) => Some(platforms.swap_remove(idx)),
        None => platforms.into_iter().next(),
    }
}

// ----------------- Mock implementation -----------------

/// In-memory [`ClusterClient`] for tests and offline runs.
#[derive(Debug, Default, Clone)]
pub struct MockClient {
    pub platforms: Vec<IntegrationPlatform>,
    pub kits: Vec<IntegrationKit>,
    pub workloads: Vec<(WorkloadKind, DynamicObject)>,
}

impl MockClient {
    pub fn new() -> Self { Self::default() }

    pub fn with_platform(mut self, pl: IntegrationPlatform) -> Self { self.platforms.push(pl); self }
    pub fn with_kit(mut self, kit: IntegrationKit) -> Self { self.kits.push(kit); self }
    pub fn with_workload(mut self, kind: WorkloadKind, obj: DynamicObject) -> Self { self.workloads.push((kind, obj)); self }

    pub fn shared(self) -> SharedClient { Arc::new(self) }
}

#[async_trait::async_trait]
impl ClusterClient for MockClient {
    async fn platform_for(&self, namespace: &str, selected: Option<&str>) -> Result<Option<IntegrationPlatform>> {
        let in_ns: Vec<IntegrationPlatform> = self
            .platforms
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect();
        match selected {
            Some(name) => Ok(in_ns.into_iter().find(|p| p.name() == name)),
            None => Ok(pick_platform(in_ns)),
        }
    }

    async fn integration_kit(&self, namespace: &str, name: &str) -> Result<Option<IntegrationKit>> {
        Ok(self.kits.iter().find(|k| k.namespace() == namespace && k.name() == name).cloned())
    }

    async fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<DynamicObject> {
        self.workloads
            .iter()
            .find(|(k, o)| {
                *k == kind && o.metadata.namespace.as_deref() == Some(namespace) && o.metadata.name.as_deref() == Some(name)
            })
            .map(|(_, o)| o.clone())
            .ok_or_else(|| {
                KubehubError::NotFound { kind: kind.to_string(), namespace: namespace.to_string(), name: name.to_string() }.into()
            })
    }
}
