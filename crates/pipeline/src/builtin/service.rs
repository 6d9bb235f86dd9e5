//! Exposes the integration inside the cluster through a Service.

use std::collections::BTreeMap;

use anyhow::bail;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use trellis_core::{TraitProfile, INTEGRATION_LABEL};

use super::decode;
use crate::environment::Environment;
use crate::error::ConfigureError;
use crate::protocol::{put, BaseTrait, Trait, TraitCondition, TraitId};

pub const SERVICE_TYPES: &[&str] = &["ClusterIP", "NodePort", "LoadBalancer"];
const DEFAULT_PORT: i32 = 80;
const DEFAULT_TARGET_PORT: i32 = 8080;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    auto: Option<bool>,
    node_port: Option<bool>,
    #[serde(rename = "type")]
    service_type: Option<String>,
    port: Option<i32>,
    target_port: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ServiceTrait {
    pub base: BaseTrait,
    pub auto: Option<bool>,
    /// Shorthand for `type: NodePort`.
    pub node_port: Option<bool>,
    pub service_type: Option<String>,
    pub port: Option<i32>,
    pub target_port: Option<i32>,
}

impl ServiceTrait {
    pub fn new() -> Self {
        Self { base: BaseTrait::new("service", 1500), auto: None, node_port: None, service_type: None, port: None, target_port: None }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(t) = &self.service_type {
            if !SERVICE_TYPES.contains(&t.as_str()) {
                bail!("unsupported service type {:?}, expected one of {}", t, SERVICE_TYPES.join(", "));
            }
        }
        for port in [self.port, self.target_port].into_iter().flatten() {
            if !(1..=65535).contains(&port) {
                bail!("port {} out of range", port);
            }
        }
        Ok(())
    }
}

impl Default for ServiceTrait {
    fn default() -> Self { Self::new() }
}

impl Trait for ServiceTrait {
    fn id(&self) -> &TraitId { self.base.id() }
    fn order(&self) -> i32 { self.base.order() }

    fn is_allowed_in_profile(&self, profile: TraitProfile) -> bool {
        matches!(profile, TraitProfile::Kubernetes | TraitProfile::OpenShift)
    }

    fn requires_integration_platform(&self) -> bool { false }

    fn configure_from(&mut self, config: &Map<String, Json>) -> anyhow::Result<()> {
        self.base.load(config)?;
        let c: Config = decode(config)?;
        self.auto = c.auto;
        self.node_port = c.node_port;
        self.service_type = c.service_type;
        self.port = c.port;
        self.target_port = c.target_port;
        Ok(())
    }

    fn configure(&mut self, env: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> {
        if self.base.explicitly_disabled() {
            return Ok((false, Some(TraitCondition::user_disabled(self.id()))));
        }
        if env.integration.is_none() {
            return Ok((false, None));
        }
        if self.node_port == Some(true) {
            self.service_type = Some("NodePort".to_string());
        }
        self.validate()?;
        self.port.get_or_insert(DEFAULT_PORT);
        self.target_port.get_or_insert(DEFAULT_TARGET_PORT);
        Ok((true, None))
    }

    fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()> {
        let Some(it) = env.integration.as_ref() else {
            return Ok(());
        };
        let labels: BTreeMap<String, String> = [(INTEGRATION_LABEL.to_string(), it.name().to_string())].into();
        let svc = Service {
            metadata: ObjectMeta {
                name: Some(it.name().to_string()),
                namespace: Some(it.namespace().to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: self.port.unwrap_or(DEFAULT_PORT),
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(self.target_port.unwrap_or(DEFAULT_TARGET_PORT))),
                    ..Default::default()
                }]),
                selector: Some(labels),
                type_: self.service_type.clone(),
                ..Default::default()
            }),
            status: None,
        };
        env.resources.add_typed(&svc)
    }

    fn status_fields(&self) -> Map<String, Json> {
        let mut m = self.base.fields();
        put(&mut m, "auto", self.auto);
        put(&mut m, "nodePort", self.node_port);
        put(&mut m, "type", self.service_type.clone());
        put(&mut m, "port", self.port);
        put(&mut m, "targetPort", self.target_port);
        m
    }
}
