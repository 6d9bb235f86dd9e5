//! 3scale discovery: annotates the integration's Services so 3scale can find its API.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value as Json};
use trellis_core::INTEGRATION_LABEL;

use super::decode;
use crate::environment::Environment;
use crate::error::ConfigureError;
use crate::protocol::{put, BaseTrait, Trait, TraitCondition, TraitId};

pub const DISCOVERY_LABEL: &str = "discovery.3scale.net";
pub const SCHEME_ANNOTATION: &str = "discovery.3scale.net/scheme";
pub const PATH_ANNOTATION: &str = "discovery.3scale.net/path";
pub const PORT_ANNOTATION: &str = "discovery.3scale.net/port";
pub const DESCRIPTION_PATH_ANNOTATION: &str = "discovery.3scale.net/description-path";

const DEFAULT_SCHEME: &str = "http";
const DEFAULT_PATH: &str = "/";
const DEFAULT_PORT: i32 = 80;
const DEFAULT_DESCRIPTION_PATH: &str = "/openapi.json";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    auto: Option<bool>,
    scheme: Option<String>,
    path: Option<String>,
    port: Option<i32>,
    description_path: Option<String>,
}

/// Disabled unless explicitly enabled. With `auto` (the default) unset fields get
/// defaults; an empty value suppresses the matching annotation.
#[derive(Debug, Clone)]
pub struct ThreeScaleTrait {
    pub base: BaseTrait,
    pub auto: Option<bool>,
    pub scheme: Option<String>,
    pub path: Option<String>,
    pub port: Option<i32>,
    pub description_path: Option<String>,
}

impl ThreeScaleTrait {
    pub fn new() -> Self {
        Self { base: BaseTrait::new("3scale", 2400), auto: None, scheme: None, path: None, port: None, description_path: None }
    }

    fn stamp(&self, labels: &mut BTreeMap<String, String>, annotations: &mut BTreeMap<String, String>) {
        labels.insert(DISCOVERY_LABEL.to_string(), "true".to_string());
        let mut set = |key: &str, value: Option<String>| {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                annotations.insert(key.to_string(), v);
            }
        };
        set(SCHEME_ANNOTATION, self.scheme.clone());
        set(PATH_ANNOTATION, self.path.clone());
        set(PORT_ANNOTATION, self.port.filter(|p| *p != 0).map(|p| p.to_string()));
        set(DESCRIPTION_PATH_ANNOTATION, self.description_path.clone());
    }
}

impl Default for ThreeScaleTrait {
    fn default() -> Self { Self::new() }
}

impl Trait for ThreeScaleTrait {
    fn id(&self) -> &TraitId { self.base.id() }
    fn order(&self) -> i32 { self.base.order() }

    fn configure_from(&mut self, config: &Map<String, Json>) -> anyhow::Result<()> {
        self.base.load(config)?;
        let c: Config = decode(config)?;
        self.auto = c.auto;
        self.scheme = c.scheme;
        self.path = c.path;
        self.port = c.port;
        self.description_path = c.description_path;
        Ok(())
    }

    fn configure(&mut self, env: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> {
        if !self.base.explicitly_enabled() || !env.integration_in_running_phases() {
            return Ok((false, None));
        }
        if self.auto.unwrap_or(true) {
            self.scheme.get_or_insert_with(|| DEFAULT_SCHEME.to_string());
            self.path.get_or_insert_with(|| DEFAULT_PATH.to_string());
            self.port.get_or_insert(DEFAULT_PORT);
            self.description_path.get_or_insert_with(|| DEFAULT_DESCRIPTION_PATH.to_string());
        }
        let notice = TraitCondition::info(self.id(), "3scale trait is deprecated and may be removed in a future version");
        Ok((true, Some(notice)))
    }

    fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()> {
        if !env.integration_in_running_phases() {
            return Ok(());
        }
        let Some(name) = env.integration.as_ref().map(|it| it.name().to_string()) else {
            return Ok(());
        };
        let owned = |o: &kube::core::DynamicObject| {
            o.metadata.labels.as_ref().and_then(|l| l.get(INTEGRATION_LABEL)).map(|v| *v == name).unwrap_or(false)
        };
        env.resources.visit("Service", owned, |svc| {
            let mut labels = svc.metadata.labels.take().unwrap_or_default();
            let mut annotations = svc.metadata.annotations.take().unwrap_or_default();
            self.stamp(&mut labels, &mut annotations);
            svc.metadata.labels = Some(labels);
            svc.metadata.annotations = Some(annotations);
        });
        Ok(())
    }

    fn status_fields(&self) -> Map<String, Json> {
        let mut m = self.base.fields();
        put(&mut m, "auto", self.auto);
        put(&mut m, "scheme", self.scheme.clone());
        put(&mut m, "path", self.path.clone());
        put(&mut m, "port", self.port);
        put(&mut m, "descriptionPath", self.description_path.clone());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Collection;
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use trellis_core::{Integration, IntegrationPhase};

    fn create_environment() -> Environment {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some("test".into()),
                labels: Some([(INTEGRATION_LABEL.to_string(), "test".to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut env = Environment::new();
        env.resources = Collection::from_objects([trellis_kubehub::to_dynamic(&svc).unwrap()]);
        let mut it = Integration::new("ns", "test");
        it.status.phase = IntegrationPhase::Deploying;
        env.integration = Some(it);
        env
    }

    fn service(env: &Environment) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let svc = env.resources.of_kind("Service").next().expect("service");
        (
            svc.metadata.labels.clone().unwrap_or_default(),
            svc.metadata.annotations.clone().unwrap_or_default(),
        )
    }

    #[test]
    fn three_scale_disabled() {
        let env = Environment::new();
        let mut t = ThreeScaleTrait::new();
        let (enabled, condition) = t.configure(&env).unwrap();
        assert!(!enabled);
        assert!(condition.is_none());
    }

    #[test]
    fn three_scale_injection() {
        let mut env = create_environment();
        let mut t = ThreeScaleTrait::new();
        t.base.enabled = Some(true);
        let (ok, condition) = t.configure(&env).unwrap();
        assert!(ok);
        assert!(condition.is_some());

        t.apply(&mut env).unwrap();

        let (labels, annotations) = service(&env);
        assert_eq!(labels.get("discovery.3scale.net").map(String::as_str), Some("true"));
        assert_eq!(annotations.get("discovery.3scale.net/scheme").map(String::as_str), Some("http"));
        assert_eq!(annotations.get("discovery.3scale.net/path").map(String::as_str), Some("/"));
        assert_eq!(annotations.get("discovery.3scale.net/port").map(String::as_str), Some("80"));
        assert_eq!(annotations.get("discovery.3scale.net/description-path").map(String::as_str), Some("/openapi.json"));
    }

    #[test]
    fn three_scale_injection_no_api_path() {
        let mut env = create_environment();
        let mut t = ThreeScaleTrait::new();
        t.base.enabled = Some(true);
        t.description_path = Some(String::new());
        let (ok, condition) = t.configure(&env).unwrap();
        assert!(ok);
        assert!(condition.is_some());

        t.apply(&mut env).unwrap();

        let (labels, annotations) = service(&env);
        assert_eq!(labels.get("discovery.3scale.net").map(String::as_str), Some("true"));
        assert_eq!(annotations.get("discovery.3scale.net/scheme").map(String::as_str), Some("http"));
        assert_eq!(annotations.get("discovery.3scale.net/path").map(String::as_str), Some("/"));
        assert_eq!(annotations.get("discovery.3scale.net/port").map(String::as_str), Some("80"));
        assert!(!annotations.contains_key("discovery.3scale.net/description-path"));
    }

    #[test]
    fn foreign_services_are_untouched() {
        let mut env = create_environment();
        env.integration.as_mut().unwrap().metadata.name = Some("other".into());
        let mut t = ThreeScaleTrait::new();
        t.base.enabled = Some(true);
        t.configure(&env).unwrap();
        t.apply(&mut env).unwrap();
        let (labels, annotations) = service(&env);
        assert!(!labels.contains_key(DISCOVERY_LABEL));
        assert!(annotations.is_empty());
    }

    #[test]
    fn not_running_integration_is_skipped() {
        let mut env = create_environment();
        env.integration.as_mut().unwrap().status.phase = IntegrationPhase::Initialization;
        let mut t = ThreeScaleTrait::new();
        t.base.enabled = Some(true);
        assert_eq!(t.configure(&env).unwrap(), (false, None));
    }

    #[test]
    fn manual_mode_keeps_fields_unset() {
        let mut env = create_environment();
        let mut t = ThreeScaleTrait::new();
        t.configure_from(serde_json::json!({"enabled": true, "auto": false, "path": "/api"}).as_object().unwrap())
            .unwrap();
        assert!(t.configure(&env).unwrap().0);
        t.apply(&mut env).unwrap();
        let (_, annotations) = service(&env);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations.get(PATH_ANNOTATION).map(String::as_str), Some("/api"));
        let fields = t.status_fields();
        assert_eq!(fields.get("auto"), Some(&Json::Bool(false)));
        assert!(!fields.contains_key("scheme"));
    }
}
