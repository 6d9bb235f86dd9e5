//! Marks every generated resource as owned by the integration.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use trellis_core::{API_VERSION, INTEGRATION_LABEL};

use super::decode;
use crate::environment::Environment;
use crate::error::ConfigureError;
use crate::protocol::{BaseTrait, Trait, TraitCondition, TraitId};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct OwnerTrait {
    pub base: BaseTrait,
    /// Extra labels stamped next to the ownership label.
    pub labels: BTreeMap<String, String>,
}

impl OwnerTrait {
    pub fn new() -> Self { Self { base: BaseTrait::new("owner", 2500), labels: BTreeMap::new() } }
}

impl Default for OwnerTrait {
    fn default() -> Self { Self::new() }
}

fn stamp(env: &mut Environment, extra: &BTreeMap<String, String>) -> anyhow::Result<()> {
    let Some(it) = env.integration.as_ref() else {
        return Ok(());
    };
    let name = it.name().to_string();
    let namespace = it.metadata.namespace.clone();
    let owner = it.metadata.uid.clone().map(|uid| OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: "Integration".to_string(),
        name: name.clone(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    });

    for obj in env.resources.iter_mut() {
        let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(INTEGRATION_LABEL.to_string(), name.clone());
        labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        // Owner references cannot cross namespaces.
        if let Some(owner) = &owner {
            if obj.metadata.namespace.is_none() || obj.metadata.namespace == namespace {
                let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
                if !refs.iter().any(|r| r.uid == owner.uid) {
                    refs.push(owner.clone());
                }
            }
        }
    }
    Ok(())
}

impl Trait for OwnerTrait {
    fn id(&self) -> &TraitId { self.base.id() }
    fn order(&self) -> i32 { self.base.order() }
    fn requires_integration_platform(&self) -> bool { false }

    fn configure_from(&mut self, config: &Map<String, Json>) -> anyhow::Result<()> {
        self.base.load(config)?;
        let c: Config = decode(config)?;
        self.labels = c.labels;
        Ok(())
    }

    fn configure(&mut self, env: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> {
        if self.base.explicitly_disabled() {
            return Ok((false, Some(TraitCondition::user_disabled(self.id()))));
        }
        Ok((env.integration.is_some(), None))
    }

    fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()> {
        let extra = self.labels.clone();
        env.add_post_processor(move |env| stamp(env, &extra));
        Ok(())
    }

    fn status_fields(&self) -> Map<String, Json> {
        let mut m = self.base.fields();
        if !self.labels.is_empty() {
            let labels = self.labels.iter().map(|(k, v)| (k.clone(), Json::String(v.clone()))).collect();
            m.insert("labels".to_string(), Json::Object(labels));
        }
        m
    }
}
