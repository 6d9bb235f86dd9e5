//! Per-pass build context threaded through the trait pipeline.

use std::fmt;

use anyhow::Result;
use k8s_openapi::api::core::v1::EnvVar;
use kube::core::DynamicObject;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use trellis_core::{Integration, IntegrationKit, IntegrationPlatform, PlatformPhase, TraitProfile};
use trellis_kubehub::SharedClient;

use crate::protocol::TraitId;

/// Callback registered by a trait during `apply`.
pub type Hook = Box<dyn Fn(&mut Environment) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    /// After each trait's `apply`, fail-fast.
    PostStep,
    /// Once, after the whole trait loop.
    PostProcess,
    /// Once, after the catalog pass returned to the caller.
    PostAction,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookStage::PostStep => "post step processors",
            HookStage::PostProcess => "post processors",
            HookStage::PostAction => "post actions",
        })
    }
}

/// Insertion-ordered string map; re-setting a key keeps its slot and takes the new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues(Vec<(String, String)>);

impl KeyValues {
    pub fn new() -> Self { Self::default() }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> { self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())) }

    /// Container environment in insertion order.
    pub fn to_env_vars(&self) -> Vec<EnvVar> {
        self.0
            .iter()
            .map(|(k, v)| EnvVar { name: k.clone(), value: Some(v.clone()), value_from: None })
            .collect()
    }
}

fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("")
}

fn same_object(a: &DynamicObject, b: &DynamicObject) -> bool {
    kind_of(a) == kind_of(b)
        && a.metadata.namespace == b.metadata.namespace
        && a.metadata.name.is_some()
        && a.metadata.name == b.metadata.name
}

/// Ordered set of objects being assembled in a pass; identity is kind + namespace + name.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    items: Vec<DynamicObject>,
}

impl Collection {
    pub fn new() -> Self { Self::default() }

    pub fn from_objects(objs: impl IntoIterator<Item = DynamicObject>) -> Self {
        let mut c = Self::new();
        for o in objs {
            c.add(o);
        }
        c
    }

    /// Append, or replace in place an object with the same identity.
    pub fn add(&mut self, obj: DynamicObject) {
        match self.items.iter_mut().find(|o| same_object(o, &obj)) {
            Some(slot) => *slot = obj,
            None => self.items.push(obj),
        }
    }

    pub fn add_typed<K: Serialize>(&mut self, obj: &K) -> Result<()> {
        self.add(trellis_kubehub::to_dynamic(obj)?);
        Ok(())
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &DynamicObject> { self.items.iter() }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DynamicObject> { self.items.iter_mut() }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a DynamicObject> + 'a {
        self.items.iter().filter(move |o| kind_of(o) == kind)
    }

    /// Run `f` on every object of `kind` matching `pred`.
    pub fn visit<P, F>(&mut self, kind: &str, pred: P, mut f: F)
    where
        P: Fn(&DynamicObject) -> bool,
        F: FnMut(&mut DynamicObject),
    {
        for o in self.items.iter_mut().filter(|o| kind_of(o) == kind) {
            if pred(o) {
                f(o);
            }
        }
    }

    pub fn remove_where(&mut self, pred: impl Fn(&DynamicObject) -> bool) {
        self.items.retain(|o| !pred(o));
    }

    pub fn into_vec(self) -> Vec<DynamicObject> { self.items }
}

/// Mutable accumulator for one reconciliation pass. Never shared between passes.
#[derive(Default)]
pub struct Environment {
    pub cancel: CancellationToken,
    pub client: Option<SharedClient>,
    pub operator_id: String,
    pub platform: Option<IntegrationPlatform>,
    /// Profile of the platform, resolved at creation.
    pub platform_profile: Option<TraitProfile>,
    pub integration: Option<Integration>,
    pub kit: Option<IntegrationKit>,
    pub resources: Collection,
    pub env_vars: KeyValues,
    pub application_properties: KeyValues,
    /// Profile-eligible traits of the current pass, in execution order.
    pub configured_traits: Vec<TraitId>,
    /// Traits whose `apply` succeeded, in execution order.
    pub executed_traits: Vec<TraitId>,
    pub post_actions: Vec<Hook>,
    pub post_step_processors: Vec<Hook>,
    pub post_processors: Vec<Hook>,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("operator_id", &self.operator_id)
            .field("platform", &self.platform.as_ref().map(|p| p.name().to_string()))
            .field("integration", &self.integration.as_ref().map(|i| i.name().to_string()))
            .field("kit", &self.kit.as_ref().map(|k| k.name().to_string()))
            .field("resources", &self.resources.len())
            .field("env_vars", &self.env_vars)
            .field("application_properties", &self.application_properties)
            .field("executed_traits", &self.executed_traits)
            .field("hooks", &(self.post_actions.len(), self.post_step_processors.len(), self.post_processors.len()))
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self { Self::default() }

    /// Integration status/spec profile, then the kit's, then the platform's, then Kubernetes.
    pub fn determine_profile(&self) -> TraitProfile {
        if let Some(it) = &self.integration {
            if let Some(p) = it.status.profile.or(it.spec.profile) {
                return p;
            }
        }
        if let Some(p) = self.kit.as_ref().and_then(|k| k.spec.profile) {
            return p;
        }
        self.platform_profile.unwrap_or_default()
    }

    /// False when there is no platform.
    pub fn platform_in_phase(&self, phase: PlatformPhase) -> bool {
        self.platform.as_ref().map(|p| p.status.phase == phase).unwrap_or(false)
    }

    pub fn integration_in_running_phases(&self) -> bool {
        self.integration.as_ref().map(|it| it.status.phase.is_running()).unwrap_or(false)
    }

    pub fn add_post_action(&mut self, hook: impl Fn(&mut Environment) -> Result<()> + Send + Sync + 'static) {
        self.post_actions.push(Box::new(hook));
    }

    pub fn add_post_step_processor(&mut self, hook: impl Fn(&mut Environment) -> Result<()> + Send + Sync + 'static) {
        self.post_step_processors.push(Box::new(hook));
    }

    pub fn add_post_processor(&mut self, hook: impl Fn(&mut Environment) -> Result<()> + Send + Sync + 'static) {
        self.post_processors.push(Box::new(hook));
    }

    fn hooks_mut(&mut self, stage: HookStage) -> &mut Vec<Hook> {
        match stage {
            HookStage::PostStep => &mut self.post_step_processors,
            HookStage::PostProcess => &mut self.post_processors,
            HookStage::PostAction => &mut self.post_actions,
        }
    }

    /// Run the hooks of `stage` in registration order. Returns the number of hooks
    /// and the errors collected; with `fail_fast` the first error stops the run.
    ///
    /// Hooks registered while running are kept for later runs but not executed now.
    pub fn run_hooks(&mut self, stage: HookStage, fail_fast: bool) -> (usize, Vec<anyhow::Error>) {
        let mut hooks = std::mem::take(self.hooks_mut(stage));
        let total = hooks.len();
        let mut errors = Vec::new();
        for hook in hooks.iter() {
            if let Err(e) = hook(self) {
                errors.push(e);
                if fail_fast {
                    break;
                }
            }
        }
        hooks.append(self.hooks_mut(stage));
        *self.hooks_mut(stage) = hooks;
        (total, errors)
    }
}
