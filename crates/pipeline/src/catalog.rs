//! Ordered, profile-filtered trait list and the two-phase driver.

use std::time::Instant;

use metrics::{counter, histogram};
use tracing::debug;
use trellis_core::{ConditionStatus, PlatformPhase, TraitProfile, Traits};
use trellis_kubehub::SharedClient;

use crate::environment::{Environment, HookStage};
use crate::error::{ConfigureError, PipelineError};
use crate::protocol::{Trait, TraitCondition, CONDITION_TRAIT_INFO, REASON_TRAIT_CONFIGURATION};
use crate::registry::Registry;

/// Traits whose status is nested under `addons`.
pub const ADDON_TRAITS: &[&str] = &[
    "master",
    "keda",
    "3scale",
    "tracing",
    "aws-secrets-manager",
    "azure-key-vault",
    "gcp-secret-manager",
    "hashicorp-vault",
];

pub fn is_addon(id: &str) -> bool {
    ADDON_TRAITS.contains(&id)
}

/// Fresh trait instances for one pass, sorted by `(order, id)`.
///
/// Traits may depend on the result of previously executed ones, so the order is
/// part of the contract.
#[derive(Debug)]
pub struct Catalog {
    traits: Vec<Box<dyn Trait>>,
}

impl Catalog {
    pub fn new(registry: &Registry, client: Option<SharedClient>) -> Self {
        let mut traits = registry.instantiate();
        traits.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.id().cmp(b.id())));
        if let Some(c) = client {
            for t in traits.iter_mut() {
                t.inject_client(c.clone());
            }
        }
        Self { traits }
    }

    pub fn all_traits(&self) -> Vec<&dyn Trait> {
        self.traits.iter().map(|t| t.as_ref()).collect()
    }

    pub fn traits_for_profile(&self, profile: TraitProfile) -> Vec<&dyn Trait> {
        self.traits.iter().filter(|t| t.is_allowed_in_profile(profile)).map(|t| t.as_ref()).collect()
    }

    /// Traits eligible for the environment's profile.
    pub fn traits_for(&self, env: &Environment) -> Vec<&dyn Trait> {
        self.traits_for_profile(env.determine_profile())
    }

    pub fn get_trait(&self, id: &str) -> Option<&dyn Trait> {
        self.traits.iter().find(|t| *t.id() == *id).map(|t| t.as_ref())
    }

    pub fn get_trait_mut(&mut self, id: &str) -> Option<&mut (dyn Trait + 'static)> {
        self.traits.iter_mut().find(|t| *t.id() == *id).map(|t| t.as_mut())
    }

    /// Pre-pass: structural checks, then load each trait's `spec.traits` entry
    /// (from the integration, or from the kit when there is no integration).
    pub fn configure(&mut self, env: &Environment) -> Result<(), PipelineError> {
        let source = match (&env.integration, &env.kit) {
            (Some(it), _) => &it.spec.traits,
            (None, Some(kit)) => &kit.spec.traits,
            (None, None) => return Err(PipelineError::Structural),
        };
        for t in self.traits.iter_mut() {
            let addon = is_addon(t.id().as_str());
            if let Some(cfg) = source.get_config(t.id().as_str(), addon) {
                t.configure_from(cfg)
                    .map_err(|cause| PipelineError::TraitConfig { id: t.id().clone(), cause })?;
            }
        }
        Ok(())
    }

    /// Run one pass over `env`.
    ///
    /// Conditions collected before a failure are returned alongside the error and
    /// must still be folded into status by the caller.
    pub fn apply(&mut self, env: &mut Environment) -> (Vec<TraitCondition>, Result<Traits, PipelineError>) {
        let started = Instant::now();
        counter!("pipeline_passes_total", 1u64);
        let mut conditions = Vec::new();
        let res = self.run(env, &mut conditions);
        if res.is_err() {
            counter!("pipeline_errors_total", 1u64);
        }
        histogram!("pipeline_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        (conditions, res)
    }

    fn run(&mut self, env: &mut Environment, conditions: &mut Vec<TraitCondition>) -> Result<Traits, PipelineError> {
        self.configure(env)?;

        let profile = env.determine_profile();
        let selected: Vec<usize> = (0..self.traits.len())
            .filter(|&i| self.traits[i].is_allowed_in_profile(profile))
            .collect();
        env.configured_traits = selected.iter().map(|&i| self.traits[i].id().clone()).collect();

        let platform_ready = env.platform_in_phase(PlatformPhase::Ready);
        let mut applicable = false;
        for idx in selected {
            let t = &mut self.traits[idx];
            let id = t.id().clone();
            if !platform_ready && t.requires_integration_platform() {
                debug!(trait_id = %id, "skipping trait because of missing integration platform");
                counter!("trait_skipped_total", 1u64, "trait" => id.to_string());
                continue;
            }

            counter!("trait_configure_total", 1u64, "trait" => id.to_string());
            let (enabled, condition) = match t.configure(env) {
                Ok(outcome) => outcome,
                Err(ConfigureError { condition, cause }) => {
                    conditions.extend(condition);
                    return Err(PipelineError::Configuration { id, cause });
                }
            };
            if let Some(c) = condition {
                conditions.push(c);
            }
            if !enabled {
                continue;
            }

            applicable = true;
            counter!("trait_apply_total", 1u64, "trait" => id.to_string());
            t.apply(env).map_err(|cause| PipelineError::Execution { id: id.clone(), cause })?;
            env.executed_traits.push(id.clone());

            let (_, errors) = env.run_hooks(HookStage::PostStep, true);
            if let Some(cause) = errors.into_iter().next() {
                return Err(PipelineError::PostStep { id, cause });
            }
        }

        if !applicable && platform_ready {
            return Err(PipelineError::NoApplicableTrait);
        }

        let (rollup, traits) = self.executed_trait_condition(&env.executed_traits);
        conditions.push(rollup);

        let (total, errors) = env.run_hooks(HookStage::PostProcess, false);
        if !errors.is_empty() {
            return Err(PipelineError::Hooks { stage: HookStage::PostProcess, failed: errors.len(), total, errors });
        }

        debug!(profile = %profile, executed = env.executed_traits.len(), "trait pass completed");
        Ok(traits)
    }

    /// Status map of the executed traits plus the roll-up condition naming them.
    fn executed_trait_condition(&self, executed: &[crate::protocol::TraitId]) -> (TraitCondition, Traits) {
        let mut traits = Traits::new();
        let mut ids = Vec::with_capacity(executed.len());
        for id in executed {
            if let Some(t) = self.get_trait(id.as_str()) {
                let fields = t.status_fields();
                if !fields.is_empty() {
                    traits.insert(id.as_str(), is_addon(id.as_str()), fields);
                }
            }
            ids.push(id.as_str());
        }
        let message = format!("Applied traits: {}", ids.join(","));
        debug!("{}", message);
        let cond = TraitCondition::new(None, CONDITION_TRAIT_INFO, ConditionStatus::True, REASON_TRAIT_CONFIGURATION, message);
        (cond, traits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{put, BaseTrait, TraitId};
    use serde_json::{json, Map, Value as Json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use trellis_core::{Integration, IntegrationKit, IntegrationPlatform};

    /// Scriptable trait; behaviour is chosen by id so factories stay `fn()`.
    #[derive(Debug)]
    struct Scripted {
        base: BaseTrait,
        platform: bool,
        profiles: &'static [TraitProfile],
        note: Option<String>,
    }

    impl Scripted {
        fn boxed(id: &'static str, order: i32) -> Box<dyn Trait> {
            Box::new(Scripted { base: BaseTrait::new(id, order), platform: false, profiles: &TraitProfile::ALL, note: None })
        }
    }

    impl Trait for Scripted {
        fn id(&self) -> &TraitId { self.base.id() }
        fn order(&self) -> i32 { self.base.order() }
        fn is_allowed_in_profile(&self, profile: TraitProfile) -> bool { self.profiles.contains(&profile) }
        fn requires_integration_platform(&self) -> bool { self.platform }
        fn configure_from(&mut self, config: &Map<String, Json>) -> anyhow::Result<()> {
            self.base.load(config)?;
            self.note = config.get("note").and_then(|v| v.as_str()).map(String::from);
            Ok(())
        }
        fn configure(&mut self, env: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> {
            match self.id().as_str() {
                "bad-config" => {
                    let why = TraitCondition::rejected(self.id(), "cannot configure bad-config");
                    Err(ConfigureError::from(anyhow::anyhow!("cannot configure")).with_condition(why))
                }
                "with-note" => Ok((true, Some(TraitCondition::info(self.id(), "noted")))),
                "reader" => Ok((env.application_properties.get("producer").is_some(), None)),
                _ => Ok((!self.base.explicitly_disabled(), None)),
            }
        }
        fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()> {
            match self.id().as_str() {
                "bad-apply" => anyhow::bail!("cannot apply"),
                "bad-step" => {
                    env.add_post_step_processor(|_| anyhow::bail!("step failed"));
                    Ok(())
                }
                "bad-post" => {
                    env.add_post_processor(|_| anyhow::bail!("post failed"));
                    env.add_post_processor(|_| Ok(()));
                    Ok(())
                }
                other => {
                    let n = env.executed_traits.len().to_string();
                    env.application_properties.set(other, n);
                    Ok(())
                }
            }
        }
        fn status_fields(&self) -> Map<String, Json> {
            let mut m = self.base.fields();
            put(&mut m, "note", self.note.clone());
            m
        }
    }

    fn catalog(factories: &[crate::TraitFactory]) -> Catalog {
        let mut reg = Registry::new();
        for f in factories {
            reg.register(*f).unwrap();
        }
        Catalog::new(&reg, None)
    }

    fn ready_env() -> Environment {
        let mut env = Environment::new();
        let mut pl = IntegrationPlatform::new("ns", "camel-k");
        pl.status.phase = PlatformPhase::Ready;
        env.platform_profile = Some(pl.profile());
        env.platform = Some(pl);
        env.integration = Some(Integration::new("ns", "it"));
        env
    }

    fn ids(traits: &[&dyn Trait]) -> Vec<String> { traits.iter().map(|t| t.id().to_string()).collect() }

    fn producer() -> Box<dyn Trait> { Scripted::boxed("producer", 100) }
    fn reader() -> Box<dyn Trait> { Scripted::boxed("reader", 200) }
    fn alpha() -> Box<dyn Trait> { Scripted::boxed("alpha", 200) }
    fn zeta() -> Box<dyn Trait> { Scripted::boxed("zeta", 50) }
    fn bad_config() -> Box<dyn Trait> { Scripted::boxed("bad-config", 300) }
    fn bad_apply() -> Box<dyn Trait> { Scripted::boxed("bad-apply", 300) }
    fn bad_step() -> Box<dyn Trait> { Scripted::boxed("bad-step", 300) }
    fn bad_post() -> Box<dyn Trait> { Scripted::boxed("bad-post", 300) }
    fn with_note() -> Box<dyn Trait> { Scripted::boxed("with-note", 150) }
    fn tracing_addon() -> Box<dyn Trait> { Scripted::boxed("tracing", 400) }
    fn keda_addon() -> Box<dyn Trait> { Scripted::boxed("keda", 410) }
    fn needs_platform() -> Box<dyn Trait> {
        Box::new(Scripted { base: BaseTrait::new("needs-platform", 10), platform: true, profiles: &TraitProfile::ALL, note: None })
    }
    fn knative_only() -> Box<dyn Trait> {
        Box::new(Scripted { base: BaseTrait::new("knative-only", 10), platform: false, profiles: &[TraitProfile::Knative], note: None })
    }

    #[test]
    fn all_traits_sorted_by_order_then_id() {
        let c = catalog(&[reader, zeta, alpha, producer]);
        let first = ids(&c.all_traits());
        assert_eq!(first, vec!["zeta", "producer", "alpha", "reader"]);
        assert_eq!(ids(&c.all_traits()), first);
        let mut copy = c.all_traits();
        copy.clear();
        assert_eq!(c.all_traits().len(), 4);
    }

    #[test]
    fn builtin_catalog_is_totally_ordered() {
        let c = Catalog::new(&Registry::builtin(), None);
        let all = c.all_traits();
        for w in all.windows(2) {
            assert!((w[0].order(), w[0].id()) < (w[1].order(), w[1].id()));
        }
    }

    #[test]
    fn profile_filter_keeps_order() {
        let c = catalog(&[knative_only, producer, reader]);
        assert_eq!(ids(&c.traits_for_profile(TraitProfile::Kubernetes)), vec!["producer", "reader"]);
        assert_eq!(ids(&c.traits_for_profile(TraitProfile::Knative)), vec!["knative-only", "producer", "reader"]);
        assert!(c.get_trait("reader").is_some());
        assert!(c.get_trait("Reader").is_none());
    }

    #[test]
    fn earlier_trait_output_is_visible_to_later_trait() {
        let mut c = catalog(&[reader, producer]);
        let mut env = ready_env();
        let (conds, res) = c.apply(&mut env);
        let traits = res.unwrap();
        assert!(traits.is_empty());
        assert_eq!(env.executed_traits, vec![TraitId::from_static("producer"), TraitId::from_static("reader")]);
        assert_eq!(env.application_properties.get("producer"), Some("0"));
        assert_eq!(env.application_properties.get("reader"), Some("1"));
        let rollup = conds.last().unwrap();
        assert_eq!(rollup.condition_type, CONDITION_TRAIT_INFO);
        assert_eq!(rollup.message, "Applied traits: producer,reader");
        assert!(rollup.trait_id.is_none());
    }

    #[test]
    fn disabled_trait_is_never_applied() {
        let mut c = catalog(&[producer, alpha]);
        let mut env = ready_env();
        env.integration.as_mut().unwrap().spec.traits =
            serde_json::from_value(json!({"alpha": {"enabled": false}})).unwrap();
        let (conds, res) = c.apply(&mut env);
        res.unwrap();
        assert!(env.application_properties.get("alpha").is_none());
        assert_eq!(conds.last().unwrap().message, "Applied traits: producer");
    }

    #[test]
    fn ready_platform_without_applicable_trait_fails() {
        let mut c = catalog(&[alpha]);
        let mut env = ready_env();
        env.integration.as_mut().unwrap().spec.traits =
            serde_json::from_value(json!({"alpha": {"enabled": false}})).unwrap();
        let (conds, res) = c.apply(&mut env);
        assert!(matches!(res, Err(PipelineError::NoApplicableTrait)));
        assert!(conds.iter().all(|c| !c.message.starts_with("Applied traits")));
    }

    #[test]
    fn missing_platform_skips_platform_traits_silently() {
        let mut c = catalog(&[needs_platform, producer]);
        let mut env = ready_env();
        env.platform = None;
        let (conds, res) = c.apply(&mut env);
        res.unwrap();
        assert_eq!(env.executed_traits, vec![TraitId::from_static("producer")]);
        assert_eq!(conds.len(), 1);
        assert_eq!(env.configured_traits.len(), 2);
    }

    #[test]
    fn no_platform_and_nothing_applicable_is_fine() {
        let mut c = catalog(&[needs_platform]);
        let mut env = ready_env();
        env.platform = None;
        let (conds, res) = c.apply(&mut env);
        res.unwrap();
        assert_eq!(conds[0].message, "Applied traits: ");
    }

    #[test]
    fn configure_error_keeps_earlier_conditions() {
        let mut c = catalog(&[with_note, bad_config, reader]);
        let mut env = ready_env();
        let (conds, res) = c.apply(&mut env);
        let err = res.unwrap_err();
        assert_eq!(err.to_string(), "bad-config trait configuration failed: cannot configure");
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[0].message, "noted");
        assert_eq!(conds[1].message, "cannot configure bad-config");
        assert_eq!(conds[1].status, trellis_core::ConditionStatus::False);
        assert_eq!(conds[1].trait_id.as_ref().map(|i| i.as_str()), Some("bad-config"));
        assert_eq!(env.executed_traits, vec![TraitId::from_static("with-note")]);
    }

    #[test]
    fn apply_error_aborts_remaining_traits() {
        let mut c = catalog(&[producer, with_note, bad_apply, tracing_addon]);
        let mut env = ready_env();
        let (conds, res) = c.apply(&mut env);
        assert_eq!(res.unwrap_err().to_string(), "bad-apply trait execution failed: cannot apply");
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].message, "noted");
        assert_eq!(env.executed_traits, vec![TraitId::from_static("producer"), TraitId::from_static("with-note")]);
        assert!(env.application_properties.get("tracing").is_none());
        assert_eq!(env.application_properties.get("producer"), Some("0"));
    }

    #[test]
    fn post_step_failure_is_attributed() {
        let mut c = catalog(&[bad_step, tracing_addon]);
        let mut env = ready_env();
        let (_, res) = c.apply(&mut env);
        let err = res.unwrap_err();
        assert_eq!(err.trait_id().map(|i| i.as_str()), Some("bad-step"));
        assert_eq!(err.to_string(), "bad-step trait executing post step action failed: step failed");
    }

    #[test]
    fn post_step_processors_run_after_every_apply() {
        fn registrar() -> Box<dyn Trait> { Scripted::boxed("registrar", 1) }
        #[derive(Debug)]
        struct Counter(BaseTrait);
        impl Trait for Counter {
            fn id(&self) -> &TraitId { self.0.id() }
            fn order(&self) -> i32 { self.0.order() }
            fn requires_integration_platform(&self) -> bool { false }
            fn configure_from(&mut self, _: &Map<String, Json>) -> anyhow::Result<()> { Ok(()) }
            fn configure(&mut self, _: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> { Ok((true, None)) }
            fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()> {
                env.add_post_step_processor(|e| {
                    let n = e.executed_traits.len().to_string();
                    e.env_vars.set(format!("STEP_{}", n), n);
                    Ok(())
                });
                Ok(())
            }
            fn status_fields(&self) -> Map<String, Json> { Map::new() }
        }
        fn counter() -> Box<dyn Trait> { Box::new(Counter(BaseTrait::new("counter", 0))) }

        let mut c = catalog(&[counter, registrar, producer]);
        let mut env = ready_env();
        c.apply(&mut env).1.unwrap();
        let keys: Vec<&str> = env.env_vars.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["STEP_1", "STEP_2", "STEP_3"]);
    }

    #[test]
    fn post_processor_failures_are_counted() {
        let mut c = catalog(&[bad_post, tracing_addon]);
        let mut env = ready_env();
        let (conds, res) = c.apply(&mut env);
        assert_eq!(res.unwrap_err().to_string(), "error executing post processors - 1/2 failed: [post failed]");
        assert_eq!(conds.last().unwrap().message, "Applied traits: bad-post,tracing");
        assert_eq!(env.application_properties.get("tracing"), Some("1"));
    }

    #[test]
    fn status_nests_addons_and_keeps_core_at_top_level() {
        let mut c = catalog(&[producer, tracing_addon, keda_addon]);
        let mut env = ready_env();
        env.integration.as_mut().unwrap().spec.traits = serde_json::from_value(json!({
            "producer": {"note": "core"},
            "addons": {"tracing": {"note": "traced"}, "keda": {"enabled": true}}
        }))
        .unwrap();
        let (_, res) = c.apply(&mut env);
        let traits = res.unwrap();
        assert_eq!(
            serde_json::to_value(&traits).unwrap(),
            json!({
                "producer": {"note": "core"},
                "addons": {"tracing": {"note": "traced"}, "keda": {"enabled": true}}
            })
        );
    }

    #[test]
    fn structural_error_without_integration_or_kit() {
        let mut c = catalog(&[producer]);
        let mut env = Environment::new();
        let (conds, res) = c.apply(&mut env);
        assert!(matches!(res, Err(PipelineError::Structural)));
        assert!(conds.is_empty());
        assert!(env.executed_traits.is_empty());
    }

    #[test]
    fn kit_traits_configure_when_no_integration() {
        let mut c = catalog(&[producer]);
        let mut env = Environment::new();
        let mut kit = IntegrationKit::new("ns", "kit");
        kit.spec.traits = serde_json::from_value(json!({"producer": {"enabled": false}})).unwrap();
        env.kit = Some(kit);
        let (_, res) = c.apply(&mut env);
        res.unwrap();
        assert!(env.executed_traits.is_empty());
    }

    #[test]
    fn malformed_trait_config_is_reported() {
        let mut c = catalog(&[producer]);
        let mut env = ready_env();
        env.integration.as_mut().unwrap().spec.traits =
            serde_json::from_value(json!({"producer": {"enabled": "nope"}})).unwrap();
        let (_, res) = c.apply(&mut env);
        assert!(matches!(res, Err(PipelineError::TraitConfig { .. })));
    }

    #[test]
    fn client_is_injected_at_construction() {
        static INJECTED: AtomicBool = AtomicBool::new(false);
        #[derive(Debug)]
        struct Injected(BaseTrait);
        impl Trait for Injected {
            fn id(&self) -> &TraitId { self.0.id() }
            fn order(&self) -> i32 { self.0.order() }
            fn inject_client(&mut self, _client: SharedClient) { INJECTED.store(true, Ordering::SeqCst); }
            fn configure_from(&mut self, _: &Map<String, Json>) -> anyhow::Result<()> { Ok(()) }
            fn configure(&mut self, _: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> { Ok((false, None)) }
            fn apply(&mut self, _: &mut Environment) -> anyhow::Result<()> { Ok(()) }
            fn status_fields(&self) -> Map<String, Json> { Map::new() }
        }
        fn injected() -> Box<dyn Trait> { Box::new(Injected(BaseTrait::new("injected", 1))) }

        let mut reg = Registry::new();
        reg.register(injected).unwrap();
        let _ = Catalog::new(&reg, None);
        assert!(!INJECTED.load(Ordering::SeqCst));
        let _ = Catalog::new(&reg, Some(trellis_kubehub::MockClient::new().shared()));
        assert!(INJECTED.load(Ordering::SeqCst));
    }

    #[test]
    fn every_catalog_gets_fresh_instances() {
        let reg = {
            let mut r = Registry::new();
            r.register(producer).unwrap();
            r
        };
        let mut first = Catalog::new(&reg, None);
        first
            .get_trait_mut("producer")
            .unwrap()
            .configure_from(json!({"note": "set"}).as_object().unwrap())
            .unwrap();
        let second = Catalog::new(&reg, None);
        assert!(second.get_trait("producer").unwrap().status_fields().is_empty());
        assert_eq!(first.get_trait("producer").unwrap().status_fields().get("note"), Some(&json!("set")));
    }
}
