//! Materializes a periodic integration as a Kubernetes CronJob.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use trellis_core::{TraitProfile, INTEGRATION_LABEL};

use super::decode;
use crate::environment::Environment;
use crate::error::ConfigureError;
use crate::protocol::{put, BaseTrait, Trait, TraitCondition, TraitId};

pub const CONCURRENCY_POLICIES: &[&str] = &["Allow", "Forbid", "Replace"];
const DEFAULT_CONCURRENCY_POLICY: &str = "Forbid";
const DEFAULT_ACTIVE_DEADLINE_SECONDS: i64 = 60;
const DEFAULT_BACKOFF_LIMIT: i32 = 2;

pub const MAX_IDLE_PROPERTY: &str = "camel.main.duration-max-idle-seconds";
pub const OVERRIDABLE_COMPONENTS_PROPERTY: &str = "loader.interceptor.cron.overridable-components";

static SCHEDULE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*|\?|[0-9A-Za-z]+(-[0-9A-Za-z]+)?)(/[0-9]+)?(,(\*|[0-9A-Za-z]+(-[0-9A-Za-z]+)?)(/[0-9]+)?)*$")
        .expect("valid schedule pattern")
});

/// Five whitespace separated fields, no seconds.
fn validate_schedule(schedule: &str) -> anyhow::Result<()> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    if fields.len() != 5 {
        bail!("invalid cron schedule {:?}: expected 5 fields, got {}", schedule, fields.len());
    }
    if let Some(bad) = fields.iter().find(|f| !SCHEDULE_FIELD.is_match(f)) {
        bail!("invalid cron schedule {:?}: bad field {:?}", schedule, bad);
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    schedule: Option<String>,
    time_zone: Option<String>,
    components: Option<String>,
    fallback: Option<bool>,
    concurrency_policy: Option<String>,
    auto: Option<bool>,
    starting_deadline_seconds: Option<i64>,
    active_deadline_seconds: Option<i64>,
    backoff_limit: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct CronTrait {
    pub base: BaseTrait,
    pub schedule: Option<String>,
    pub time_zone: Option<String>,
    pub components: Option<String>,
    pub fallback: Option<bool>,
    pub concurrency_policy: Option<String>,
    pub auto: Option<bool>,
    pub starting_deadline_seconds: Option<i64>,
    pub active_deadline_seconds: Option<i64>,
    pub backoff_limit: Option<i32>,
}

impl CronTrait {
    pub fn new() -> Self {
        Self {
            base: BaseTrait::new("cron", 1000),
            schedule: None,
            time_zone: None,
            components: None,
            fallback: None,
            concurrency_policy: None,
            auto: None,
            starting_deadline_seconds: None,
            active_deadline_seconds: None,
            backoff_limit: None,
        }
    }

    fn cron_job(&self, env: &Environment, name: &str, namespace: &str, schedule: &str) -> CronJob {
        let labels: BTreeMap<String, String> = [(INTEGRATION_LABEL.to_string(), name.to_string())].into();
        let container = Container {
            name: "integration".to_string(),
            env: Some(env.env_vars.to_env_vars()).filter(|v| !v.is_empty()),
            ..Default::default()
        };
        let pod = PodTemplateSpec {
            metadata: Some(ObjectMeta { labels: Some(labels.clone()), ..Default::default() }),
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
        };
        CronJob {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(CronJobSpec {
                schedule: schedule.to_string(),
                time_zone: self.time_zone.clone(),
                concurrency_policy: self.concurrency_policy.clone(),
                starting_deadline_seconds: self.starting_deadline_seconds,
                job_template: JobTemplateSpec {
                    metadata: None,
                    spec: Some(JobSpec {
                        active_deadline_seconds: self.active_deadline_seconds,
                        backoff_limit: self.backoff_limit,
                        template: pod,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn validate(&mut self) -> anyhow::Result<()> {
        let policy = self.concurrency_policy.get_or_insert_with(|| DEFAULT_CONCURRENCY_POLICY.to_string());
        if !CONCURRENCY_POLICIES.contains(&policy.as_str()) {
            bail!("unsupported concurrency policy {:?}, expected one of {}", policy, CONCURRENCY_POLICIES.join(", "));
        }
        let schedule = self.schedule.as_deref().ok_or_else(|| anyhow!("a schedule is required"))?;
        validate_schedule(schedule)
    }
}

impl Default for CronTrait {
    fn default() -> Self { Self::new() }
}

impl Trait for CronTrait {
    fn id(&self) -> &TraitId { self.base.id() }
    fn order(&self) -> i32 { self.base.order() }

    fn is_allowed_in_profile(&self, profile: TraitProfile) -> bool {
        matches!(profile, TraitProfile::Kubernetes | TraitProfile::OpenShift)
    }

    fn configure_from(&mut self, config: &Map<String, Json>) -> anyhow::Result<()> {
        self.base.load(config)?;
        let c: Config = decode(config)?;
        self.schedule = c.schedule;
        self.time_zone = c.time_zone;
        self.components = c.components;
        self.fallback = c.fallback;
        self.concurrency_policy = c.concurrency_policy;
        self.auto = c.auto;
        self.starting_deadline_seconds = c.starting_deadline_seconds;
        self.active_deadline_seconds = c.active_deadline_seconds;
        self.backoff_limit = c.backoff_limit;
        Ok(())
    }

    fn configure(&mut self, env: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> {
        if self.base.explicitly_disabled() {
            return Ok((false, Some(TraitCondition::user_disabled(self.id()))));
        }
        if !self.base.explicitly_enabled() && self.schedule.is_none() {
            return Ok((false, None));
        }
        if env.integration.is_none() {
            return Ok((false, None));
        }
        if self.fallback == Some(true) {
            let notice = TraitCondition::info(self.id(), "cron trait is in fallback mode, the default scheduler is used");
            return Ok((false, Some(notice)));
        }

        if let Err(cause) = self.validate() {
            let notice = TraitCondition::rejected(self.id(), format!("cron trait rejected: {:#}", cause));
            return Err(ConfigureError::from(cause).with_condition(notice));
        }

        self.active_deadline_seconds.get_or_insert(DEFAULT_ACTIVE_DEADLINE_SECONDS);
        self.backoff_limit.get_or_insert(DEFAULT_BACKOFF_LIMIT);
        Ok((true, None))
    }

    fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()> {
        let Some(it) = env.integration.as_ref() else {
            return Ok(());
        };
        let (name, namespace) = (it.name().to_string(), it.namespace().to_string());
        let schedule = self.schedule.clone().ok_or_else(|| anyhow!("a schedule is required"))?;

        env.application_properties.set(MAX_IDLE_PROPERTY, "5");
        if let Some(components) = self.components.as_deref().filter(|c| !c.is_empty()) {
            env.application_properties.set(OVERRIDABLE_COMPONENTS_PROPERTY, components);
        }
        let job = self.cron_job(env, &name, &namespace, &schedule);
        env.resources.add_typed(&job)
    }

    fn status_fields(&self) -> Map<String, Json> {
        let mut m = self.base.fields();
        put(&mut m, "schedule", self.schedule.clone());
        put(&mut m, "timeZone", self.time_zone.clone());
        put(&mut m, "components", self.components.clone());
        put(&mut m, "fallback", self.fallback);
        put(&mut m, "concurrencyPolicy", self.concurrency_policy.clone());
        put(&mut m, "auto", self.auto);
        put(&mut m, "startingDeadlineSeconds", self.starting_deadline_seconds);
        put(&mut m, "activeDeadlineSeconds", self.active_deadline_seconds);
        put(&mut m, "backoffLimit", self.backoff_limit);
        m
    }
}
