//! Container environment variables every integration gets.

use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value as Json};

use super::decode;
use crate::environment::Environment;
use crate::error::ConfigureError;
use crate::protocol::{BaseTrait, Trait, TraitCondition, TraitId};

pub const ENV_INTEGRATION_NAME: &str = "INTEGRATION_NAME";
pub const ENV_INTEGRATION_NAMESPACE: &str = "INTEGRATION_NAMESPACE";
pub const ENV_OPERATOR_ID: &str = "OPERATOR_ID";

static VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").expect("valid variable pattern"));

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Config {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EnvironmentTrait {
    pub base: BaseTrait,
    /// `NAME=value` entries, applied after the built-in variables.
    pub vars: Vec<String>,
    parsed: Vec<(String, String)>,
}

impl EnvironmentTrait {
    pub fn new() -> Self { Self { base: BaseTrait::new("environment", 800), vars: Vec::new(), parsed: Vec::new() } }

    fn parse_vars(&mut self) -> anyhow::Result<()> {
        self.parsed.clear();
        for var in &self.vars {
            let Some(caps) = VAR.captures(var) else {
                bail!("invalid environment variable {:?}, expected NAME=value", var);
            };
            self.parsed.push((caps[1].to_string(), caps[2].to_string()));
        }
        Ok(())
    }
}

impl Default for EnvironmentTrait {
    fn default() -> Self { Self::new() }
}

impl Trait for EnvironmentTrait {
    fn id(&self) -> &TraitId { self.base.id() }
    fn order(&self) -> i32 { self.base.order() }
    fn requires_integration_platform(&self) -> bool { false }

    fn configure_from(&mut self, config: &Map<String, Json>) -> anyhow::Result<()> {
        self.base.load(config)?;
        let c: Config = decode(config)?;
        self.vars = c.vars;
        Ok(())
    }

    fn configure(&mut self, _env: &Environment) -> Result<(bool, Option<TraitCondition>), ConfigureError> {
        if self.base.explicitly_disabled() {
            return Ok((false, Some(TraitCondition::user_disabled(self.id()))));
        }
        self.parse_vars()?;
        Ok((true, None))
    }

    fn apply(&mut self, env: &mut Environment) -> anyhow::Result<()> {
        if let Some(it) = env.integration.as_ref() {
            let (name, namespace) = (it.name().to_string(), it.namespace().to_string());
            env.env_vars.set(ENV_INTEGRATION_NAME, name);
            env.env_vars.set(ENV_INTEGRATION_NAMESPACE, namespace);
        }
        let operator_id = env.operator_id.clone();
        env.env_vars.set(ENV_OPERATOR_ID, operator_id);
        for (k, v) in &self.parsed {
            env.env_vars.set(k.as_str(), v.as_str());
        }
        Ok(())
    }

    fn status_fields(&self) -> Map<String, Json> {
        let mut m = self.base.fields();
        if !self.vars.is_empty() {
            m.insert("vars".to_string(), Json::from(self.vars.clone()));
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_core::Integration;

    #[test]
    fn sets_builtin_and_user_vars() {
        let mut env = Environment::new();
        env.operator_id = "trellis".into();
        env.integration = Some(Integration::new("ns", "hello"));
        let mut t = EnvironmentTrait::new();
        t.configure_from(json!({"vars": ["GREETING=hi there", "EMPTY=", "INTEGRATION_NAME=override"]}).as_object().unwrap())
            .unwrap();
        assert_eq!(t.configure(&env).unwrap(), (true, None));
        t.apply(&mut env).unwrap();

        let vars: Vec<(&str, &str)> = env.env_vars.iter().collect();
        assert_eq!(
            vars,
            vec![
                ("INTEGRATION_NAME", "override"),
                ("INTEGRATION_NAMESPACE", "ns"),
                ("OPERATOR_ID", "trellis"),
                ("GREETING", "hi there"),
                ("EMPTY", ""),
            ]
        );
        assert_eq!(t.status_fields().get("vars").map(|v| v.as_array().unwrap().len()), Some(3));
    }

    #[test]
    fn rejects_malformed_var() {
        let mut t = EnvironmentTrait::new();
        t.configure_from(json!({"vars": ["1BAD=x"]}).as_object().unwrap()).unwrap();
        assert!(t.configure(&Environment::new()).is_err());
        t.configure_from(json!({"vars": ["NOVALUE"]}).as_object().unwrap()).unwrap();
        assert!(t.configure(&Environment::new()).is_err());
    }

    #[test]
    fn multiline_values_are_kept() {
        let mut env = Environment::new();
        let mut t = EnvironmentTrait::new();
        t.configure_from(json!({"vars": ["BANNER=line1\nline2"]}).as_object().unwrap()).unwrap();
        assert_eq!(t.configure(&env).unwrap(), (true, None));
        t.apply(&mut env).unwrap();
        assert_eq!(env.env_vars.get("BANNER"), Some("line1\nline2"));
    }

    #[test]
    fn disabled_reports_condition() {
        let mut t = EnvironmentTrait::new();
        t.configure_from(json!({"enabled": false}).as_object().unwrap()).unwrap();
        let (ok, cond) = t.configure(&Environment::new()).unwrap();
        assert!(!ok);
        assert!(cond.is_some());
    }
}
