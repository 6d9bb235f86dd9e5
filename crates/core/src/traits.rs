//! Trait configuration/status map as persisted on the custom resources.
//!
//! Shape: `{ "<trait-id>": { ..fields }, "addons": { "<addon-id>": { ..fields } } }`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Key under which addon traits are nested.
pub const ADDONS_KEY: &str = "addons";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Traits(pub Map<String, Json>);

impl Traits {
    pub fn new() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Configuration entry for a trait; addons are looked up under `addons`.
    pub fn get_config(&self, id: &str, addon: bool) -> Option<&Map<String, Json>> {
        let scope = if addon { self.0.get(ADDONS_KEY)?.as_object()? } else { &self.0 };
        scope.get(id)?.as_object()
    }

    /// Place a trait's fields at the top level, or under `addons`.
    pub fn insert(&mut self, id: &str, addon: bool, fields: Map<String, Json>) {
        if addon {
            let addons = self
                .0
                .entry(ADDONS_KEY.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
            if !addons.is_object() {
                *addons = Json::Object(Map::new());
            }
            if let Json::Object(m) = addons {
                m.insert(id.to_string(), Json::Object(fields));
            }
        } else {
            self.0.insert(id.to_string(), Json::Object(fields));
        }
    }

    /// Overlay `other` onto `self`: objects merge key by key, anything else is replaced.
    pub fn merge(&mut self, other: &Traits) {
        for (k, v) in other.0.iter() {
            match self.0.get_mut(k) {
                Some(dst) => merge_json(dst, v),
                None => { self.0.insert(k.clone(), v.clone()); }
            }
        }
    }
}

fn merge_json(dst: &mut Json, src: &Json) {
    match (dst, src) {
        (Json::Object(d), Json::Object(s)) => {
            for (k, sv) in s.iter() {
                match d.get_mut(k) {
                    Some(dv) => merge_json(dv, sv),
                    None => { d.insert(k.clone(), sv.clone()); }
                }
            }
        }
        (d, s) => *d = s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn traits(v: Json) -> Traits { serde_json::from_value(v).unwrap() }

    #[test]
    fn merge_keeps_disjoint_entries() {
        let mut t = traits(json!({"cron": {"schedule": "* * * * *"}, "addons": {"keda": {"enabled": true}}}));
        t.merge(&traits(json!({"service": {"port": 80}, "addons": {"3scale": {"enabled": true}}, "cron": {"fallback": true}})));
        assert_eq!(t.0["cron"], json!({"schedule": "* * * * *", "fallback": true}));
        assert_eq!(t.0["service"], json!({"port": 80}));
        assert_eq!(t.0["addons"], json!({"keda": {"enabled": true}, "3scale": {"enabled": true}}));
    }

    #[test]
    fn merge_replaces_scalars_and_arrays() {
        let mut t = traits(json!({"environment": {"vars": ["A=1", "B=2"], "enabled": false}}));
        t.merge(&traits(json!({"environment": {"vars": ["C=3"], "enabled": true}})));
        assert_eq!(t.0["environment"], json!({"vars": ["C=3"], "enabled": true}));
    }

    #[test]
    fn insert_and_lookup_addons() {
        let mut t = Traits::new();
        t.insert("3scale", true, json!({"enabled": true}).as_object().unwrap().clone());
        t.insert("tracing", true, json!({"auto": true}).as_object().unwrap().clone());
        t.insert("cron", false, Map::new());
        assert!(t.get_config("3scale", true).is_some());
        assert!(t.get_config("3scale", false).is_none());
        assert!(t.get_config("tracing", true).is_some());
        assert!(t.get_config("cron", false).unwrap().is_empty());
    }
}
