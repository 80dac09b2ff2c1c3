use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    entities::{Audience, Experiment, FeatureFlag, Group, Rollout, Variation},
    Error, Result,
};

/// Read-only lookups over a versioned project configuration.
///
/// Lookups return `None` for unknown entities. Implementations are expected to log such misses
/// themselves; the decision engine does not log them again.
pub trait ConfigProvider {
    fn get_experiment_from_key(&self, experiment_key: &str) -> Option<&Experiment>;
    fn get_experiment_from_id(&self, experiment_id: &str) -> Option<&Experiment>;
    fn get_variation_from_key(&self, experiment_key: &str, variation_key: &str)
        -> Option<&Variation>;
    fn get_variation_from_id(&self, experiment_key: &str, variation_id: &str) -> Option<&Variation>;
    fn get_rollout_from_id(&self, rollout_id: &str) -> Option<&Rollout>;
    /// Targeting rules of the rollout, in evaluation order.
    fn get_rollout_experiments<'a>(&'a self, rollout: &'a Rollout) -> Vec<&'a Experiment>;
    /// Variation of any experiment or rollout rule attached to the flag.
    fn get_flag_variation(&self, flag_key: &str, variation_key: &str) -> Option<&Variation>;
    fn get_audience(&self, audience_id: &str) -> Option<&Audience>;
    fn get_group(&self, group_id: &str) -> Option<&Group>;
}

const SUPPORTED_VERSIONS: [&str; 3] = ["2", "3", "4"];

/// Datafile as served by the configuration endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Datafile {
    version: String,
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    revision: String,
    #[serde(default)]
    experiments: Vec<Experiment>,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    rollouts: Vec<Rollout>,
    #[serde(default)]
    audiences: Vec<Audience>,
    #[serde(default)]
    typed_audiences: Vec<Audience>,
}

/// [`ConfigProvider`] built from a JSON datafile.
#[derive(Debug)]
pub struct ProjectConfig {
    project_id: String,
    revision: String,
    experiments: Vec<Experiment>,
    experiment_key_map: HashMap<String, usize>,
    experiment_id_map: HashMap<String, usize>,
    feature_flags: Vec<FeatureFlag>,
    feature_key_map: HashMap<String, usize>,
    rollout_id_map: HashMap<String, Rollout>,
    audience_id_map: HashMap<String, Audience>,
    group_id_map: HashMap<String, Group>,
    /// flag key -> variations of all the flag's experiments and rules, de-duplicated by id.
    flag_variations_map: HashMap<String, Vec<Variation>>,
}

impl ProjectConfig {
    /// Parse a datafile and build lookup tables.
    ///
    /// ```
    /// # use decision_core::ProjectConfig;
    /// let config = ProjectConfig::from_datafile(r#"{"version": "4", "revision": "1"}"#).unwrap();
    /// assert_eq!(config.revision(), "1");
    /// ```
    pub fn from_datafile(datafile: &str) -> Result<ProjectConfig> {
        let datafile: Datafile = serde_json::from_str(datafile)?;

        if !SUPPORTED_VERSIONS.contains(&datafile.version.as_str()) {
            log::error!(target: "decision",
                version:display = datafile.version;
                "unsupported datafile version");
            return Err(Error::UnsupportedDatafileVersion(datafile.version));
        }

        Ok(ProjectConfig::from(datafile))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn get_feature_from_key(&self, feature_key: &str) -> Option<&FeatureFlag> {
        let found = self
            .feature_key_map
            .get(feature_key)
            .map(|&idx| &self.feature_flags[idx]);
        if found.is_none() {
            log::error!(target: "decision", feature_key; "feature is not in datafile");
        }
        found
    }

    pub fn feature_flags(&self) -> &[FeatureFlag] {
        &self.feature_flags
    }
}

impl From<Datafile> for ProjectConfig {
    fn from(datafile: Datafile) -> Self {
        let mut experiments = datafile.experiments;

        // Group experiments live inside the group in the datafile but are looked up like any
        // other experiment.
        let mut group_id_map = HashMap::new();
        for group in datafile.groups {
            for experiment in &group.experiments {
                let mut experiment = experiment.clone();
                experiment.group_id = Some(group.id.clone());
                experiment.group_policy = Some(group.policy);
                experiments.push(experiment);
            }
            group_id_map.insert(group.id.clone(), group);
        }

        let mut experiment_key_map = HashMap::new();
        let mut experiment_id_map = HashMap::new();
        for (idx, experiment) in experiments.iter().enumerate() {
            experiment_key_map.insert(experiment.key.clone(), idx);
            experiment_id_map.insert(experiment.id.clone(), idx);
        }

        // Rollout rules are resolvable by id (and by key for variation lookups) too.
        for rollout in &datafile.rollouts {
            for rule in &rollout.experiments {
                let idx = experiments.len();
                experiments.push(rule.clone());
                experiment_id_map.entry(rule.id.clone()).or_insert(idx);
                experiment_key_map.entry(rule.key.clone()).or_insert(idx);
            }
        }

        let rollout_id_map: HashMap<String, Rollout> = datafile
            .rollouts
            .into_iter()
            .map(|rollout| (rollout.id.clone(), rollout))
            .collect();

        let mut audience_id_map: HashMap<String, Audience> = datafile
            .audiences
            .into_iter()
            .map(|audience| (audience.id.clone(), audience))
            .collect();
        // Typed audiences supersede legacy audiences with the same id.
        audience_id_map.extend(
            datafile
                .typed_audiences
                .into_iter()
                .map(|audience| (audience.id.clone(), audience)),
        );

        let mut feature_key_map = HashMap::new();
        let mut flag_variations_map = HashMap::new();
        for (idx, flag) in datafile.feature_flags.iter().enumerate() {
            feature_key_map.insert(flag.key.clone(), idx);

            let rules = flag
                .rollout_id
                .as_ref()
                .and_then(|id| rollout_id_map.get(id))
                .map(|rollout| rollout.experiments.iter())
                .into_iter()
                .flatten();
            let flag_experiments = flag
                .experiment_ids
                .iter()
                .filter_map(|id| experiment_id_map.get(id).map(|&idx| &experiments[idx]));

            let mut variations: Vec<Variation> = Vec::new();
            for experiment in flag_experiments.chain(rules) {
                for variation in &experiment.variations {
                    if !variations.iter().any(|v| v.id == variation.id) {
                        variations.push(variation.clone());
                    }
                }
            }
            flag_variations_map.insert(flag.key.clone(), variations);
        }

        ProjectConfig {
            project_id: datafile.project_id,
            revision: datafile.revision,
            experiments,
            experiment_key_map,
            experiment_id_map,
            feature_flags: datafile.feature_flags,
            feature_key_map,
            rollout_id_map,
            audience_id_map,
            group_id_map,
            flag_variations_map,
        }
    }
}

impl ConfigProvider for ProjectConfig {
    fn get_experiment_from_key(&self, experiment_key: &str) -> Option<&Experiment> {
        let found = self
            .experiment_key_map
            .get(experiment_key)
            .map(|&idx| &self.experiments[idx]);
        if found.is_none() {
            log::error!(target: "decision", experiment_key; "experiment key is not in datafile");
        }
        found
    }

    fn get_experiment_from_id(&self, experiment_id: &str) -> Option<&Experiment> {
        let found = self
            .experiment_id_map
            .get(experiment_id)
            .map(|&idx| &self.experiments[idx]);
        if found.is_none() {
            log::error!(target: "decision", experiment_id; "experiment id is not in datafile");
        }
        found
    }

    fn get_variation_from_key(
        &self,
        experiment_key: &str,
        variation_key: &str,
    ) -> Option<&Variation> {
        let experiment = self.get_experiment_from_key(experiment_key)?;
        let found = experiment.variation_by_key(variation_key);
        if found.is_none() {
            log::error!(target: "decision",
                experiment_key, variation_key;
                "variation key is not in datafile");
        }
        found
    }

    fn get_variation_from_id(
        &self,
        experiment_key: &str,
        variation_id: &str,
    ) -> Option<&Variation> {
        let experiment = self.get_experiment_from_key(experiment_key)?;
        let found = experiment.variation_by_id(variation_id);
        if found.is_none() {
            log::error!(target: "decision",
                experiment_key, variation_id;
                "variation id is not in datafile");
        }
        found
    }

    fn get_rollout_from_id(&self, rollout_id: &str) -> Option<&Rollout> {
        let found = self.rollout_id_map.get(rollout_id);
        if found.is_none() {
            log::error!(target: "decision", rollout_id; "rollout is not in datafile");
        }
        found
    }

    fn get_rollout_experiments<'a>(&'a self, rollout: &'a Rollout) -> Vec<&'a Experiment> {
        rollout.experiments.iter().collect()
    }

    fn get_flag_variation(&self, flag_key: &str, variation_key: &str) -> Option<&Variation> {
        self.flag_variations_map
            .get(flag_key)?
            .iter()
            .find(|v| v.key == variation_key)
    }

    fn get_audience(&self, audience_id: &str) -> Option<&Audience> {
        let found = self.audience_id_map.get(audience_id);
        if found.is_none() {
            log::error!(target: "decision", audience_id; "audience is not in datafile");
        }
        found
    }

    fn get_group(&self, group_id: &str) -> Option<&Group> {
        let found = self.group_id_map.get(group_id);
        if found.is_none() {
            log::error!(target: "decision", group_id; "group is not in datafile");
        }
        found
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use super::{ConfigProvider, ProjectConfig};
    use crate::Error;

    pub(crate) fn fixture_config() -> ProjectConfig {
        let datafile = fs::read_to_string("tests/data/datafile.json")
            .expect("Failed to open tests/data/datafile.json");
        ProjectConfig::from_datafile(&datafile).unwrap()
    }

    #[test]
    fn parses_fixture_datafile() {
        let config = fixture_config();
        assert_eq!(config.project_id(), "111001");
        assert_eq!(config.revision(), "42");
        assert_eq!(config.feature_flags().len(), 5);
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = ProjectConfig::from_datafile(r#"{"version": "1"}"#).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDatafileVersion(v) if v == "1"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = ProjectConfig::from_datafile("{").unwrap_err();
        assert!(matches!(err, Error::DatafileParseError(_)));
    }

    #[test]
    fn experiment_lookups() {
        let config = fixture_config();
        let by_key = config.get_experiment_from_key("checkout_test").unwrap();
        let by_id = config.get_experiment_from_id("1001").unwrap();
        assert_eq!(by_key.id, by_id.id);
        assert!(config.get_experiment_from_key("missing").is_none());
    }

    #[test]
    fn group_experiments_are_indexed() {
        let config = fixture_config();
        let exp = config.get_experiment_from_key("group_exp_1").unwrap();
        assert_eq!(exp.group_id.as_deref(), Some("5001"));
        assert!(exp.is_mutually_exclusive());
        assert!(config.get_group("5001").is_some());
    }

    #[test]
    fn rollout_rules_resolve_by_id() {
        let config = fixture_config();
        let rule = config.get_experiment_from_id("3001").unwrap();
        assert_eq!(rule.key, "beta_users_rule");
        let rollout = config.get_rollout_from_id("2001").unwrap();
        assert_eq!(config.get_rollout_experiments(rollout).len(), 2);
    }

    #[test]
    fn variation_lookups() {
        let config = fixture_config();
        assert_eq!(
            config
                .get_variation_from_key("checkout_test", "treatment")
                .map(|v| v.id.as_str()),
            Some("10012")
        );
        assert_eq!(
            config
                .get_variation_from_id("checkout_test", "10011")
                .map(|v| v.key.as_str()),
            Some("control")
        );
        assert!(config
            .get_variation_from_key("checkout_test", "missing")
            .is_none());
    }

    #[test]
    fn flag_variations_include_rollout_rules() {
        let config = fixture_config();
        assert!(config.get_flag_variation("checkout_flow", "treatment").is_some());
        assert!(config.get_flag_variation("checkout_flow", "rollout_on").is_some());
        assert!(config.get_flag_variation("checkout_flow", "missing").is_none());
        assert!(config.get_flag_variation("missing_flag", "treatment").is_none());
    }

    #[test]
    fn typed_audiences_override_legacy() {
        let config = fixture_config();
        assert_eq!(config.get_audience("4002").unwrap().name, "typed adults");
    }
}
