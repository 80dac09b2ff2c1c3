use std::collections::HashMap;

use crate::{entities::Variation, project_config::ConfigProvider};

/// Explicit user -> experiment -> variation overrides set at runtime.
///
/// Entries are keyed by experiment and variation ids, so they survive key renames but are
/// re-validated against the current configuration on every read.
#[derive(Debug, Default, Clone)]
pub struct ForcedVariationStore {
    /// user id -> experiment id -> variation id
    map: HashMap<String, HashMap<String, String>>,
}

impl ForcedVariationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `user_id` into `variation_key` of `experiment_key`, or clear the override when
    /// `variation_key` is `None`.
    ///
    /// Returns `false` (and changes nothing) if the experiment or variation is unknown.
    pub fn set(
        &mut self,
        config: &dyn ConfigProvider,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> bool {
        let Some(experiment) = config.get_experiment_from_key(experiment_key) else {
            return false;
        };
        let experiment_id = experiment.id.as_str();

        let Some(variation_key) = variation_key else {
            match self.map.get_mut(user_id) {
                Some(experiments) => {
                    if experiments.remove(experiment_id).is_some() {
                        log::debug!(target: "decision",
                            user_id,
                            experiment_key;
                            "variation mapped to experiment has been removed for user");
                    } else {
                        log::debug!(target: "decision",
                            user_id,
                            experiment_key;
                            "nothing to remove, no variation mapped to experiment for user");
                    }
                }
                None => {
                    log::debug!(target: "decision",
                        user_id;
                        "nothing to remove, user does not exist in the forced variation map");
                }
            }
            return true;
        };

        if variation_key.is_empty() {
            log::debug!(target: "decision", experiment_key; "variation key is invalid");
            return false;
        }

        let Some(variation) = config.get_variation_from_key(experiment_key, variation_key) else {
            return false;
        };

        self.map
            .entry(user_id.to_owned())
            .or_default()
            .insert(experiment_id.to_owned(), variation.id.clone());

        log::debug!(target: "decision",
            user_id,
            experiment_id,
            variation_id = variation.id.as_str();
            "set variation for experiment and user in the forced variation map");
        true
    }

    /// Look up the forced variation of `user_id` for `experiment_key`.
    pub fn get<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        experiment_key: &str,
        user_id: &str,
    ) -> (Option<&'a Variation>, Vec<String>) {
        let mut reasons = Vec::new();

        let Some(experiments) = self.map.get(user_id) else {
            log::debug!(target: "decision", user_id; "user is not in the forced variation map");
            return (None, reasons);
        };

        let Some(experiment) = config.get_experiment_from_key(experiment_key) else {
            return (None, reasons);
        };

        let Some(variation_id) = experiments.get(&experiment.id) else {
            log::debug!(target: "decision",
                user_id,
                experiment_key;
                "no variation mapped to experiment in the forced variation map");
            return (None, reasons);
        };

        // The configuration may have changed since the override was set.
        let Some(variation) = config.get_variation_from_id(experiment_key, variation_id) else {
            return (None, reasons);
        };

        let message = format!(
            "Variation \"{}\" is mapped to experiment \"{experiment_key}\" and user \"{user_id}\" in the forced variation map",
            variation.key
        );
        log::debug!(target: "decision", "{message}");
        reasons.push(message);
        (Some(variation), reasons)
    }

    #[cfg(test)]
    fn contains_user(&self, user_id: &str) -> bool {
        self.map.get(user_id).is_some_and(|e| !e.is_empty())
    }
}
