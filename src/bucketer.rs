use crate::{
    entities::{Experiment, TrafficAllocation, Variation},
    project_config::ConfigProvider,
};

/// Upper bound (exclusive) of bucket values.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

/// Deterministically maps a user to a variation of an experiment.
pub trait Bucketer {
    /// Returns the variation the bucketing id falls into, if any, and the reasons explaining it.
    fn bucket<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        experiment: &'a Experiment,
        user_id: &str,
        bucketing_id: &str,
    ) -> (Option<&'a Variation>, Vec<String>);
}

/// Bucket value in `[0, MAX_TRAFFIC_VALUE)` derived from the first four bytes of the MD5 digest.
pub fn bucket_value(bucketing_key: &str) -> u32 {
    let hash = md5::compute(bucketing_key);
    let int_from_hash: u32 = (hash[0] as u32) << 24
        | (hash[1] as u32) << 16
        | (hash[2] as u32) << 8
        | (hash[3] as u32);
    int_from_hash % MAX_TRAFFIC_VALUE
}

/// MD5-based bucketer with support for mutually exclusive groups.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Bucketer;

impl Md5Bucketer {
    /// Entity id of the traffic range `bucketing_id` falls into under `parent_id`, or `None` if
    /// it falls into an unallocated range.
    fn find_bucket<'a>(
        &self,
        bucketing_id: &str,
        parent_id: &str,
        traffic_allocation: &'a [TrafficAllocation],
    ) -> Option<&'a str> {
        let bucket = bucket_value(&format!("{bucketing_id}{parent_id}"));
        log::debug!(target: "decision", bucket, bucketing_id; "assigned bucket to user");

        traffic_allocation
            .iter()
            .find(|range| bucket < range.end_of_range)
            .map(|range| range.entity_id.as_str())
            .filter(|entity_id| !entity_id.is_empty())
    }
}

impl Bucketer for Md5Bucketer {
    fn bucket<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        experiment: &'a Experiment,
        user_id: &str,
        bucketing_id: &str,
    ) -> (Option<&'a Variation>, Vec<String>) {
        let mut reasons = Vec::new();

        if experiment.is_mutually_exclusive() {
            let Some(group) = experiment
                .group_id
                .as_deref()
                .and_then(|group_id| config.get_group(group_id))
            else {
                return (None, reasons);
            };

            match self.find_bucket(bucketing_id, &group.id, &group.traffic_allocation) {
                None => {
                    let message = format!("User \"{user_id}\" is in no experiment.");
                    log::info!(target: "decision", "{message}");
                    reasons.push(message);
                    return (None, reasons);
                }
                Some(experiment_id) if experiment_id != experiment.id => {
                    let message = format!(
                        "User \"{user_id}\" is not in experiment \"{}\" of group {}.",
                        experiment.key, group.id
                    );
                    log::info!(target: "decision", "{message}");
                    reasons.push(message);
                    return (None, reasons);
                }
                Some(_) => {
                    let message = format!(
                        "User \"{user_id}\" is in experiment {} of group {}.",
                        experiment.key, group.id
                    );
                    log::info!(target: "decision", "{message}");
                    reasons.push(message);
                }
            }
        }

        let variation = self
            .find_bucket(bucketing_id, &experiment.id, &experiment.traffic_allocation)
            .and_then(|variation_id| experiment.variation_by_id(variation_id));

        if variation.is_none() {
            let message = "Bucketed into an empty traffic range. Returning nil.".to_owned();
            log::info!(target: "decision", "{message}");
            reasons.push(message);
        }

        (variation, reasons)
    }
}
