use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use crate::conditions::{AttributeCondition, ConditionTree};

/// Audience conditions of an experiment: a tree of audience ids.
pub type AudienceConditions = ConditionTree<String>;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: bool,
}

/// A contiguous bucket range `[previous end, end_of_range)` assigned to an entity (a variation, or
/// an experiment when allocating a group).
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    pub entity_id: String,
    pub end_of_range: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentStatus {
    Running,
    Paused,
    Launched,
    #[serde(rename = "Not started")]
    NotStarted,
    Archived,
    #[serde(other)]
    Unknown,
}

/// An experiment, or a targeting rule of a rollout (rules share the experiment shape).
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub layer_id: String,
    /// Legacy audience list, evaluated as an implicit "or".
    #[serde(default)]
    pub audience_ids: Vec<String>,
    /// Takes precedence over `audience_ids` when present.
    #[serde(default)]
    pub audience_conditions: Option<AudienceConditions>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    /// Whitelist: user id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    /// Set when the experiment belongs to a group.
    #[serde(skip)]
    pub group_id: Option<String>,
    #[serde(skip)]
    pub group_policy: Option<GroupPolicy>,
}

impl Experiment {
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    /// Audience conditions to evaluate for this experiment, or `None` if everyone is eligible.
    pub fn audience_conditions_or_ids(&self) -> Option<AudienceConditions> {
        match &self.audience_conditions {
            Some(conditions) if conditions.is_empty() => None,
            Some(conditions) => Some(conditions.clone()),
            None if self.audience_ids.is_empty() => None,
            None => Some(ConditionTree::Or(
                self.audience_ids
                    .iter()
                    .cloned()
                    .map(ConditionTree::Leaf)
                    .collect(),
            )),
        }
    }

    /// `true` if the experiment belongs to a mutually exclusive group.
    pub fn is_mutually_exclusive(&self) -> bool {
        self.group_policy == Some(GroupPolicy::Random)
    }

    pub fn variation_by_id(&self, variation_id: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == variation_id)
    }

    pub fn variation_by_key(&self, variation_key: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.key == variation_key)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Mutually exclusive: a user is bucketed into at most one experiment of the group.
    Random,
    Overlapping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
}

/// An ordered list of targeting rules. The last rule is "Everyone Else".
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub rollout_id: Option<String>,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Audience {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "conditions_from_string_or_value")]
    pub conditions: ConditionTree<AttributeCondition>,
}

fn empty_string_as_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Legacy audiences carry conditions as a JSON-encoded string, typed audiences as plain JSON.
fn conditions_from_string_or_value<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ConditionTree<AttributeCondition>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    let value = match value {
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).map_err(serde::de::Error::custom)?
        }
        other => other,
    };
    ConditionTree::from_json(value).map_err(serde::de::Error::custom)
}
