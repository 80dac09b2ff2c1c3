use std::cmp::Ordering;

use semver::Version;

use crate::{
    conditions::{AttributeCondition, MatchType},
    entities::AudienceConditions,
    project_config::ConfigProvider,
    user_context::AttributeValue,
    UserContext,
};

/// Numbers outside of `[-2^53, 2^53]` cannot be compared reliably.
const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0;

const CUSTOM_ATTRIBUTE_CONDITION_TYPE: &str = "custom_attribute";

/// Wording used for audience evaluation reasons, depending on what is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceLogScope {
    Experiment,
    RolloutRule,
}

impl AudienceLogScope {
    fn evaluating(self, logging_key: &str, conditions: &str) -> String {
        match self {
            Self::Experiment => {
                format!("Evaluating audiences for experiment \"{logging_key}\": {conditions}.")
            }
            Self::RolloutRule => {
                format!("Evaluating audiences for rule {logging_key}: {conditions}.")
            }
        }
    }

    fn combined_result(self, logging_key: &str, result: bool) -> String {
        let result = if result { "TRUE" } else { "FALSE" };
        match self {
            Self::Experiment => format!(
                "Audiences for experiment \"{logging_key}\" collectively evaluated to {result}."
            ),
            Self::RolloutRule => {
                format!("Audiences for rule {logging_key} collectively evaluated to {result}.")
            }
        }
    }
}

/// Decides whether a user satisfies an experiment's or rule's audience conditions.
pub trait AudienceEvaluator {
    /// Returns the match result and the reasons explaining it. `None` conditions match everyone.
    fn does_user_meet_conditions(
        &self,
        config: &dyn ConfigProvider,
        conditions: Option<&AudienceConditions>,
        scope: AudienceLogScope,
        logging_key: &str,
        user: &UserContext,
    ) -> (bool, Vec<String>);
}

/// Evaluates audience condition trees against user attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionAudienceEvaluator;

impl AudienceEvaluator for ConditionAudienceEvaluator {
    fn does_user_meet_conditions(
        &self,
        config: &dyn ConfigProvider,
        conditions: Option<&AudienceConditions>,
        scope: AudienceLogScope,
        logging_key: &str,
        user: &UserContext,
    ) -> (bool, Vec<String>) {
        let mut reasons = Vec::new();

        let Some(conditions) = conditions.filter(|c| !c.is_empty()) else {
            let message = scope.combined_result(logging_key, true);
            log::info!(target: "decision", "{message}");
            reasons.push(message);
            return (true, reasons);
        };

        let message = scope.evaluating(
            logging_key,
            &serde_json::to_string(conditions).unwrap_or_default(),
        );
        log::debug!(target: "decision", "{message}");
        reasons.push(message);

        let result = conditions
            .evaluate(&mut |audience_id: &String| evaluate_audience(config, audience_id, user))
            .unwrap_or(false);

        let message = scope.combined_result(logging_key, result);
        log::info!(target: "decision", "{message}");
        reasons.push(message);

        (result, reasons)
    }
}

fn evaluate_audience(
    config: &dyn ConfigProvider,
    audience_id: &str,
    user: &UserContext,
) -> Option<bool> {
    let audience = config.get_audience(audience_id)?;

    log::debug!(target: "decision",
        audience_id,
        conditions:serde = audience.conditions;
        "starting to evaluate audience");

    let result = audience
        .conditions
        .evaluate(&mut |condition: &AttributeCondition| condition.evaluate(user));

    log::debug!(target: "decision",
        audience_id,
        result:? = result;
        "audience evaluated");

    result
}

impl AttributeCondition {
    /// Evaluate the condition against the user's attributes. `None` means unknown.
    pub fn evaluate(&self, user: &UserContext) -> Option<bool> {
        if self.condition_type != CUSTOM_ATTRIBUTE_CONDITION_TYPE {
            log::warn!(target: "decision",
                condition:serde = self;
                "audience condition uses an unknown condition type");
            return None;
        }

        let match_type = self.match_type.unwrap_or(MatchType::Exact);
        if match_type == MatchType::Unknown {
            log::warn!(target: "decision",
                condition:serde = self;
                "audience condition uses an unknown match type");
            return None;
        }

        let attribute = user.attributes().get(&self.name);
        if match_type == MatchType::Exists {
            return Some(!matches!(attribute, None | Some(AttributeValue::Null)));
        }

        let attribute = match attribute {
            None => {
                log::debug!(target: "decision",
                    condition:serde = self,
                    attribute:display = self.name;
                    "audience condition evaluated to UNKNOWN because no value was passed for the user attribute");
                return None;
            }
            Some(AttributeValue::Null) => {
                log::debug!(target: "decision",
                    condition:serde = self,
                    attribute:display = self.name;
                    "audience condition evaluated to UNKNOWN because a null value was passed for the user attribute");
                return None;
            }
            Some(attribute) => attribute,
        };

        match match_type {
            MatchType::Exact => self.exact(attribute),
            MatchType::Substring => {
                let target = self.string_value()?;
                let AttributeValue::String(s) = attribute else {
                    return self.unexpected_type(attribute);
                };
                Some(s.contains(target))
            }
            MatchType::Gt | MatchType::Ge | MatchType::Lt | MatchType::Le => {
                let target = self.number_value()?;
                let AttributeValue::Number(n) = attribute else {
                    return self.unexpected_type(attribute);
                };
                let n = self.finite(*n)?;
                Some(match match_type {
                    MatchType::Gt => n > target,
                    MatchType::Ge => n >= target,
                    MatchType::Lt => n < target,
                    _ => n <= target,
                })
            }
            MatchType::SemverEq
            | MatchType::SemverLt
            | MatchType::SemverLe
            | MatchType::SemverGt
            | MatchType::SemverGe => {
                let target = self.string_value()?;
                let AttributeValue::String(s) = attribute else {
                    return self.unexpected_type(attribute);
                };
                let Some(ordering) = compare_versions(s, target) else {
                    log::warn!(target: "decision",
                        condition:serde = self,
                        version:display = s;
                        "attribute or condition value is not a valid semantic version");
                    return None;
                };
                Some(match match_type {
                    MatchType::SemverEq => ordering == Ordering::Equal,
                    MatchType::SemverLt => ordering == Ordering::Less,
                    MatchType::SemverLe => ordering != Ordering::Greater,
                    MatchType::SemverGt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            // handled above
            MatchType::Exists | MatchType::Unknown => None,
        }
    }

    fn exact(&self, attribute: &AttributeValue) -> Option<bool> {
        match (&self.value, attribute) {
            (serde_json::Value::String(target), AttributeValue::String(s)) => Some(target == s),
            (serde_json::Value::Bool(target), AttributeValue::Boolean(b)) => Some(target == b),
            (serde_json::Value::Number(_), AttributeValue::Number(n)) => {
                let target = self.number_value()?;
                Some(self.finite(*n)? == target)
            }
            (
                serde_json::Value::String(_)
                | serde_json::Value::Bool(_)
                | serde_json::Value::Number(_),
                _,
            ) => self.unexpected_type(attribute),
            _ => self.unsupported(),
        }
    }

    fn string_value(&self) -> Option<&str> {
        match &self.value {
            serde_json::Value::String(s) => Some(s),
            _ => self.unsupported(),
        }
    }

    fn number_value(&self) -> Option<f64> {
        match self.value.as_f64() {
            Some(n) if n.is_finite() && n.abs() <= MAX_SAFE_NUMBER => Some(n),
            _ => self.unsupported(),
        }
    }

    fn finite(&self, n: f64) -> Option<f64> {
        if n.is_finite() && n.abs() <= MAX_SAFE_NUMBER {
            Some(n)
        } else {
            log::warn!(target: "decision",
                condition:serde = self,
                attribute:display = self.name;
                "audience condition evaluated to UNKNOWN because the number value for the user attribute is not in the range [-2^53, +2^53]");
            None
        }
    }

    fn unsupported<T>(&self) -> Option<T> {
        log::warn!(target: "decision",
            condition:serde = self;
            "audience condition has an unsupported condition value");
        None
    }

    fn unexpected_type<T>(&self, attribute: &AttributeValue) -> Option<T> {
        log::warn!(target: "decision",
            condition:serde = self,
            attribute:display = self.name,
            value:serde = attribute;
            "audience condition evaluated to UNKNOWN because a value of unexpected type was passed for the user attribute");
        None
    }
}

struct ParsedVersion {
    version: Version,
    /// Number of numeric components present in the original string (1 to 3).
    components: usize,
}

fn parse_version(s: &str) -> Option<ParsedVersion> {
    if s.is_empty() || s.contains(char::is_whitespace) {
        return None;
    }

    let suffix_start = s.find(|c: char| c == '-' || c == '+').unwrap_or(s.len());
    let (core, suffix) = s.split_at(suffix_start);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }
    // Pre-release and build metadata are only meaningful on a full version.
    if parts.len() < 3 && !suffix.is_empty() {
        return None;
    }

    let mut padded = parts.clone();
    padded.resize(3, "0");
    let version = Version::parse(&format!("{}{}", padded.join("."), suffix)).ok()?;

    Some(ParsedVersion {
        version,
        components: parts.len(),
    })
}

/// Compare `user_version` against `target_version`. A target with fewer than three components
/// only constrains the components it has, so "2.1" equals "2.1.7".
fn compare_versions(user_version: &str, target_version: &str) -> Option<Ordering> {
    let target = parse_version(target_version)?;
    let user = parse_version(user_version)?.version;
    let target_components = target.components;
    let target = target.version;

    let mut ordering = user.major.cmp(&target.major);
    if target_components >= 2 {
        ordering = ordering.then(user.minor.cmp(&target.minor));
    }
    if target_components >= 3 {
        ordering = ordering
            .then(user.patch.cmp(&target.patch))
            .then(user.pre.cmp(&target.pre));
    }
    Some(ordering)
}

#[cfg(test)]
mod tests {
    use std::{cmp::Ordering, collections::HashMap};

    use serde_json::json;

    use super::{compare_versions, AudienceEvaluator, AudienceLogScope, ConditionAudienceEvaluator};
    use crate::{
        conditions::{AttributeCondition, ConditionTree},
        project_config::tests::fixture_config,
        user_context::AttributeValue,
        UserContext,
    };

    fn condition(match_type: &str, value: serde_json::Value) -> AttributeCondition {
        serde_json::from_value(json!({
            "name": "attr",
            "type": "custom_attribute",
            "match": match_type,
            "value": value
        }))
        .unwrap()
    }

    fn user_with(value: impl Into<AttributeValue>) -> UserContext {
        UserContext::new("user", HashMap::from([("attr".to_owned(), value.into())])).unwrap()
    }

    fn user_without() -> UserContext {
        UserContext::new("user", HashMap::new()).unwrap()
    }

    #[test]
    fn exact() {
        assert_eq!(condition("exact", json!("a")).evaluate(&user_with("a")), Some(true));
        assert_eq!(condition("exact", json!("a")).evaluate(&user_with("b")), Some(false));
        assert_eq!(condition("exact", json!(true)).evaluate(&user_with(true)), Some(true));
        assert_eq!(condition("exact", json!(42)).evaluate(&user_with(42.0)), Some(true));
        assert_eq!(condition("exact", json!(42)).evaluate(&user_with(42.5)), Some(false));
        // type mismatch is unknown
        assert_eq!(condition("exact", json!("42")).evaluate(&user_with(42.0)), None);
        assert_eq!(condition("exact", json!(1)).evaluate(&user_with(true)), None);
        // non-finite numbers are unknown
        assert_eq!(condition("exact", json!(1)).evaluate(&user_with(f64::INFINITY)), None);
        assert_eq!(condition("exact", json!(1)).evaluate(&user_with(1e300)), None);
    }

    #[test]
    fn match_defaults_to_exact() {
        let condition: AttributeCondition = serde_json::from_value(json!({
            "name": "attr", "type": "custom_attribute", "value": "a"
        }))
        .unwrap();
        assert_eq!(condition.evaluate(&user_with("a")), Some(true));
    }

    #[test]
    fn missing_or_null_attribute_is_unknown() {
        assert_eq!(condition("exact", json!("a")).evaluate(&user_without()), None);
        assert_eq!(
            condition("exact", json!("a")).evaluate(&user_with(AttributeValue::Null)),
            None
        );
    }

    #[test]
    fn exists() {
        assert_eq!(condition("exists", json!(null)).evaluate(&user_with("a")), Some(true));
        assert_eq!(condition("exists", json!(null)).evaluate(&user_without()), Some(false));
        assert_eq!(
            condition("exists", json!(null)).evaluate(&user_with(AttributeValue::Null)),
            Some(false)
        );
    }

    #[test]
    fn substring() {
        assert_eq!(
            condition("substring", json!("test")).evaluate(&user_with("my test string")),
            Some(true)
        );
        assert_eq!(
            condition("substring", json!("nope")).evaluate(&user_with("my test string")),
            Some(false)
        );
        assert_eq!(condition("substring", json!("1")).evaluate(&user_with(1.0)), None);
    }

    #[test]
    fn numeric_comparisons() {
        assert_eq!(condition("gt", json!(18)).evaluate(&user_with(19.0)), Some(true));
        assert_eq!(condition("gt", json!(18)).evaluate(&user_with(18.0)), Some(false));
        assert_eq!(condition("ge", json!(18)).evaluate(&user_with(18.0)), Some(true));
        assert_eq!(condition("lt", json!(18)).evaluate(&user_with(17.5)), Some(true));
        assert_eq!(condition("le", json!(18)).evaluate(&user_with(18.5)), Some(false));
        assert_eq!(condition("gt", json!("18")).evaluate(&user_with(19.0)), None);
        assert_eq!(condition("gt", json!(18)).evaluate(&user_with("19")), None);
    }

    #[test]
    fn unknown_match_and_type_are_unknown() {
        assert_eq!(condition("regex", json!(".*")).evaluate(&user_with("a")), None);
        let condition: AttributeCondition = serde_json::from_value(json!({
            "name": "attr", "type": "third_party_dimension", "match": "qualified", "value": "a"
        }))
        .unwrap();
        assert_eq!(condition.evaluate(&user_with("a")), None);
    }

    #[test]
    fn semver_comparisons() {
        assert_eq!(
            condition("semver_eq", json!("2.1")).evaluate(&user_with("2.1.7")),
            Some(true)
        );
        assert_eq!(
            condition("semver_eq", json!("2.1.0")).evaluate(&user_with("2.1.7")),
            Some(false)
        );
        assert_eq!(
            condition("semver_gt", json!("1.2.0")).evaluate(&user_with("1.10.0")),
            Some(true)
        );
        assert_eq!(
            condition("semver_lt", json!("1.0.0")).evaluate(&user_with("1.0.0-beta")),
            Some(true)
        );
        assert_eq!(
            condition("semver_le", json!("2")).evaluate(&user_with("2.9.9")),
            Some(true)
        );
        assert_eq!(
            condition("semver_ge", json!("3.0.0")).evaluate(&user_with("2.9.9")),
            Some(false)
        );
        assert_eq!(
            condition("semver_eq", json!("1.0.0")).evaluate(&user_with("not a version")),
            None
        );
        assert_eq!(condition("semver_eq", json!("1.0.0")).evaluate(&user_with(1.0)), None);
    }

    #[test]
    fn version_parsing_edge_cases() {
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Some(Ordering::Equal));
        assert_eq!(compare_versions("1.2", "1.2.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("1.2.3.4", "1.2.3"), None);
        assert_eq!(compare_versions("1..3", "1.2.3"), None);
        assert_eq!(compare_versions("1.2-beta", "1.2.3"), None);
        assert_eq!(compare_versions(" 1.2.3", "1.2.3"), None);
    }

    #[test]
    fn evaluates_audiences_from_config() {
        let config = fixture_config();
        let conditions = ConditionTree::Leaf("4002".to_owned());

        let adult = UserContext::new(
            "user",
            HashMap::from([("age".to_owned(), AttributeValue::Number(30.0))]),
        )
        .unwrap();
        let minor = UserContext::new(
            "user",
            HashMap::from([("age".to_owned(), AttributeValue::Number(12.0))]),
        )
        .unwrap();

        let (matched, reasons) = ConditionAudienceEvaluator.does_user_meet_conditions(
            &config,
            Some(&conditions),
            AudienceLogScope::Experiment,
            "checkout_test",
            &adult,
        );
        assert!(matched);
        assert_eq!(
            reasons,
            vec![
                "Evaluating audiences for experiment \"checkout_test\": \"4002\".",
                "Audiences for experiment \"checkout_test\" collectively evaluated to TRUE."
            ]
        );

        let (matched, _) = ConditionAudienceEvaluator.does_user_meet_conditions(
            &config,
            Some(&conditions),
            AudienceLogScope::Experiment,
            "checkout_test",
            &minor,
        );
        assert!(!matched);
    }

    #[test]
    fn unknown_audience_does_not_match() {
        let config = fixture_config();
        let conditions = ConditionTree::Leaf("no-such-audience".to_owned());
        let (matched, _) = ConditionAudienceEvaluator.does_user_meet_conditions(
            &config,
            Some(&conditions),
            AudienceLogScope::RolloutRule,
            "1",
            &user_without(),
        );
        assert!(!matched);
    }

    #[test]
    fn no_conditions_match_everyone() {
        let config = fixture_config();
        let (matched, reasons) = ConditionAudienceEvaluator.does_user_meet_conditions(
            &config,
            None,
            AudienceLogScope::RolloutRule,
            "Everyone Else",
            &user_without(),
        );
        assert!(matched);
        assert_eq!(
            reasons,
            vec!["Audiences for rule Everyone Else collectively evaluated to TRUE."]
        );
    }
}
