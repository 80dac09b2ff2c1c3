use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reserved attribute that overrides the user id as the bucketing input.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$bucketing_id";

pub type Attributes = HashMap<String, AttributeValue>;

#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// Scope of a forced decision: a flag, optionally narrowed to one of its rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionContext {
    pub flag_key: String,
    pub rule_key: Option<String>,
}

impl DecisionContext {
    /// Context covering the whole flag.
    pub fn flag(flag_key: impl Into<String>) -> Self {
        DecisionContext {
            flag_key: flag_key.into(),
            rule_key: None,
        }
    }

    /// Context covering one rule (experiment or rollout rule) of a flag.
    pub fn rule(flag_key: impl Into<String>, rule_key: impl Into<String>) -> Self {
        DecisionContext {
            flag_key: flag_key.into(),
            rule_key: Some(rule_key.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedDecision {
    pub variation_key: String,
}

impl ForcedDecision {
    pub fn new(variation_key: impl Into<String>) -> Self {
        ForcedDecision {
            variation_key: variation_key.into(),
        }
    }
}

/// A user being evaluated: id, attributes and per-context forced decisions.
#[derive(Debug, Clone)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    forced_decisions: HashMap<DecisionContext, ForcedDecision>,
}

impl UserContext {
    /// ```
    /// # use decision_core::{Attributes, UserContext};
    /// let attributes = Attributes::from([("age".to_owned(), 30.0.into())]);
    /// let user = UserContext::new("user-1", attributes).unwrap();
    /// assert_eq!(user.user_id(), "user-1");
    /// assert!(UserContext::new("", Default::default()).is_err());
    /// ```
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> Result<UserContext> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(Error::InvalidUserId);
        }
        Ok(UserContext {
            user_id,
            attributes,
            forced_decisions: HashMap::new(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn set_forced_decision(&mut self, context: DecisionContext, decision: ForcedDecision) {
        self.forced_decisions.insert(context, decision);
    }

    pub fn get_forced_decision(&self, context: &DecisionContext) -> Option<&ForcedDecision> {
        self.forced_decisions.get(context)
    }

    /// Returns `true` if a forced decision existed for the context.
    pub fn remove_forced_decision(&mut self, context: &DecisionContext) -> bool {
        self.forced_decisions.remove(context).is_some()
    }

    pub fn remove_all_forced_decisions(&mut self) {
        self.forced_decisions.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{AttributeValue, DecisionContext, ForcedDecision, UserContext};
    use crate::Error;

    #[test]
    fn rejects_empty_user_id() {
        assert!(matches!(
            UserContext::new("", HashMap::new()),
            Err(Error::InvalidUserId)
        ));
    }

    #[test]
    fn forced_decisions_are_scoped_by_rule() {
        let mut user = UserContext::new("u", HashMap::new()).unwrap();
        user.set_forced_decision(DecisionContext::flag("f"), ForcedDecision::new("a"));
        user.set_forced_decision(DecisionContext::rule("f", "r"), ForcedDecision::new("b"));

        assert_eq!(
            user.get_forced_decision(&DecisionContext::flag("f")),
            Some(&ForcedDecision::new("a"))
        );
        assert_eq!(
            user.get_forced_decision(&DecisionContext::rule("f", "r")),
            Some(&ForcedDecision::new("b"))
        );
        assert_eq!(
            user.get_forced_decision(&DecisionContext::rule("f", "other")),
            None
        );

        assert!(user.remove_forced_decision(&DecisionContext::flag("f")));
        assert!(!user.remove_forced_decision(&DecisionContext::flag("f")));

        user.remove_all_forced_decisions();
        assert_eq!(
            user.get_forced_decision(&DecisionContext::rule("f", "r")),
            None
        );
    }

    #[test]
    fn attribute_conversions() {
        let mut user = UserContext::new("u", HashMap::new()).unwrap();
        user.set_attribute("name", "alice");
        user.set_attribute("age", 30_i64);
        user.set_attribute("premium", true);

        assert_eq!(
            user.attributes().get("name"),
            Some(&AttributeValue::String("alice".to_owned()))
        );
        assert_eq!(
            user.attributes().get("age"),
            Some(&AttributeValue::Number(30.0))
        );
        assert_eq!(
            user.attributes().get("premium"),
            Some(&AttributeValue::Boolean(true))
        );
    }
}
