//! Decision engine for feature flags and A/B experiments.
//!
//! # Overview
//!
//! Given a user, a feature flag or experiment, and a [`ProjectConfig`] parsed from a datafile, a
//! [`DecisionService`] deterministically decides which variation, if any, the user receives. Every
//! decision comes with an ordered list of human-readable reasons explaining how it was reached.
//!
//! Decisions are made in a fixed order of precedence:
//! 1. forced variations set through [`DecisionService::set_forced_variation`];
//! 2. the experiment's whitelist;
//! 3. a decision stored earlier by the [`UserProfileService`] ("sticky bucketing");
//! 4. audience conditions, followed by deterministic hash-based bucketing.
//!
//! Features try their experiments first and fall back to their rollout, whose targeting rules
//! are evaluated in order. Forced decisions set on the [`UserContext`] override both.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Decisions themselves never fail: unknown keys,
//! stale stored decisions and profile storage failures are logged and skipped. Errors are only
//! returned when parsing a datafile, creating a user context and sending events.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages, all
//! under the `decision` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into decisions.
//!
//! # Examples
//!
//! ```
//! # use decision_core::{
//! #     Attributes, DecideOptions, DecisionServiceConfig, ProjectConfig, UserContext,
//! # };
//! let config = ProjectConfig::from_datafile(r#"{
//!     "version": "4",
//!     "experiments": [{
//!         "id": "1", "key": "button_color", "status": "Running",
//!         "variations": [{"id": "11", "key": "blue"}],
//!         "trafficAllocation": [{"entityId": "11", "endOfRange": 10000}]
//!     }],
//!     "featureFlags": [{"id": "2", "key": "new_button", "experimentIds": ["1"]}]
//! }"#)?;
//!
//! let service = DecisionServiceConfig::new().to_service();
//! let user = UserContext::new("user-1", Attributes::new())?;
//! let feature = config.get_feature_from_key("new_button").unwrap();
//!
//! let (decision, reasons) =
//!     service.get_variation_for_feature(&config, feature, &user, &DecideOptions::default());
//! assert_eq!(decision.variation.map(|v| v.key.as_str()), Some("blue"));
//! assert!(!reasons.is_empty());
//! # Ok::<(), decision_core::Error>(())
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

mod audience;
mod bucketer;
mod conditions;
mod config;
mod decision_service;
mod entities;
mod error;
mod event_dispatcher;
mod forced_decision;
mod forced_variation;
mod project_config;
mod reasons;
mod user_context;
mod user_profile;

#[cfg(test)]
mod testing;

pub use audience::{AudienceEvaluator, AudienceLogScope, ConditionAudienceEvaluator};
pub use bucketer::{bucket_value, Bucketer, Md5Bucketer, MAX_TRAFFIC_VALUE};
pub use conditions::{AttributeCondition, ConditionTree, MatchType};
pub use config::{DecisionServiceConfig, EventDispatcherConfig};
pub use decision_service::{DecideOptions, Decision, DecisionService, DecisionSource};
pub use entities::{
    Audience, AudienceConditions, Experiment, ExperimentStatus, FeatureFlag, Group, GroupPolicy,
    Rollout, TrafficAllocation, Variation,
};
pub use error::{Error, Result};
pub use event_dispatcher::{
    Event, EventDispatcher, HttpEventDispatcher, HttpVerb, NoOpEventDispatcher,
};
pub use forced_decision::validated_forced_decision;
pub use forced_variation::ForcedVariationStore;
pub use project_config::{ConfigProvider, ProjectConfig};
pub use reasons::DecisionReasons;
pub use user_context::{
    AttributeValue, Attributes, DecisionContext, ForcedDecision, UserContext,
    BUCKETING_ID_ATTRIBUTE,
};
pub use user_profile::{
    Bucket, InMemoryUserProfileService, UserProfile, UserProfileService, UserProfileTracker,
};
