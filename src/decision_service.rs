use log::Level;

use crate::{
    audience::{AudienceEvaluator, AudienceLogScope},
    bucketer::Bucketer,
    entities::{Experiment, FeatureFlag, Variation},
    forced_decision::validated_forced_decision,
    forced_variation::ForcedVariationStore,
    project_config::ConfigProvider,
    reasons::DecisionReasons,
    user_context::{AttributeValue, DecisionContext, BUCKETING_ID_ATTRIBUTE},
    user_profile::{UserProfile, UserProfileService, UserProfileTracker},
    DecisionServiceConfig, UserContext,
};

/// Where a [`Decision`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Experiment,
    FeatureTest,
    Rollout,
}

/// Outcome of evaluating one feature for one user.
///
/// `Decision { experiment: None, variation: None, source: Rollout }` means the user was not
/// bucketed anywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision<'a> {
    pub experiment: Option<&'a Experiment>,
    pub variation: Option<&'a Variation>,
    pub source: DecisionSource,
}

impl<'a> Decision<'a> {
    fn rollout(experiment: Option<&'a Experiment>, variation: Option<&'a Variation>) -> Self {
        Decision {
            experiment,
            variation,
            source: DecisionSource::Rollout,
        }
    }

    fn none() -> Self {
        Decision::rollout(None, None)
    }
}

/// Per-call decision options.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecideOptions {
    /// Neither read nor write sticky bucketing decisions.
    pub ignore_user_profile_service: bool,
}

/// Inputs shared by the override lookups of one experiment decision.
struct OverrideLookup<'a, 'b> {
    config: &'a dyn ConfigProvider,
    experiment: &'a Experiment,
    user: &'b UserContext,
    profile: Option<&'b UserProfile>,
}

/// One override mechanism. Returns the overriding variation, if any, recording why.
type OverrideResolver = for<'a, 'b, 's, 'r> fn(
    &'s DecisionService,
    &'r OverrideLookup<'a, 'b>,
    &'r mut DecisionReasons,
) -> Option<&'a Variation>;

/// Overrides consulted before audience evaluation, highest priority first.
const OVERRIDE_RESOLVERS: [OverrideResolver; 3] = [
    DecisionService::forced_variation_override as OverrideResolver,
    DecisionService::whitelisted_override as OverrideResolver,
    DecisionService::stored_variation_override as OverrideResolver,
];

/// Decides which variation of an experiment, feature test or rollout a user gets.
///
/// A `DecisionService` is created from [`DecisionServiceConfig`]. It owns the forced-variation
/// store; the project configuration is passed on every call, so a single service keeps working
/// across configuration updates.
///
/// # Examples
/// ```
/// # use decision_core::{DecisionServiceConfig, DecideOptions, ProjectConfig, UserContext};
/// let config = ProjectConfig::from_datafile(r#"{"version": "4"}"#).unwrap();
/// let service = DecisionServiceConfig::new().to_service();
/// let user = UserContext::new("user-1", Default::default()).unwrap();
///
/// let decisions =
///     service.get_variations_for_feature_list(&config, &[], &user, &DecideOptions::default());
/// assert!(decisions.is_empty());
/// ```
pub struct DecisionService {
    bucketer: Box<dyn Bucketer + Send + Sync>,
    audience_evaluator: Box<dyn AudienceEvaluator + Send + Sync>,
    user_profile_service: Option<Box<dyn UserProfileService + Send + Sync>>,
    forced_variations: ForcedVariationStore,
}

impl DecisionService {
    /// Create a new `DecisionService` using the specified configuration.
    pub fn new(config: DecisionServiceConfig) -> Self {
        DecisionService {
            bucketer: config.bucketer,
            audience_evaluator: config.audience_evaluator,
            user_profile_service: config.user_profile_service,
            forced_variations: ForcedVariationStore::new(),
        }
    }

    /// The `$bucketing_id` attribute if it is a string, the user id otherwise.
    fn get_bucketing_id(&self, user: &UserContext, reasons: &mut DecisionReasons) -> String {
        match user.attributes().get(BUCKETING_ID_ATTRIBUTE) {
            Some(AttributeValue::String(bucketing_id)) => bucketing_id.clone(),
            Some(AttributeValue::Null) | None => user.user_id().to_owned(),
            Some(_) => {
                reasons.record(
                    Level::Warn,
                    "Bucketing ID attribute is not a string. Defaulted to user_id.",
                );
                user.user_id().to_owned()
            }
        }
    }

    /// Force `user_id` into a variation of `experiment_key`, or clear the override with `None`.
    ///
    /// Returns `false` if the experiment or the variation is unknown.
    pub fn set_forced_variation(
        &mut self,
        config: &dyn ConfigProvider,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> bool {
        self.forced_variations
            .set(config, experiment_key, user_id, variation_key)
    }

    pub fn get_forced_variation<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        experiment_key: &str,
        user_id: &str,
    ) -> (Option<&'a Variation>, Vec<String>) {
        self.forced_variations.get(config, experiment_key, user_id)
    }

    fn forced_variation_override<'a>(
        &self,
        lookup: &OverrideLookup<'a, '_>,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let (variation, forced_reasons) = self.forced_variations.get(
            lookup.config,
            &lookup.experiment.key,
            lookup.user.user_id(),
        );
        reasons.extend(forced_reasons);
        variation
    }

    fn whitelisted_override<'a>(
        &self,
        lookup: &OverrideLookup<'a, '_>,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let user_id = lookup.user.user_id();
        let variation_key = lookup.experiment.forced_variations.get(user_id)?;
        let variation = lookup
            .config
            .get_variation_from_key(&lookup.experiment.key, variation_key)?;

        reasons.record(
            Level::Info,
            format!("User \"{user_id}\" is forced in variation \"{variation_key}\"."),
        );
        Some(variation)
    }

    fn stored_variation_override<'a>(
        &self,
        lookup: &OverrideLookup<'a, '_>,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let profile = lookup.profile?;
        let user_id = lookup.user.user_id();
        let experiment = lookup.experiment;

        let Some(variation_id) = profile.get_variation_for_experiment(&experiment.id) else {
            log::debug!(target: "decision",
                user_id,
                experiment_key = experiment.key.as_str();
                "no stored decision for experiment");
            return None;
        };

        match lookup
            .config
            .get_variation_from_id(&experiment.key, variation_id)
        {
            Some(variation) => {
                reasons.record(
                    Level::Info,
                    format!(
                        "Found a stored decision. User \"{user_id}\" is in variation \"{}\" of experiment \"{}\".",
                        variation.key, experiment.key
                    ),
                );
                Some(variation)
            }
            None => {
                reasons.record(
                    Level::Warn,
                    format!(
                        "Stored variation \"{variation_id}\" of experiment \"{}\" for user \"{user_id}\" is no longer in the configuration.",
                        experiment.key
                    ),
                );
                None
            }
        }
    }

    /// Determine the variation of `experiment` for `user`.
    ///
    /// Overrides are checked in order: forced variation, experiment whitelist, stored profile
    /// decision. Without an override the user must meet the audience conditions and is then
    /// bucketed. A freshly bucketed variation is recorded in `user_profile_tracker`; saving
    /// the tracker is left to the caller.
    pub fn get_variation<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        experiment: &'a Experiment,
        user: &UserContext,
        user_profile_tracker: Option<&mut UserProfileTracker<'_>>,
        options: &DecideOptions,
    ) -> (Option<&'a Variation>, Vec<String>) {
        let mut reasons = DecisionReasons::new();
        let variation = self.get_variation_with_reasons(
            config,
            experiment,
            user,
            user_profile_tracker,
            options,
            &mut reasons,
        );
        (variation, reasons.into_vec())
    }

    /// Like [`DecisionService::get_variation`], appending to an existing reason log.
    pub fn get_variation_with_reasons<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        experiment: &'a Experiment,
        user: &UserContext,
        user_profile_tracker: Option<&mut UserProfileTracker<'_>>,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Option<&'a Variation> {
        let user_id = user.user_id();

        if !experiment.is_running() {
            reasons.record(
                Level::Info,
                format!("Experiment \"{}\" is not running.", experiment.key),
            );
            return None;
        }

        let mut tracker = user_profile_tracker.filter(|_| !options.ignore_user_profile_service);

        let overridden = {
            let lookup = OverrideLookup {
                config,
                experiment,
                user,
                profile: tracker.as_deref().map(UserProfileTracker::get_user_profile),
            };
            OVERRIDE_RESOLVERS
                .iter()
                .find_map(|resolve| resolve(self, &lookup, reasons))
        };
        if overridden.is_some() {
            return overridden;
        }

        let conditions = experiment.audience_conditions_or_ids();
        let (matched, audience_reasons) = self.audience_evaluator.does_user_meet_conditions(
            config,
            conditions.as_ref(),
            AudienceLogScope::Experiment,
            &experiment.key,
            user,
        );
        reasons.extend(audience_reasons);
        if !matched {
            reasons.record(
                Level::Info,
                format!(
                    "User \"{user_id}\" does not meet conditions to be in experiment \"{}\".",
                    experiment.key
                ),
            );
            return None;
        }

        let bucketing_id = self.get_bucketing_id(user, reasons);
        let (variation, bucket_reasons) = self
            .bucketer
            .bucket(config, experiment, user_id, &bucketing_id);
        reasons.extend(bucket_reasons);

        let Some(variation) = variation else {
            reasons.record(
                Level::Info,
                format!("User \"{user_id}\" is in no variation."),
            );
            return None;
        };

        reasons.record(
            Level::Info,
            format!(
                "User \"{user_id}\" is in variation \"{}\" of experiment {}.",
                variation.key, experiment.key
            ),
        );
        if let Some(tracker) = tracker.as_deref_mut() {
            tracker.update_user_profile(experiment, variation);
        }
        Some(variation)
    }

    /// Walk the targeting rules of the feature's rollout.
    ///
    /// A user who matches a rule's audience but is not bucketed into it skips straight to the
    /// last ("Everyone Else") rule.
    pub fn get_variation_for_rollout<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        feature: &FeatureFlag,
        user: &UserContext,
    ) -> (Decision<'a>, Vec<String>) {
        let mut reasons = DecisionReasons::new();
        let decision = self.rollout_decision(config, feature, user, &mut reasons);
        (decision, reasons.into_vec())
    }

    fn rollout_decision<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        feature: &FeatureFlag,
        user: &UserContext,
        reasons: &mut DecisionReasons,
    ) -> Decision<'a> {
        let user_id = user.user_id();

        let Some(rollout) = feature
            .rollout_id
            .as_deref()
            .and_then(|rollout_id| config.get_rollout_from_id(rollout_id))
        else {
            reasons.record(
                Level::Debug,
                format!("There is no rollout of feature {}.", feature.key),
            );
            return Decision::none();
        };

        let rules = config.get_rollout_experiments(rollout);
        let Some(last_index) = rules.len().checked_sub(1) else {
            reasons.record(
                Level::Debug,
                format!("Rollout {} has no experiments.", rollout.id),
            );
            return Decision::none();
        };

        let mut index = 0;
        while index <= last_index {
            let rule = rules[index];

            let context = DecisionContext::rule(feature.key.as_str(), rule.key.as_str());
            let (forced, forced_reasons) = validated_forced_decision(config, &context, user);
            reasons.extend(forced_reasons);
            if let Some(variation) = forced {
                return Decision::rollout(Some(rule), Some(variation));
            }

            let bucketing_id = self.get_bucketing_id(user, reasons);
            let everyone_else = index == last_index;
            let logging_key = if everyone_else {
                "Everyone Else".to_owned()
            } else {
                (index + 1).to_string()
            };

            let Some(rollout_rule) = config.get_experiment_from_id(&rule.id) else {
                index += 1;
                continue;
            };

            let conditions = rollout_rule.audience_conditions_or_ids();
            let (matched, audience_reasons) = self.audience_evaluator.does_user_meet_conditions(
                config,
                conditions.as_ref(),
                AudienceLogScope::RolloutRule,
                &logging_key,
                user,
            );
            reasons.extend(audience_reasons);

            if !matched {
                reasons.record(
                    Level::Debug,
                    format!(
                        "User \"{user_id}\" does not meet audience conditions for targeting rule {logging_key}."
                    ),
                );
                index += 1;
                continue;
            }

            reasons.record(
                Level::Debug,
                format!(
                    "User \"{user_id}\" meets audience conditions for targeting rule {logging_key}."
                ),
            );

            let (variation, bucket_reasons) = self
                .bucketer
                .bucket(config, rollout_rule, user_id, &bucketing_id);
            reasons.extend(bucket_reasons);

            if let Some(variation) = variation {
                reasons.record(
                    Level::Debug,
                    format!("User \"{user_id}\" bucketed into a targeting rule {logging_key}."),
                );
                return Decision::rollout(Some(rule), Some(variation));
            }

            if everyone_else {
                break;
            }

            reasons.record(
                Level::Debug,
                format!(
                    "User \"{user_id}\" not bucketed into a targeting rule {logging_key}. Checking \"Everyone Else\" rule now."
                ),
            );
            index = last_index;
        }

        Decision::none()
    }

    /// Decide a single feature. See [`DecisionService::get_variations_for_feature_list`].
    pub fn get_variation_for_feature<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        feature: &FeatureFlag,
        user: &UserContext,
        options: &DecideOptions,
    ) -> (Decision<'a>, Vec<String>) {
        self.get_variations_for_feature_list(config, &[feature], user, options)
            .pop()
            .unwrap_or_else(|| (Decision::none(), Vec::new()))
    }

    /// Decide every feature in `features` for one user, in order.
    ///
    /// Feature tests are tried first, the first experiment that yields a variation wins. Otherwise
    /// the feature's rollout decides. The user profile is loaded once before the batch and saved
    /// at most once after it.
    pub fn get_variations_for_feature_list<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        features: &[&FeatureFlag],
        user: &UserContext,
        options: &DecideOptions,
    ) -> Vec<(Decision<'a>, Vec<String>)> {
        let mut batch_reasons = DecisionReasons::new();

        let mut tracker = match &self.user_profile_service {
            Some(service) if !options.ignore_user_profile_service => {
                let mut tracker = UserProfileTracker::new(user.user_id(), &**service);
                tracker.load_user_profile(&mut batch_reasons);
                Some(tracker)
            }
            _ => None,
        };

        let decisions: Vec<_> = features
            .iter()
            .map(|feature| {
                let mut reasons = batch_reasons.clone();
                let decision = self.feature_decision(
                    config,
                    feature,
                    user,
                    tracker.as_mut(),
                    options,
                    &mut reasons,
                );
                (decision, reasons.into_vec())
            })
            .collect();

        if let Some(tracker) = tracker.as_mut() {
            tracker.save_user_profile();
        }

        decisions
    }

    fn feature_decision<'a>(
        &self,
        config: &'a dyn ConfigProvider,
        feature: &FeatureFlag,
        user: &UserContext,
        mut tracker: Option<&mut UserProfileTracker<'_>>,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Decision<'a> {
        let user_id = user.user_id();

        for experiment_id in &feature.experiment_ids {
            let Some(experiment) = config.get_experiment_from_id(experiment_id) else {
                continue;
            };

            let context = DecisionContext::rule(feature.key.as_str(), experiment.key.as_str());
            let (forced, forced_reasons) = validated_forced_decision(config, &context, user);
            reasons.extend(forced_reasons);

            let variation = match forced {
                Some(variation) => Some(variation),
                None => self.get_variation_with_reasons(
                    config,
                    experiment,
                    user,
                    tracker.as_deref_mut(),
                    options,
                    reasons,
                ),
            };

            if let Some(variation) = variation {
                log::debug!(target: "decision",
                    user_id,
                    experiment_key = experiment.key.as_str(),
                    feature_key = feature.key.as_str();
                    "user bucketed into experiment of feature");
                return Decision {
                    experiment: Some(experiment),
                    variation: Some(variation),
                    source: DecisionSource::FeatureTest,
                };
            }
        }

        let decision = self.rollout_decision(config, feature, user, reasons);
        if decision.variation.is_some() {
            log::debug!(target: "decision",
                user_id,
                feature_key = feature.key.as_str();
                "user bucketed into rollout for feature");
        } else {
            log::debug!(target: "decision",
                user_id,
                feature_key = feature.key.as_str();
                "user not bucketed into any rollout for feature");
        }
        decision
    }
}
