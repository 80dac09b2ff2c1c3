use std::time::Duration;

use crate::{
    audience::{AudienceEvaluator, ConditionAudienceEvaluator},
    bucketer::{Bucketer, Md5Bucketer},
    user_profile::UserProfileService,
    DecisionService, HttpEventDispatcher,
};

/// Configuration for [`DecisionService`].
///
/// # Examples
/// ```
/// # use decision_core::{DecisionServiceConfig, InMemoryUserProfileService};
/// let service = DecisionServiceConfig::new()
///     .user_profile_service(InMemoryUserProfileService::new())
///     .to_service();
/// ```
pub struct DecisionServiceConfig {
    pub(crate) bucketer: Box<dyn Bucketer + Send + Sync>,
    pub(crate) audience_evaluator: Box<dyn AudienceEvaluator + Send + Sync>,
    pub(crate) user_profile_service: Option<Box<dyn UserProfileService + Send + Sync>>,
}

impl DecisionServiceConfig {
    /// Default configuration: MD5 bucketing, condition-tree audiences and no user profiles.
    pub fn new() -> Self {
        DecisionServiceConfig {
            bucketer: Box::new(Md5Bucketer),
            audience_evaluator: Box::new(ConditionAudienceEvaluator),
            user_profile_service: None,
        }
    }

    /// Override how users are mapped to variations.
    pub fn bucketer(mut self, bucketer: impl Bucketer + Send + Sync + 'static) -> Self {
        self.bucketer = Box::new(bucketer);
        self
    }

    /// Override how audience conditions are evaluated.
    pub fn audience_evaluator(
        mut self,
        audience_evaluator: impl AudienceEvaluator + Send + Sync + 'static,
    ) -> Self {
        self.audience_evaluator = Box::new(audience_evaluator);
        self
    }

    /// Set a user profile service to enable sticky bucketing.
    pub fn user_profile_service(
        mut self,
        user_profile_service: impl UserProfileService + Send + Sync + 'static,
    ) -> Self {
        self.user_profile_service = Some(Box::new(user_profile_service));
        self
    }

    /// Create a new [`DecisionService`] using the specified configuration.
    pub fn to_service(self) -> DecisionService {
        DecisionService::new(self)
    }
}

impl Default for DecisionServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`HttpEventDispatcher`].
///
/// ```
/// # use std::time::Duration;
/// # use decision_core::EventDispatcherConfig;
/// let dispatcher = EventDispatcherConfig::new()
///     .timeout(Duration::from_secs(5))
///     .max_retries(1)
///     .to_dispatcher();
/// ```
#[derive(Debug, Clone)]
pub struct EventDispatcherConfig {
    pub(crate) timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) backoff: Duration,
}

impl EventDispatcherConfig {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default number of retries after the first attempt.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Default delay before the first retry. Doubles on every subsequent retry.
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        EventDispatcherConfig {
            timeout: Self::DEFAULT_TIMEOUT,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            backoff: Self::DEFAULT_BACKOFF,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Create a new [`HttpEventDispatcher`] using the specified configuration.
    pub fn to_dispatcher(self) -> HttpEventDispatcher {
        HttpEventDispatcher::new(self)
    }
}

impl Default for EventDispatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}
