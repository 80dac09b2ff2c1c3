use std::{collections::HashMap, sync::Mutex};

use serde::{Deserialize, Serialize};

use crate::{
    entities::{Experiment, Variation},
    reasons::DecisionReasons,
    Error, Result,
};

/// Stored bucketing decision for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub variation_id: String,
}

/// Sticky bucketing history of a user: experiment id to the variation they were bucketed into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub experiment_bucket_map: HashMap<String, Bucket>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        UserProfile {
            user_id: user_id.into(),
            experiment_bucket_map: HashMap::new(),
        }
    }

    pub fn get_variation_for_experiment(&self, experiment_id: &str) -> Option<&str> {
        self.experiment_bucket_map
            .get(experiment_id)
            .map(|bucket| bucket.variation_id.as_str())
    }

    pub fn save_variation_for_experiment(
        &mut self,
        experiment_id: impl Into<String>,
        variation_id: impl Into<String>,
    ) {
        self.experiment_bucket_map.insert(
            experiment_id.into(),
            Bucket {
                variation_id: variation_id.into(),
            },
        );
    }
}

/// Persistent storage of user profiles, provided by the embedding application.
pub trait UserProfileService {
    /// Returns `Ok(None)` if there is no profile for the user yet.
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>>;

    fn save(&self, profile: &UserProfile) -> Result<()>;
}

/// Process-local [`UserProfileService`].
#[derive(Debug, Default)]
pub struct InMemoryUserProfileService {
    profiles: Mutex<HashMap<String, UserProfile>>,
}

impl InMemoryUserProfileService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserProfileService for InMemoryUserProfileService {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let profiles = self
            .profiles
            .lock()
            .map_err(|_| Error::UserProfileService("profile store lock poisoned".to_owned()))?;
        Ok(profiles.get(user_id).cloned())
    }

    fn save(&self, profile: &UserProfile) -> Result<()> {
        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| Error::UserProfileService("profile store lock poisoned".to_owned()))?;
        profiles.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}

/// Holds one user's profile across a batch of decisions: loaded once, saved once if changed.
pub struct UserProfileTracker<'a> {
    user_id: String,
    service: &'a dyn UserProfileService,
    profile: UserProfile,
    profile_updated: bool,
}

impl<'a> UserProfileTracker<'a> {
    pub fn new(user_id: impl Into<String>, service: &'a dyn UserProfileService) -> Self {
        let user_id = user_id.into();
        UserProfileTracker {
            profile: UserProfile::new(user_id.clone()),
            user_id,
            service,
            profile_updated: false,
        }
    }

    /// Load the profile from the service. On failure or absence the tracker keeps an empty
    /// profile and records why.
    pub fn load_user_profile(&mut self, reasons: &mut DecisionReasons) {
        match self.service.lookup(&self.user_id) {
            Ok(Some(profile)) => {
                log::info!(target: "decision",
                    user_id = self.user_id.as_str();
                    "user profile loaded successfully");
                self.profile = profile;
            }
            Ok(None) => {
                reasons.record(
                    log::Level::Debug,
                    "Unable to get a user profile from the UserProfileService.",
                );
            }
            Err(err) => {
                log::error!(target: "decision",
                    user_id = self.user_id.as_str();
                    "unable to retrieve user profile as lookup failed: {err}");
                reasons.extend([err.to_string()]);
            }
        }
    }

    pub fn get_user_profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn update_user_profile(&mut self, experiment: &Experiment, variation: &Variation) {
        self.profile
            .save_variation_for_experiment(experiment.id.as_str(), variation.id.as_str());
        self.profile_updated = true;
    }

    pub fn is_updated(&self) -> bool {
        self.profile_updated
    }

    /// Persist the profile if anything changed since it was loaded. Failures are logged and
    /// swallowed.
    pub fn save_user_profile(&mut self) {
        if !self.profile_updated {
            return;
        }

        match self.service.save(&self.profile) {
            Ok(()) => {
                log::info!(target: "decision",
                    user_id = self.user_id.as_str();
                    "saved user profile");
                self.profile_updated = false;
            }
            Err(err) => {
                log::warn!(target: "decision",
                    user_id = self.user_id.as_str();
                    "failed to save user profile: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{InMemoryUserProfileService, UserProfile, UserProfileService, UserProfileTracker};
    use crate::{
        project_config::tests::fixture_config, reasons::DecisionReasons,
        testing::CountingUserProfileService, ConfigProvider,
    };

    #[test]
    fn profile_serialization() {
        let mut profile = UserProfile::new("user");
        profile.save_variation_for_experiment("1001", "10011");
        assert_eq!(
            serde_json::to_value(&profile).unwrap(),
            json!({
                "user_id": "user",
                "experiment_bucket_map": {"1001": {"variation_id": "10011"}}
            })
        );
    }

    #[test]
    fn in_memory_service_round_trip() {
        let service = InMemoryUserProfileService::new();
        assert_eq!(service.lookup("user").unwrap(), None);

        let mut profile = UserProfile::new("user");
        profile.save_variation_for_experiment("1001", "10011");
        service.save(&profile).unwrap();

        assert_eq!(service.lookup("user").unwrap(), Some(profile));
    }

    #[test]
    fn tracker_saves_only_when_updated() {
        let config = fixture_config();
        let service = CountingUserProfileService::default();
        let mut reasons = DecisionReasons::new();

        let mut tracker = UserProfileTracker::new("user", &service);
        tracker.load_user_profile(&mut reasons);
        tracker.save_user_profile();
        assert_eq!(service.saves(), 0);

        let experiment = config.get_experiment_from_key("checkout_test").unwrap();
        let variation = experiment.variation_by_key("control").unwrap();
        tracker.update_user_profile(experiment, variation);
        assert!(tracker.is_updated());
        tracker.save_user_profile();
        assert_eq!(service.saves(), 1);
        assert_eq!(
            service.stored("user").unwrap().get_variation_for_experiment("1001"),
            Some("10011")
        );
    }

    #[test]
    fn tracker_records_missing_profile() {
        let service = InMemoryUserProfileService::new();
        let mut reasons = DecisionReasons::new();
        let mut tracker = UserProfileTracker::new("user", &service);
        tracker.load_user_profile(&mut reasons);

        assert_eq!(
            reasons.into_vec(),
            vec!["Unable to get a user profile from the UserProfileService."]
        );
        assert_eq!(tracker.get_user_profile(), &UserProfile::new("user"));
    }

    #[test]
    fn tracker_survives_lookup_failure() {
        let service = CountingUserProfileService::failing();
        let mut reasons = DecisionReasons::new();
        let mut tracker = UserProfileTracker::new("user", &service);
        tracker.load_user_profile(&mut reasons);

        assert_eq!(reasons.into_vec().len(), 1);
        assert_eq!(tracker.get_user_profile(), &UserProfile::new("user"));
    }
}
