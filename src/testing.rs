//! Test doubles shared by unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    audience::{AudienceEvaluator, AudienceLogScope},
    bucketer::Bucketer,
    entities::{AudienceConditions, Experiment, Variation},
    user_profile::{UserProfile, UserProfileService},
    ConfigProvider, Error, Result, UserContext,
};

#[derive(Debug, Default)]
struct ProfileState {
    profiles: HashMap<String, UserProfile>,
    lookups: usize,
    saves: usize,
}

/// In-memory profile service that counts calls and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct CountingUserProfileService {
    state: Arc<Mutex<ProfileState>>,
    fail: bool,
}

impl CountingUserProfileService {
    pub fn failing() -> Self {
        CountingUserProfileService {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_profile(profile: UserProfile) -> Self {
        let service = Self::default();
        service
            .state
            .lock()
            .unwrap()
            .profiles
            .insert(profile.user_id.clone(), profile);
        service
    }

    pub fn lookups(&self) -> usize {
        self.state.lock().unwrap().lookups
    }

    pub fn saves(&self) -> usize {
        self.state.lock().unwrap().saves
    }

    pub fn stored(&self, user_id: &str) -> Option<UserProfile> {
        self.state.lock().unwrap().profiles.get(user_id).cloned()
    }
}

impl UserProfileService for CountingUserProfileService {
    fn lookup(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let mut state = self.state.lock().unwrap();
        state.lookups += 1;
        if self.fail {
            return Err(Error::UserProfileService("lookup failed".to_owned()));
        }
        Ok(state.profiles.get(user_id).cloned())
    }

    fn save(&self, profile: &UserProfile) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.saves += 1;
        if self.fail {
            return Err(Error::UserProfileService("save failed".to_owned()));
        }
        state
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}

/// Bucketer returning a preconfigured variation id per experiment id, recording every call.
#[derive(Debug, Clone, Default)]
pub struct FixedBucketer {
    assignments: HashMap<String, String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FixedBucketer {
    pub fn assign(mut self, experiment_id: &str, variation_id: &str) -> Self {
        self.assignments
            .insert(experiment_id.to_owned(), variation_id.to_owned());
        self
    }

    /// Ids of the experiments bucketed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Bucketer for FixedBucketer {
    fn bucket<'a>(
        &self,
        _config: &'a dyn ConfigProvider,
        experiment: &'a Experiment,
        _user_id: &str,
        _bucketing_id: &str,
    ) -> (Option<&'a Variation>, Vec<String>) {
        self.calls.lock().unwrap().push(experiment.id.clone());
        let variation = self
            .assignments
            .get(&experiment.id)
            .and_then(|variation_id| experiment.variation_by_id(variation_id));
        (variation, Vec::new())
    }
}

/// Audience evaluator with a fixed answer, recording the logging key of every call.
#[derive(Debug, Clone, Default)]
pub struct StaticAudienceEvaluator {
    matches: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticAudienceEvaluator {
    pub fn new(matches: bool) -> Self {
        StaticAudienceEvaluator {
            matches,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl AudienceEvaluator for StaticAudienceEvaluator {
    fn does_user_meet_conditions(
        &self,
        _config: &dyn ConfigProvider,
        _conditions: Option<&AudienceConditions>,
        _scope: AudienceLogScope,
        logging_key: &str,
        _user: &UserContext,
    ) -> (bool, Vec<String>) {
        self.calls.lock().unwrap().push(logging_key.to_owned());
        (self.matches, Vec::new())
    }
}
