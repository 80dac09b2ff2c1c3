use crate::{
    entities::Variation, project_config::ConfigProvider, user_context::DecisionContext,
    UserContext,
};

/// Resolve the user's forced decision for `context` against the configuration.
///
/// The variation is looked up among all variations of the flag, since a forced decision may
/// target a rollout rule as well as an experiment. A forced decision naming a variation that no
/// longer exists is reported as invalid and otherwise ignored; it stays on the user context.
pub fn validated_forced_decision<'a>(
    config: &'a dyn ConfigProvider,
    context: &DecisionContext,
    user: &UserContext,
) -> (Option<&'a Variation>, Vec<String>) {
    let mut reasons = Vec::new();

    let Some(forced_decision) = user.get_forced_decision(context) else {
        return (None, reasons);
    };

    let flag_key = context.flag_key.as_str();
    let user_id = user.user_id();
    let variation_key = forced_decision.variation_key.as_str();
    let variation = config.get_flag_variation(flag_key, variation_key);

    let message = match (variation, context.rule_key.as_deref()) {
        (Some(_), Some(rule_key)) => format!(
            "Variation ({variation_key}) is mapped to flag ({flag_key}), rule ({rule_key}) and user ({user_id}) in the forced decision map."
        ),
        (Some(_), None) => format!(
            "Variation ({variation_key}) is mapped to flag ({flag_key}) and user ({user_id}) in the forced decision map."
        ),
        (None, Some(rule_key)) => format!(
            "Invalid variation is mapped to flag ({flag_key}), rule ({rule_key}) and user ({user_id}) in the forced decision map."
        ),
        (None, None) => format!(
            "Invalid variation is mapped to flag ({flag_key}) and user ({user_id}) in the forced decision map."
        ),
    };
    log::info!(target: "decision", "{message}");
    reasons.push(message);

    (variation, reasons)
}
