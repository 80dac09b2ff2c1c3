use log::Level;

/// Append-only log of human-readable decision reasons.
///
/// Every reason is also emitted through the `log` facade at the given level, so callers that do
/// not collect reasons still see them in their logs.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecisionReasons(Vec<String>);

impl DecisionReasons {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` at `level` and append it.
    pub fn record(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: "decision", level, "{message}");
        self.0.push(message);
    }

    /// Append reasons produced elsewhere (already logged by their producer).
    pub fn extend(&mut self, reasons: impl IntoIterator<Item = String>) {
        self.0.extend(reasons);
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for DecisionReasons {
    fn from(value: Vec<String>) -> Self {
        DecisionReasons(value)
    }
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::DecisionReasons;

    #[test]
    fn keeps_order() {
        let mut reasons = DecisionReasons::from(vec!["first".to_owned()]);
        reasons.record(Level::Info, "second");
        reasons.extend(vec!["third".to_owned()]);
        assert_eq!(reasons.into_vec(), vec!["first", "second", "third"]);
    }
}
