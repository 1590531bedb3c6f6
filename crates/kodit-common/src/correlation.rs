//! Correlation ids for task execution logs
//!
//! A worker mints one id per handler execution and stamps it on every
//! log line of that run, so the fan-out of a single task can be grepped
//! back together across workers and retries.

use uuid::Uuid;

/// Identifier tying together the log lines of one task execution
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mint a fresh id; v4 randomness keeps concurrent executions
    /// distinct without coordination
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_execution_gets_a_distinct_id() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn test_display_is_a_plain_uuid() {
        let rendered = CorrelationId::new().to_string();
        assert_eq!(rendered.len(), 36);
        assert_eq!(rendered.matches('-').count(), 4);
    }
}
