//! Node execution outcome, ported from `attractor.outcome`.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Fail,
    PartialSuccess,
    Retry,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Fail => "fail",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Retry => "retry",
            StageStatus::Skipped => "skipped",
        }
    }

    /// Rank used by the fan-in handler to pick the "best" branch result:
    /// success < partial_success < retry < fail < skipped.
    pub fn rank(&self) -> u8 {
        match self {
            StageStatus::Success => 0,
            StageStatus::PartialSuccess => 1,
            StageStatus::Retry => 2,
            StageStatus::Fail => 3,
            StageStatus::Skipped => 4,
        }
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub preferred_label: String,
    pub suggested_next_ids: Vec<String>,
    pub context_updates: HashMap<String, Value>,
    pub notes: String,
    pub failure_reason: String,
}

/// Wraps `StageStatus` with a `Default` of `Success`, matching the
/// original dataclass default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeStatus(pub StageStatus);

impl Default for OutcomeStatus {
    fn default() -> Self {
        OutcomeStatus(StageStatus::Success)
    }
}

impl Outcome {
    pub fn success() -> Self {
        Outcome { status: OutcomeStatus(StageStatus::Success), ..Default::default() }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Outcome {
            status: OutcomeStatus(StageStatus::Fail),
            failure_reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Outcome {
            status: OutcomeStatus(StageStatus::Retry),
            failure_reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn status(&self) -> StageStatus {
        self.status.0
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status.0, StageStatus::Success | StageStatus::PartialSuccess)
    }

    pub fn is_failure(&self) -> bool {
        self.status.0 == StageStatus::Fail
    }

    pub fn is_retry(&self) -> bool {
        self.status.0 == StageStatus::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_family_includes_partial() {
        let mut o = Outcome::success();
        assert!(o.is_success());
        o.status = OutcomeStatus(StageStatus::PartialSuccess);
        assert!(o.is_success());
        o.status = OutcomeStatus(StageStatus::Fail);
        assert!(!o.is_success());
    }

    #[test]
    fn rank_orders_success_family_first() {
        assert!(StageStatus::Success.rank() < StageStatus::PartialSuccess.rank());
        assert!(StageStatus::PartialSuccess.rank() < StageStatus::Retry.rank());
        assert!(StageStatus::Retry.rank() < StageStatus::Fail.rank());
        assert!(StageStatus::Fail.rank() < StageStatus::Skipped.rank());
    }
}
