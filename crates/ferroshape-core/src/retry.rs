//! Per-call retry budget.
//!
//! A [`RetryState`] lives exactly as long as one top-level call. The budget
//! only ever decreases:
//!
//! | Remaining before failure | Remaining after | Action |
//! |--------------------------|-----------------|--------|
//! | `n > 1` | `n - 1` | [`FailureAction::Retry`] |
//! | `1` | `0` | [`FailureAction::LastAttempt`] |
//! | `0` | `0` | [`FailureAction::Exhausted`] |

use crate::validation::ValidationErrors;

/// What the controller does after a failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Append guidance and request again.
    Retry,
    /// The budget was just spent: repair if allowed, otherwise fail.
    LastAttempt,
    /// No budget was available at all.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    retries_remaining: u32,
    attempts: u32,
    last_error: Option<ValidationErrors>,
}

impl RetryState {
    pub fn new(retries: u32) -> Self {
        Self {
            retries_remaining: retries,
            attempts: 0,
            last_error: None,
        }
    }

    pub const fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Attempts whose output has been assessed.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&ValidationErrors> {
        self.last_error.as_ref()
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Records a failed validation and spends budget.
    pub fn record_failure(&mut self, errors: ValidationErrors) -> FailureAction {
        self.last_error = Some(errors);
        match self.retries_remaining {
            0 => FailureAction::Exhausted,
            1 => {
                self.retries_remaining = 0;
                FailureAction::LastAttempt
            }
            _ => {
                self.retries_remaining -= 1;
                FailureAction::Retry
            }
        }
    }
}
