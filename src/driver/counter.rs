//! Cumulative counter to per-cycle delta conversion.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// What to report when a cumulative counter goes backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterResetPolicy {
    /// Report no value for the cycle
    #[default]
    Undefined,
    /// Report a delta of zero
    Zero,
}

impl fmt::Display for CounterResetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterResetPolicy::Undefined => f.write_str("undefined"),
            CounterResetPolicy::Zero => f.write_str("zero"),
        }
    }
}

/// Previous raw counter reading, carried between cycles
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CounterState {
    previous: Option<f64>,
}

impl CounterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_previous(previous: f64) -> Self {
        Self {
            previous: Some(previous),
        }
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }

    /// Delta for `current` and the state for the next cycle.
    ///
    /// The next state always holds `current`, even when it is missing, so a
    /// gap in readings makes the following cycle undefined too.
    pub fn advance(self, current: Option<f64>, policy: CounterResetPolicy) -> (Option<f64>, Self) {
        let delta = counter_delta(current, self.previous, policy);
        (delta, Self { previous: current })
    }
}

/// Difference between two cumulative counter readings
pub fn counter_delta(
    current: Option<f64>,
    previous: Option<f64>,
    policy: CounterResetPolicy,
) -> Option<f64> {
    let (current, previous) = (current?, previous?);
    if current >= previous {
        return Some(current - previous);
    }
    warn!(
        "counter decrement detected: new={} old={} ({})",
        current, previous, policy
    );
    match policy {
        CounterResetPolicy::Undefined => None,
        CounterResetPolicy::Zero => Some(0.0),
    }
}
