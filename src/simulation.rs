use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One phase of the injection timeline.
///
/// Phases run back to back. Injection is open-loop: the rate says how many
/// iterations to *start* per second, regardless of how many are still running.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LoadSimulation {
    /// Start `rate` iterations per second for `during`.
    Inject { rate: f64, during: Duration },
    /// Move linearly from the previous phase's rate to `rate` over `during`.
    RampingInject { rate: f64, during: Duration },
    /// Start nothing for `during`.
    Pause { during: Duration },
}

impl LoadSimulation {
    pub fn inject_per_sec(rate: f64, during: Duration) -> Self {
        Self::Inject { rate, during }
    }

    pub fn ramping_inject_per_sec(rate: f64, during: Duration) -> Self {
        Self::RampingInject { rate, during }
    }

    pub fn pause(during: Duration) -> Self {
        Self::Pause { during }
    }

    pub fn duration(&self) -> Duration {
        match *self {
            Self::Inject { during, .. }
            | Self::RampingInject { during, .. }
            | Self::Pause { during } => during,
        }
    }

    /// Rate this phase ends on.
    pub fn target_rate(&self) -> f64 {
        match *self {
            Self::Inject { rate, .. } | Self::RampingInject { rate, .. } => rate,
            Self::Pause { .. } => 0.0,
        }
    }

    /// `(start, end)` rates given the rate the previous phase ended on.
    pub fn rate_bounds(&self, previous: f64) -> (f64, f64) {
        match *self {
            Self::Inject { rate, .. } => (rate, rate),
            Self::RampingInject { rate, .. } => (previous, rate),
            Self::Pause { .. } => (0.0, 0.0),
        }
    }

    pub(crate) fn has_valid_rate(&self) -> bool {
        let rate = self.target_rate();
        rate.is_finite() && rate >= 0.0
    }
}

/// Total length of a phase sequence, saturating at `Duration::MAX`.
pub fn total_duration(phases: &[LoadSimulation]) -> Duration {
    phases
        .iter()
        .map(LoadSimulation::duration)
        .fold(Duration::ZERO, Duration::saturating_add)
}

/// Highest instantaneous rate a phase sequence reaches.
pub fn peak_rate(phases: &[LoadSimulation]) -> f64 {
    phases
        .iter()
        .map(LoadSimulation::target_rate)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_duration_is_sum_of_phases() {
        let phases = [
            LoadSimulation::ramping_inject_per_sec(50.0, Duration::from_secs(2)),
            LoadSimulation::inject_per_sec(50.0, Duration::from_secs(5)),
            LoadSimulation::pause(Duration::from_millis(500)),
        ];
        assert_eq!(total_duration(&phases), Duration::from_millis(7500));
        assert_eq!(peak_rate(&phases), 50.0);
    }

    #[test]
    fn total_duration_saturates() {
        let phases = [
            LoadSimulation::pause(Duration::MAX),
            LoadSimulation::inject_per_sec(1.0, Duration::from_secs(1)),
        ];
        assert_eq!(total_duration(&phases), Duration::MAX);
    }

    #[test]
    fn ramping_starts_from_previous_rate() {
        let ramp = LoadSimulation::ramping_inject_per_sec(100.0, Duration::from_secs(1));
        assert_eq!(ramp.rate_bounds(20.0), (20.0, 100.0));

        let hold = LoadSimulation::inject_per_sec(10.0, Duration::from_secs(1));
        assert_eq!(hold.rate_bounds(20.0), (10.0, 10.0));
    }

    #[test]
    fn negative_and_non_finite_rates_are_invalid() {
        assert!(!LoadSimulation::inject_per_sec(-1.0, Duration::ZERO).has_valid_rate());
        assert!(!LoadSimulation::inject_per_sec(f64::NAN, Duration::ZERO).has_valid_rate());
        assert!(!LoadSimulation::inject_per_sec(f64::INFINITY, Duration::ZERO).has_valid_rate());
        assert!(LoadSimulation::pause(Duration::ZERO).has_valid_rate());
    }
}
