use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use typed_builder::TypedBuilder;

use crate::{error::ConfigError, scenario::Scenario, simulation};

/// Knobs of a run that are independent of any scenario.
///
/// Built in code with [`RunnerConfig::builder`], or loaded from a JSON file in
/// which every field is optional and durations are given in milliseconds:
///
/// ```json
/// { "call_timeout_ms": 2000, "workers": 64, "test_name": "smoke" }
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Granularity of the injection governor.
    #[builder(default = Duration::from_millis(100))]
    #[serde(rename = "tick_ms", with = "millis")]
    pub tick: Duration,
    /// Upper bound on concurrently running iterations per scenario. When unset
    /// it is implied from the scenario's peak rate, step count and call timeout.
    #[builder(default, setter(strip_option))]
    pub workers: Option<usize>,
    /// How long a due iteration may wait for a free worker before it is dropped.
    #[builder(default = Duration::from_secs(1))]
    #[serde(rename = "max_lag_ms", with = "millis")]
    pub max_lag: Duration,
    /// How long in-flight iterations may keep running after the measured window.
    #[builder(default = Duration::from_secs(10))]
    #[serde(rename = "drain_grace_ms", with = "millis")]
    pub drain_grace: Duration,
    /// Per-call timeout applied to every step invocation.
    #[builder(default = Duration::from_secs(5))]
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub call_timeout: Duration,
    /// Capacity of each scenario's results channel.
    #[builder(default = 4096)]
    pub sink_capacity: usize,
    #[builder(default = String::from("default"), setter(into))]
    pub test_suite: String,
    #[builder(default = String::from("load_test"), setter(into))]
    pub test_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunnerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.is_zero() {
            return Err(ConfigError::InvalidRunner("tick must be non-zero".into()));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidRunner(
                "call timeout must be non-zero".into(),
            ));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidRunner("workers must be non-zero".into()));
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::InvalidRunner(
                "sink capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Worker pool size for `scenario`.
    ///
    /// Implied size: enough slots for every iteration started at peak rate to
    /// hang on every step until the call timeout, never below the CPU count.
    /// Always capped at what a semaphore can hold.
    pub fn workers_for(&self, scenario: &Scenario) -> usize {
        let workers = self.workers.unwrap_or_else(|| {
            let peak = simulation::peak_rate(scenario.load_simulations())
                .max(scenario.warm_up_rate());
            let busy = self.call_timeout.as_secs_f64() * scenario.steps().len() as f64;
            ((peak * busy).ceil() as usize).max(num_cpus::get())
        });
        workers.min(Semaphore::MAX_PERMITS)
    }

    /// Upper bound on the whole run of `scenario`: warm-up, phases and drain.
    /// Saturates at `Duration::MAX`.
    pub fn hard_ceiling(&self, scenario: &Scenario) -> Duration {
        scenario
            .warm_up()
            .saturating_add(scenario.measured_duration())
            .saturating_add(self.drain_grace)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoadSimulation, Response, Step};
    use std::io::Write;

    fn scenario(rate: f64, steps: usize) -> Scenario {
        Scenario::builder("s")
            .steps((0..steps).map(|i| Step::new(format!("s{i}"), |_| async { Response::ok() })))
            .load_simulations([LoadSimulation::inject_per_sec(rate, Duration::from_secs(5))])
            .warm_up(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    #[test]
    fn defaults() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.tick, Duration::from_millis(100));
        assert_eq!(cfg.call_timeout, Duration::from_secs(5));
        assert_eq!(cfg.workers, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_overrides_only_given_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "call_timeout_ms": 2000, "workers": 64, "test_name": "smoke" }}"#
        )
        .unwrap();

        let cfg = RunnerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.call_timeout, Duration::from_secs(2));
        assert_eq!(cfg.workers, Some(64));
        assert_eq!(cfg.test_name, "smoke");
        assert_eq!(cfg.drain_grace, Duration::from_secs(10));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cfg = RunnerConfig::builder().tick(Duration::ZERO).build();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidRunner(_))));

        let cfg = RunnerConfig::builder().workers(0).build();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidRunner(_))));
    }

    #[test]
    fn implied_workers_cover_peak_rate() {
        let cfg = RunnerConfig::builder()
            .call_timeout(Duration::from_secs(2))
            .build();
        assert_eq!(cfg.workers_for(&scenario(1000.0, 2)), 4000.max(num_cpus::get()));
        assert_eq!(cfg.workers_for(&scenario(0.0, 2)), num_cpus::get());

        let fixed = RunnerConfig::builder().workers(3).build();
        assert_eq!(fixed.workers_for(&scenario(1000.0, 2)), 3);
    }

    #[test]
    fn pool_size_is_capped_for_extreme_rates() {
        let cfg = RunnerConfig::default();
        assert_eq!(cfg.workers_for(&scenario(1e18, 2)), Semaphore::MAX_PERMITS);
        assert_eq!(cfg.workers_for(&scenario(f64::MAX, 2)), Semaphore::MAX_PERMITS);

        let fixed = RunnerConfig::builder().workers(usize::MAX).build();
        assert_eq!(fixed.workers_for(&scenario(1.0, 1)), Semaphore::MAX_PERMITS);
    }

    #[test]
    fn hard_ceiling_saturates_instead_of_overflowing() {
        let cfg = RunnerConfig::builder().drain_grace(Duration::MAX).build();
        assert_eq!(cfg.hard_ceiling(&scenario(1.0, 1)), Duration::MAX);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "drain_grace_ms": {} }}"#, u64::MAX).unwrap();
        let cfg = RunnerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.hard_ceiling(&scenario(1.0, 1)), Duration::MAX);
    }

    #[test]
    fn hard_ceiling_adds_up_the_run() {
        let cfg = RunnerConfig::builder()
            .drain_grace(Duration::from_secs(1))
            .build();
        assert_eq!(cfg.hard_ceiling(&scenario(1.0, 1)), Duration::from_secs(8));
    }
}
