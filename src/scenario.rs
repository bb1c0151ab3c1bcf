use std::{collections::HashSet, sync::Arc, time::Duration};

use crate::{
    error::ConfigError,
    simulation::{self, LoadSimulation},
    step::Step,
};

/// An ordered sequence of steps run once per iteration, plus the load shape
/// that drives those iterations.
///
/// A built scenario is immutable; it can be registered with any number of runs.
///
/// ```rust
/// use std::time::Duration;
/// use barrage::{LoadSimulation, Response, Scenario, Step};
///
/// let scenario = Scenario::builder("users")
///     .step(Step::new("get_user", |_| async { Response::ok_with(1u32) }))
///     .step(Step::new("get_posts", |ctx| async move {
///         match ctx.require_previous::<u32>() {
///             Ok(_) => Response::ok(),
///             Err(e) => e.into(),
///         }
///     }))
///     .warm_up(Duration::from_secs(5))
///     .load_simulations([LoadSimulation::inject_per_sec(100.0, Duration::from_secs(5))])
///     .build()
///     .unwrap();
///
/// assert_eq!(scenario.step_names().collect::<Vec<_>>(), ["get_user", "get_posts"]);
/// ```
#[derive(Debug, Clone)]
pub struct Scenario {
    inner: Arc<ScenarioInner>,
}

#[derive(Debug)]
struct ScenarioInner {
    name: Arc<str>,
    steps: Vec<Step>,
    warm_up: Duration,
    simulations: Vec<LoadSimulation>,
}

impl Scenario {
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            steps: Vec::new(),
            warm_up: Duration::ZERO,
            simulations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.inner.name)
    }

    pub fn steps(&self) -> &[Step] {
        &self.inner.steps
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.inner.steps.iter().map(Step::name)
    }

    pub fn warm_up(&self) -> Duration {
        self.inner.warm_up
    }

    pub fn load_simulations(&self) -> &[LoadSimulation] {
        &self.inner.simulations
    }

    /// Length of the measured window: the sum of all phase durations.
    pub fn measured_duration(&self) -> Duration {
        simulation::total_duration(&self.inner.simulations)
    }

    /// Rate used during warm-up: that of the first phase that injects anything.
    pub fn warm_up_rate(&self) -> f64 {
        self.inner
            .simulations
            .iter()
            .map(LoadSimulation::target_rate)
            .find(|rate| *rate > 0.0)
            .unwrap_or(0.0)
    }
}

/// Collects steps and load settings, validating them in [`ScenarioBuilder::build`].
#[derive(Debug)]
pub struct ScenarioBuilder {
    name: String,
    steps: Vec<Step>,
    warm_up: Duration,
    simulations: Vec<LoadSimulation>,
}

impl ScenarioBuilder {
    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn warm_up(mut self, duration: Duration) -> Self {
        self.warm_up = duration;
        self
    }

    pub fn load_simulations(mut self, phases: impl IntoIterator<Item = LoadSimulation>) -> Self {
        self.simulations.extend(phases);
        self
    }

    pub fn build(self) -> Result<Scenario, ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::NoSteps {
                scenario: self.name,
            });
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.steps.iter().find(|s| !seen.insert(s.name())) {
            return Err(ConfigError::DuplicateStep {
                step: dup.name().to_owned(),
                scenario: self.name,
            });
        }

        if self.simulations.is_empty() {
            return Err(ConfigError::NoLoadSimulations {
                scenario: self.name,
            });
        }

        if let Some(bad) = self.simulations.iter().find(|p| !p.has_valid_rate()) {
            return Err(ConfigError::InvalidRate {
                rate: bad.target_rate(),
                scenario: self.name,
            });
        }

        Ok(Scenario {
            inner: Arc::new(ScenarioInner {
                name: self.name.into(),
                steps: self.steps,
                warm_up: self.warm_up,
                simulations: self.simulations,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Response;

    fn noop(name: &str) -> Step {
        Step::new(name, |_| async { Response::ok() })
    }

    fn phase() -> LoadSimulation {
        LoadSimulation::inject_per_sec(10.0, Duration::from_secs(1))
    }

    #[test]
    fn rejects_scenario_without_steps() {
        let err = Scenario::builder("s")
            .load_simulations([phase()])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoSteps { .. }));
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let err = Scenario::builder("s")
            .steps([noop("a"), noop("b"), noop("a")])
            .load_simulations([phase()])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStep { step, .. } if step == "a"));
    }

    #[test]
    fn rejects_scenario_without_phases() {
        let err = Scenario::builder("s").step(noop("a")).build().unwrap_err();
        assert!(matches!(err, ConfigError::NoLoadSimulations { .. }));
    }

    #[test]
    fn rejects_negative_rate() {
        let err = Scenario::builder("s")
            .step(noop("a"))
            .load_simulations([LoadSimulation::inject_per_sec(-5.0, Duration::from_secs(1))])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRate { rate, .. } if rate == -5.0));
    }

    #[test]
    fn keeps_step_order_and_load_shape() {
        let scenario = Scenario::builder("s")
            .steps([noop("first"), noop("second"), noop("third")])
            .warm_up(Duration::from_secs(3))
            .load_simulations([
                LoadSimulation::pause(Duration::from_secs(1)),
                LoadSimulation::inject_per_sec(25.0, Duration::from_secs(2)),
            ])
            .build()
            .unwrap();

        assert_eq!(
            scenario.step_names().collect::<Vec<_>>(),
            ["first", "second", "third"]
        );
        assert_eq!(scenario.warm_up(), Duration::from_secs(3));
        assert_eq!(scenario.measured_duration(), Duration::from_secs(3));
        assert_eq!(scenario.warm_up_rate(), 25.0);
    }
}
