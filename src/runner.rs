use std::{collections::HashSet, sync::Arc};

use futures::future::join_all;
use tokio::time::Instant;

use crate::{
    config::RunnerConfig,
    error::ConfigError,
    executor::{Executor, RateExecutor},
    plugin::{PluginHost, WorkerPlugin},
    report::RunResult,
    scenario::Scenario,
};

/// Entry point of a load test: registered scenarios, worker plugins and the
/// run configuration.
///
/// All scenarios run concurrently, each with its own worker pool and results
/// sink; plugins run beside them for the whole run.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use barrage::{LoadSimulation, Response, Runner, Scenario, Step};
///
/// # async fn run() -> Result<(), barrage::ConfigError> {
/// let scenario = Scenario::builder("noop")
///     .step(Step::new("noop", |_| async { Response::ok() }))
///     .load_simulations([LoadSimulation::inject_per_sec(10.0, Duration::from_secs(5))])
///     .build()?;
///
/// let result = Runner::register_scenarios([scenario])
///     .with_test_suite("smoke")
///     .run()
///     .await?;
/// println!("{result}");
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Runner {
    scenarios: Vec<Scenario>,
    plugins: Vec<Arc<dyn WorkerPlugin>>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_scenarios(scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        Self::new().with_scenarios(scenarios)
    }

    pub fn with_scenarios(mut self, scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        self.scenarios.extend(scenarios);
        self
    }

    pub fn with_worker_plugins(
        mut self,
        plugins: impl IntoIterator<Item = Arc<dyn WorkerPlugin>>,
    ) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_test_suite(mut self, test_suite: impl Into<String>) -> Self {
        self.config.test_suite = test_suite.into();
        self
    }

    pub fn with_test_name(mut self, test_name: impl Into<String>) -> Self {
        self.config.test_name = test_name.into();
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        if self.scenarios.is_empty() {
            return Err(ConfigError::NoScenarios);
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.scenarios.iter().find(|s| !seen.insert(s.name())) {
            return Err(ConfigError::DuplicateScenario {
                scenario: dup.name().to_owned(),
            });
        }
        Ok(())
    }

    /// Run every registered scenario to completion.
    ///
    /// Only configuration problems are errors; everything that goes wrong
    /// while running is recorded in the returned statistics.
    pub async fn run(&self) -> Result<RunResult, ConfigError> {
        self.validate()?;

        tracing::info!(
            "Starting test {}/{}: {} scenarios, {} plugins.",
            self.config.test_suite,
            self.config.test_name,
            self.scenarios.len(),
            self.plugins.len()
        );
        let started = Instant::now();
        let plugins = PluginHost::start(&self.plugins);

        let executor = RateExecutor::new(self.config.clone());
        let scenarios = join_all(self.scenarios.iter().map(|s| executor.exec(s))).await;

        let plugins = plugins.stop().await;
        let duration = started.elapsed();
        tracing::info!(
            "Test {}/{} finished in {duration:?}.",
            self.config.test_suite,
            self.config.test_name
        );

        Ok(RunResult {
            test_suite: self.config.test_suite.clone(),
            test_name: self.config.test_name.clone(),
            duration,
            scenarios,
            plugins,
        })
    }
}
