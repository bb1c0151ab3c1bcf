//! Barrage: a small load-testing harness for Rust.
//!
//! A load test is a set of [`Scenario`]s, each an ordered chain of [`Step`]s
//! driven open-loop at the rate its [`LoadSimulation`] phases describe. The
//! [`Runner`] runs every scenario concurrently and hands back a [`RunResult`]
//! with per-step counts, throughput and latency percentiles, which a
//! [`Reporter`] can send somewhere and a test can assert thresholds on.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Feed`]: a named pool of test data that steps pull one item from per call.
//! - [`Step`]: one outbound call plus its check, returning a [`Response`]. A
//!   successful step may hand a value to the next step through its
//!   [`StepContext`].
//! - [`Scenario`]: the step chain plus warm-up and load phases.
//! - [`Executor`]: drives one scenario. The built-in [`RateExecutor`] cuts time
//!   into slices, makes iterations due at the configured rate and runs them on a
//!   bounded worker pool.
//! - [`Metric`] and [`Aggregate`]: raw per-step samples and the collectors that
//!   fold them into compact state, independent of arrival order.
//! - [`Reporter`]: consumes the finished [`RunResult`] (stdout, JSON file).
//! - [`WorkerPlugin`]: auxiliary measurements, like [`PingPlugin`], running
//!   beside the scenarios for the whole run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use barrage::{Feed, LoadSimulation, Response, Runner, Scenario, Step};
//!
//! # async fn run() -> Result<(), barrage::ConfigError> {
//! let ids = Feed::random("ids", ["1", "2", "3"])?;
//! let lookup = Step::new("lookup", |ctx| async move {
//!     match ctx.feed_item::<&str>() {
//!         Some(id) => Response::ok_with(id.to_string()),
//!         None => Response::fail("no id"),
//!     }
//! })
//! .with_feed(ids);
//!
//! let scenario = Scenario::builder("lookups")
//!     .step(lookup)
//!     .warm_up(Duration::from_secs(5))
//!     .load_simulations([LoadSimulation::inject_per_sec(100.0, Duration::from_secs(30))])
//!     .build()?;
//!
//! let result = Runner::register_scenarios([scenario]).run().await?;
//! assert!(result.all_steps().all(|s| s.latency.p95_ms <= 500.0));
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//! - `internals`: enable access to internal (and unstable) functions of the
//!   scheduler, such as the governor maths and the iteration driver

/// Metric aggregators
pub mod aggregate;
/// Run configuration
pub mod config;
pub mod error;
/// Orchestrators that define how scenarios actually run
pub mod executor;
/// Test data sources
pub mod feed;
pub mod http;
/// Single samples
pub mod metric;
/// Auxiliary measurements run beside the scenarios
pub mod plugin;
/// Statistics, run results and reporters
pub mod report;
pub mod runner;
pub mod scenario;
/// Load shapes
pub mod simulation;
pub mod step;

pub use aggregate::Aggregate;
pub use config::RunnerConfig;
pub use error::{ConfigError, StepFailure};
pub use executor::{Executor, RateExecutor};
pub use feed::{Feed, FeedStrategy};
pub use http::{HttpRequest, HttpResponse, HttpStep};
pub use metric::Metric;
pub use plugin::{PingPlugin, PingPluginConfig, PluginStats, WorkerPlugin};
pub use report::{
    JsonReporter, LatencyStats, Reporter, RunResult, ScenarioStats, StdoutReporter, StepStats,
};
pub use runner::Runner;
pub use scenario::Scenario;
pub use simulation::LoadSimulation;
pub use step::{Response, Step, StepContext};
