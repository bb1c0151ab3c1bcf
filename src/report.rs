use std::{collections::BTreeMap, fmt, future::Future, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{Aggregate, ScenarioAggregate, StepAggregate},
    metric::Sample,
    plugin::PluginStats,
};

/// Latency distribution over successful attempts, in milliseconds.
///
/// Quantiles come from an HDR histogram (`value_at_quantile`, three
/// significant digits), which is deterministic for a given multiset of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    fn from_aggregate(agg: &StepAggregate) -> Self {
        let h = &agg.latencies;
        if h.len() == 0 {
            return Self::default();
        }
        let ms = |us: u64| us as f64 / 1_000.0;
        Self {
            min_ms: ms(h.min()),
            mean_ms: h.mean() / 1_000.0,
            max_ms: ms(h.max()),
            p50_ms: ms(h.value_at_quantile(0.50)),
            p75_ms: ms(h.value_at_quantile(0.75)),
            p95_ms: ms(h.value_at_quantile(0.95)),
            p99_ms: ms(h.value_at_quantile(0.99)),
        }
    }
}

/// Final statistics of a single step across all measured iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub step_name: String,
    pub request_count: u64,
    pub ok_count: u64,
    pub fail_count: u64,
    /// Successful requests per second of measured window.
    pub rps: f64,
    pub latency: LatencyStats,
    /// Failure reason → occurrences.
    pub failures: BTreeMap<String, u64>,
}

impl StepStats {
    pub fn from_aggregate(
        step_name: impl Into<String>,
        agg: &StepAggregate,
        window: Duration,
    ) -> Self {
        let secs = window.as_secs_f64();
        Self {
            step_name: step_name.into(),
            request_count: agg.count,
            ok_count: agg.ok_count,
            fail_count: agg.fail_count,
            rps: if secs > 0.0 {
                agg.ok_count as f64 / secs
            } else {
                0.0
            },
            latency: LatencyStats::from_aggregate(agg),
            failures: agg.failures.clone(),
        }
    }
}

/// Statistics of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub scenario_name: String,
    /// Measured iterations that got a worker.
    pub iterations_started: u64,
    /// Iterations counted as scheduling failures.
    pub iterations_dropped: u64,
    pub measured_window: Duration,
    /// One entry per scenario step, in step order.
    pub steps: Vec<StepStats>,
}

impl ScenarioStats {
    /// Derive per-step statistics. Every name in `step_names` gets an entry,
    /// even if it never ran.
    pub fn from_aggregate<'a>(
        scenario_name: impl Into<String>,
        step_names: impl IntoIterator<Item = &'a str>,
        agg: &ScenarioAggregate,
        window: Duration,
    ) -> Self {
        let empty = StepAggregate::new();
        let steps = step_names
            .into_iter()
            .map(|name| {
                let step = agg.steps.get(name).unwrap_or(&empty);
                StepStats::from_aggregate(name, step, window)
            })
            .collect();
        Self {
            scenario_name: scenario_name.into(),
            iterations_started: agg.started,
            iterations_dropped: agg.dropped,
            measured_window: window,
            steps,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepStats> {
        self.steps.iter().find(|s| s.step_name == name)
    }
}

/// Pure one-pass reduction of a scenario's samples into its statistics.
pub fn aggregate<'a>(
    scenario_name: impl Into<String>,
    step_names: impl IntoIterator<Item = &'a str>,
    samples: &[Sample],
    window: Duration,
) -> ScenarioStats {
    let mut agg = ScenarioAggregate::new();
    agg.aggregate(samples);
    ScenarioStats::from_aggregate(scenario_name, step_names, &agg, window)
}

/// Immutable snapshot produced at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_suite: String,
    pub test_name: String,
    /// Wall-clock length of the whole run, warm-up and drain included.
    pub duration: Duration,
    pub scenarios: Vec<ScenarioStats>,
    pub plugins: Vec<PluginStats>,
}

impl RunResult {
    pub fn scenario(&self, name: &str) -> Option<&ScenarioStats> {
        self.scenarios.iter().find(|s| s.scenario_name == name)
    }

    /// Every step of every scenario, for blanket threshold assertions.
    pub fn all_steps(&self) -> impl Iterator<Item = &StepStats> {
        self.scenarios.iter().flat_map(|s| s.steps.iter())
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginStats> {
        self.plugins.iter().find(|p| p.plugin_name == name)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "test suite: {}, test name: {}, duration: {:.1}s",
            self.test_suite,
            self.test_name,
            self.duration.as_secs_f64()
        )?;
        for sc in &self.scenarios {
            writeln!(
                f,
                "scenario: {} (window {:.1}s, iterations started {}, dropped {})",
                sc.scenario_name,
                sc.measured_window.as_secs_f64(),
                sc.iterations_started,
                sc.iterations_dropped
            )?;
            writeln!(
                f,
                "  {:<20} {:>8} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9}",
                "step", "ok", "fail", "rps", "p50 ms", "p75 ms", "p95 ms", "p99 ms"
            )?;
            for st in &sc.steps {
                writeln!(
                    f,
                    "  {:<20} {:>8} {:>8} {:>8.1} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
                    st.step_name,
                    st.ok_count,
                    st.fail_count,
                    st.rps,
                    st.latency.p50_ms,
                    st.latency.p75_ms,
                    st.latency.p95_ms,
                    st.latency.p99_ms
                )?;
                for (reason, n) in &st.failures {
                    writeln!(f, "    {n} x {reason}")?;
                }
            }
        }
        for plugin in &self.plugins {
            writeln!(f, "plugin: {} {}", plugin.plugin_name, plugin.data)?;
        }
        Ok(())
    }
}

/// A [`Reporter`] sends a finished [`RunResult`] somewhere: the terminal, a
/// file, a metrics service.
///
/// Reporters are the I/O boundary; everything before them is pure data.
pub trait Reporter {
    type Error;

    fn report(&self, result: &RunResult) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Prints the human-readable table to stdout.
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    type Error = std::convert::Infallible;

    async fn report(&self, result: &RunResult) -> Result<(), Self::Error> {
        println!("{result}");
        Ok(())
    }
}

/// Writes the run result as pretty JSON to `path`.
pub struct JsonReporter {
    pub path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JsonReportError {
    #[error("failed to serialize run result: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

impl Reporter for JsonReporter {
    type Error = JsonReportError;

    async fn report(&self, result: &RunResult) -> Result<(), Self::Error> {
        let body = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(&self.path, body).await?;
        tracing::info!("Report written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::StepFailure, metric::StepRecord};

    fn samples() -> Vec<Sample> {
        let mut out = Vec::new();
        for i in 0..200u64 {
            out.push(Sample::Started);
            let latency = Duration::from_micros(500 + (i * 7919) % 40_000);
            out.push(Sample::Step(StepRecord::ok("get_user", i, latency)));
            let posts = if i % 10 == 0 {
                StepRecord::failed("get_posts", i, latency, StepFailure::check("no posts"))
            } else {
                StepRecord::ok("get_posts", i, latency * 2)
            };
            out.push(Sample::Step(posts));
        }
        out
    }

    const STEPS: [&str; 2] = ["get_user", "get_posts"];

    #[test]
    fn aggregation_is_deterministic_across_chunkings() {
        let all = samples();
        let window = Duration::from_secs(5);

        let once = aggregate("users", STEPS, &all, window);
        let again = aggregate("users", STEPS, &all, window);
        assert_eq!(once, again);

        let (head, tail) = all.split_at(all.len() / 2);
        let mut streamed = ScenarioAggregate::new();
        streamed.aggregate(head);
        streamed.aggregate(tail);
        let streamed = ScenarioStats::from_aggregate("users", STEPS, &streamed, window);
        assert_eq!(once, streamed);

        let mut reversed: Vec<_> = all.clone();
        reversed.reverse();
        assert_eq!(once, aggregate("users", STEPS, &reversed, window));
    }

    #[test]
    fn percentiles_are_monotonic() {
        let stats = aggregate("users", STEPS, &samples(), Duration::from_secs(5));
        for st in &stats.steps {
            let l = st.latency;
            assert!(l.min_ms <= l.p50_ms);
            assert!(l.p50_ms <= l.p75_ms);
            assert!(l.p75_ms <= l.p95_ms);
            assert!(l.p95_ms <= l.p99_ms);
            assert!(l.p99_ms <= l.max_ms);
        }
    }

    #[test]
    fn rate_counts_successes_over_window() {
        let stats = aggregate("users", STEPS, &samples(), Duration::from_secs(5));
        let user = stats.step("get_user").unwrap();
        let posts = stats.step("get_posts").unwrap();

        assert_eq!(stats.iterations_started, 200);
        assert_eq!(user.rps, 40.0);
        assert_eq!(posts.request_count, 200);
        assert_eq!(posts.fail_count, 20);
        assert_eq!(posts.rps, 36.0);
        assert_eq!(posts.failures.get("no posts"), Some(&20));
    }

    #[test]
    fn unseen_steps_still_get_an_entry() {
        let stats = aggregate("users", STEPS, &[], Duration::from_secs(1));
        assert_eq!(stats.steps.len(), 2);
        assert_eq!(stats.steps[1].request_count, 0);
        assert_eq!(stats.steps[1].latency, LatencyStats::default());
    }

    #[test]
    fn zero_window_yields_zero_rate() {
        let stats = aggregate("users", STEPS, &samples(), Duration::ZERO);
        assert!(stats.steps.iter().all(|s| s.rps == 0.0));
    }

    fn result() -> RunResult {
        RunResult {
            test_suite: "http".into(),
            test_name: "advanced_test".into(),
            duration: Duration::from_secs(12),
            scenarios: vec![aggregate("users", STEPS, &samples(), Duration::from_secs(5))],
            plugins: vec![],
        }
    }

    #[test]
    fn display_lists_every_step() {
        let text = result().to_string();
        assert!(text.contains("advanced_test"));
        assert!(text.contains("get_user"));
        assert!(text.contains("20 x no posts"));
    }

    #[tokio::test]
    async fn json_reporter_round_trips_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let result = result();

        JsonReporter::new(&path).report(&result).await.unwrap();

        let written: RunResult = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.scenarios[0].steps.len(), 2);
        assert_eq!(written.all_steps().count(), result.all_steps().count());
    }
}
