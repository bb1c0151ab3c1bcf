//! The `RateExecutor`: open-loop, slice-governed iteration injection.
//!
//! See the [module docs](super) for the lifecycle and the governor maths.

use std::{collections::VecDeque, iter, sync::Arc, time::Duration};

use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch},
    task::JoinSet,
    time::Instant,
};

use super::Executor;
use crate::{
    aggregate::{ScenarioAggregate, aggregator_task},
    config::RunnerConfig,
    error::StepFailure,
    metric::{Sample, StepRecord},
    report::ScenarioStats,
    scenario::Scenario,
    simulation::LoadSimulation,
    step::{Output, StepContext},
};
use internals::*;

/// Upper bound of the governor's token maths, kept far below `usize::MAX`.
const MAX_TOKENS: usize = usize::MAX >> 3;

/// Upper bound on iterations queued in a single slice; the rest are dropped.
const MAX_DUE_PER_SLICE: usize = 1 << 16;

/// Deadline used when the run ceiling does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Absorbs float error so e.g. ten slices of 0.1 add up to one iteration.
const CARRY_EPSILON: f64 = 1e-9;

/// Executor that governs iteration starts by slices of `tick` and runs them on
/// a bounded pool of concurrent tasks.
///
/// All knobs come from [`RunnerConfig`]: `tick`, `workers`, `max_lag`,
/// `drain_grace`, `call_timeout` and `sink_capacity`.
#[derive(Debug, Clone, Default)]
pub struct RateExecutor {
    config: RunnerConfig,
}

impl RateExecutor {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }
}

impl Executor for RateExecutor {
    async fn exec(&self, scenario: &Scenario) -> ScenarioStats {
        let cfg = &self.config;
        let now = Instant::now();
        let deadline = now
            .checked_add(cfg.hard_ceiling(scenario))
            .unwrap_or(now + FAR_FUTURE);
        let workers = cfg.workers_for(scenario);

        let (sink, rx) = mpsc::channel(cfg.sink_capacity);
        let aggregator =
            tokio::spawn(aggregator_task::<ScenarioAggregate>(rx, cfg.sink_capacity));
        let mut ctx = ExecutionContext::new(scenario.clone(), workers, sink, cfg);

        if !scenario.warm_up().is_zero() {
            tracing::info!(
                "Warming up scenario {} for {:?}...",
                scenario.name(),
                scenario.warm_up()
            );
            let warm_up = [LoadSimulation::inject_per_sec(
                scenario.warm_up_rate(),
                scenario.warm_up(),
            )];
            governor(&mut ctx, &warm_up, cfg.tick, false).await;
        }

        tracing::info!(
            "Measuring scenario {} for {:?} with {workers} workers...",
            scenario.name(),
            scenario.measured_duration()
        );
        governor(&mut ctx, scenario.load_simulations(), cfg.tick, true).await;

        tracing::info!(
            "Draining {} in-flight iterations of {}...",
            ctx.iterations.len(),
            scenario.name()
        );
        ctx.drain(deadline).await;
        // Closing our end of the sink lets the aggregator finish.
        drop(ctx);

        let agg = match aggregator.await {
            Ok(agg) => agg,
            Err(e) => {
                tracing::error!("Aggregator task failed: {e}");
                ScenarioAggregate::default()
            }
        };

        tracing::info!("Done running scenario: {}!", scenario.name());
        ScenarioStats::from_aggregate(
            scenario.name(),
            scenario.step_names(),
            &agg,
            scenario.measured_duration(),
        )
    }
}

/// Walk `phases` slice by slice, making iterations due and dispatching them.
///
/// Returns once the last slice has elapsed; anything still queued then is
/// reported as dropped.
async fn governor(
    ctx: &mut ExecutionContext,
    phases: &[LoadSimulation],
    tick: Duration,
    recording: bool,
) {
    let mut pending = VecDeque::new();
    let mut rate = 0.0;
    let mut fractional = 0.0;
    let mut phase_start = Instant::now();
    let count = phases.len();

    for (i, phase) in phases.iter().enumerate() {
        tracing::debug!("Starting phase {}/{count}: {phase:?}", i + 1);
        let duration = phase.duration();
        let (start_rate, end_rate) = phase.rate_bounds(rate);

        let mut elapsed = Duration::ZERO;
        while elapsed < duration {
            tokio::time::sleep_until(phase_start + elapsed).await;
            let slice = tick.min(duration - elapsed);
            let (due, f) =
                calc_token_limit(elapsed, duration, start_rate, end_rate, fractional, slice);
            fractional = f;

            let now = Instant::now();
            let room = ctx.workers.saturating_sub(pending.len());
            let queued = due.min(room).min(MAX_DUE_PER_SLICE);
            pending.extend(iter::repeat_n(now, queued));
            if due > queued {
                tracing::warn!(
                    "Dropped {} iterations of {}: more due than the pool can queue.",
                    due - queued,
                    ctx.scenario.name()
                );
                ctx.drop_iterations((due - queued) as u64, Duration::ZERO, recording)
                    .await;
            }
            ctx.dispatch(&mut pending, recording).await;
            elapsed += slice;
        }

        // Start the next phase exactly where this one ended, so slices don't drift.
        phase_start += duration;
        rate = end_rate;
    }

    tokio::time::sleep_until(phase_start).await;
    if !pending.is_empty() {
        tracing::warn!(
            "{} iterations of {} could not start before the window closed.",
            pending.len(),
            ctx.scenario.name()
        );
        let now = Instant::now();
        for due in pending.drain(..) {
            ctx.drop_iterations(1, now - due, recording).await;
        }
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Internal components of the `RateExecutor`.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use super::*;

    /// Shared state of one scenario run: the worker pool, the results sink and
    /// the cancellation signal every iteration listens to.
    pub struct ExecutionContext {
        pub scenario: Scenario,
        /// Free worker slots.
        pub pool: Arc<Semaphore>,
        /// Size of `pool`, also the bound on queued due iterations.
        pub workers: usize,
        pub sink: mpsc::Sender<Sample>,
        /// Flipped to `true` when the run deadline expires.
        pub shutdown: watch::Sender<bool>,
        pub iterations: JoinSet<()>,
        pub call_timeout: Duration,
        pub max_lag: Duration,
        next_iteration: u64,
    }

    impl ExecutionContext {
        pub fn new(
            scenario: Scenario,
            workers: usize,
            sink: mpsc::Sender<Sample>,
            config: &RunnerConfig,
        ) -> Self {
            let (shutdown, _) = watch::channel(false);
            Self {
                scenario,
                pool: Arc::new(Semaphore::new(workers)),
                workers,
                sink,
                shutdown,
                iterations: JoinSet::new(),
                call_timeout: config.call_timeout,
                max_lag: config.max_lag,
                next_iteration: 0,
            }
        }

        /// Expire stale due iterations, then start as many as there are free workers.
        pub async fn dispatch(&mut self, pending: &mut VecDeque<Instant>, recording: bool) {
            while self.iterations.try_join_next().is_some() {}

            let now = Instant::now();
            let mut dropped = 0usize;
            while let Some(&due) = pending.front() {
                let lag = now - due;
                if lag > self.max_lag {
                    pending.pop_front();
                    self.drop_iterations(1, lag, recording).await;
                    dropped += 1;
                    continue;
                }
                match Arc::clone(&self.pool).try_acquire_owned() {
                    Ok(permit) => {
                        pending.pop_front();
                        self.start_iteration(permit, recording).await;
                    }
                    // Pool saturated: defer the rest to the next slice.
                    Err(_) => break,
                }
            }

            if dropped > 0 {
                tracing::warn!(
                    "Dropped {dropped} iterations of {}: no free worker within {:?}.",
                    self.scenario.name(),
                    self.max_lag
                );
            }
        }

        pub async fn drop_iterations(&self, count: u64, lag: Duration, recording: bool) {
            if recording && self.sink.send(Sample::Dropped { count, lag }).await.is_err() {
                tracing::debug!("Results sink closed, discarding dropped iterations.");
            }
        }

        async fn start_iteration(&mut self, permit: OwnedSemaphorePermit, recording: bool) {
            let iteration = self.next_iteration;
            self.next_iteration += 1;

            let sink = if recording {
                if self.sink.send(Sample::Started).await.is_err() {
                    tracing::debug!("Results sink closed, discarding iteration start.");
                }
                Some(self.sink.clone())
            } else {
                None
            };
            let scenario = self.scenario.clone();
            let shutdown = self.shutdown.subscribe();
            let call_timeout = self.call_timeout;

            self.iterations.spawn(async move {
                // The worker slot is held until the last step is recorded.
                let _permit = permit;
                run_iteration(&scenario, iteration, call_timeout, shutdown, sink.as_ref()).await;
            });
        }

        /// Wait for in-flight iterations until `deadline`, then cancel the rest.
        pub async fn drain(&mut self, deadline: Instant) {
            let iterations = &mut self.iterations;
            let finished = tokio::time::timeout_at(deadline, async {
                while let Some(res) = iterations.join_next().await {
                    log_join_error(res);
                }
            })
            .await;

            if finished.is_err() {
                tracing::warn!(
                    "Run deadline of {} reached with {} iterations in flight, cancelling.",
                    self.scenario.name(),
                    self.iterations.len()
                );
                self.shutdown.send_replace(true);
                while let Some(res) = self.iterations.join_next().await {
                    log_join_error(res);
                }
            }
        }
    }

    fn log_join_error(res: Result<(), tokio::task::JoinError>) {
        if let Err(e) = res {
            tracing::error!("Iteration task failed: {e}");
        }
    }

    /// Run every step of `scenario` once, in order, threading each step's
    /// output into the next one.
    ///
    /// A failed step leaves the next one without previous output but never
    /// stops the iteration. Once `shutdown` fires, the step in flight and all
    /// steps after it are recorded as [`StepFailure::RunTimeout`].
    pub async fn run_iteration(
        scenario: &Scenario,
        iteration: u64,
        call_timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
        sink: Option<&mpsc::Sender<Sample>>,
    ) {
        let scenario_name = scenario.shared_name();
        let mut previous: Option<Output> = None;
        let mut cancelled = false;

        for step in scenario.steps() {
            let start = Instant::now();
            let result = if cancelled {
                Err(StepFailure::RunTimeout)
            } else {
                let ctx = StepContext::new(
                    Arc::clone(&scenario_name),
                    step.shared_name(),
                    iteration,
                    step.pull_feed(),
                    previous.take(),
                );
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for(|s| *s) => {
                        cancelled = true;
                        Err(StepFailure::RunTimeout)
                    }
                    res = tokio::time::timeout(call_timeout, step.execute(ctx)) => match res {
                        Ok(response) => response.into_result(),
                        Err(_) => Err(StepFailure::Timeout),
                    },
                }
            };
            let latency = start.elapsed();

            let record = match result {
                Ok(output) => {
                    previous = output;
                    StepRecord::ok(step.name(), iteration, latency)
                }
                Err(failure) => {
                    tracing::debug!(
                        "Step {} of iteration {iteration} failed: {failure}",
                        step.name()
                    );
                    StepRecord::failed(step.name(), iteration, latency, failure)
                }
            };

            if let Some(sink) = sink {
                if sink.send(Sample::Step(record)).await.is_err() {
                    tracing::debug!("Results sink closed, discarding step record.");
                }
            }
        }
    }

    /// Pure function to calculate how many iterations become due in a slice.
    ///
    /// It performs linear interpolation of the rate and carries any
    /// fractional iterations over to the next slice to maintain the long-term
    /// average rate.
    ///
    /// Returns `(due, next_fractional_part)`.
    pub fn calc_token_limit(
        elapsed: Duration,
        stage_duration: Duration,
        start_rate: f64,
        end_rate: f64,
        fractional: f64,
        slice: Duration,
    ) -> (usize, f64) {
        // Interpolation factor [0.0..1.0]
        let t = if stage_duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / stage_duration.as_secs_f64()).min(1.0)
        };
        let slice_rate = start_rate + (end_rate - start_rate) * t;
        let add_f = slice_rate * slice.as_secs_f64();

        let add_total_f = (add_f + fractional + CARRY_EPSILON).floor();
        let fractional = (add_f + fractional) - add_total_f;

        let add_total = if add_total_f >= MAX_TOKENS as f64 {
            MAX_TOKENS
        } else if add_total_f < 0.0 {
            0
        } else {
            add_total_f as usize
        };

        (add_total, fractional)
    }
}
