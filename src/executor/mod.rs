//! Executor: orchestration of iteration scheduling and rate control
//!
//! The [`Executor`] trait is the runtime that drives one [`Scenario`] from
//! start to finished statistics. The built-in [`RateExecutor`] injects
//! iterations open-loop at the rate described by the scenario's
//! [`crate::LoadSimulation`] phases.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> WarmingUp -> Measuring -> Draining -> Completed
//! ```
//!
//! - **WarmingUp**: iterations run at the first phase's rate for the warm-up
//!   duration; nothing they produce is recorded.
//! - **Measuring**: the governor walks the phases; every step outcome of every
//!   iteration started here goes into the results sink.
//! - **Draining**: no new starts. In-flight iterations get until the hard
//!   ceiling (warm-up + phases + drain grace) to finish; whatever is still
//!   running then is cancelled and its remaining steps recorded as
//!   `run timeout`.
//! - **Completed**: the sink is closed and the aggregate turned into
//!   [`ScenarioStats`].
//!
//! # Mathematical behavior of the governor
//!
//! The measured window is cut into slices of `tick`. For a phase with
//! `start_rate` and `end_rate` over `duration`, the rate of the slice starting
//! at `elapsed` is interpolated linearly:
//!
//! ```text
//! t = elapsed / duration
//! r(t) = start_rate + (end_rate - start_rate) * t
//! ```
//!
//! and the number of iterations that become due in that slice is
//!
//! ```text
//! add_f = r(t) * slice_seconds
//! add_total = floor(add_f + fractional)
//! fractional = (add_f + fractional) - add_total
//! ```
//!
//! Carrying `fractional` across slices means a rate of 0.3 per slice still
//! yields three iterations every ten slices, so over a phase the number of
//! due iterations stays within one of `rate × duration`.
//!
//! # Backpressure
//!
//! Due iterations queue until a worker slot frees up; the pool is a
//! [`tokio::sync::Semaphore`] whose size bounds concurrently running
//! iterations. Each slice first expires queued iterations older than
//! `max_lag` (recorded as dropped, a scheduling failure distinct from step
//! failures) and then dispatches as many as there are free slots.
//! Iterations still queued when the measured window closes are dropped too.
//! The queue never holds more than the pool size, and a single slice queues
//! at most a fixed number of iterations; whatever exceeds either bound is
//! dropped on the spot.
pub mod rate;
pub use rate::RateExecutor;

use std::future::Future;

use crate::{report::ScenarioStats, scenario::Scenario};

/// The runtime hook that executes a `Scenario`.
pub trait Executor
where
    Self: Send + Sync,
{
    /// Run the scenario's full lifecycle and return its finalized statistics.
    fn exec(&self, scenario: &Scenario) -> impl Future<Output = ScenarioStats> + Send;
}
