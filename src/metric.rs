use std::{fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::StepFailure;

/// A `Metric` is a single observation pushed into the results sink.
///
/// Metrics are the most granular level of data the runner produces. They are
/// later folded by an [`crate::Aggregate`] and turned into statistics by the
/// [`crate::report`] layer. Metrics must be cheap to move between tasks.
pub trait Metric
where
    Self: Send + Sync + Debug + Clone + 'static,
{
}

/// Outcome of one step invocation within one measured iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub iteration: u64,
    /// Wall clock from call issuance until the check returned.
    pub latency: Duration,
    pub outcome: Result<(), StepFailure>,
}

impl StepRecord {
    pub fn ok(step: impl Into<String>, iteration: u64, latency: Duration) -> Self {
        Self {
            step: step.into(),
            iteration,
            latency,
            outcome: Ok(()),
        }
    }

    pub fn failed(
        step: impl Into<String>,
        iteration: u64,
        latency: Duration,
        failure: StepFailure,
    ) -> Self {
        Self {
            step: step.into(),
            iteration,
            latency,
            outcome: Err(failure),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl Metric for StepRecord {}

/// Everything that flows through a scenario's results sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sample {
    /// A measured iteration was dispatched onto the worker pool.
    Started,
    /// One step of a measured iteration finished.
    Step(StepRecord),
    /// `count` due iterations could not be dispatched: no worker freed up
    /// within the lag budget, or the slice made more due than can be queued.
    Dropped { count: u64, lag: Duration },
}

impl Metric for Sample {}
