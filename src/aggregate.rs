use std::{collections::BTreeMap, fmt::Debug, time::Duration};

use hdrhistogram::Histogram;
use tokio::sync::mpsc;

use crate::metric::{Metric, Sample, StepRecord};

/// Upper bound of the latency histograms, in microseconds (one hour).
const MAX_TRACKED_LATENCY_US: u64 = 3_600_000_000;
/// Significant decimal digits kept by the latency histograms.
const LATENCY_SIGFIG: u8 = 3;

/// The `Aggregate` trait defines how raw [`Metric`] values are folded into an
/// intermediate, mergeable representation.
///
/// Aggregates store counts and distributions only; percentiles and rates are
/// derived later by the [`crate::report`] layer. Because `merge` is associative
/// and commutative, records may be consumed in any interleaving, in one pass
/// or streamed in chunks, and the derived statistics come out identical.
///
/// # Example
/// ```rust
/// use barrage::{Aggregate, aggregate::StepAggregate, metric::StepRecord};
/// use std::time::Duration;
///
/// let mut agg = StepAggregate::new();
/// agg.consume(&StepRecord::ok("get_user", 0, Duration::from_millis(12)));
/// assert_eq!(agg.ok_count, 1);
/// ```
pub trait Aggregate
where
    Self: Send + Debug + Clone + 'static,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Raw tallies for a single step name.
///
/// Latencies of successful attempts go into an HDR histogram with microsecond
/// resolution; failed attempts only count towards the totals.
#[derive(Debug, Clone)]
pub struct StepAggregate {
    pub count: u64,
    pub ok_count: u64,
    pub fail_count: u64,
    /// Failure reason → occurrences.
    pub failures: BTreeMap<String, u64>,
    pub latencies: Histogram<u64>,
}

impl StepAggregate {
    fn empty_histogram() -> Histogram<u64> {
        Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, LATENCY_SIGFIG)
            .expect("constant histogram bounds are valid")
    }
}

impl Aggregate for StepAggregate {
    type Metric = StepRecord;

    fn new() -> Self {
        Self {
            count: 0,
            ok_count: 0,
            fail_count: 0,
            failures: BTreeMap::new(),
            latencies: Self::empty_histogram(),
        }
    }

    fn consume(&mut self, record: &StepRecord) {
        self.count += 1;
        match &record.outcome {
            Ok(()) => {
                self.ok_count += 1;
                self.latencies.saturating_record(as_micros(record.latency));
            }
            Err(failure) => {
                self.fail_count += 1;
                *self.failures.entry(failure.to_string()).or_default() += 1;
            }
        }
    }

    fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.ok_count += other.ok_count;
        self.fail_count += other.fail_count;
        for (reason, n) in other.failures {
            *self.failures.entry(reason).or_default() += n;
        }
        // Both sides share the same fixed bounds, so this cannot overflow the range.
        if let Err(e) = self.latencies.add(&other.latencies) {
            tracing::warn!("Failed to merge latency histograms: {e:?}");
        }
    }
}

/// Everything recorded for one scenario run, keyed by step name.
#[derive(Debug, Clone, Default)]
pub struct ScenarioAggregate {
    /// Measured iterations dispatched onto the worker pool.
    pub started: u64,
    /// Iterations that never got a worker within the lag budget.
    pub dropped: u64,
    pub steps: BTreeMap<String, StepAggregate>,
}

impl Aggregate for ScenarioAggregate {
    type Metric = Sample;

    fn new() -> Self {
        Self::default()
    }

    fn consume(&mut self, sample: &Sample) {
        match sample {
            Sample::Started => self.started += 1,
            Sample::Dropped { count, .. } => self.dropped += count,
            Sample::Step(record) => self
                .steps
                .entry(record.step.clone())
                .or_insert_with(StepAggregate::new)
                .consume(record),
        }
    }

    fn merge(&mut self, other: Self) {
        self.started += other.started;
        self.dropped += other.dropped;
        for (name, agg) in other.steps {
            match self.steps.get_mut(&name) {
                Some(existing) => existing.merge(agg),
                None => {
                    self.steps.insert(name, agg);
                }
            }
        }
    }
}

fn as_micros(latency: Duration) -> u64 {
    u64::try_from(latency.as_micros()).unwrap_or(u64::MAX)
}

/// Tokio task that drains the results sink into a single aggregate.
///
/// Whatever is already queued behind the first received metric is pulled in
/// the same batch (up to `batch_size`) so bursts are folded with one wakeup.
/// The task ends, returning the aggregate, once every sender is dropped.
pub async fn aggregator_task<A: Aggregate>(
    mut rx: mpsc::Receiver<A::Metric>,
    batch_size: usize,
) -> A {
    let mut agg = A::new();
    let mut batch = Vec::with_capacity(batch_size);

    while let Some(metric) = rx.recv().await {
        batch.push(metric);

        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(metric) => batch.push(metric),
                Err(_) => break,
            }
        }

        agg.aggregate(&batch);
        batch.clear();
    }
    agg
}
