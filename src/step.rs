use std::{any::Any, fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use crate::{error::StepFailure, feed::Feed};

/// Type-erased value handed from one step to the next (or out of a feed).
pub type Output = Arc<dyn Any + Send + Sync>;

type Action = dyn Fn(StepContext) -> BoxFuture<'static, Response> + Send + Sync;
pub(crate) type FeedSource = dyn Fn() -> Output + Send + Sync;

/// Per-invocation view a step gets of its iteration.
///
/// One context is built for every step invocation and dropped right after; it
/// carries the item pulled from the step's feed (if bound) and the output of
/// the immediately preceding step (if that step succeeded with a value).
#[derive(Clone)]
pub struct StepContext {
    scenario: Arc<str>,
    step: Arc<str>,
    iteration: u64,
    feed_item: Option<Output>,
    previous: Option<Output>,
}

impl StepContext {
    pub(crate) fn new(
        scenario: Arc<str>,
        step: Arc<str>,
        iteration: u64,
        feed_item: Option<Output>,
        previous: Option<Output>,
    ) -> Self {
        Self {
            scenario,
            step,
            iteration,
            feed_item,
            previous,
        }
    }

    pub fn scenario_name(&self) -> &str {
        &self.scenario
    }

    pub fn step_name(&self) -> &str {
        &self.step
    }

    /// Sequence number of the iteration within its scenario run.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The value pulled from this step's feed, if the step is bound to a feed of `T`.
    pub fn feed_item<T: 'static>(&self) -> Option<&T> {
        self.feed_item.as_deref()?.downcast_ref()
    }

    /// The previous step's output, if there is one and it is a `T`.
    pub fn previous<T: 'static>(&self) -> Option<&T> {
        self.previous.as_deref()?.downcast_ref()
    }

    /// Like [`StepContext::previous`], but fails fast for steps that cannot run without it.
    pub fn require_previous<T: 'static>(&self) -> Result<&T, StepFailure> {
        self.previous::<T>().ok_or(StepFailure::MissingPreviousOutput)
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("scenario", &self.scenario)
            .field("step", &self.step)
            .field("iteration", &self.iteration)
            .field("has_feed_item", &self.feed_item.is_some())
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

/// The verdict of one step invocation.
pub struct Response {
    result: Result<Option<Output>, StepFailure>,
}

impl Response {
    /// Success without a value for the next step.
    pub fn ok() -> Self {
        Self { result: Ok(None) }
    }

    /// Success, passing `value` on to the next step.
    pub fn ok_with<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            result: Ok(Some(Arc::new(value))),
        }
    }

    /// A failed check.
    pub fn fail(reason: impl Into<String>) -> Self {
        StepFailure::check(reason).into()
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        self.result.as_ref().err()
    }

    pub(crate) fn into_result(self) -> Result<Option<Output>, StepFailure> {
        self.result
    }
}

impl From<StepFailure> for Response {
    fn from(failure: StepFailure) -> Self {
        Self {
            result: Err(failure),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(out) => f
                .debug_struct("Ok")
                .field("has_output", &out.is_some())
                .finish(),
            Err(e) => f.debug_tuple("Fail").field(e).finish(),
        }
    }
}

/// A named unit of work: one outbound call plus its check.
///
/// Steps are stateless; everything an invocation needs arrives through its
/// [`StepContext`]. The action is stored as a shared function value so a step
/// can be cloned into every iteration without copying user state.
#[derive(Clone)]
pub struct Step {
    name: Arc<str>,
    feed: Option<Arc<FeedSource>>,
    action: Arc<Action>,
}

impl Step {
    /// A step whose action produces its own [`Response`].
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self {
            name: name.into().into(),
            feed: None,
            action: Arc::new(move |ctx| action(ctx).boxed()),
        }
    }

    /// A step split into a raw call and a check over the call's result.
    ///
    /// A call error becomes [`StepFailure::Transport`]; otherwise `check`
    /// decides the verdict and what to hand to the next step.
    pub fn call<F, Fut, R, E, C>(name: impl Into<String>, call: F, check: C) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: fmt::Display + Send + 'static,
        C: Fn(R, &StepContext) -> Response + Send + Sync + 'static,
    {
        let check = Arc::new(check);
        Self::new(name, move |ctx: StepContext| {
            let pending = call(ctx.clone());
            let check = Arc::clone(&check);
            async move {
                match pending.await {
                    Ok(raw) => check(raw, &ctx),
                    Err(e) => StepFailure::transport(e).into(),
                }
            }
        })
    }

    /// Bind a feed: every invocation pulls one item, visible via [`StepContext::feed_item`].
    pub fn with_feed<T>(mut self, feed: Feed<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.feed = Some(feed_source(feed));
        self
    }

    pub(crate) fn with_feed_source(mut self, source: Option<Arc<FeedSource>>) -> Self {
        self.feed = source;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub(crate) fn pull_feed(&self) -> Option<Output> {
        self.feed.as_ref().map(|source| source())
    }

    pub async fn execute(&self, ctx: StepContext) -> Response {
        (self.action)(ctx).await
    }
}

pub(crate) fn feed_source<T>(feed: Feed<T>) -> Arc<FeedSource>
where
    T: Clone + Send + Sync + 'static,
{
    Arc::new(move || Arc::new(feed.next()) as Output)
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("has_feed", &self.feed.is_some())
            .finish()
    }
}
