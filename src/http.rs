//! HTTP steps over [`reqwest`].
//!
//! An [`HttpStep`] is a [`Step`] whose call is one HTTP request, built per
//! invocation from the [`StepContext`], and whose check is a plain function
//! over the fully read [`HttpResponse`].

use std::{borrow::Cow, fmt, sync::Arc};

use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::StepFailure,
    feed::Feed,
    step::{FeedSource, Response, Step, StepContext, feed_source},
};

type BuildRequest = dyn Fn(&StepContext) -> Result<HttpRequest, StepFailure> + Send + Sync;
type Check = dyn Fn(&HttpResponse, &StepContext) -> Response + Send + Sync;

/// The outbound half of an HTTP step.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, StepFailure> {
        let body = serde_json::to_vec(value).map_err(StepFailure::transport)?;
        Ok(self
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    async fn send(self, client: &Client) -> Result<HttpResponse, reqwest::Error> {
        let mut builder = client.request(self.method, &self.url);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = self.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// A fully read response, handed to the check.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Builder of HTTP steps.
///
/// ```rust
/// use barrage::http::{HttpRequest, HttpStep};
/// use barrage::{Feed, Response, Step};
///
/// #[derive(serde::Deserialize)]
/// struct User { id: u64 }
///
/// let feed = Feed::random("users", ["1", "2", "3"]).unwrap();
/// let get_user: Step = HttpStep::create("get_user", reqwest::Client::new(), |ctx| {
///     let id = ctx.feed_item::<&str>().copied().unwrap_or_default();
///     Ok(HttpRequest::get(format!("http://localhost:3000/users?id={id}")))
/// })
/// .with_feed(feed)
/// .with_check(|res, _| match res.json::<Vec<User>>() {
///     Ok(users) if users.len() == 1 => Response::ok_with(users[0].id),
///     _ => Response::fail("user not found"),
/// })
/// .build();
/// ```
pub struct HttpStep {
    name: String,
    client: Client,
    request: Arc<BuildRequest>,
    check: Arc<Check>,
    feed: Option<Arc<FeedSource>>,
}

impl HttpStep {
    /// An HTTP step whose request is built by `request` on every invocation.
    ///
    /// The default check accepts any 2xx status.
    pub fn create<F>(name: impl Into<String>, client: Client, request: F) -> Self
    where
        F: Fn(&StepContext) -> Result<HttpRequest, StepFailure> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            client,
            request: Arc::new(request),
            check: Arc::new(status_check),
            feed: None,
        }
    }

    /// Bind a feed; the item is visible to both the request builder and the check.
    pub fn with_feed<T>(mut self, feed: Feed<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.feed = Some(feed_source(feed));
        self
    }

    pub fn with_check<C>(mut self, check: C) -> Self
    where
        C: Fn(&HttpResponse, &StepContext) -> Response + Send + Sync + 'static,
    {
        self.check = Arc::new(check);
        self
    }

    pub fn build(self) -> Step {
        let Self {
            name,
            client,
            request,
            check,
            feed,
        } = self;

        Step::new(name, move |ctx: StepContext| {
            let client = client.clone();
            let check = Arc::clone(&check);
            let request = request(&ctx);
            async move {
                let request = match request {
                    Ok(request) => request,
                    Err(failure) => return failure.into(),
                };
                match request.send(&client).await {
                    Ok(response) => check(&response, &ctx),
                    Err(e) => StepFailure::transport(e).into(),
                }
            }
        })
        .with_feed_source(feed)
    }
}

impl From<HttpStep> for Step {
    fn from(step: HttpStep) -> Self {
        step.build()
    }
}

impl fmt::Debug for HttpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStep")
            .field("name", &self.name)
            .field("has_feed", &self.feed.is_some())
            .finish()
    }
}

fn status_check(response: &HttpResponse, _: &StepContext) -> Response {
    if response.is_success() {
        Response::ok()
    } else {
        Response::fail(format!("unexpected status: {}", response.status))
    }
}
