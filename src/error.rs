//! Error taxonomy.
//!
//! Only [`ConfigError`] is ever returned to the caller of [`crate::Runner::run`].
//! Step failures and dropped iterations are folded into the statistics instead.

use serde::{Deserialize, Serialize};

/// Invalid feed, scenario, simulation or runner construction.
///
/// Raised before any load is generated; a run never starts half-configured.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("empty feed source: {feed}")]
    EmptyFeed { feed: String },

    #[error("scenario '{scenario}' has no steps")]
    NoSteps { scenario: String },

    #[error("scenario '{scenario}' contains step '{step}' more than once")]
    DuplicateStep { scenario: String, step: String },

    #[error("scenario '{scenario}' has no load simulations")]
    NoLoadSimulations { scenario: String },

    #[error("scenario '{scenario}' has an invalid injection rate: {rate}")]
    InvalidRate { scenario: String, rate: f64 },

    #[error("no scenarios registered")]
    NoScenarios,

    #[error("scenario '{scenario}' is registered more than once")]
    DuplicateScenario { scenario: String },

    #[error("invalid runner configuration: {0}")]
    InvalidRunner(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single step invocation did not succeed.
///
/// The `Display` form is used as the key of the failure tally in
/// [`crate::report::StepStats::failures`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StepFailure {
    /// The user check rejected the response.
    #[error("{0}")]
    Check(String),

    /// The outbound call itself errored.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within the per-call timeout.
    #[error("timeout")]
    Timeout,

    /// The step needs the previous step's output and there is none.
    #[error("no previous output")]
    MissingPreviousOutput,

    /// The global run deadline expired while the iteration was in flight.
    #[error("run timeout")]
    RunTimeout,
}

impl StepFailure {
    pub fn check(reason: impl Into<String>) -> Self {
        Self::Check(reason.into())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
