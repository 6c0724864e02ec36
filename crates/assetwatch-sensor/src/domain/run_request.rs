//! What a sensor evaluation can yield.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

/// A request to launch one run of a target job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunRequest {
    /// Idempotency key; the scheduler launches at most one run per key.
    pub run_key: Option<String>,
    /// Target job. Required when the sensor targets more than one job.
    pub job_name: Option<String>,
    /// Run configuration passed to the job.
    pub run_config: serde_json::Value,
    /// Tags attached to the launched run.
    pub tags: BTreeMap<String, String>,
    /// Partition to launch, for partitioned jobs.
    pub partition_key: Option<String>,
    /// Cursor to persist for standard sensors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl RunRequest {
    /// Creates a request with no run key, job or config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_config: serde_json::json!({}),
            ..Self::default()
        }
    }

    /// Sets the run key.
    #[must_use]
    pub fn with_run_key(mut self, run_key: impl Into<String>) -> Self {
        self.run_key = Some(run_key.into());
        self
    }

    /// Targets a specific job.
    #[must_use]
    pub fn for_job(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    /// Sets the run configuration.
    #[must_use]
    pub fn with_run_config(mut self, run_config: serde_json::Value) -> Self {
        self.run_config = run_config;
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Sets the partition key.
    #[must_use]
    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    /// Attaches a cursor update.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Why a tick did not request any runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipReason {
    /// Human-readable explanation.
    pub message: Option<String>,
    /// Cursor to persist for standard sensors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl SkipReason {
    /// Creates a skip with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            cursor: None,
        }
    }

    /// Attaches a cursor update.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// Legacy reaction to the state of an existing run. Carried through to the
/// tick result untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReaction {
    /// The run being reacted to.
    pub run_id: Uuid,
    /// Error raised while reacting, if any.
    pub error: Option<String>,
}

/// One item yielded by a sensor evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorResult {
    /// Launch a run.
    RunRequest(RunRequest),
    /// Skip this tick.
    SkipReason(SkipReason),
    /// React to an existing run.
    RunReaction(RunReaction),
}

impl SensorResult {
    /// The cursor attached to this item, if any.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        match self {
            Self::RunRequest(request) => request.cursor.as_deref(),
            Self::SkipReason(skip) => skip.cursor.as_deref(),
            Self::RunReaction(_) => None,
        }
    }
}

impl From<RunRequest> for SensorResult {
    fn from(value: RunRequest) -> Self {
        Self::RunRequest(value)
    }
}

impl From<SkipReason> for SensorResult {
    fn from(value: SkipReason) -> Self {
        Self::SkipReason(value)
    }
}

impl From<RunReaction> for SensorResult {
    fn from(value: RunReaction) -> Self {
        Self::RunReaction(value)
    }
}

/// Everything an evaluation returned.
///
/// A bare item and a one-element sequence are kept apart: multi-asset sensors
/// treat a bare `SkipReason` as "nothing handled" while any sequence counts as
/// handled output.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SensorOutput {
    /// The evaluation returned nothing.
    #[default]
    Nothing,
    /// A single bare item.
    Item(SensorResult),
    /// A sequence of items, possibly empty.
    Items(Vec<SensorResult>),
}

impl SensorOutput {
    /// Shorthand for a bare skip.
    #[must_use]
    pub fn skip(message: impl Into<String>) -> Self {
        Self::Item(SensorResult::SkipReason(SkipReason::new(message)))
    }

    /// Shorthand for a sequence of run requests.
    #[must_use]
    pub fn runs(requests: impl IntoIterator<Item = RunRequest>) -> Self {
        Self::Items(requests.into_iter().map(SensorResult::RunRequest).collect())
    }

    /// The yielded items in order.
    #[must_use]
    pub fn items(&self) -> &[SensorResult] {
        match self {
            Self::Nothing => &[],
            Self::Item(item) => std::slice::from_ref(item),
            Self::Items(items) => items,
        }
    }

    /// Consumes the output, returning its items.
    #[must_use]
    pub fn into_items(self) -> Vec<SensorResult> {
        match self {
            Self::Nothing => Vec::new(),
            Self::Item(item) => vec![item],
            Self::Items(items) => items,
        }
    }

    /// The last cursor attached to any item.
    #[must_use]
    pub fn item_cursor(&self) -> Option<&str> {
        self.items().iter().rev().find_map(SensorResult::cursor)
    }
}

impl From<RunRequest> for SensorOutput {
    fn from(value: RunRequest) -> Self {
        Self::Item(value.into())
    }
}

impl From<SkipReason> for SensorOutput {
    fn from(value: SkipReason) -> Self {
        Self::Item(value.into())
    }
}

impl From<Vec<SensorResult>> for SensorOutput {
    fn from(value: Vec<SensorResult>) -> Self {
        Self::Items(value)
    }
}
