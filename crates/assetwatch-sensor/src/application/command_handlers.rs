//! Command handlers for the sensor evaluation context.
//!
//! `handle_evaluate_tick` drives one tick: build the context from the prior
//! cursor, run the sensor's logic, finalize the cursor and validate what was
//! yielded. Nothing is persisted here; the caller stores `next_cursor` only
//! when the tick succeeds.

use std::fmt;
use std::sync::Arc;

use assetwatch_core::clock::Clock;
use assetwatch_core::command::Command;
use assetwatch_core::error::DomainError;
use assetwatch_core::event_log::{EventLogStore, EventRecordsFilter, SortOrder};
use serde::Serialize;
use tracing::{debug, info};

use crate::application::context::SensorContext;
use crate::application::multi_asset_context::MultiAssetSensorContext;
use crate::application::registry::{EvaluationFn, SensorRepository};
use crate::domain::commands::EvaluateSensorTick;
use crate::domain::definition::SensorDefinition;
use crate::domain::run_request::{RunReaction, RunRequest, SensorOutput, SensorResult};

/// Skip message used when an evaluation yields nothing.
pub const EMPTY_RESULT_MESSAGE: &str = "Sensor function returned an empty result";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickPhase {
    Pending,
    Evaluating,
    Finalized,
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Evaluating => "evaluating",
            Self::Finalized => "finalized",
        })
    }
}

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// No runs were requested.
    Skipped,
    /// At least one run was requested.
    RunRequested,
    /// Only run reactions were yielded.
    Reacted,
}

/// Validated output of one evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorExecutionData {
    /// Requested runs.
    pub run_requests: Vec<RunRequest>,
    /// Skip message; never set together with run requests.
    pub skip_message: Option<String>,
    /// Reactions to existing runs.
    pub run_reactions: Vec<RunReaction>,
}

impl SensorExecutionData {
    /// Splits evaluation output into run requests, skip message and
    /// reactions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if a skip is mixed with run
    /// requests or reactions, or if more than one skip was yielded.
    pub fn from_output(output: SensorOutput) -> Result<Self, DomainError> {
        let items = output.into_items();
        if items.is_empty() {
            return Ok(Self {
                skip_message: Some(EMPTY_RESULT_MESSAGE.to_owned()),
                ..Self::default()
            });
        }

        let mut data = Self::default();
        let mut skips = 0_usize;
        for item in items {
            match item {
                SensorResult::RunRequest(request) => data.run_requests.push(request),
                SensorResult::RunReaction(reaction) => data.run_reactions.push(reaction),
                SensorResult::SkipReason(skip) => {
                    skips += 1;
                    data.skip_message = skip.message;
                }
            }
        }

        if skips > 0 {
            if !data.run_requests.is_empty() {
                return Err(DomainError::InvariantViolation(
                    "expected a single SkipReason or one or more RunRequests: received both \
                     RunRequest and SkipReason"
                        .to_owned(),
                ));
            }
            if !data.run_reactions.is_empty() {
                return Err(DomainError::InvariantViolation(
                    "expected a single SkipReason or one or more RunReactions: received both \
                     RunReaction and SkipReason"
                        .to_owned(),
                ));
            }
            if skips > 1 {
                return Err(DomainError::InvariantViolation(
                    "expected a single SkipReason: received multiple SkipReasons".to_owned(),
                ));
            }
        }
        Ok(data)
    }

    /// The tick outcome these results represent.
    #[must_use]
    pub fn outcome(&self) -> TickOutcome {
        if !self.run_requests.is_empty() {
            TickOutcome::RunRequested
        } else if !self.run_reactions.is_empty() {
            TickOutcome::Reacted
        } else {
            TickOutcome::Skipped
        }
    }
}

/// Result of one tick handed back to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickResult {
    /// How the tick ended.
    pub outcome: TickOutcome,
    /// Requested runs.
    pub run_requests: Vec<RunRequest>,
    /// Skip message, if the tick skipped.
    pub skip_message: Option<String>,
    /// Cursor to persist for the next tick.
    pub next_cursor: Option<String>,
    /// Reactions to existing runs.
    pub run_reactions: Vec<RunReaction>,
    /// Non-fatal issues raised while evaluating.
    pub warnings: Vec<String>,
}

struct Evaluated {
    output: SensorOutput,
    next_cursor: Option<String>,
    warnings: Vec<String>,
}

fn apply_item_cursor(context: &mut SensorContext, output: &SensorOutput) {
    if let Some(cursor) = output.item_cursor() {
        context.update_cursor(Some(cursor.to_owned()));
    }
}

/// Handles the `EvaluateSensorTick` command: evaluates the named sensor once
/// and returns its validated results with the next cursor.
///
/// # Errors
///
/// Returns `DomainError::SensorNotFound` for an unknown sensor,
/// `DomainError::InvariantViolation` or `DomainError::UnconsumedBacklogFull`
/// when the yielded results or cursor bookkeeping are inconsistent,
/// `DomainError::InvalidRequest` for invalid context queries, and any error
/// from the event log or the sensor's own logic.
pub async fn handle_evaluate_tick(
    command: &EvaluateSensorTick,
    repository: &SensorRepository,
    event_log: Arc<dyn EventLogStore>,
    clock: Arc<dyn Clock>,
) -> Result<TickResult, DomainError> {
    let sensor = repository
        .get(&command.sensor_name)
        .ok_or_else(|| DomainError::SensorNotFound(command.sensor_name.clone()))?;
    let definition = sensor.definition();
    debug!(
        command_type = command.command_type(),
        correlation_id = %command.correlation_id(),
        sensor = definition.name(),
        phase = %TickPhase::Pending,
        "tick started"
    );

    let context = SensorContext::new(definition.name(), event_log, clock)
        .with_cursor(command.cursor.clone())
        .with_last_completion_time(command.last_completion_time)
        .with_last_run_key(command.last_run_key.clone());

    debug!(
        correlation_id = %command.correlation_id(),
        sensor = definition.name(),
        kind = sensor.evaluation().kind(),
        phase = %TickPhase::Evaluating,
        "evaluating sensor"
    );
    let evaluated = evaluate(sensor.evaluation(), context, repository).await?;

    let data = SensorExecutionData::from_output(evaluated.output)?;
    definition.check_valid_run_requests(&data.run_requests)?;
    let result = finalize(definition, data, evaluated.next_cursor, evaluated.warnings);

    info!(
        correlation_id = %command.correlation_id(),
        sensor = definition.name(),
        phase = %TickPhase::Finalized,
        outcome = ?result.outcome,
        run_requests = result.run_requests.len(),
        skip_message = result.skip_message.as_deref().unwrap_or(""),
        "tick evaluated"
    );
    Ok(result)
}

async fn evaluate(
    evaluation: &EvaluationFn,
    mut context: SensorContext,
    repository: &SensorRepository,
) -> Result<Evaluated, DomainError> {
    match evaluation {
        EvaluationFn::WithoutContext(evaluate) => {
            let output = evaluate();
            apply_item_cursor(&mut context, &output);
            Ok(Evaluated {
                output,
                next_cursor: context.cursor().map(str::to_owned),
                warnings: Vec::new(),
            })
        }
        EvaluationFn::Standard(evaluation) => {
            let output = evaluation.evaluate(&mut context).await?;
            apply_item_cursor(&mut context, &output);
            Ok(Evaluated {
                output,
                next_cursor: context.cursor().map(str::to_owned),
                warnings: Vec::new(),
            })
        }
        EvaluationFn::Asset {
            asset_key,
            evaluation,
        } => {
            let after = context.cursor().and_then(|c| c.parse::<i64>().ok());
            let latest = context
                .event_log()
                .event_records(
                    &EventRecordsFilter::materializations()
                        .for_asset(asset_key.clone())
                        .after(after),
                    SortOrder::Descending,
                    Some(1),
                )
                .await?;
            let output = match latest.into_iter().next() {
                Some(record) => {
                    let output = evaluation.evaluate(&mut context, &record).await?;
                    apply_item_cursor(&mut context, &output);
                    context.update_cursor(Some(record.storage_id.to_string()));
                    output
                }
                None => SensorOutput::Nothing,
            };
            Ok(Evaluated {
                output,
                next_cursor: context.cursor().map(str::to_owned),
                warnings: Vec::new(),
            })
        }
        EvaluationFn::MultiAsset {
            selection,
            evaluation,
        } => {
            let mut context = MultiAssetSensorContext::builder(
                context,
                Arc::clone(repository.asset_graph()),
                selection.clone(),
            )
            .build()
            .await?;
            let output = evaluation.evaluate(&mut context).await?;

            if output.item_cursor().is_some() {
                return Err(DomainError::InvalidRequest(
                    "multi-asset sensors manage their cursor through advance_cursor; \
                     results must not carry a cursor"
                        .to_owned(),
                ));
            }
            let handled = match &output {
                SensorOutput::Nothing | SensorOutput::Item(SensorResult::SkipReason(_)) => false,
                SensorOutput::Item(_) => true,
                SensorOutput::Items(items) => !items.is_empty(),
            };
            if handled && !context.cursor_has_been_updated() {
                return Err(DomainError::InvariantViolation(
                    "asset materializations have been handled in this sensor, but the cursor \
                     was not updated; the same materializations would be handled again next \
                     tick. Use advance_cursor or advance_all_cursors to update the cursor"
                        .to_owned(),
                ));
            }

            context.update_cursor_after_evaluation().await?;
            Ok(Evaluated {
                output,
                next_cursor: context.cursor().map(str::to_owned),
                warnings: context.warnings().to_vec(),
            })
        }
    }
}

fn finalize(
    definition: &SensorDefinition,
    data: SensorExecutionData,
    next_cursor: Option<String>,
    warnings: Vec<String>,
) -> TickResult {
    let outcome = data.outcome();
    debug!(sensor = definition.name(), outcome = ?outcome, "tick finalized");
    TickResult {
        outcome,
        run_requests: data.run_requests,
        skip_message: data.skip_message,
        next_cursor,
        run_reactions: data.run_reactions,
        warnings,
    }
}
