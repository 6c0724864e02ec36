//! Command abstractions.

use uuid::Uuid;

/// Trait implemented by every request the engine handles.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command, used as a tracing field.
    fn command_type(&self) -> &'static str;

    /// Correlation ID tying together every log line of one evaluation.
    fn correlation_id(&self) -> Uuid;
}
