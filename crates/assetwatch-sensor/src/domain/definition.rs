//! Sensor definitions: identity, schedule hints and run targets.

use std::fmt;

use assetwatch_core::error::DomainError;
use serde::{Deserialize, Serialize};

use crate::domain::run_request::RunRequest;

/// Interval used when a definition does not set one.
pub const DEFAULT_MINIMUM_INTERVAL_SECONDS: u64 = 30;

/// Whether a sensor starts running when first loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultSensorStatus {
    /// Evaluated as soon as it is loaded.
    Running,
    /// Must be started explicitly.
    #[default]
    Stopped,
}

impl fmt::Display for DefaultSensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

/// Validated sensor metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDefinition {
    name: String,
    description: Option<String>,
    minimum_interval_seconds: u64,
    default_status: DefaultSensorStatus,
    targets: Vec<String>,
}

impl SensorDefinition {
    /// Starts building a definition.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SensorDefinitionBuilder {
        SensorDefinitionBuilder {
            name: name.into(),
            ..SensorDefinitionBuilder::default()
        }
    }

    /// The sensor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Minimum number of seconds between evaluations.
    #[must_use]
    pub fn minimum_interval_seconds(&self) -> u64 {
        self.minimum_interval_seconds
    }

    /// Initial status.
    #[must_use]
    pub fn default_status(&self) -> DefaultSensorStatus {
        self.default_status
    }

    /// Names of the jobs this sensor may launch.
    #[must_use]
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// The single target job, if there is one.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidRequest` if the sensor targets more than
    /// one job.
    pub fn job_name(&self) -> Result<Option<&str>, DomainError> {
        if self.targets.len() > 1 {
            return Err(DomainError::InvalidRequest(format!(
                "cannot use job_name for sensor {}, which targets multiple jobs",
                self.name
            )));
        }
        Ok(self.targets.first().map(String::as_str))
    }

    /// Checks that every run request can be routed to a declared target.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvariantViolation` if run requests were yielded
    /// by a sensor with no targets, if a request omits the job name while the
    /// sensor targets several jobs, or if a request names an undeclared job.
    pub fn check_valid_run_requests(&self, run_requests: &[RunRequest]) -> Result<(), DomainError> {
        if !run_requests.is_empty() && self.targets.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "error in sensor {}: sensor evaluation returned a run request for a sensor \
                 lacking a specified target (job_name, job, or jobs)",
                self.name
            )));
        }

        let has_multiple_targets = self.targets.len() > 1;
        for request in run_requests {
            match request.job_name.as_deref() {
                None if has_multiple_targets => {
                    return Err(DomainError::InvariantViolation(format!(
                        "error in sensor {}: sensor returned a run request that did not specify \
                         job_name for the requested run. Expected one of: {:?}",
                        self.name, self.targets
                    )));
                }
                Some(job) if !self.targets.iter().any(|t| t == job) => {
                    return Err(DomainError::InvariantViolation(format!(
                        "error in sensor {}: sensor returned a run request with job_name {job}. \
                         Expected one of: {:?}",
                        self.name, self.targets
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Builder for [`SensorDefinition`].
#[derive(Debug, Clone, Default)]
pub struct SensorDefinitionBuilder {
    name: String,
    description: Option<String>,
    minimum_interval_seconds: Option<u64>,
    default_status: DefaultSensorStatus,
    job_name: Option<String>,
    job: Option<String>,
    jobs: Option<Vec<String>>,
}

impl SensorDefinitionBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the minimum evaluation interval.
    #[must_use]
    pub fn minimum_interval_seconds(mut self, seconds: u64) -> Self {
        self.minimum_interval_seconds = Some(seconds);
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub fn default_status(mut self, status: DefaultSensorStatus) -> Self {
        self.default_status = status;
        self
    }

    /// Targets a job by its repository-relative name.
    #[must_use]
    pub fn job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    /// Targets a single job.
    #[must_use]
    pub fn job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Targets several jobs.
    #[must_use]
    pub fn jobs<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jobs = Some(jobs.into_iter().map(Into::into).collect());
        self
    }

    /// Validates and builds the definition.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if the name is not made of
    /// ASCII letters, digits and underscores, if both `job` and `jobs` are
    /// set, or if `job_name` is combined with either.
    pub fn build(self) -> Result<SensorDefinition, DomainError> {
        let name = check_valid_name(self.name)?;

        let jobs = self.jobs.filter(|jobs| !jobs.is_empty());
        if self.job.is_some() && jobs.is_some() {
            return Err(DomainError::InvalidDefinition(
                "attempted to provide both job and jobs to a sensor; provide only one of the two"
                    .to_owned(),
            ));
        }
        let job_param = if self.job.is_some() { "job" } else { "jobs" };
        let jobs = jobs.or_else(|| self.job.map(|job| vec![job]));

        let targets = match (self.job_name, jobs) {
            (Some(_), Some(_)) => {
                return Err(DomainError::InvalidDefinition(format!(
                    "attempted to provide both job_name and {job_param} to sensor {name}; \
                     provide only one of the two"
                )));
            }
            (Some(job_name), None) => vec![job_name],
            (None, Some(jobs)) => jobs,
            (None, None) => Vec::new(),
        };

        Ok(SensorDefinition {
            name,
            description: self.description,
            minimum_interval_seconds: self
                .minimum_interval_seconds
                .unwrap_or(DEFAULT_MINIMUM_INTERVAL_SECONDS),
            default_status: self.default_status,
            targets,
        })
    }
}

fn check_valid_name(name: String) -> Result<String, DomainError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(DomainError::InvalidDefinition(format!(
            "\"{name}\" is not a valid name. Names must match ^[A-Za-z0-9_]+$"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let definition = SensorDefinition::builder("orders_sensor").build().unwrap();

        assert_eq!(definition.minimum_interval_seconds(), 30);
        assert_eq!(definition.default_status(), DefaultSensorStatus::Stopped);
        assert!(definition.targets().is_empty());
        assert_eq!(definition.job_name().unwrap(), None);
    }

    #[test]
    fn test_rejects_invalid_name() {
        let result = SensorDefinition::builder("orders-sensor").build();
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));

        let result = SensorDefinition::builder("").build();
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_rejects_job_and_jobs() {
        let result = SensorDefinition::builder("s")
            .job("a")
            .jobs(["b", "c"])
            .build();

        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_rejects_job_name_with_job() {
        let result = SensorDefinition::builder("s").job_name("a").job("b").build();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("job_name and job "));
    }

    #[test]
    fn test_job_name_errors_with_multiple_targets() {
        let definition = SensorDefinition::builder("s").jobs(["a", "b"]).build().unwrap();

        assert!(matches!(
            definition.job_name(),
            Err(DomainError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_run_request_without_targets_fails() {
        let definition = SensorDefinition::builder("s").build().unwrap();

        let result = definition.check_valid_run_requests(&[RunRequest::new()]);

        assert!(matches!(result, Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn test_run_request_must_name_job_with_multiple_targets() {
        let definition = SensorDefinition::builder("s").jobs(["a", "b"]).build().unwrap();

        assert!(definition.check_valid_run_requests(&[RunRequest::new()]).is_err());
        assert!(
            definition
                .check_valid_run_requests(&[RunRequest::new().for_job("b")])
                .is_ok()
        );
    }

    #[test]
    fn test_run_request_for_undeclared_job_fails() {
        let definition = SensorDefinition::builder("s").job("a").build().unwrap();

        let result = definition.check_valid_run_requests(&[RunRequest::new().for_job("z")]);

        assert!(result.unwrap_err().to_string().contains("job_name z"));
    }

    #[test]
    fn test_single_target_accepts_unnamed_request() {
        let definition = SensorDefinition::builder("s").job_name("a").build().unwrap();

        assert!(definition.check_valid_run_requests(&[RunRequest::new()]).is_ok());
        assert_eq!(definition.job_name().unwrap(), Some("a"));
    }
}
