//! Job specification and status lifecycle

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    GpuletError, GpuletResult, ResourceVector, DEFAULT_CPU_MILLIS, DEFAULT_MEMORY_BYTES,
};

/// A unit of GPU-bearing batch work.
///
/// The job object itself is owned by an external store; the engine reads
/// the spec and drives only the Pending -> Starting transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Namespace the job lives in
    pub namespace: String,
    /// Job name, unique within its namespace
    pub name: String,
    /// Declared resource demand
    pub resources: JobResources,
    /// Whether the job carries a priority-class marker
    pub priority_class: bool,
    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,
    /// Current status
    pub status: JobStatus,
    /// Set when the job is admitted
    pub started_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job with default resource demand
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            resources: JobResources::default(),
            priority_class: false,
            submitted_at: Utc::now(),
            status: JobStatus::Pending,
            started_at: None,
        }
    }

    /// The allocation key for this job: `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Validate the job spec, reporting the first offending field
    pub fn validate(&self) -> GpuletResult<()> {
        if self.name.is_empty() {
            return Err(GpuletError::InvalidJob {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.namespace.is_empty() {
            return Err(GpuletError::InvalidJob {
                field: "namespace",
                reason: "must not be empty".to_string(),
            });
        }
        if self.resources.cpu_millis == Some(0) {
            return Err(GpuletError::InvalidJob {
                field: "cpu_millis",
                reason: "must be positive when specified".to_string(),
            });
        }
        if self.resources.memory_bytes == Some(0) {
            return Err(GpuletError::InvalidJob {
                field: "memory_bytes",
                reason: "must be positive when specified".to_string(),
            });
        }
        Ok(())
    }

    /// Priority score at `now`. Higher wins; ties are broken by
    /// insertion order in the queue.
    ///
    /// `10 * [older than 1h] + 5 * gpus + 20 * [priority class]`
    ///
    /// Recomputed fresh each pass, so age bumps apply without any stored
    /// priority state.
    pub fn priority_score(&self, now: DateTime<Utc>) -> u64 {
        let mut score = 5 * u64::from(self.resources.gpus);
        if now - self.submitted_at > Duration::hours(1) {
            score += 10;
        }
        if self.priority_class {
            score += 20;
        }
        score
    }
}

/// Declared resource demand of a job.
///
/// CPU and memory may be left unspecified; the accountant falls back to
/// conservative defaults (1 core, 4 GiB).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobResources {
    /// Number of whole GPU units requested
    pub gpus: u32,
    /// CPU request in millicores
    pub cpu_millis: Option<u64>,
    /// Memory request in bytes
    pub memory_bytes: Option<u64>,
}

impl JobResources {
    /// Normalize to a concrete resource vector, applying defaults
    pub fn to_vector(&self) -> ResourceVector {
        ResourceVector {
            gpus: self.gpus,
            cpu_millis: self.cpu_millis.unwrap_or(DEFAULT_CPU_MILLIS),
            memory_bytes: self.memory_bytes.unwrap_or(DEFAULT_MEMORY_BYTES),
        }
    }
}

/// Job status lifecycle: Pending -> Starting -> Running -> Terminated | Failed.
///
/// The engine drives only Pending -> Starting; later transitions are
/// reported by external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for admission
    Pending,
    /// Admitted, resources committed
    Starting,
    /// Running on a node
    Running,
    /// Finished normally
    Terminated,
    /// Finished abnormally
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Starting => write!(f, "Starting"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Terminated => write!(f, "Terminated"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = Job::new("default", "train-1");
        assert_eq!(job.key(), "default/train-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let job = Job::new("default", "");
        let err = job.validate().unwrap_err();
        assert!(matches!(err, GpuletError::InvalidJob { field: "name", .. }));
    }

    #[test]
    fn test_validate_rejects_zero_memory() {
        let mut job = Job::new("default", "train-1");
        job.resources.memory_bytes = Some(0);
        let err = job.validate().unwrap_err();
        assert!(matches!(
            err,
            GpuletError::InvalidJob {
                field: "memory_bytes",
                ..
            }
        ));
    }

    #[test]
    fn test_resource_defaults() {
        let resources = JobResources {
            gpus: 2,
            cpu_millis: None,
            memory_bytes: None,
        };
        let vector = resources.to_vector();
        assert_eq!(vector.gpus, 2);
        assert_eq!(vector.cpu_millis, DEFAULT_CPU_MILLIS);
        assert_eq!(vector.memory_bytes, DEFAULT_MEMORY_BYTES);
    }

    #[test]
    fn test_priority_score_components() {
        let now = Utc::now();
        let mut job = Job::new("default", "train-1");
        job.resources.gpus = 3;
        assert_eq!(job.priority_score(now), 15);

        job.priority_class = true;
        assert_eq!(job.priority_score(now), 35);

        job.submitted_at = now - Duration::hours(2);
        assert_eq!(job.priority_score(now), 45);
    }

    #[test]
    fn test_priority_score_age_boundary() {
        let now = Utc::now();
        let mut job = Job::new("default", "train-1");
        job.submitted_at = now - Duration::minutes(59);
        assert_eq!(job.priority_score(now), 0);

        job.submitted_at = now - Duration::minutes(61);
        assert_eq!(job.priority_score(now), 10);
    }
}
