//! Queue metrics.
//!
//! Recorded through the `metrics` facade; the binary decides which exporter,
//! if any, is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the queue pipeline.
pub mod names {
    /// Total jobs pushed to a driver.
    pub const JOBS_PUSHED_TOTAL: &str = "kestrel_jobs_pushed_total";
    /// Total jobs popped by workers.
    pub const JOBS_POPPED_TOTAL: &str = "kestrel_jobs_popped_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "kestrel_jobs_completed_total";
    /// Total failed attempts released for retry.
    pub const JOBS_RELEASED_TOTAL: &str = "kestrel_jobs_released_total";
    /// Total jobs buried as failed jobs.
    pub const JOBS_BURIED_TOTAL: &str = "kestrel_jobs_buried_total";
    /// Total attempts that hit their timeout.
    pub const JOBS_TIMED_OUT_TOTAL: &str = "kestrel_jobs_timed_out_total";
    /// Total failed jobs requeued.
    pub const FAILED_JOBS_RETRIED_TOTAL: &str = "kestrel_failed_jobs_retried_total";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "kestrel_job_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_PUSHED_TOTAL, "Total number of jobs pushed");
    describe_counter!(names::JOBS_POPPED_TOTAL, "Total number of jobs popped for processing");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total number of jobs completed successfully");
    describe_counter!(names::JOBS_RELEASED_TOTAL, "Total number of failed attempts released for retry");
    describe_counter!(names::JOBS_BURIED_TOTAL, "Total number of jobs moved to the failed job store");
    describe_counter!(names::JOBS_TIMED_OUT_TOTAL, "Total number of attempts that timed out");
    describe_counter!(names::FAILED_JOBS_RETRIED_TOTAL, "Total number of failed jobs requeued");
    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");
}

/// Job metrics recorder.
#[derive(Clone, Copy)]
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a job pushed.
    pub fn job_pushed(queue: &str, job_name: &str, priority: u8) {
        counter!(
            names::JOBS_PUSHED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);
    }

    /// Record a job popped.
    pub fn job_popped(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_POPPED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed attempt released for retry.
    pub fn job_released(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_RELEASED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job buried.
    pub fn job_buried(queue: &str, job_name: &str, reason: &str) {
        counter!(
            names::JOBS_BURIED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record a timed out attempt.
    pub fn job_timed_out(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_TIMED_OUT_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a failed job requeued.
    pub fn failed_job_retried(queue: &str, job_name: &str) {
        counter!(
            names::FAILED_JOBS_RETRIED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }
}
