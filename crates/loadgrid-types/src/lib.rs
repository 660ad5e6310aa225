//! Wire types shared between the orchestrator and executor processes.
//!
//! All control-plane payloads are JSON with lowerCamelCase field names.
//! Every field is defaultable so that partial payloads decode cleanly;
//! semantic validation (empty ids, non-positive worker counts) happens at
//! the API boundary, not here.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity claimed by an executor process on `/connect`.
///
/// `workers` declares how many concurrent job slots the executor hosts;
/// the orchestrator builds exactly one job per slot each round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerId {
    pub id: String,
    pub workers: i32,
}

/// A single request descriptor produced by a request source.
///
/// The executor resolves `path` + `query_string` against one of the job's
/// target URLs. An empty method means GET; an empty path means `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestSpec {
    pub method: String,
    pub path: String,
    pub query_string: String,
    pub headers: HashMap<String, Vec<String>>,
    pub body: String,
}

/// One unit of dispatched work: a request batch bound to a round.
///
/// `id` is unique within its round. The executor round-robins the requests
/// across `target_urls` and bounds the whole batch by `duration_millis`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub id: String,
    pub round_id: String,
    pub requests: Vec<RequestSpec>,
    pub target_urls: Vec<String>,
    pub rate_per_sec: i64,
    pub duration_millis: i64,
}

impl Job {
    /// Number of requests this job was fabricated with.
    pub fn requested_count(&self) -> usize {
        self.requests.len()
    }

    /// Wire duration as a `Duration`; non-positive values become zero and
    /// are given a fallback by the runner.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_millis.max(0) as u64)
    }
}

/// Outcome summary for a single executed job, POSTed to `/report`.
///
/// On the executor side `success_count + failure_count == completed_requests`,
/// `timeout_count <= failure_count`, and `latency_millis` holds one sample
/// per completed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobReport {
    pub executor_id: String,
    pub job_id: String,
    pub round_id: String,
    pub planned_requests: i64,
    pub completed_requests: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub timeout_count: i64,
    pub latency_millis: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_round_trips() {
        let worker = WorkerId {
            id: "exec-1".to_string(),
            workers: 4,
        };
        let json = serde_json::to_string(&worker).unwrap();
        let decoded: WorkerId = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, worker);
    }

    #[test]
    fn worker_id_uses_camel_case_fields() {
        let json = serde_json::to_value(WorkerId {
            id: "exec-1".to_string(),
            workers: 2,
        })
        .unwrap();
        assert_eq!(json["id"], "exec-1");
        assert_eq!(json["workers"], 2);
    }

    #[test]
    fn job_round_trips() {
        let job = Job {
            id: "exec-1-17000-0".to_string(),
            round_id: "round-17000".to_string(),
            requests: vec![RequestSpec {
                method: "POST".to_string(),
                path: "/orders".to_string(),
                query_string: "dry=1".to_string(),
                headers: HashMap::from([(
                    "content-type".to_string(),
                    vec!["application/json".to_string()],
                )]),
                body: "{\"sku\":42}".to_string(),
            }],
            target_urls: vec!["http://10.0.0.1:8080".to_string()],
            rate_per_sec: 5,
            duration_millis: 1000,
        };
        let json = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn job_wire_fields_are_camel_case() {
        let json = serde_json::to_value(Job {
            round_id: "round-1".to_string(),
            rate_per_sec: 3,
            duration_millis: 1500,
            ..Job::default()
        })
        .unwrap();
        assert!(json.get("roundId").is_some());
        assert!(json.get("ratePerSec").is_some());
        assert!(json.get("durationMillis").is_some());
        assert!(json.get("targetUrls").is_some());
    }

    #[test]
    fn job_report_round_trips() {
        let report = JobReport {
            executor_id: "exec-1".to_string(),
            job_id: "job-1".to_string(),
            round_id: "round-1".to_string(),
            planned_requests: 10,
            completed_requests: 8,
            success_count: 7,
            failure_count: 1,
            timeout_count: 1,
            latency_millis: vec![12, 15, 9, 40, 22, 31, 8, 11],
        };
        let json = serde_json::to_string(&report).unwrap();
        let decoded: JobReport = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn partial_payloads_decode_with_defaults() {
        let spec: RequestSpec = serde_json::from_str("{\"path\":\"/sum\"}").unwrap();
        assert_eq!(spec.path, "/sum");
        assert!(spec.method.is_empty());
        assert!(spec.headers.is_empty());

        let report: JobReport =
            serde_json::from_str("{\"jobId\":\"j\",\"roundId\":\"r\"}").unwrap();
        assert_eq!(report.job_id, "j");
        assert_eq!(report.completed_requests, 0);
        assert!(report.latency_millis.is_empty());
    }

    #[test]
    fn job_duration_clamps_negative_values() {
        let job = Job {
            duration_millis: -200,
            ..Job::default()
        };
        assert_eq!(job.duration(), Duration::ZERO);

        let job = Job {
            duration_millis: 250,
            ..Job::default()
        };
        assert_eq!(job.duration(), Duration::from_millis(250));
    }
}
