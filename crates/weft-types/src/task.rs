// crates/weft-types/src/task.rs
// Task resource: an autonomous multi-step execution loop

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{Condition, ObjectMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSourceType {
    Inline,
    Configmap,
    Secret,
}

/// Where the PRD (task list document) comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSource {
    pub r#type: TaskSourceType,
    /// Inline PRD content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Name of the configuration blob or secret holding the PRD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Key inside the blob or secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLimits {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Seconds per iteration, enforced inside the orchestrator.
    #[serde(default = "default_iteration_timeout")]
    pub iteration_timeout: u64,
    /// Seconds for the whole run, enforced via the Job active deadline.
    #[serde(default = "default_total_timeout")]
    pub total_timeout: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_max_job_recreations")]
    pub max_job_recreations: u32,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_iteration_timeout() -> u64 {
    1_800
}

fn default_total_timeout() -> u64 {
    86_400
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_max_job_recreations() -> u32 {
    3
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            iteration_timeout: default_iteration_timeout(),
            total_timeout: default_total_timeout(),
            max_consecutive_failures: default_max_consecutive_failures(),
            max_job_recreations: default_max_job_recreations(),
        }
    }
}

/// A command the orchestrator runs after each iteration to decide whether the
/// produced change is acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGate {
    pub name: String,
    pub command: Vec<String>,
    /// "fail" aborts the iteration, "warn" records and continues.
    #[serde(default = "default_failure_policy")]
    pub failure_policy: String,
    /// Seconds before the gate command is killed.
    #[serde(default = "default_gate_timeout")]
    pub timeout: u64,
}

fn default_failure_policy() -> String {
    "fail".to_string()
}

fn default_gate_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSpec {
    pub url: String,
    pub branch: String,
    /// Base branch the work branch is created from when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default = "default_clone_depth")]
    pub depth: u32,
    /// Secret holding the access token, mounted as a file (never env).
    pub credentials_ref: String,
    #[serde(default = "default_git_author")]
    pub author: String,
    #[serde(default = "default_git_email")]
    pub email: String,
    #[serde(default)]
    pub auto_push: bool,
    #[serde(default)]
    pub create_pr: bool,
    #[serde(default)]
    pub draft_pr: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_body: Option<String>,
    /// Image used for the clone init container.
    #[serde(default = "default_git_image")]
    pub image: String,
}

fn default_clone_depth() -> u32 {
    1
}

fn default_git_author() -> String {
    "weft-orchestrator".to_string()
}

fn default_git_email() -> String {
    "orchestrator@weft.io".to_string()
}

fn default_git_image() -> String {
    "alpine/git:2.45.2".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Agent that performs the work each iteration.
    pub worker_ref: String,
    /// Agent driving the loop; defaults to the worker when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator_ref: Option<String>,
    pub task_source: TaskSource,
    #[serde(default)]
    pub limits: TaskLimits,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_gates: Vec<QualityGate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSpec>,
    #[serde(default)]
    pub paused: bool,
    /// Free-form context forwarded to the orchestrator.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }
}

/// One iteration summary kept on status (bounded to the last 10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub iteration: u32,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub phase: TaskPhase,
    #[serde(default)]
    pub current_iteration: u32,
    #[serde(default)]
    pub completed_tasks: u32,
    #[serde(default)]
    pub total_tasks: u32,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_iteration_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_iterations: Vec<IterationRecord>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_commit_sha: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pull_request_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub metadata: ObjectMeta,
    pub spec: TaskSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(namespace: &str, name: &str, spec: TaskSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: TaskStatus::default(),
        }
    }
}

/// Structured result the orchestrator emits on its final log line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorResult {
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub completed_tasks: u32,
    #[serde(default)]
    pub total_tasks: u32,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub learnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_url: Option<String>,
    /// Updated PRD content, persisted back when the source was a blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub no_changes: bool,
    #[serde(default)]
    pub pushed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults() {
        let limits: TaskLimits = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(limits.max_iterations, 10);
        assert_eq!(limits.total_timeout, 86_400);
        assert_eq!(limits.max_job_recreations, 3);
    }

    #[test]
    fn test_phase_terminal() {
        assert!(TaskPhase::Completed.is_terminal());
        assert!(TaskPhase::Failed.is_terminal());
        assert!(!TaskPhase::Paused.is_terminal());
        assert!(!TaskPhase::Pending.is_terminal());
    }

    #[test]
    fn test_orchestrator_result_partial_payload() {
        let result: OrchestratorResult = serde_json::from_str(
            r#"{"passed": true, "completedTasks": 3, "totalTasks": 3, "commitSha": "abc123"}"#,
        )
        .unwrap();
        assert!(result.passed);
        assert_eq!(result.commit_sha.as_deref(), Some("abc123"));
        assert!(!result.pushed);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_git_spec_defaults() {
        let git: GitSpec = serde_json::from_value(serde_json::json!({
            "url": "https://github.com/acme/repo.git",
            "branch": "weft/work",
            "credentialsRef": "git-creds"
        }))
        .unwrap();
        assert_eq!(git.depth, 1);
        assert!(!git.auto_push);
        assert_eq!(git.author, "weft-orchestrator");
    }
}
