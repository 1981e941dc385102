// crates/weft-server/src/render/job.rs
// Orchestration Job renderer

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use weft_types::{
    Container, EnvVar, GitSpec, Job, ObjectMeta, PodSpec, QualityGate, ResourceKind, Task,
    TaskLimits, Volume, VolumeMount, VolumeSource,
};

use super::{owned_by, DEFAULT_ORCHESTRATOR_IMAGE};

/// Seconds a finished Job lingers before the orchestrator prunes it.
const JOB_TTL_SECONDS: u64 = 3_600;

const WORKSPACE_MOUNT: &str = "/workspace";
const TMP_MOUNT: &str = "/tmp";
const GIT_HOME_MOUNT: &str = "/home/orchestrator";
const GIT_CREDENTIALS_MOUNT: &str = "/var/run/secrets/weft/git";

/// Environment variable carrying the whole task configuration as JSON.
pub const TASK_CONFIG_ENV: &str = "WEFT_TASK_CONFIG";

/// The payload handed to the orchestrator container. Its output contract is
/// the result marker line; everything else about the container is opaque.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorPayload<'a> {
    pub task: &'a str,
    pub namespace: &'a str,
    pub worker_endpoint: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator_endpoint: Option<&'a str>,
    pub prd: &'a str,
    pub limits: &'a TaskLimits,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub quality_gates: &'a [QualityGate],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<&'a GitSpec>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: &'a BTreeMap<String, String>,
}

pub fn job_name(task: &Task) -> String {
    format!("{}-run", task.metadata.name)
}

pub fn workspace_claim_name(task: &Task) -> String {
    format!("{}-workspace", task.metadata.name)
}

/// Shell script for the git-clone init container. Runs under `set -e`; the
/// token is read from the mounted secret file, never from the environment.
fn clone_script(git: &GitSpec) -> String {
    let mut script = String::new();
    script.push_str("set -e\n");
    script.push_str(&format!(
        "TOKEN=$(cat {GIT_CREDENTIALS_MOUNT}/token)\n\
         git config --global credential.helper \"store --file={GIT_HOME_MOUNT}/.git-credentials\"\n\
         HOST=$(echo \"{url}\" | sed -e 's|^https\\?://||' -e 's|/.*$||')\n\
         printf 'https://token:%s@%s\\n' \"$TOKEN\" \"$HOST\" > {GIT_HOME_MOUNT}/.git-credentials\n\
         chmod 600 {GIT_HOME_MOUNT}/.git-credentials\n\
         git config --global user.name \"{author}\"\n\
         git config --global user.email \"{email}\"\n\
         git clone --depth {depth} \"{url}\" {WORKSPACE_MOUNT}/repo\n\
         cd {WORKSPACE_MOUNT}/repo\n",
        url = git.url,
        author = git.author,
        email = git.email,
        depth = git.depth.max(1),
    ));
    match &git.base_branch {
        Some(base) => script.push_str(&format!(
            "git fetch origin \"{base}\"\n\
             git checkout -b \"{branch}\" \"origin/{base}\"\n",
            branch = git.branch,
        )),
        None => script.push_str(&format!(
            "git checkout \"{branch}\" 2>/dev/null || git checkout -b \"{branch}\"\n",
            branch = git.branch,
        )),
    }
    script
}

/// Render the one-shot orchestration Job for a Task. Retry logic lives in the
/// orchestrator process, so the Job itself never restarts (backoff 0).
pub fn render_orchestration_job(
    task: &Task,
    worker_endpoint: &str,
    orchestrator_endpoint: Option<&str>,
    prd: &str,
) -> Result<Job> {
    let payload = OrchestratorPayload {
        task: &task.metadata.name,
        namespace: &task.metadata.namespace,
        worker_endpoint,
        orchestrator_endpoint,
        prd,
        limits: &task.spec.limits,
        quality_gates: &task.spec.quality_gates,
        git: task.spec.git.as_ref(),
        context: &task.spec.context,
    };
    let payload_json = serde_json::to_string(&payload)?;

    let mut volumes = vec![
        Volume {
            name: "workspace".to_string(),
            source: VolumeSource::Claim {
                claim_name: workspace_claim_name(task),
            },
        },
        Volume {
            name: "tmp".to_string(),
            source: VolumeSource::EmptyDir,
        },
    ];

    let mut init_containers = Vec::new();
    if let Some(git) = &task.spec.git {
        volumes.push(Volume {
            name: "git-home".to_string(),
            source: VolumeSource::EmptyDir,
        });
        volumes.push(Volume {
            name: "git-credentials".to_string(),
            source: VolumeSource::Secret {
                name: git.credentials_ref.clone(),
                mode: Some(0o400),
            },
        });

        let mut clone = Container::new("git-clone", git.image.clone());
        clone.command = vec!["sh".to_string(), "-c".to_string()];
        clone.args = vec![clone_script(git)];
        clone.env.push(EnvVar {
            name: "HOME".to_string(),
            value: GIT_HOME_MOUNT.to_string(),
        });
        clone.volume_mounts = vec![
            VolumeMount {
                name: "workspace".to_string(),
                mount_path: WORKSPACE_MOUNT.to_string(),
                read_only: false,
            },
            VolumeMount {
                name: "git-home".to_string(),
                mount_path: GIT_HOME_MOUNT.to_string(),
                read_only: false,
            },
            VolumeMount {
                name: "git-credentials".to_string(),
                mount_path: GIT_CREDENTIALS_MOUNT.to_string(),
                read_only: true,
            },
        ];
        init_containers.push(clone);
    }

    let mut orchestrator = Container::new("orchestrator", DEFAULT_ORCHESTRATOR_IMAGE);
    orchestrator.env.push(EnvVar {
        name: TASK_CONFIG_ENV.to_string(),
        value: payload_json,
    });
    orchestrator.volume_mounts = vec![
        VolumeMount {
            name: "workspace".to_string(),
            mount_path: WORKSPACE_MOUNT.to_string(),
            read_only: false,
        },
        VolumeMount {
            name: "tmp".to_string(),
            mount_path: TMP_MOUNT.to_string(),
            read_only: false,
        },
    ];
    if task.spec.git.is_some() {
        orchestrator.env.push(EnvVar {
            name: "HOME".to_string(),
            value: GIT_HOME_MOUNT.to_string(),
        });
        orchestrator.volume_mounts.push(VolumeMount {
            name: "git-home".to_string(),
            mount_path: GIT_HOME_MOUNT.to_string(),
            read_only: false,
        });
        orchestrator.volume_mounts.push(VolumeMount {
            name: "git-credentials".to_string(),
            mount_path: GIT_CREDENTIALS_MOUNT.to_string(),
            read_only: true,
        });
    }

    let mut meta = ObjectMeta::new(task.metadata.namespace.clone(), job_name(task));
    owned_by(
        &mut meta,
        ResourceKind::Task,
        &task.metadata.name,
        &task.metadata.uid,
    );

    Ok(Job {
        metadata: meta,
        template: PodSpec {
            init_containers,
            containers: vec![orchestrator],
            volumes,
            service_account: String::new(),
            restart_policy: "Never".to_string(),
            annotations: Default::default(),
            labels: Default::default(),
        },
        active_deadline_seconds: Some(task.spec.limits.total_timeout),
        backoff_limit: 0,
        ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
        status: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{TaskSource, TaskSourceType, TaskSpec};

    fn sample_task(git: Option<GitSpec>) -> Task {
        let mut task = Task::new(
            "prod",
            "migrate-db",
            TaskSpec {
                worker_ref: "alpha".to_string(),
                orchestrator_ref: None,
                task_source: TaskSource {
                    r#type: TaskSourceType::Inline,
                    content: Some("{}".to_string()),
                    name: None,
                    key: None,
                },
                limits: Default::default(),
                quality_gates: Vec::new(),
                git,
                paused: false,
                context: Default::default(),
            },
        );
        task.metadata.uid = "task-uid".to_string();
        task
    }

    fn sample_git() -> GitSpec {
        serde_json::from_value(serde_json::json!({
            "url": "https://github.com/acme/repo.git",
            "branch": "weft/migrate-db",
            "baseBranch": "main",
            "credentialsRef": "git-creds"
        }))
        .unwrap()
    }

    #[test]
    fn test_job_shape_without_git() {
        let job = render_orchestration_job(&sample_task(None), "alpha.prod.svc:8080", None, "{}")
            .unwrap();
        assert!(job.template.init_containers.is_empty());
        assert_eq!(job.backoff_limit, 0);
        assert_eq!(job.active_deadline_seconds, Some(86_400));
        assert_eq!(job.ttl_seconds_after_finished, Some(3_600));
        assert_eq!(job.template.restart_policy, "Never");
        assert_eq!(job.metadata.owner_references[0].uid, "task-uid");
    }

    #[test]
    fn test_git_init_container_and_mounts() {
        let job = render_orchestration_job(
            &sample_task(Some(sample_git())),
            "alpha.prod.svc:8080",
            None,
            "{}",
        )
        .unwrap();
        assert_eq!(job.template.init_containers.len(), 1);
        let clone = &job.template.init_containers[0];
        assert_eq!(clone.name, "git-clone");
        let script = &clone.args[0];
        assert!(script.starts_with("set -e"));
        assert!(script.contains("chmod 600"));
        assert!(script.contains("--depth 1"));
        assert!(script.contains("origin/main"));
        // Token comes from the mounted file, never an env var
        assert!(script.contains("cat /var/run/secrets/weft/git/token"));
        assert!(clone.env.iter().all(|e| e.name != "TOKEN"));

        let secret_volume = job
            .template
            .volumes
            .iter()
            .find(|v| v.name == "git-credentials")
            .unwrap();
        assert_eq!(
            secret_volume.source,
            VolumeSource::Secret { name: "git-creds".to_string(), mode: Some(0o400) }
        );
    }

    #[test]
    fn test_checkout_without_base_branch_creates_if_absent() {
        let mut git = sample_git();
        git.base_branch = None;
        let job = render_orchestration_job(
            &sample_task(Some(git)),
            "alpha.prod.svc:8080",
            None,
            "{}",
        )
        .unwrap();
        let script = &job.template.init_containers[0].args[0];
        assert!(script.contains("git checkout \"weft/migrate-db\" 2>/dev/null || git checkout -b"));
    }

    #[test]
    fn test_payload_env_contains_config() {
        let job = render_orchestration_job(
            &sample_task(None),
            "alpha.prod.svc:8080",
            Some("orch.prod.svc:8080"),
            "the prd",
        )
        .unwrap();
        let env = &job.template.containers[0].env;
        let payload = env.iter().find(|e| e.name == TASK_CONFIG_ENV).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload.value).unwrap();
        assert_eq!(value["workerEndpoint"], "alpha.prod.svc:8080");
        assert_eq!(value["orchestratorEndpoint"], "orch.prod.svc:8080");
        assert_eq!(value["prd"], "the prd");
        assert_eq!(value["limits"]["maxIterations"], 10);
    }
}
