// crates/weft-server/src/render/workload.rs
// Worker deployment, service, and identity renderers

use weft_types::{
    worker_labels, Agent, ConfigBlob, Container, Deployment, EnvVar, ObjectMeta, PodSpec,
    ResourceKind, Service, ServiceAccount, ServicePort, Tool, Volume, VolumeMount, VolumeSource,
};

use super::{owned_by, CONFIG_HASH_ANNOTATION, DEFAULT_WORKER_IMAGE, WORKER_PORT};

/// Shared volume where tool bundles are staged for the worker.
const TOOLS_MOUNT_PATH: &str = "/opt/weft/tools";

/// Where the worker reads its configuration blob.
const CONFIG_MOUNT_PATH: &str = "/etc/weft";

fn worker_name(agent: &Agent) -> String {
    format!("{}-worker", agent.metadata.name)
}

fn child_meta(agent: &Agent, name: String) -> ObjectMeta {
    let mut meta = ObjectMeta::new(agent.metadata.namespace.clone(), name);
    meta.labels = worker_labels(&agent.metadata.name);
    owned_by(
        &mut meta,
        ResourceKind::Agent,
        &agent.metadata.name,
        &agent.metadata.uid,
    );
    meta
}

/// Render the worker deployment. Each resolved Tool contributes one init
/// container that copies its bundle into the shared tools volume; the config
/// hash annotation on the pod template drives rolling replacement.
pub fn render_worker_deployment(agent: &Agent, tools: &[Tool], config_hash: &str) -> Deployment {
    let name = worker_name(agent);
    let labels = worker_labels(&agent.metadata.name);

    let mut init_containers = Vec::with_capacity(tools.len());
    for tool in tools {
        let mut init = Container::new(
            format!("tool-{}", tool.metadata.name),
            tool.spec.image.clone(),
        );
        init.command = vec!["sh".to_string(), "-c".to_string()];
        init.args = vec![format!(
            "cp -r /bundle/. {TOOLS_MOUNT_PATH}/{}/",
            tool.metadata.name
        )];
        init.volume_mounts.push(VolumeMount {
            name: "tools".to_string(),
            mount_path: TOOLS_MOUNT_PATH.to_string(),
            read_only: false,
        });
        init_containers.push(init);
    }

    let mut worker = Container::new(
        "worker",
        agent
            .spec
            .image
            .clone()
            .unwrap_or_else(|| DEFAULT_WORKER_IMAGE.to_string()),
    );
    worker.ports.push(WORKER_PORT);
    worker.env = agent.spec.env.clone();
    worker.env.push(EnvVar {
        name: "WEFT_CONFIG_PATH".to_string(),
        value: format!("{CONFIG_MOUNT_PATH}/config.json"),
    });
    worker.env_from = agent.spec.env_from.clone();
    worker.resources = agent.spec.resources.clone();
    worker.volume_mounts.push(VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_MOUNT_PATH.to_string(),
        read_only: true,
    });
    worker.volume_mounts.push(VolumeMount {
        name: "tools".to_string(),
        mount_path: TOOLS_MOUNT_PATH.to_string(),
        read_only: true,
    });

    let mut template = PodSpec {
        init_containers,
        containers: vec![worker],
        volumes: vec![
            Volume {
                name: "config".to_string(),
                source: VolumeSource::ConfigBlob { name: name.clone() },
            },
            Volume {
                name: "tools".to_string(),
                source: VolumeSource::EmptyDir,
            },
        ],
        service_account: name.clone(),
        restart_policy: String::new(),
        annotations: Default::default(),
        labels: labels.clone(),
    };
    template
        .annotations
        .insert(CONFIG_HASH_ANNOTATION.to_string(), config_hash.to_string());

    Deployment {
        metadata: child_meta(agent, name),
        replicas: agent.spec.replicas,
        selector: labels,
        template,
        available_replicas: 0,
    }
}

/// Render the worker's configuration blob from the rendered config document.
pub fn render_worker_config_blob(agent: &Agent, rendered: &str) -> ConfigBlob {
    ConfigBlob {
        metadata: child_meta(agent, worker_name(agent)),
        data: super::config::config_blob_data(rendered),
    }
}

/// Render the worker service fronting the deployment.
pub fn render_worker_service(agent: &Agent) -> Service {
    Service {
        metadata: child_meta(agent, agent.metadata.name.clone()),
        selector: worker_labels(&agent.metadata.name),
        ports: vec![ServicePort {
            port: WORKER_PORT,
            target_port: WORKER_PORT,
        }],
    }
}

/// Render the worker's identity (service account).
pub fn render_worker_identity(agent: &Agent) -> ServiceAccount {
    ServiceAccount {
        metadata: child_meta(agent, worker_name(agent)),
    }
}
