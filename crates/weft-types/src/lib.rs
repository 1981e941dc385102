// crates/weft-types/src/lib.rs

//! Shared data contracts between the Weft operator, the gateway, and clients.
//!
//! This crate holds the declarative resource model (Agent, Tool, Route, Task),
//! the orchestrator-object descriptors the operator materializes, the compiled
//! route table artifact, and the gateway wire envelopes. Pure data, no I/O.

pub mod agent;
pub mod invoke;
pub mod meta;
pub mod route;
pub mod table;
pub mod task;
pub mod tool;
pub mod workload;

pub use agent::{
    worker_labels, Agent, AgentPolicy, AgentSpec, AgentStatus, ModelSpec, NetworkSpec, ToolDef,
    ToolRef,
};
pub use invoke::{ErrorResponse, InvokeRequest, InvokeResponse};
pub use meta::{
    set_condition, Condition, ConditionStatus, ObjectMeta, ObjectRef, OwnerReference, ResourceKind,
    CONDITION_READY,
};
pub use route::{
    BackendRef, BackendStatus, CircuitBreakerConfig, Route, RouteDefaults, RouteRule, RouteSpec,
    RouteStatus, RuleMatch,
};
pub use table::{
    effective_weight, table_defaults_from_route, CompiledBackend, CompiledMatch, CompiledRouteTable,
    CompiledRule, TableDefaults,
};
pub use task::{
    GitSpec, IterationRecord, OrchestratorResult, QualityGate, Task, TaskLimits, TaskPhase,
    TaskSource, TaskSourceType, TaskSpec, TaskStatus,
};
pub use tool::{Tool, ToolSpec, ToolStatus};
pub use workload::{
    ConfigBlob, Container, Deployment, EnvVar, EnvVarSource, Job, JobState, JobStatus, PodSpec,
    ResourceRequirements, Secret, SecretKeyRef, Service, ServiceAccount, ServicePort, Volume,
    VolumeClaim, VolumeMount, VolumeSource,
};
