// crates/weft-server/src/reconcile/route.rs
// Route compiler: resolves backends, compiles regexes, emits the table blob
//
// The compiled table is the only data surface the gateway reads. Rules from
// every Route in a namespace aggregate into one blob; an edit that produces
// an identical table must not touch the blob, so the gateway never reloads
// for nothing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::Result;
use crate::store::{Object, Store, WatchEvent};
use weft_types::{
    effective_weight, set_condition, table_defaults_from_route, BackendRef, BackendStatus,
    CompiledBackend, CompiledMatch, CompiledRouteTable, CompiledRule, ConditionStatus, ConfigBlob,
    ObjectMeta, ObjectRef, ResourceKind, Route, CONDITION_READY,
};

use super::{Action, Reconciler};

/// Name of the configuration blob carrying the compiled table.
pub const ROUTES_BLOB_NAME: &str = "weft-routes";

/// Key inside the blob; the gateway mounts this as its routes file.
pub const ROUTES_BLOB_KEY: &str = "routes.json";

pub struct RouteReconciler {
    store: Arc<dyn Store>,
}

impl RouteReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn resolve_backend(&self, route_ns: &str, backend: &BackendRef) -> CompiledBackend {
        let namespace = backend
            .namespace
            .clone()
            .unwrap_or_else(|| route_ns.to_string());
        let key = ObjectRef::new(namespace.clone(), backend.agent_ref.clone());
        let agent = self
            .store
            .get(ResourceKind::Agent, &key)
            .await
            .ok()
            .flatten()
            .and_then(Object::into_agent);
        let (endpoint, ready) = match agent {
            Some(agent) => (agent.status.endpoint.clone(), agent.status.ready),
            None => (String::new(), false),
        };
        CompiledBackend {
            agent_name: backend.agent_ref.clone(),
            namespace,
            endpoint,
            weight: effective_weight(backend),
            ready,
        }
    }

    /// Compile one route's rules. Fails when any intent regex does not parse;
    /// the route is then excluded from the table and marked unready.
    async fn compile_route(&self, route: &Route) -> std::result::Result<Vec<CompiledRule>, String> {
        let mut rules = Vec::with_capacity(route.spec.rules.len());
        for rule in &route.spec.rules {
            if let Some(pattern) = rule.r#match.intent_regex.as_deref() {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(format!("rule {}: {e}", rule.name));
                }
            }
            let mut backends = Vec::with_capacity(rule.backends.len());
            for backend in &rule.backends {
                backends.push(
                    self.resolve_backend(&route.metadata.namespace, backend).await,
                );
            }
            rules.push(CompiledRule {
                name: rule.name.clone(),
                priority: rule.priority,
                r#match: CompiledMatch::from(&rule.r#match),
                backends,
            });
        }
        Ok(rules)
    }

    /// Rebuild the namespace's table from every compilable Route and publish
    /// it if the bytes changed.
    async fn publish_table(&self, namespace: &str) -> Result<()> {
        let mut routes: Vec<Route> = self
            .store
            .list(ResourceKind::Route, Some(namespace))
            .await?
            .into_iter()
            .filter_map(Object::into_route)
            .filter(|r| !r.metadata.is_deleting())
            .collect();
        routes.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        let mut rules = Vec::new();
        let mut defaults = None;
        for route in &routes {
            match self.compile_route(route).await {
                Ok(compiled) => rules.extend(compiled),
                Err(_) => continue,
            }
            if defaults.is_none() && route.spec.defaults != Default::default() {
                let default_backend = match &route.spec.defaults.backend {
                    Some(backend) => Some(
                        self.resolve_backend(&route.metadata.namespace, backend).await,
                    ),
                    None => None,
                };
                defaults = Some(table_defaults_from_route(
                    &route.spec.defaults,
                    default_backend,
                ));
            }
        }

        // Priority-descending, ties keep original order
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let table = CompiledRouteTable {
            rules,
            defaults: defaults.unwrap_or_default(),
        };
        let blob = table.to_blob()?;

        let blob_key = ObjectRef::new(namespace, ROUTES_BLOB_NAME);
        match self.store.get(ResourceKind::ConfigBlob, &blob_key).await? {
            None => {
                let mut data = BTreeMap::new();
                data.insert(ROUTES_BLOB_KEY.to_string(), blob);
                self.store
                    .create(Object::ConfigBlob(ConfigBlob {
                        metadata: ObjectMeta::new(namespace, ROUTES_BLOB_NAME),
                        data,
                    }))
                    .await?;
            }
            Some(stored) => {
                let Some(mut stored) = stored.into_config_blob() else {
                    return Ok(());
                };
                if stored.data.get(ROUTES_BLOB_KEY).map(String::as_str) != Some(blob.as_str()) {
                    stored.data.insert(ROUTES_BLOB_KEY.to_string(), blob);
                    self.store.update(Object::ConfigBlob(stored)).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for RouteReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Route
    }

    fn name(&self) -> &'static str {
        "route"
    }

    fn watched_kinds(&self) -> Vec<ResourceKind> {
        vec![ResourceKind::Agent]
    }

    /// An Agent change re-enqueues every Route referencing it.
    async fn map_related(&self, event: &WatchEvent) -> Result<Vec<ObjectRef>> {
        let agent_key = event.object_ref();
        let mut keys = Vec::new();
        for obj in self.store.list(ResourceKind::Route, None).await? {
            let Some(route) = obj.as_route() else { continue };
            let references = route
                .spec
                .rules
                .iter()
                .flat_map(|r| r.backends.iter())
                .chain(route.spec.defaults.backend.iter())
                .any(|b| {
                    b.agent_ref == agent_key.name
                        && b.namespace.as_deref().unwrap_or(&route.metadata.namespace)
                            == agent_key.namespace
                });
            if references {
                keys.push(obj.object_ref());
            }
        }
        Ok(keys)
    }

    async fn reconcile(&self, key: &ObjectRef) -> Result<Action> {
        let Some(obj) = self.store.get(ResourceKind::Route, key).await? else {
            // A deleted route still changes the aggregate table.
            self.publish_table(&key.namespace).await?;
            return Ok(Action::Done);
        };
        let Some(mut route) = obj.into_route() else {
            return Ok(Action::Done);
        };

        if route.metadata.is_deleting() {
            self.publish_table(&key.namespace).await?;
            return Ok(Action::Done);
        }

        let generation = route.metadata.generation;
        let regex_error = self.compile_route(&route).await.err();

        // Resolve backend readiness for status, deduplicated by (ns, name).
        let mut seen = HashSet::new();
        let mut backends = Vec::new();
        let all_refs: Vec<BackendRef> = route
            .spec
            .rules
            .iter()
            .flat_map(|r| r.backends.iter().cloned())
            .chain(route.spec.defaults.backend.iter().cloned())
            .collect();
        for backend in &all_refs {
            let namespace = backend
                .namespace
                .clone()
                .unwrap_or_else(|| route.metadata.namespace.clone());
            if !seen.insert((namespace.clone(), backend.agent_ref.clone())) {
                continue;
            }
            let resolved = self
                .resolve_backend(&route.metadata.namespace, backend)
                .await;
            backends.push(BackendStatus {
                agent_ref: backend.agent_ref.clone(),
                namespace,
                ready: resolved.ready,
                endpoint: resolved.endpoint,
            });
        }

        self.publish_table(&key.namespace).await?;

        let all_ready = backends.iter().all(|b| b.ready);
        route.status.active_rules = route.spec.rules.len() as u32;
        route.status.backends = backends;
        route.status.compiled_config_map = ROUTES_BLOB_NAME.to_string();

        match regex_error {
            Some(message) => {
                route.status.ready = false;
                set_condition(
                    &mut route.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::False,
                    "InvalidRegex",
                    &message,
                    generation,
                );
            }
            None if all_ready => {
                route.status.ready = true;
                set_condition(
                    &mut route.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::True,
                    "BackendsReady",
                    "all referenced agents are ready",
                    generation,
                );
            }
            None => {
                route.status.ready = false;
                set_condition(
                    &mut route.status.conditions,
                    CONDITION_READY,
                    ConditionStatus::False,
                    "BackendsNotReady",
                    "one or more referenced agents are not ready",
                    generation,
                );
            }
        }

        self.store.update_status(Object::Route(route)).await?;
        Ok(Action::Done)
    }
}
