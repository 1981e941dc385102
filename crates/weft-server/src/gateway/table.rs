// crates/weft-server/src/gateway/table.rs
// In-process copy of the compiled route table with hot reload
//
// The table is an immutable snapshot behind a reader-writer lock; readers
// clone the Arc once and work on the snapshot, the file-watcher reload path
// is the single writer. A request sees the whole old table or the whole new
// one, never a mix.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};

use crate::error::Result;
use weft_types::{CompiledRouteTable, CompiledRule, TableDefaults};

/// Debounce window after the first change event before reloading.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// A rule with its intent regex pre-compiled.
pub struct LoadedRule {
    pub rule: CompiledRule,
    pub intent_regex: Option<Regex>,
}

/// An immutable, fully-compiled table snapshot.
pub struct LoadedTable {
    pub rules: Vec<LoadedRule>,
    pub defaults: TableDefaults,
}

impl LoadedTable {
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            defaults: TableDefaults::default(),
        }
    }

    /// Compile a table emitted by the operator. The compiler validated the
    /// regexes already; one failing here is dropped with a warning rather
    /// than poisoning the whole table.
    pub fn compile(table: CompiledRouteTable) -> Self {
        let mut rules = Vec::with_capacity(table.rules.len());
        for rule in table.rules {
            let intent_regex = match rule.r#match.intent_regex.as_deref() {
                Some(pattern) => match Regex::new(pattern) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        tracing::warn!(rule = %rule.name, "dropping rule with invalid regex: {e}");
                        continue;
                    }
                },
                None => None,
            };
            rules.push(LoadedRule { rule, intent_regex });
        }
        Self {
            rules,
            defaults: table.defaults,
        }
    }
}

/// Shared handle to the current table snapshot.
pub struct RouteTable {
    current: RwLock<Arc<LoadedTable>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(LoadedTable::empty())),
        }
    }

    /// Grab the current snapshot. Cheap: one Arc clone under the read lock.
    pub async fn snapshot(&self) -> Arc<LoadedTable> {
        Arc::clone(&*self.current.read().await)
    }

    /// Atomically replace the table.
    pub async fn swap(&self, table: LoadedTable) {
        let mut current = self.current.write().await;
        *current = Arc::new(table);
    }

    /// Load and swap from the routes file.
    pub async fn load_from_file(&self, path: &Path) -> Result<()> {
        let blob = tokio::fs::read_to_string(path).await?;
        let table = CompiledRouteTable::from_blob(&blob)?;
        let loaded = LoadedTable::compile(table);
        let rules = loaded.rules.len();
        self.swap(loaded).await;
        tracing::info!(path = %path.display(), rules, "route table loaded");
        Ok(())
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Watch the routes file and reload the table after a debounce window.
/// Watches the parent directory so atomic replaces (write + rename) are seen.
pub fn spawn_file_watcher(
    table: Arc<RouteTable>,
    path: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (tx, mut rx) = mpsc::channel::<()>(64);

        let watched = path.clone();
        let mut watcher: RecommendedWatcher = match Watcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = event.paths.is_empty()
                        || watched.file_name().is_none_or(|name| {
                            event.paths.iter().any(|p| p.file_name() == Some(name))
                        });
                    if relevant {
                        // Full channel just means a reload is already pending
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => {
                    tracing::warn!("routes file watcher error: {e}");
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        ) {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::error!("failed to create routes file watcher: {e}");
                return;
            }
        };

        let watch_root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        if let Err(e) = watcher.watch(&watch_root, RecursiveMode::NonRecursive) {
            tracing::error!(path = %watch_root.display(), "failed to watch routes file: {e}");
            return;
        }

        let mut pending: Option<Instant> = None;
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(()) => {
                        pending.get_or_insert_with(Instant::now);
                    }
                    None => break,
                },
                _ = tokio::time::sleep(Duration::from_millis(25)) => {
                    if pending.is_some_and(|since| since.elapsed() >= RELOAD_DEBOUNCE) {
                        pending = None;
                        if let Err(e) = table.load_from_file(&path).await {
                            tracing::warn!(path = %path.display(), "route table reload failed: {e}");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{CompiledBackend, CompiledMatch};

    fn table_with_regex(pattern: &str) -> CompiledRouteTable {
        CompiledRouteTable {
            rules: vec![CompiledRule {
                name: "r".to_string(),
                priority: 1,
                r#match: CompiledMatch {
                    intent_regex: Some(pattern.to_string()),
                    ..Default::default()
                },
                backends: vec![CompiledBackend {
                    agent_name: "alpha".to_string(),
                    namespace: "prod".to_string(),
                    endpoint: "alpha.prod.svc.cluster.local:8080".to_string(),
                    weight: 100,
                    ready: true,
                }],
            }],
            defaults: TableDefaults::default(),
        }
    }

    #[test]
    fn test_compile_precompiles_regex() {
        let loaded = LoadedTable::compile(table_with_regex("(?i)cost"));
        assert_eq!(loaded.rules.len(), 1);
        assert!(loaded.rules[0].intent_regex.as_ref().unwrap().is_match("COST report"));
    }

    #[test]
    fn test_compile_drops_invalid_regex_rule() {
        let loaded = LoadedTable::compile(table_with_regex("([unclosed"));
        assert!(loaded.rules.is_empty());
    }

    #[tokio::test]
    async fn test_swap_replaces_snapshot() {
        let table = RouteTable::new();
        assert!(table.snapshot().await.rules.is_empty());

        table
            .swap(LoadedTable::compile(table_with_regex("x")))
            .await;
        assert_eq!(table.snapshot().await.rules.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_survives_swap() {
        let table = RouteTable::new();
        table
            .swap(LoadedTable::compile(table_with_regex("x")))
            .await;
        let snapshot = table.snapshot().await;
        table.swap(LoadedTable::empty()).await;
        // The old snapshot stays whole
        assert_eq!(snapshot.rules.len(), 1);
        assert!(table.snapshot().await.rules.is_empty());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        let blob = table_with_regex("(?i)cost").to_blob().unwrap();
        tokio::fs::write(&path, blob).await.unwrap();

        let table = RouteTable::new();
        table.load_from_file(&path).await.unwrap();
        assert_eq!(table.snapshot().await.rules.len(), 1);
    }

    #[tokio::test]
    async fn test_file_watcher_reloads_after_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        tokio::fs::write(&path, CompiledRouteTable::default().to_blob().unwrap())
            .await
            .unwrap();

        let table = Arc::new(RouteTable::new());
        table.load_from_file(&path).await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_file_watcher(Arc::clone(&table), path.clone(), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::fs::write(&path, table_with_regex("x").to_blob().unwrap())
            .await
            .unwrap();

        let mut reloaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if table.snapshot().await.rules.len() == 1 {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "watcher should reload the table");

        shutdown_tx.send(true).unwrap();
        let _ = handle.await;
    }
}
