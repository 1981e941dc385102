// crates/weft-server/src/gateway/admission.rs
// Per-rule admission control: bounded in-flight slots + bounded wait queue
//
// Each rule gets a named slot pool created on first use. A released slot
// wakes at most one waiter (semaphore semantics). Fairness is best-effort
// FIFO, not guaranteed: a late arriver whose future polls first may overtake
// an earlier waiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use weft_types::CircuitBreakerConfig;

/// Why an acquire was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    QueueFull,
    QueueTimeout,
    Cancelled,
}

impl AdmissionError {
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::QueueFull => "queue_full",
            AdmissionError::QueueTimeout => "queue_timeout",
            AdmissionError::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
pub struct SlotPool {
    config: CircuitBreakerConfig,
    slots: Arc<Semaphore>,
    active: AtomicU32,
    waiting: AtomicU32,
}

/// An admitted request's slot. Dropping it releases the slot and wakes at
/// most one waiter.
#[derive(Debug)]
pub struct SlotGuard {
    pool: Arc<SlotPool>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SlotPool {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1) as usize;
        Self {
            config,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            active: AtomicU32::new(0),
            waiting: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// (active, waiting) as of this instant.
    pub fn snapshot(&self) -> (u32, u32) {
        (
            self.active.load(Ordering::Acquire),
            self.waiting.load(Ordering::Acquire),
        )
    }

    /// Reserve a waiting seat, refusing when the queue is full.
    fn enter_queue(&self) -> Result<(), AdmissionError> {
        loop {
            let waiting = self.waiting.load(Ordering::Acquire);
            if waiting >= self.config.max_queue_size {
                return Err(AdmissionError::QueueFull);
            }
            if self
                .waiting
                .compare_exchange(waiting, waiting + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Acquire a slot, waiting in the bounded queue when at capacity.
    ///
    /// Exit precedence: cancellation, then the per-wait deadline, then a
    /// successful wake. Every exit leaves the waiting counter balanced.
    pub async fn acquire(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<SlotGuard, AdmissionError> {
        // Fast path: a slot is free right now.
        if let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() {
            self.active.fetch_add(1, Ordering::AcqRel);
            return Ok(SlotGuard {
                pool: Arc::clone(self),
                _permit: permit,
            });
        }

        self.enter_queue()?;

        let queue_timeout = Duration::from_millis(self.config.queue_timeout_ms);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            _ = tokio::time::sleep(queue_timeout) => Err(AdmissionError::QueueTimeout),
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => Ok(permit),
                Err(_) => Err(AdmissionError::Cancelled),
            },
        };

        self.waiting.fetch_sub(1, Ordering::AcqRel);
        let permit = outcome?;
        self.active.fetch_add(1, Ordering::AcqRel);
        Ok(SlotGuard {
            pool: Arc::clone(self),
            _permit: permit,
        })
    }
}

/// Registry of slot pools, one per rule name. Pool creation double-checks
/// under the writer lock; config changes only apply to pools created after
/// them, so in-flight limits never shift.
pub struct AdmissionRegistry {
    pools: RwLock<HashMap<String, Arc<SlotPool>>>,
}

impl AdmissionRegistry {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn pool(&self, rule: &str, config: &CircuitBreakerConfig) -> Arc<SlotPool> {
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(rule) {
                return Arc::clone(pool);
            }
        }
        let mut pools = self.pools.write().await;
        Arc::clone(
            pools
                .entry(rule.to_string())
                .or_insert_with(|| Arc::new(SlotPool::new(config.clone()))),
        )
    }

    /// Snapshot of (rule, active, waiting) for introspection.
    pub async fn snapshots(&self) -> Vec<(String, u32, u32)> {
        let pools = self.pools.read().await;
        let mut items: Vec<(String, u32, u32)> = pools
            .iter()
            .map(|(name, pool)| {
                let (active, waiting) = pool.snapshot();
                (name.clone(), active, waiting)
            })
            .collect();
        items.sort();
        items
    }

    /// Drop every pool (tests only).
    pub async fn reset(&self) {
        self.pools.write().await.clear();
    }
}

impl Default for AdmissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
