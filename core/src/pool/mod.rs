//! Engine pooling
//!
//! An [`EnginePool`] hands out fully built engines for concurrent runs.
//! At most `max_size` engines are rented at once: each rent holds a
//! semaphore permit until the [`PooledEngine`] is dropped. Dropping resets
//! the engine and parks it on the idle list before the permit is released,
//! so a waiting rent always finds it there.
//!
//! Idle engines beyond `min_size` that have not been used for
//! `idle_timeout_secs` are evicted by [`EnginePool::evict_idle`].

pub mod service;


pub use service::EnginePoolService;

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::engine::Engine;
use crate::suggest::suggestion_suffix;

/// Builds a fresh engine for the pool
pub type EngineFactory = Arc<dyn Fn() -> Engine + Send + Sync>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("engine pool is closed")]
    Closed,

    #[error("no engine pool for app '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownApp {
        name: String,
        suggestion: Option<String>,
    },
}

struct IdleEngine {
    engine: Engine,
    last_access: Instant,
}

pub struct EnginePool {
    config: PoolConfig,
    factory: EngineFactory,
    idle: Mutex<Vec<IdleEngine>>,
    permits: Arc<Semaphore>,

    total_created: AtomicUsize,
    /// Engines alive: idle plus rented
    live: AtomicUsize,
    evicting: AtomicBool,
}

impl EnginePool {
    pub fn new(config: PoolConfig, factory: EngineFactory) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_size)),
            config,
            factory,
            idle: Mutex::new(Vec::new()),
            total_created: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            evicting: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Rent an engine, waiting while `max_size` are already out
    pub async fn rent(self: &Arc<Self>) -> Result<PooledEngine, PoolError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        // a slot can be reserved by a prewarm whose engine is not parked yet
        let engine = loop {
            if let Some(engine) = self.pop_idle() {
                break engine;
            }
            if self.try_reserve() {
                break self.create();
            }
            tokio::task::yield_now().await;
        };
        trace!(engine = %engine.id(), available = self.available_count(), "engine rented");

        Ok(PooledEngine {
            engine: Some(engine),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Rent an engine that shares `parent`'s module registry until reset
    ///
    /// The registry is copy-on-write: changes the child makes stay with the
    /// child.
    pub async fn rent_for(self: &Arc<Self>, parent: &Engine) -> Result<PooledEngine, PoolError> {
        let mut rented = self.rent().await?;
        rented.set_registry(parent.registry().clone());
        Ok(rented)
    }

    /// Give a rented engine back; same as dropping it
    pub fn return_engine(&self, rented: PooledEngine) {
        drop(rented);
    }

    /// Create up to `count` idle engines without exceeding `max_size`
    ///
    /// With a parent, the new engines are based on its module registry.
    /// Returns how many were created.
    pub fn prewarm(&self, parent: Option<&Engine>, count: usize) -> usize {
        let mut created = 0;
        while created < count && self.try_reserve() {
            let mut engine = self.create();
            if let Some(parent) = parent {
                engine.rebase_registry(parent.registry().clone());
            }
            self.push_idle(engine);
            created += 1;
        }
        debug!(created, requested = count, "pool prewarmed");
        created
    }

    /// Idle engines ready to be rented
    pub fn available_count(&self) -> usize {
        self.lock_idle().len()
    }

    pub fn total_created(&self) -> usize {
        self.total_created.load(Ordering::Acquire)
    }

    /// Engines alive, idle or rented
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Drop idle engines past the idle timeout, keeping at least `min_size`
    ///
    /// A pass already in progress makes this a no-op. Returns how many were
    /// evicted.
    pub fn evict_idle(&self) -> usize {
        if self
            .evicting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("eviction already running");
            return 0;
        }

        let timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut idle = self.lock_idle();
            let mut removable = self.live_count().saturating_sub(self.config.min_size);
            let mut kept = Vec::with_capacity(idle.len());
            for entry in idle.drain(..) {
                if removable > 0 && now.duration_since(entry.last_access) >= timeout {
                    removable -= 1;
                    expired.push(entry.engine);
                } else {
                    kept.push(entry);
                }
            }
            *idle = kept;
            self.live.fetch_sub(expired.len(), Ordering::AcqRel);
        }
        // engines are torn down outside the idle lock
        let evicted = expired.len();
        drop(expired);

        self.evicting.store(false, Ordering::Release);
        if evicted > 0 {
            debug!(evicted, live = self.live_count(), "idle engines evicted");
        }
        evicted
    }

    /// Stop handing out engines; waiting rents fail with [`PoolError::Closed`]
    pub fn close(&self) {
        self.permits.close();
    }

    fn create(&self) -> Engine {
        self.total_created.fetch_add(1, Ordering::AcqRel);
        (self.factory)()
    }

    /// Reserve a slot for a new engine if the pool is below `max_size`
    fn try_reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.config.max_size).then_some(live + 1)
            })
            .is_ok()
    }

    fn pop_idle(&self) -> Option<Engine> {
        self.lock_idle().pop().map(|entry| entry.engine)
    }

    fn push_idle(&self, engine: Engine) {
        self.lock_idle().push(IdleEngine {
            engine,
            last_access: Instant::now(),
        });
    }

    fn release(&self, mut engine: Engine) {
        engine.reset();
        trace!(engine = %engine.id(), "engine returned");
        self.push_idle(engine);
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<IdleEngine>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/* ===================== Rented Engine ===================== */

/// An engine on loan from a pool; returned to it on drop
pub struct PooledEngine {
    engine: Option<Engine>,
    pool: Arc<EnginePool>,
    // dropped after `Drop::drop` has parked the engine
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledEngine")
            .field("engine", &self.engine)
            .field("pool_live", &self.pool.live_count())
            .finish()
    }
}

impl Deref for PooledEngine {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        self.engine
            .as_ref()
            .unwrap_or_else(|| unreachable!("engine is only taken on drop"))
    }
}

impl DerefMut for PooledEngine {
    fn deref_mut(&mut self) -> &mut Engine {
        self.engine
            .as_mut()
            .unwrap_or_else(|| unreachable!("engine is only taken on drop"))
    }
}

impl Drop for PooledEngine {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.release(engine);
        }
    }
}
