//! One engine pool per app
//!
//! Each app gets its own pool, goal library and process scope (static
//! variables shared by that app's engines). All pools share the service's
//! base module registry, copy-on-write.
//!
//! Background work (prewarming, the periodic eviction pass) runs on tokio
//! tasks, so apps must be added from within a runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{EngineFactory, EnginePool, PoolError, PooledEngine};
use crate::config::Config;
use crate::engine::interactive::{InteractiveHandler, NoInteraction};
use crate::engine::Engine;
use crate::memory::ProcessScope;
use crate::modules::ModuleRegistry;
use crate::settings::Settings;
use crate::suggest::did_you_mean;
use crate::types::GoalLibrary;

pub struct EnginePoolService {
    config: Config,
    registry: ModuleRegistry,
    interactive: Arc<dyn InteractiveHandler>,
    pools: RwLock<HashMap<String, Arc<EnginePool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl EnginePoolService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: ModuleRegistry::with_builtins(),
            interactive: Arc::new(NoInteraction),
            pools: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Base registry for apps added from now on
    pub fn with_registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_interactive(mut self, handler: Arc<dyn InteractiveHandler>) -> Self {
        self.interactive = handler;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a pool for `app`, replacing any previous one
    pub fn add_app(&self, app: &str, library: Arc<GoalLibrary>, settings: Arc<dyn Settings>) -> Arc<EnginePool> {
        let process = ProcessScope::new();
        let registry = self.registry.clone();
        let interactive = self.interactive.clone();
        let engine_config = self.config.engine.clone();

        let factory: EngineFactory = Arc::new(move || {
            Engine::builder(library.clone())
                .registry(registry.clone())
                .process_scope(process.clone())
                .settings(settings.clone())
                .interactive(interactive.clone())
                .config(engine_config.clone())
                .build()
        });
        let pool = EnginePool::new(self.config.pool.clone(), factory);

        let mut tasks = Vec::new();
        if self.config.pool.prewarm > 0 {
            let warm = pool.clone();
            let count = self.config.pool.prewarm;
            tasks.push(tokio::spawn(async move {
                warm.prewarm(None, count);
            }));
        }
        tasks.push(self.spawn_eviction(app, pool.clone()));
        self.lock_tasks().extend(tasks);

        let previous = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app.to_lowercase(), pool.clone());
        if let Some(previous) = previous {
            previous.close();
        }
        info!(app, max_size = self.config.pool.max_size, "engine pool opened");
        pool
    }

    pub fn pool(&self, app: &str) -> Result<Arc<EnginePool>, PoolError> {
        let pools = self.pools.read().unwrap_or_else(PoisonError::into_inner);
        pools
            .get(&app.to_lowercase())
            .cloned()
            .ok_or_else(|| PoolError::UnknownApp {
                name: app.to_string(),
                suggestion: did_you_mean(app, pools.keys().map(String::as_str)),
            })
    }

    pub fn apps(&self) -> Vec<String> {
        let mut apps: Vec<String> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        apps.sort();
        apps
    }

    pub async fn rent(&self, app: &str) -> Result<PooledEngine, PoolError> {
        self.pool(app)?.rent().await
    }

    /// Close every pool and wait for background tasks to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for pool in self.pools.read().unwrap_or_else(PoisonError::into_inner).values() {
            pool.close();
        }
        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("engine pools shut down");
    }

    fn spawn_eviction(&self, app: &str, pool: Arc<EnginePool>) -> JoinHandle<()> {
        let token = self.shutdown.child_token();
        let period = Duration::from_secs(self.config.pool.eviction_interval_secs.max(1));
        let app = app.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = pool.evict_idle();
                        if evicted > 0 {
                            debug!(app = %app, evicted, "eviction pass");
                        }
                    }
                }
            }
        })
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
