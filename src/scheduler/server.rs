// Top-level scheduler entry point: named pools plus the admission/shutdown
// API a listener loop drives (queueConn/startServer/stopServer/waitServer).

use crate::driver::{Driver, NullHooks, RequestHooks, Sock};
use crate::error::{CoreError, Result};
use crate::scheduler::pool::{ConnPool, PoolConfig};
use crate::scheduler::worker::{self, current_conn, CurrentConn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Server {
    name: String,
    pools: RwLock<HashMap<String, Arc<ConnPool>>>,
    default_pool: RwLock<Option<String>>,
    driver: Arc<dyn Driver>,
    hooks: Arc<dyn RequestHooks>,
    shutdown: AtomicBool,
}

impl Server {
    pub fn new(name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self::with_hooks(name, driver, Arc::new(NullHooks))
    }

    pub fn with_hooks(name: impl Into<String>, driver: Arc<dyn Driver>, hooks: Arc<dyn RequestHooks>) -> Self {
        Self {
            name: name.into(),
            pools: RwLock::new(HashMap::new()),
            default_pool: RwLock::new(None),
            driver,
            hooks,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a pool under `name`. The first pool registered becomes
    /// the default target for `queue_conn(None, ...)`.
    pub fn add_pool(&self, name: impl Into<String>, config: PoolConfig) -> Arc<ConnPool> {
        let name = name.into();
        let pool = Arc::new(ConnPool::new(name.clone(), config));
        self.pools.write().insert(name.clone(), pool.clone());
        let mut default = self.default_pool.write();
        if default.is_none() {
            *default = Some(name);
        }
        pool
    }

    pub fn pool(&self, name: &str) -> Option<Arc<ConnPool>> {
        self.pools.read().get(name).cloned()
    }

    pub fn set_default_pool(&self, name: impl Into<String>) {
        *self.default_pool.write() = Some(name.into());
    }

    fn resolve_pool(&self, pool_name: Option<&str>) -> Result<Arc<ConnPool>> {
        let key = match pool_name {
            Some(n) => n.to_string(),
            None => self
                .default_pool
                .read()
                .clone()
                .ok_or_else(|| CoreError::Configuration("no default pool configured".into()))?,
        };
        self.pools
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("pool '{key}' not registered")))
    }

    /// Admits a socket into the named (or default) pool's wait queue,
    /// spawning an additional worker thread if the pool's need-more-threads
    /// predicate says to. Returns the assigned connection id.
    pub fn queue_conn(&self, pool_name: Option<&str>, sock: Sock) -> Result<u64> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(CoreError::ShuttingDown(self.name.clone()));
        }
        let pool = self.resolve_pool(pool_name)?;

        let mut st = pool.state.lock();
        if st.shutting_down {
            return Err(CoreError::ShuttingDown(pool.name.clone()));
        }
        let idx = st
            .free
            .pop()
            .ok_or_else(|| CoreError::LimitExceeded(format!("pool '{}' saturated", pool.name)))?;
        let id = st.next_id;
        st.next_id += 1;
        st.slots[idx].reset_for_admission(id, &pool.name, &self.name, sock);
        st.wait.push_back(idx);

        let should_spawn = pool.need_more_threads(&st);
        if should_spawn {
            st.creating_threads += 1;
            st.current_threads += 1;
        }
        drop(st);
        // Signal unconditionally after unlock, regardless of `idle`: the
        // source reads `idle` before unlocking and only conditionally
        // signals, which races against a create decided in the same call.
        // Signaling here every time, after the lock is released, avoids a
        // window where a newly admitted slot has no waiter to wake it.
        pool.cond.notify_one();

        if should_spawn {
            worker::spawn(pool.clone(), self.driver.clone(), self.hooks.clone());
        }
        Ok(id)
    }

    /// Ensures every registered pool has at least `min_threads` workers
    /// running, then clears the shutdown flag. Call once before routing
    /// any connections to this server.
    pub fn start_server(&self) -> Result<()> {
        self.shutdown.store(false, Ordering::Release);
        let pools: Vec<_> = self.pools.read().values().cloned().collect();
        for pool in pools {
            self.ensure_running_threads(&pool);
        }
        Ok(())
    }

    fn ensure_running_threads(&self, pool: &Arc<ConnPool>) {
        loop {
            let spawn_one = {
                let mut st = pool.state.lock();
                if st.current_threads >= pool.config.min_threads {
                    false
                } else {
                    st.current_threads += 1;
                    st.creating_threads += 1;
                    true
                }
            };
            if !spawn_one {
                break;
            }
            worker::spawn(pool.clone(), self.driver.clone(), self.hooks.clone());
        }
    }

    /// Marks every pool as shutting down and wakes all workers so they
    /// observe it and exit. Does not block; see `wait_server`.
    pub fn stop_server(&self) {
        self.shutdown.store(true, Ordering::Release);
        for pool in self.pools.read().values() {
            pool.state.lock().shutting_down = true;
            pool.cond.notify_all();
        }
    }

    /// Blocks until every worker thread across every pool has exited.
    /// Repeatedly drains each pool's handle list so workers spawned while
    /// joining (a sibling started just before shutdown was observed) are
    /// still waited on.
    pub fn wait_server(&self) {
        let pools: Vec<_> = self.pools.read().values().cloned().collect();
        for pool in pools {
            loop {
                let handles: Vec<_> = std::mem::take(&mut *pool.handles.lock());
                if handles.is_empty() {
                    break;
                }
                for h in handles {
                    let _ = h.join();
                }
            }
        }
    }

    /// The connection the calling thread is currently servicing, if any.
    pub fn current_conn(&self) -> Option<CurrentConn> {
        current_conn()
    }
}
