// A connection pool: a preallocated array of `Conn` slots plus the
// free/wait/active lists and worker-thread bookkeeping that move slots
// between them.
//
// Grounded on the teacher's async semaphore-gated node pool
// (src/networking/pool/node_pool.rs, manager.rs) but rebuilt as a plain
// condvar-guarded structure per the scheduler's OS-thread design: workers
// block on `Condvar::wait_for` instead of polling a semaphore permit.

use crate::scheduler::slot::Conn;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Static sizing and thread-lifecycle knobs for one pool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub min_threads: usize,
    pub max_threads: usize,
    pub idle_timeout: Duration,
    pub conns_per_thread: u64,
    /// 0-100: how much worker idle-wait deadlines are jittered, to avoid
    /// every idle worker waking in lockstep.
    pub spread: u8,
    /// 0 = always allow a second concurrent create; 100 = never (at most
    /// one creating worker at a time); in between, a fraction of
    /// `max_connections - max_threads` wait-queue depth.
    pub concurrent_create_threshold: u8,
    pub wait_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 256,
            min_threads: 1,
            max_threads: 16,
            idle_timeout: Duration::from_secs(30),
            conns_per_thread: 10_000,
            spread: 20,
            concurrent_create_threshold: 50,
            wait_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Watermark {
    Always,
    Never,
    Depth(usize),
}

impl Watermark {
    fn compute(threshold: u8, max_connections: usize, max_threads: usize) -> Self {
        match threshold {
            0 => Watermark::Always,
            100 => Watermark::Never,
            t => {
                let span = max_connections.saturating_sub(max_threads) as u64;
                Watermark::Depth(((span * t as u64) / 100) as usize)
            }
        }
    }
}

pub(crate) struct PoolState {
    pub(crate) slots: Vec<Conn>,
    pub(crate) free: Vec<usize>,
    pub(crate) wait: VecDeque<usize>,
    pub(crate) active: VecDeque<usize>,
    pub(crate) current_threads: usize,
    pub(crate) creating_threads: usize,
    pub(crate) idle_threads: usize,
    pub(crate) next_id: u64,
    pub(crate) shutting_down: bool,
    pub(crate) workers_exited: usize,
}

/// One named pool: a slot array plus the lists that partition it, guarded
/// by a single lock and condvar shared by producers (`queue_conn`) and
/// worker threads.
pub struct ConnPool {
    pub(crate) name: String,
    pub(crate) config: PoolConfig,
    pub(crate) watermark: Watermark,
    pub(crate) state: Mutex<PoolState>,
    pub(crate) cond: Condvar,
    pub(crate) handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl ConnPool {
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        let name = name.into();
        let watermark = Watermark::compute(config.concurrent_create_threshold, config.max_connections, config.max_threads);
        let mut slots = Vec::with_capacity(config.max_connections);
        let mut free = Vec::with_capacity(config.max_connections);
        for i in 0..config.max_connections {
            slots.push(Conn::blank());
            free.push(i);
        }
        Self {
            name,
            config,
            watermark,
            state: Mutex::new(PoolState {
                slots,
                free,
                wait: VecDeque::new(),
                active: VecDeque::new(),
                current_threads: 0,
                creating_threads: 0,
                idle_threads: 0,
                next_id: 1,
                shutting_down: false,
                workers_exited: 0,
            }),
            cond: Condvar::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current free/wait/active/thread counts, for introspection and tests.
    pub fn snapshot(&self) -> PoolSnapshot {
        let st = self.state.lock();
        PoolSnapshot {
            free: st.free.len(),
            waiting: st.wait.len(),
            active: st.active.len(),
            current_threads: st.current_threads,
            creating_threads: st.creating_threads,
            idle_threads: st.idle_threads,
        }
    }

    pub(crate) fn parallel_create_allowed(&self, creating: usize, wait_len: usize) -> bool {
        if creating == 0 {
            return true;
        }
        match self.watermark {
            Watermark::Always => true,
            Watermark::Never => false,
            Watermark::Depth(d) => wait_len > d,
        }
    }

    /// Grants a new worker when all hold: parallel-create is allowed,
    /// `idle < min` (we want min threads warm), and `current < max`.
    /// Caller holds the lock.
    pub(crate) fn need_more_threads(&self, st: &PoolState) -> bool {
        if st.shutting_down {
            return false;
        }
        if st.idle_threads >= self.config.min_threads {
            return false;
        }
        if st.current_threads >= self.config.max_threads {
            return false;
        }
        self.parallel_create_allowed(st.creating_threads, st.wait.len())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    pub free: usize,
    pub waiting: usize,
    pub active: usize,
    pub current_threads: usize,
    pub creating_threads: usize,
    pub idle_threads: usize,
}
