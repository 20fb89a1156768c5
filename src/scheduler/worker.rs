// Worker threads: the loop that dequeues a wait-listed connection, runs
// the request, and either goes idle again or exits.

use crate::driver::{Driver, FilterOutcome, FilterPhase, RequestHooks};
use crate::scheduler::pool::ConnPool;
use crate::scheduler::slot::Conn;
use rand::Rng;
use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lightweight snapshot of whatever connection the calling thread is
/// currently servicing, published for `Scheduler::current_conn()`.
#[derive(Debug, Clone)]
pub struct CurrentConn {
    pub id: u64,
    pub pool_name: String,
    pub server_name: String,
    pub started_at: Instant,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentConn>> = const { RefCell::new(None) };
}

pub fn current_conn() -> Option<CurrentConn> {
    CURRENT.with(|c| c.borrow().clone())
}

fn publish_current(conn: &Conn) {
    CURRENT.with(|c| {
        *c.borrow_mut() = Some(CurrentConn {
            id: conn.id,
            pool_name: conn.pool_name.clone(),
            server_name: conn.server_name.clone(),
            started_at: conn.start_time,
        });
    });
}

fn clear_current() {
    CURRENT.with(|c| *c.borrow_mut() = None);
}

/// Per-worker jitter factor in `[1 - spread/100, 1 + spread/100)`, drawn
/// once at thread start (`1 + (2*spread*U - spread)/100`, U ~ Uniform[0,1))
/// so identical pools don't synchronize their idle-exits or recycle counts.
fn spread_jitter(spread: u8) -> f64 {
    if spread == 0 {
        return 1.0;
    }
    let mut rng = rand::rng();
    let u: f64 = rng.gen_range(0.0..1.0);
    1.0 + (2.0 * spread as f64 * u - spread as f64) / 100.0
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    Duration::from_secs_f64(base.as_secs_f64() * jitter)
}

pub(crate) fn spawn(pool: Arc<ConnPool>, driver: Arc<dyn Driver>, hooks: Arc<dyn RequestHooks>) {
    let pool_name = pool.name.clone();
    let pool_for_thread = pool.clone();
    let handle = std::thread::Builder::new()
        .name(format!("servcore/{pool_name}"))
        .spawn(move || worker_main(pool_for_thread, driver, hooks))
        .expect("failed to spawn servcore worker thread");
    pool.handles.lock().push(handle);
}

fn worker_main(pool: Arc<ConnPool>, driver: Arc<dyn Driver>, hooks: Arc<dyn RequestHooks>) {
    let jitter = spread_jitter(pool.config.spread);
    {
        let mut st = pool.state.lock();
        st.creating_threads = st.creating_threads.saturating_sub(1);
        st.idle_threads += 1;
    }

    // conns_per_thread == 0 disables recycling entirely: budget/overtime
    // stay at 0 and the exit check below is skipped unconditionally.
    let recycling = pool.config.conns_per_thread != 0;
    let mut budget = (pool.config.conns_per_thread as f64 * jitter).floor() as i64;
    let max_overtime = (pool.config.conns_per_thread as f64 * (1.0 + pool.config.spread as f64 / 100.0)).floor() as i64;

    loop {
        let idx = match wait_for_work(&pool, jitter) {
            Some(idx) => idx,
            None => return,
        };

        maybe_spawn_sibling(&pool, &driver, &hooks);

        let mut conn = {
            let mut st = pool.state.lock();
            std::mem::replace(&mut st.slots[idx], Conn::blank())
        };

        publish_current(&conn);
        run_request(&mut conn, driver.as_ref(), hooks.as_ref());
        clear_current();

        let mut st = pool.state.lock();
        st.slots[idx] = conn;
        st.active.retain(|&x| x != idx);
        st.free.push(idx);
        st.idle_threads += 1;
        pool.cond.notify_all();

        if recycling {
            budget -= 1;
            let stressed = st.idle_threads <= pool.config.min_threads && !st.wait.is_empty();
            if budget <= -max_overtime {
                retire(&pool, &mut st, "conns_per_thread overtime exhausted");
                return;
            }
            if !stressed && budget <= 0 {
                retire(&pool, &mut st, "reached conns_per_thread recycling budget");
                return;
            }
        }
    }
}

/// Blocks until work is available, the pool shuts down, or this worker's
/// idle deadline lapses with nothing waiting. Returns the slot index to
/// service, or `None` if the worker should exit.
fn wait_for_work(pool: &Arc<ConnPool>, jitter: f64) -> Option<usize> {
    let mut st = pool.state.lock();
    loop {
        if st.shutting_down {
            retire(pool, &mut st, "pool shutting down");
            return None;
        }
        if let Some(idx) = st.wait.pop_front() {
            if let Some(wait_timeout) = pool.config.wait_timeout {
                if st.slots[idx].start_time.elapsed() > wait_timeout {
                    st.slots[idx].flags.closed = true;
                    st.free.push(idx);
                    pool.cond.notify_all();
                    continue;
                }
            }
            st.active.push_back(idx);
            st.idle_threads -= 1;
            return Some(idx);
        }
        if st.current_threads <= pool.config.min_threads {
            pool.cond.wait(&mut st);
            continue;
        }
        let deadline = jittered(pool.config.idle_timeout, jitter);
        let result = pool.cond.wait_for(&mut st, deadline);
        if result.timed_out() && st.wait.is_empty() {
            retire(pool, &mut st, "idle timeout elapsed");
            return None;
        }
    }
}

fn retire(pool: &Arc<ConnPool>, st: &mut parking_lot::MutexGuard<'_, crate::scheduler::pool::PoolState>, _reason: &str) {
    st.idle_threads = st.idle_threads.saturating_sub(1);
    st.current_threads = st.current_threads.saturating_sub(1);
    st.workers_exited += 1;
    pool.cond.notify_all();
}

/// Starts an additional worker if the pool is still under-provisioned
/// relative to `min_threads`/`max_threads` and the parallel-create
/// watermark allows it.
fn maybe_spawn_sibling(pool: &Arc<ConnPool>, driver: &Arc<dyn Driver>, hooks: &Arc<dyn RequestHooks>) {
    let should_spawn = {
        let mut st = pool.state.lock();
        if pool.need_more_threads(&st) {
            st.creating_threads += 1;
            st.current_threads += 1;
            true
        } else {
            false
        }
    };
    if should_spawn {
        spawn(pool.clone(), driver.clone(), hooks.clone());
    }
}

/// Runs the full per-request collaborator sequence against an owned,
/// currently-unlisted `Conn` (the core's `ConnRun`).
pub(crate) fn run_request(conn: &mut Conn, driver: &dyn Driver, hooks: &dyn RequestHooks) {
    conn.status = 200;
    conn.bytes_sent = 0;
    if conn.request_line.starts_with("HEAD ") {
        conn.flags.skip_body = true;
    }

    if let Some(status) = driver.request(conn) {
        conn.status = status;
    } else {
        match hooks.run_filters(conn, FilterPhase::PreAuth) {
            FilterOutcome::Error => conn.status = 500,
            FilterOutcome::FilterReturn => {}
            FilterOutcome::Ok => match hooks.authorize(conn) {
                crate::driver::AuthOutcome::Ok => {
                    let post = hooks.run_filters(conn, FilterPhase::PostAuth);
                    if post != FilterOutcome::FilterReturn {
                        conn.status = hooks.run_request(conn);
                    }
                }
                crate::driver::AuthOutcome::Forbidden => conn.status = 403,
                crate::driver::AuthOutcome::Unauthorized => conn.status = 401,
                crate::driver::AuthOutcome::Error => conn.status = 500,
            },
        }
    }

    conn.flags.closed = true;
    hooks.run_filters(conn, FilterPhase::Trace);
    hooks.run_filters(conn, FilterPhase::VoidTrace);
    driver.release(conn);
}
