//! Connection scheduler: a server made of named, condvar-guarded connection
//! pools. Each pool preallocates a fixed array of request slots and cycles
//! them through free -> wait -> active -> free as worker threads pick up
//! and finish requests, growing and shrinking its thread count between
//! `min_threads` and `max_threads`.
//!
//! Grounded on the teacher's `networking/pool` (async semaphore-gated
//! acquire/release over a fixed-capacity node pool) but rebuilt around
//! `std::thread` + `parking_lot::Condvar` rather than tokio tasks, per the
//! explicit thread-and-condvar design called for by this scheduler.

pub(crate) mod pool;
pub(crate) mod server;
pub(crate) mod slot;
pub(crate) mod worker;

pub use pool::{ConnPool, PoolConfig, PoolSnapshot};
pub use server::Server;
pub use slot::{Conn, ConnFlags};
pub use worker::CurrentConn;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, NullHooks, Sock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct EchoDriver {
        requests: AtomicUsize,
    }

    impl Driver for EchoDriver {
        fn name(&self) -> &str {
            "echo"
        }

        fn send(&self, _sock: &mut Sock, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn recv(&self, _sock: &mut Sock, _buf: &mut [u8], _timeout: Option<Duration>) -> std::io::Result<usize> {
            Ok(0)
        }

        fn request(&self, _conn: &mut Conn) -> Option<u16> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Some(200)
        }
    }

    fn tiny_pool_config() -> PoolConfig {
        PoolConfig {
            max_connections: 8,
            min_threads: 1,
            max_threads: 4,
            idle_timeout: Duration::from_millis(50),
            conns_per_thread: 0,
            spread: 0,
            concurrent_create_threshold: 50,
            wait_timeout: None,
        }
    }

    #[test]
    fn queue_conn_serves_a_request() {
        let driver = Arc::new(EchoDriver {
            requests: AtomicUsize::new(0),
        });
        let server = Server::new("t", driver.clone());
        server.add_pool("default", tiny_pool_config());
        server.start_server().unwrap();

        server.queue_conn(None, Sock::new("127.0.0.1:1", 1)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while driver.requests.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(driver.requests.load(Ordering::SeqCst), 1);

        server.stop_server();
        server.wait_server();
    }

    #[test]
    fn idle_workers_above_min_threads_exit_after_timeout() {
        let driver = Arc::new(EchoDriver {
            requests: AtomicUsize::new(0),
        });
        let server = Server::new("t", driver.clone());
        let pool = server.add_pool("default", tiny_pool_config());
        server.start_server().unwrap();

        for _ in 0..4 {
            server.queue_conn(None, Sock::new("127.0.0.1:1", 1)).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pool.snapshot().current_threads > 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(pool.snapshot().current_threads, 1, "extra workers should reclaim down to min_threads");

        server.stop_server();
        server.wait_server();
    }

    #[test]
    fn pool_saturation_returns_limit_exceeded() {
        let driver = Arc::new(EchoDriver {
            requests: AtomicUsize::new(0),
        });
        let server = Server::new("t", driver);
        server.add_pool(
            "default",
            PoolConfig {
                max_connections: 1,
                min_threads: 0,
                max_threads: 0,
                idle_timeout: Duration::from_secs(60),
                conns_per_thread: 0,
                spread: 0,
                concurrent_create_threshold: 50,
                wait_timeout: None,
            },
        );

        server.queue_conn(None, Sock::new("a", 1)).unwrap();
        let err = server.queue_conn(None, Sock::new("b", 2)).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::LimitExceeded(_)));
    }

    #[test]
    fn unknown_pool_is_not_found() {
        let driver = Arc::new(EchoDriver {
            requests: AtomicUsize::new(0),
        });
        let server = Server::new("t", driver);
        server.add_pool("default", tiny_pool_config());
        let err = server.queue_conn(Some("nope"), Sock::new("a", 1)).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::NotFound(_)));
    }

    #[test]
    fn stop_server_rejects_new_connections() {
        let driver = Arc::new(EchoDriver {
            requests: AtomicUsize::new(0),
        });
        let server = Server::new("t", driver);
        server.add_pool("default", tiny_pool_config());
        server.start_server().unwrap();
        server.stop_server();
        server.wait_server();

        let err = server.queue_conn(None, Sock::new("a", 1)).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::ShuttingDown(_)));
    }

    #[test]
    fn filter_return_skips_request_proc_but_runs_trace() {
        use crate::driver::{AuthOutcome, FilterOutcome, FilterPhase, RequestHooks};
        use std::sync::atomic::AtomicBool;

        struct ShortCircuitHooks {
            trace_ran: AtomicBool,
            request_ran: AtomicBool,
        }
        impl RequestHooks for ShortCircuitHooks {
            fn run_filters(&self, _conn: &mut Conn, phase: FilterPhase) -> FilterOutcome {
                match phase {
                    FilterPhase::PreAuth => FilterOutcome::FilterReturn,
                    FilterPhase::Trace => {
                        self.trace_ran.store(true, Ordering::SeqCst);
                        FilterOutcome::Ok
                    }
                    _ => FilterOutcome::Ok,
                }
            }
            fn authorize(&self, _conn: &Conn) -> AuthOutcome {
                AuthOutcome::Ok
            }
            fn run_request(&self, _conn: &mut Conn) -> u16 {
                self.request_ran.store(true, Ordering::SeqCst);
                200
            }
        }

        struct NoopDriver;
        impl Driver for NoopDriver {
            fn name(&self) -> &str {
                "noop"
            }
            fn send(&self, _s: &mut Sock, b: &[u8]) -> std::io::Result<usize> {
                Ok(b.len())
            }
            fn recv(&self, _s: &mut Sock, _b: &mut [u8], _t: Option<Duration>) -> std::io::Result<usize> {
                Ok(0)
            }
        }

        let mut conn = Conn::blank();
        conn.reset_for_admission(1, "p", "s", Sock::new("x", 1));
        let hooks = ShortCircuitHooks {
            trace_ran: AtomicBool::new(false),
            request_ran: AtomicBool::new(false),
        };
        worker::run_request(&mut conn, &NoopDriver, &hooks);
        assert!(!hooks.request_ran.load(Ordering::SeqCst));
        assert!(hooks.trace_ran.load(Ordering::SeqCst));
        assert!(conn.flags.closed);
    }

    #[test]
    fn no_default_pool_configured_is_a_configuration_error() {
        let driver = Arc::new(NoDefaultDriver);
        let server = Server::new("t", driver);
        let err = server.queue_conn(None, Sock::new("a", 1)).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Configuration(_)));
    }

    struct NoDefaultDriver;
    impl Driver for NoDefaultDriver {
        fn name(&self) -> &str {
            "x"
        }
        fn send(&self, _s: &mut Sock, b: &[u8]) -> std::io::Result<usize> {
            Ok(b.len())
        }
        fn recv(&self, _s: &mut Sock, _b: &mut [u8], _t: Option<Duration>) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    #[allow(dead_code)]
    fn assert_hooks_object_safe(_h: &dyn crate::driver::RequestHooks) {}

    #[allow(dead_code)]
    fn assert_null_hooks_default() -> Arc<dyn crate::driver::RequestHooks> {
        Arc::new(NullHooks)
    }
}
