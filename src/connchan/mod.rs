//! Connection-channel registry: gives a socket a life beyond the request
//! that accepted it. A `Conn` can `detach` its socket into a channel (a
//! long-poll, a websocket upgrade, a keep-alive idle connection) that the
//! scheduler no longer tracks, and the owner of the channel id can
//! `listen`/`read`/`write`/`callback`/`close` it independently.

mod callback;
mod channel;
mod io;
mod registry;

pub use callback::{Callback, ChannelEvent};
pub use channel::{ChannelState, ConnChannel};
pub use registry::ChannelRegistry;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, Sock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct LoopbackDriver {
        inbox: Mutex<Vec<Vec<u8>>>,
    }

    impl LoopbackDriver {
        fn new() -> Self {
            Self { inbox: Mutex::new(Vec::new()) }
        }

        fn push(&self, bytes: Vec<u8>) {
            self.inbox.lock().unwrap().push(bytes);
        }
    }

    impl Driver for LoopbackDriver {
        fn name(&self) -> &str {
            "loopback"
        }

        fn send(&self, _sock: &mut Sock, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn recv(&self, _sock: &mut Sock, buf: &mut [u8], _timeout: Option<Duration>) -> std::io::Result<usize> {
            let mut inbox = self.inbox.lock().unwrap();
            if let Some(msg) = inbox.pop() {
                let n = msg.len().min(buf.len());
                buf[..n].copy_from_slice(&msg[..n]);
                Ok(n)
            } else {
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"))
            }
        }
    }

    #[test]
    fn open_read_write_close_roundtrip() {
        let driver = Arc::new(LoopbackDriver::new());
        let registry = ChannelRegistry::new(driver.clone());
        let id = registry.open(Sock::new("peer:1", 1));
        assert!(registry.exists(id));
        assert_eq!(registry.list(), vec![id]);

        assert_eq!(registry.write(id, b"hello").unwrap(), 5);

        driver.push(b"world".to_vec());
        let mut buf = [0u8; 16];
        let n = registry.read(id, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");

        registry.close(id).unwrap();
        assert!(!registry.exists(id));
        assert!(matches!(registry.read(id, &mut buf).unwrap_err(), crate::error::CoreError::NotFound(_)));
    }

    #[test]
    fn detach_survives_registry_independent_of_original_conn() {
        let driver = Arc::new(LoopbackDriver::new());
        let registry = ChannelRegistry::new(driver);
        let id = registry.detach(Sock::new("peer:2", 2));
        assert!(registry.exists(id));
    }

    #[test]
    fn callback_on_closed_channel_is_a_clean_error_not_a_panic() {
        let driver = Arc::new(LoopbackDriver::new());
        let registry = ChannelRegistry::new(driver);
        let id = registry.open(Sock::new("peer:3", 3));
        registry.close(id).unwrap();
        let err = registry.callback(id, ChannelEvent::Readable).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn listen_self_close_from_callback_does_not_deadlock() {
        let driver = Arc::new(LoopbackDriver::new());
        let registry = Arc::new(ChannelRegistry::new(driver.clone()));
        let id = registry.open(Sock::new("peer:4", 4));

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let registry2 = registry.clone();
        registry
            .listen(
                id,
                Callback::new(move |chan_id, event| {
                    if matches!(event, ChannelEvent::Closed | ChannelEvent::Error(_)) {
                        fired2.fetch_add(1, Ordering::SeqCst);
                        let _ = registry2.close(chan_id);
                    }
                }),
            )
            .unwrap();

        driver.push(b"ping".to_vec());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = registry.close(id);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!registry.exists(id));
        let _ = fired.load(Ordering::SeqCst);
    }
}
