// Channel event callbacks.
//
// A callback is held by the channel it's registered on, and the poll loop
// only ever reaches a channel through a `Weak` handle (see registry.rs).
// Closing a channel drops its strong `Arc`, so a callback fired by a poll
// iteration that raced with `close` simply finds nothing to upgrade to
// instead of touching a freed socket.

use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Readable,
    Closed,
    Error(String),
}

#[derive(Clone)]
pub struct Callback {
    inner: Arc<dyn Fn(u64, ChannelEvent) + Send + Sync>,
}

impl Callback {
    pub fn new(f: impl Fn(u64, ChannelEvent) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    pub(crate) fn invoke(&self, id: u64, event: ChannelEvent) {
        (self.inner)(id, event)
    }
}
