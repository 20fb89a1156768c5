// Preallocated per-request records (the "Conn" of the spec) threaded onto
// whichever of a pool's free/wait/active lists currently owns them.

use crate::driver::Sock;
use std::time::Instant;

/// Per-connection flags transferred from the accepted socket or set while
/// the request runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnFlags {
    pub closed: bool,
    pub skip_body: bool,
    pub skip_headers: bool,
    pub sent_via_writer: bool,
    pub entity_too_large: bool,
    pub uri_too_long: bool,
    pub line_too_long: bool,
}

/// One reusable in-flight-request slot. Lives in a pool's preallocated
/// array for the lifetime of the pool; cycles free -> wait -> active -> free.
pub struct Conn {
    pub id: u64,
    pub pool_name: String,
    pub server_name: String,
    pub sock: Option<Sock>,
    pub start_time: Instant,
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub content: Vec<u8>,
    pub status: u16,
    pub bytes_sent: u64,
    pub response_length: i64,
    pub output_headers: Vec<(String, String)>,
    pub flags: ConnFlags,
}

impl Conn {
    pub(crate) fn blank() -> Self {
        Self {
            id: 0,
            pool_name: String::new(),
            server_name: String::new(),
            sock: None,
            start_time: Instant::now(),
            request_line: String::new(),
            headers: Vec::new(),
            content: Vec::new(),
            status: 200,
            bytes_sent: 0,
            response_length: -1,
            output_headers: Vec::new(),
            flags: ConnFlags::default(),
        }
    }

    pub(crate) fn reset_for_admission(&mut self, id: u64, pool_name: &str, server_name: &str, sock: Sock) {
        self.id = id;
        self.pool_name = pool_name.to_string();
        self.server_name = server_name.to_string();
        self.start_time = Instant::now();
        self.request_line.clear();
        self.headers.clear();
        self.content.clear();
        self.status = 200;
        self.bytes_sent = 0;
        self.response_length = -1;
        self.output_headers.clear();
        self.flags = ConnFlags::default();
        self.sock = Some(sock);
    }

    pub fn is_closed(&self) -> bool {
        self.flags.closed || self.sock.is_none()
    }
}
