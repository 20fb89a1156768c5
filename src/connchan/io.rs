// Retry-until-timeout write path for a channel's underlying socket.

use crate::driver::{Driver, Sock};
use std::io::{Error, ErrorKind};
use std::time::{Duration, Instant};

pub(crate) fn write_with_retry(driver: &dyn Driver, sock: &mut Sock, buf: &[u8], timeout: Duration) -> std::io::Result<usize> {
    let deadline = Instant::now() + timeout;
    let mut written = 0;
    while written < buf.len() {
        match driver.send(sock, &buf[written..]) {
            Ok(0) => {
                if Instant::now() >= deadline {
                    return Err(Error::new(ErrorKind::TimedOut, "write timed out with no progress"));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::new(ErrorKind::TimedOut, "write timed out"));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
