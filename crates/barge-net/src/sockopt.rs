//! Socket configuration shared by the listener and both connection ends.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

/// Keep-alive probing: start after 1 s idle, probe every 1 s, give up
/// after 10 probes. A dead peer surfaces as a reset within roughly ten
/// seconds, which is the only liveness detection the protocol has.
pub(crate) fn keepalive() -> TcpKeepalive {
    TcpKeepalive::new()
        .with_time(Duration::from_secs(1))
        .with_interval(Duration::from_secs(1))
        .with_retries(10)
}

/// Configure a connected stream: non-blocking, keep-alive probing on.
pub(crate) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    SockRef::from(stream).set_tcp_keepalive(&keepalive())
}
