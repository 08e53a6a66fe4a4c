//! Listening socket accepting uploader connections into the loop.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use crate::broker::Broker;
use crate::conn::Connection;
use crate::poll::{PollGroup, Pollable};
use crate::sockopt;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 4444;

/// Bound, listening socket registered with the readiness loop. Holds a
/// strong reference to the loop so freshly accepted connections can be
/// added to it, and to the broker every connection enqueues into.
pub struct Listener {
    socket: TcpListener,
    group: Arc<PollGroup>,
    broker: Arc<Broker>,
}

impl Listener {
    /// Bind on all interfaces with address and port reuse, keep-alive
    /// and non-blocking accepts. `backlog` also bounds the accept
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created, configured or
    /// bound.
    pub fn bind(
        port: u16,
        backlog: usize,
        group: Arc<PollGroup>,
        broker: Arc<Broker>,
    ) -> io::Result<Arc<Self>> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.set_tcp_keepalive(&sockopt::keepalive())?;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;

        Ok(Arc::new(Self {
            socket: socket.into(),
            group,
            broker,
        }))
    }

    /// Address the socket actually bound, useful with port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot report its address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Pollable for Listener {
    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn handle_readable(&self) -> io::Result<()> {
        loop {
            match self.socket.accept() {
                Ok((stream, addr)) => {
                    info!("connection accepted from {addr}");
                    match Connection::accepted(stream, self.broker.clone()) {
                        Ok(conn) => {
                            if let Err(e) = self.group.add(conn) {
                                warn!("rejecting connection from {addr}: {e}");
                            }
                        }
                        Err(e) => warn!("failed to configure socket from {addr}: {e}"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RequestHandler;
    use crate::request::Request;
    use std::net::TcpStream;

    struct Discard;

    impl RequestHandler for Discard {
        fn handle(&self, _request: Request) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn accepted_connections_join_the_group() {
        let group = Arc::new(PollGroup::new(8));
        let broker = Arc::new(Broker::new(Arc::new(Discard), 1));
        let listener = Listener::bind(0, 16, group.clone(), broker).unwrap();
        let port = listener.local_addr().unwrap().port();
        group.add(listener.clone()).unwrap();
        assert_eq!(group.len(), 1);

        let _client_a = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let _client_b = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        listener.handle_readable().unwrap();
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn group_capacity_bounds_accepts() {
        let group = Arc::new(PollGroup::new(1));
        let broker = Arc::new(Broker::new(Arc::new(Discard), 1));
        let listener = Listener::bind(0, 16, group.clone(), broker).unwrap();
        let port = listener.local_addr().unwrap().port();
        group.add(listener.clone()).unwrap();

        let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        // The group is already full; the accept succeeds but the
        // connection is turned away, not the loop broken.
        listener.handle_readable().unwrap();
        assert_eq!(group.len(), 1);
    }
}
