//! One peer connection: non-blocking reads through the frame
//! accumulator on the loop side, serialized whole-frame writes from the
//! workers.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use barge_proto::Message;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::framing::FrameAccumulator;
use crate::poll::{Pollable, POLL_TIMEOUT};
use crate::request::Request;
use crate::sockopt;

/// A live duplex stream to one peer.
///
/// The readiness loop owns the read side: bytes are drained until the
/// socket would block and fed through the accumulator, and every
/// completed frame becomes a request on the broker queue. Workers own
/// the write side through [`Connection::send`], which serializes
/// frames under a per-connection lock so replies for different files
/// never interleave on the wire.
pub struct Connection {
    stream: TcpStream,
    fd: RawFd,
    valid: AtomicBool,
    accumulator: Mutex<FrameAccumulator>,
    send_lock: Mutex<()>,
    broker: Arc<Broker>,
    weak_self: Weak<Connection>,
}

impl Connection {
    /// Wrap a stream handed out by the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket options cannot be applied.
    pub fn accepted(stream: TcpStream, broker: Arc<Broker>) -> io::Result<Arc<Self>> {
        sockopt::configure_stream(&stream)?;
        Ok(Self::wrap(stream, broker))
    }

    /// Connect out to a receiver, trying each resolved address in turn.
    ///
    /// # Errors
    ///
    /// Returns the last connect error if no resolved address accepts,
    /// or the resolution/configuration failure.
    pub fn connect(host: &str, port: u16, broker: Arc<Broker>) -> io::Result<Arc<Self>> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    sockopt::configure_stream(&stream)?;
                    return Ok(Self::wrap(stream, broker));
                }
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{host}:{port} did not resolve"),
            )
        }))
    }

    fn wrap(stream: TcpStream, broker: Arc<Broker>) -> Arc<Self> {
        let fd = stream.as_raw_fd();
        Arc::new_cyclic(|weak| Self {
            stream,
            fd,
            valid: AtomicBool::new(true),
            accumulator: Mutex::new(FrameAccumulator::new()),
            send_lock: Mutex::new(()),
            broker,
            weak_self: weak.clone(),
        })
    }

    /// Peer address, if the socket still knows it.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Serialize and write one message, whole, under the send lock.
    ///
    /// The socket is non-blocking, so a full send buffer shows up as a
    /// short write; the remainder is drained by waiting for
    /// write-readiness on this one descriptor. Sends run on worker
    /// threads, where blocking is the norm, and a peer that never
    /// drains is cut off by keep-alive.
    ///
    /// # Errors
    ///
    /// Returns an error for an unencodable message or a hard socket
    /// failure.
    pub fn send(&self, message: &Message) -> io::Result<()> {
        let frame = message
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let _guard = self.send_lock.lock().unwrap();
        let mut written = 0;
        while written < frame.len() {
            match (&self.stream).write(&frame[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_writable()?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn wait_writable(&self) -> io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        // SAFETY: single live pollfd on the stack; poll(2) does not
        // retain the pointer.
        let ready = unsafe { libc::poll(&mut pfd, 1, POLL_TIMEOUT.as_millis() as libc::c_int) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer went away while draining a send",
            ));
        }
        // A bare timeout just retries the write.
        Ok(())
    }

    fn dispatch(&self, frame: &[u8]) {
        match Message::decode(frame) {
            Ok(message) => {
                let request = Request::new(self.weak_self.clone(), message);
                if let Err(e) = self.broker.enqueue(request) {
                    warn!("dropping request: {e}");
                }
            }
            Err(e) => warn!("discarding undecodable frame of {} bytes: {e}", frame.len()),
        }
    }
}

impl Pollable for Connection {
    fn fd(&self) -> RawFd {
        if self.valid.load(Ordering::Acquire) {
            self.fd
        } else {
            -1
        }
    }

    fn handle_readable(&self) -> io::Result<()> {
        let mut accumulator = self.accumulator.lock().unwrap();
        let mut buf = [0u8; 4096];
        loop {
            match (&self.stream).read(&mut buf) {
                Ok(0) => {
                    debug!("connection closed by peer");
                    self.valid.store(false, Ordering::Release);
                    return Ok(());
                }
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if let Some(frame) = accumulator.push(byte) {
                            self.dispatch(&frame);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.valid.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::RequestHandler;
    use barge_proto::{Body, MAGIC};
    use std::net::TcpListener;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    struct Recording {
        seen: Mutex<Vec<Message>>,
    }

    impl RequestHandler for Recording {
        fn handle(&self, request: Request) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(request.into_message());
            Ok(())
        }
    }

    fn pair() -> (Arc<Connection>, TcpStream, Arc<Recording>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let remote = TcpStream::connect(addr).unwrap();
        let (local, _) = listener.accept().unwrap();

        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let broker = Arc::new(Broker::new(handler.clone(), 1));
        let conn = Connection::accepted(local, broker).unwrap();
        (conn, remote, handler)
    }

    fn message() -> Message {
        Message {
            seq: 9,
            peer: Uuid::from_bytes([2; 16]),
            file_name: "data.bin".into(),
            body: Body::Complete,
        }
    }

    fn wait_for(len: usize, handler: &Recording) -> Vec<Message> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let seen = handler.seen.lock().unwrap();
            if seen.len() >= len {
                return seen.clone();
            }
            drop(seen);
            assert!(Instant::now() < deadline, "requests never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn inbound_frames_become_requests() {
        let (conn, mut remote, handler) = pair();
        remote.write_all(&message().encode().unwrap()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        conn.handle_readable().unwrap();
        let seen = wait_for(1, &handler);
        assert_eq!(seen[0], message());
        assert!(conn.fd() >= 0);
    }

    #[test]
    fn garbage_around_a_frame_is_tolerated() {
        let (conn, mut remote, handler) = pair();
        let mut stream = vec![0x13, 0x37, MAGIC[0], MAGIC[1], 0x00];
        stream.extend_from_slice(&message().encode().unwrap());
        remote.write_all(&stream).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        conn.handle_readable().unwrap();
        let seen = wait_for(1, &handler);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], message());
    }

    #[test]
    fn peer_close_invalidates_the_descriptor() {
        let (conn, remote, _handler) = pair();
        drop(remote);
        std::thread::sleep(Duration::from_millis(20));

        conn.handle_readable().unwrap();
        assert_eq!(conn.fd(), -1);
    }

    #[test]
    fn send_writes_one_whole_frame() {
        let (conn, mut remote, _handler) = pair();
        conn.send(&message()).unwrap();

        let expected = message().encode().unwrap();
        let mut got = vec![0u8; expected.len()];
        remote
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        remote.read_exact(&mut got).unwrap();
        assert_eq!(got, expected);
    }
}
