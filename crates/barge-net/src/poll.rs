//! Readiness loop over a bounded set of pollable handles.

use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::error::NetError;

/// Ceiling on a single readiness wait; bounds shutdown latency for the
/// driver loops sampling their termination flags between iterations.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// A descriptor paired with a readable-event handler.
pub trait Pollable: Send + Sync {
    /// Current descriptor; negative once the handle has invalidated
    /// itself, which tells the loop to drop it.
    fn fd(&self) -> RawFd;

    /// Consume whatever made the descriptor readable. Must drain until
    /// the descriptor reports `WouldBlock`; the loop is edge-agnostic
    /// but only fires once per readiness wait.
    fn handle_readable(&self) -> io::Result<()>;
}

/// Single-threaded readiness loop.
///
/// Handlers run on the loop thread and must not re-enter it; anything
/// they spawn reaches the group only through [`PollGroup::add`], which
/// is safe from inside a handler because dispatch works on a snapshot.
pub struct PollGroup {
    capacity: usize,
    pollables: Mutex<Vec<Arc<dyn Pollable>>>,
}

impl PollGroup {
    /// Create a group holding at most `capacity` handles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pollables: Mutex::new(Vec::new()),
        }
    }

    /// Register a handle.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` when the group is full; the caller is
    /// responsible for sizing the group.
    pub fn add(&self, pollable: Arc<dyn Pollable>) -> Result<(), NetError> {
        let mut pollables = self.pollables.lock().unwrap();
        if pollables.len() >= self.capacity {
            return Err(NetError::CapacityExceeded(self.capacity));
        }
        pollables.push(pollable);
        Ok(())
    }

    /// Deregister a handle by identity.
    pub fn remove(&self, pollable: &Arc<dyn Pollable>) {
        self.pollables
            .lock()
            .unwrap()
            .retain(|p| !Arc::ptr_eq(p, pollable));
    }

    /// Number of registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pollables.lock().unwrap().len()
    }

    /// Whether no handles are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One loop iteration: wait for readability across every handle
    /// with the [`POLL_TIMEOUT`] ceiling, dispatch handlers for the
    /// ready ones, and drop handles that reported error or hang-up or
    /// invalidated their descriptor. Handler failures are logged, never
    /// propagated. Returns a continue flag for driver `while` loops.
    ///
    /// # Errors
    ///
    /// Returns an error only when the wait itself fails (`EINTR` counts
    /// as a normal, empty iteration).
    pub fn poll_once(&self) -> io::Result<bool> {
        let snapshot: Vec<Arc<dyn Pollable>> = self.pollables.lock().unwrap().clone();
        let mut fds: Vec<libc::pollfd> = snapshot
            .iter()
            .map(|p| libc::pollfd {
                fd: p.fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        // SAFETY: `fds` stays alive and correctly sized for the duration
        // of the call; poll(2) does not retain the pointer.
        let ready = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                POLL_TIMEOUT.as_millis() as libc::c_int,
            )
        };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(true);
            }
            return Err(err);
        }
        if ready == 0 {
            return Ok(true);
        }

        let mut dead: Vec<Arc<dyn Pollable>> = Vec::new();
        for (pollable, pfd) in snapshot.iter().zip(&fds) {
            if pfd.revents == 0 {
                continue;
            }
            if pfd.revents & libc::POLLIN != 0 {
                if let Err(e) = pollable.handle_readable() {
                    warn!("readable handler failed: {e}");
                }
            }
            if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0
                || pollable.fd() < 0
            {
                dead.push(pollable.clone());
            }
        }
        for pollable in &dead {
            self.remove(pollable);
        }

        Ok(true)
    }
}
