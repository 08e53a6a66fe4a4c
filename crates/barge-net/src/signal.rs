//! Termination signals as a pollable descriptor.
//!
//! INT, QUIT, TERM, TSTP and HUP are blocked for the process and routed
//! through a `signalfd`, so the readiness loop sees them as ordinary
//! readable events and the driver loop can sample a flag between
//! iterations instead of racing a handler.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::poll::Pollable;

/// Signals that request an orderly shutdown.
const TERM_SIGNALS: [libc::c_int; 5] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGTSTP,
    libc::SIGHUP,
];

/// Pollable watch latching a termination flag once any shutdown signal
/// arrives.
pub struct SignalWatch {
    fd: OwnedFd,
    terminated: AtomicBool,
}

impl SignalWatch {
    /// Block the termination signals for the whole process and expose
    /// them as a non-blocking descriptor. Must run before any other
    /// thread is spawned so the mask is inherited everywhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the mask or the descriptor cannot be set up.
    pub fn new() -> io::Result<Arc<Self>> {
        // SAFETY: the mask is a locally owned, zero-initialized sigset
        // passed to sigemptyset/sigaddset/sigprocmask as the libc
        // contract requires; signalfd returns a fresh descriptor we
        // immediately take ownership of.
        let fd = unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            for sig in TERM_SIGNALS {
                libc::sigaddset(&mut mask, sig);
            }
            if libc::sigprocmask(libc::SIG_BLOCK, &mask, std::ptr::null_mut()) < 0 {
                return Err(io::Error::last_os_error());
            }
            let raw = libc::signalfd(-1, &mask, libc::SFD_NONBLOCK);
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            OwnedFd::from_raw_fd(raw)
        };

        Ok(Arc::new(Self {
            fd,
            terminated: AtomicBool::new(false),
        }))
    }

    /// Whether a termination signal has been received.
    #[must_use]
    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl Pollable for SignalWatch {
    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn handle_readable(&self) -> io::Result<()> {
        loop {
            let mut siginfo: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
            // SAFETY: reading into an owned, correctly sized siginfo
            // buffer from our own descriptor.
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    (&mut siginfo as *mut libc::signalfd_siginfo).cast(),
                    std::mem::size_of::<libc::signalfd_siginfo>(),
                )
            };
            if n <= 0 {
                break;
            }
            info!("termination signal received: {}", siginfo.ssi_signo);
        }
        self.terminated.store(true, Ordering::Release);
        Ok(())
    }
}
