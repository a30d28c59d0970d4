use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// Which readiness an entry waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// The entry that fired on a wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness<T> {
    pub token: T,
    pub interest: Interest,
    /// The peer hung up or the descriptor is in error.
    pub hangup: bool,
}

/// Single multiplexed wait over a set of descriptors.
///
/// Entries are rebuilt by the owner before each wait. [`wait`](Self::wait)
/// reports only the first fired entry in registration order, so callers
/// service exactly one readiness per wake and derive priority from the order
/// they register in.
pub struct PollSet<T> {
    fds: Vec<libc::pollfd>,
    entries: Vec<(Interest, T)>,
}

impl<T: Copy> Default for PollSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> PollSet<T> {
    pub fn new() -> Self {
        Self {
            fds: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.fds.clear();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Add a descriptor to the next wait.
    pub fn register(&mut self, fd: RawFd, interest: Interest, token: T) {
        let events = match interest {
            Interest::Readable => libc::POLLIN,
            Interest::Writable => libc::POLLOUT,
        };
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.entries.push((interest, token));
    }

    /// Block until an entry fires or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout and on signal interruption.
    pub fn wait(&mut self, timeout: Duration) -> Result<Option<Readiness<T>>> {
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        for fd in &mut self.fds {
            fd.revents = 0;
        }

        // SAFETY: `fds` is a live, exclusively borrowed slice of `pollfd` and the
        // length passed matches it.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(TransportError::Poll(err));
        }
        if rc == 0 {
            return Ok(None);
        }

        let fired = self
            .fds
            .iter()
            .zip(&self.entries)
            .find(|(fd, _)| fd.revents != 0);

        Ok(fired.map(|(fd, &(interest, token))| Readiness {
            token,
            interest,
            hangup: fd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
        }))
    }
}
