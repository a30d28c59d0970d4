use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::error::Result;

/// Cross-thread readiness signal, the Unix stand-in for a manual-reset event.
///
/// `wake` makes the read end readable until `drain` is called, so a thread
/// blocked in [`PollSet::wait`](crate::PollSet::wait) on this waker returns.
/// Repeated wakes before a drain collapse into one.
#[derive(Debug)]
pub struct Waker {
    reader: UnixStream,
    writer: UnixStream,
}

impl Waker {
    pub fn new() -> Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    /// Signal the waker.
    pub fn wake(&self) -> Result<()> {
        loop {
            match (&self.writer).write(&[1]) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // The buffer is full of earlier wakes; still signaled.
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Reset the signal.
    pub fn drain(&self) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::poll::{Interest, PollSet};

    #[test]
    fn wake_then_drain_resets() {
        let waker = Waker::new().unwrap();
        let mut set = PollSet::new();

        set.register(waker.as_raw_fd(), Interest::Readable, 0u8);
        assert!(set.wait(Duration::from_millis(10)).unwrap().is_none());

        waker.wake().unwrap();
        waker.wake().unwrap();
        let ready = set.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(ready.map(|r| r.token), Some(0));

        waker.drain().unwrap();
        assert!(set.wait(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn wake_from_another_thread_unblocks_wait() {
        let waker = std::sync::Arc::new(Waker::new().unwrap());
        let remote = std::sync::Arc::clone(&waker);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.wake().unwrap();
        });

        let mut set = PollSet::new();
        set.register(waker.as_raw_fd(), Interest::Readable, 7u8);
        let ready = set.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(ready.map(|r| r.token), Some(7));
        handle.join().unwrap();
    }
}
