use std::io::{Read, Write};

use crate::error::Result;

/// A connected pipe endpoint: implements Read + Write.
///
/// On Unix this wraps a Unix domain socket stream. Both halves of a
/// capture pipe pair are also `IpcStream`s.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Read for &IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => (&*stream).read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&*self).flush()
    }
}

impl Write for &IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => (&*stream).write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => (&*stream).flush(),
        }
    }
}

impl IpcStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create a connected pair of streams.
    ///
    /// Used for stdio capture: the runtime writes into one end, the stdio
    /// relay reads the other.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Switch the stream between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_nonblocking(nonblocking).map_err(Into::into),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Shut down both directions; the peer observes end-of-stream.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Process id of the connected peer (Linux only).
    #[cfg(target_os = "linux")]
    pub fn peer_pid(&self) -> Option<u32> {
        use std::os::fd::AsRawFd;

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and the fd is an open Unix socket owned by this stream.
        let rc = unsafe {
            libc::getsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() && cred.pid > 0 {
            Some(cred.pid as u32)
        } else {
            None
        }
    }

    /// Process id of the connected peer.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_pid(&self) -> Option<u32> {
        None
    }

    /// Convert into a tokio stream. The descriptor is switched to non-blocking.
    #[cfg(all(unix, feature = "async"))]
    pub fn into_tokio(self) -> Result<tokio::net::UnixStream> {
        match self.inner {
            IpcStreamInner::Unix(stream) => {
                stream.set_nonblocking(true)?;
                Ok(tokio::net::UnixStream::from_std(stream)?)
            }
        }
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for IpcStream {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

#[cfg(unix)]
impl From<IpcStream> for std::os::fd::OwnedFd {
    fn from(stream: IpcStream) -> Self {
        match stream.inner {
            IpcStreamInner::Unix(stream) => stream.into(),
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                use std::os::fd::AsRawFd;
                f.debug_struct("IpcStream")
                    .field("type", &"unix")
                    .field("fd", &stream.as_raw_fd())
                    .finish()
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn pair_carries_bytes_both_ways() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        left.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").unwrap();
        left.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn nonblocking_read_reports_would_block() {
        let (left, _right) = IpcStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 8];
        let err = (&left).read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn shutdown_signals_end_of_stream() {
        let (left, mut right) = IpcStream::pair().unwrap();
        left.shutdown().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn peer_pid_is_own_process_for_pair() {
        let (left, _right) = IpcStream::pair().unwrap();
        assert_eq!(left.peer_pid(), Some(std::process::id()));
    }
}
