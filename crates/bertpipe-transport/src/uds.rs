use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Listening endpoint that every pipe instance of one channel name shares.
///
/// A Unix domain socket accepts any number of clients on one path, so the
/// pool's "listening instances" are slots waiting on this single listener.
/// The socket path is removed on drop if it still refers to the socket we
/// created.
pub struct PipeListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl PipeListener {
    /// Default permission mode for the pipe path.
    pub const DEFAULT_MODE: u32 = 0o600;

    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind the pipe at `path` with the default mode.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_MODE)
    }

    /// Bind the pipe at `path` with an explicit permission mode.
    ///
    /// A stale socket left at `path` is removed first; any other kind of file
    /// is left alone and reported as a bind error.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        remove_stale_socket(&path).map_err(bind_err)?;
        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "pipe listening");

        Ok(Self {
            listener,
            created_inode: Some((metadata.dev(), metadata.ino())),
            path,
        })
    }

    /// Switch accept between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(TransportError::Accept)
    }

    /// Accept the next client, blocking if the listener is in blocking mode.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "pipe client attached");
        Ok(IpcStream::from_unix(stream))
    }

    /// Accept a client if one is waiting.
    ///
    /// Returns `Ok(None)` when the listener is non-blocking and nobody is
    /// queued, which happens when two slots race for the same readiness.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                debug!(path = ?self.path, "pipe client attached");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening pipe as a client (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to pipe");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this pipe is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for PipeListener {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.file_type().is_socket() {
        return Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        ));
    }
    debug!(?path, "removing stale pipe");
    std::fs::remove_file(path)
}

impl Drop for PipeListener {
    fn drop(&mut self) {
        let Some((dev, ino)) = self.created_inode else {
            return;
        };
        match std::fs::symlink_metadata(&self.path) {
            Ok(metadata)
                if metadata.file_type().is_socket()
                    && metadata.dev() == dev
                    && metadata.ino() == ino =>
            {
                debug!(path = ?self.path, "removing pipe path");
                let _ = std::fs::remove_file(&self.path);
            }
            Ok(_) => debug!(path = ?self.path, "pipe path replaced; leaving it"),
            Err(_) => {}
        }
    }
}
