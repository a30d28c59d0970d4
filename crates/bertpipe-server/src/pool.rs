use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;

use bertpipe_transport::{PipeListener, Waker};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelState};
use crate::error::Result;

/// The set of pool slots, indexed by position.
///
/// Every `Listening` slot shares the one bound listener; the lowest-index
/// listening slot takes the next incoming client. Slots are reset in place and
/// never removed, so indices stay stable for the life of the process.
pub struct ChannelPool {
    listener: PipeListener,
    channels: Vec<Channel>,
    max_channels: usize,
    waker: Arc<Waker>,
    saturated: bool,
}

impl ChannelPool {
    /// Bind the listener and create the first listening slot.
    pub fn bind(path: impl AsRef<Path>, max_channels: usize, waker: Arc<Waker>) -> Result<Self> {
        let listener = PipeListener::bind(path)?;
        listener.set_nonblocking(true)?;
        info!(path = %listener.path().display(), max_channels, "control pipe listening");
        Ok(Self {
            listener,
            channels: vec![Channel::listening(0, Arc::clone(&waker))],
            max_channels: max_channels.max(1),
            waker,
            saturated: false,
        })
    }

    /// Start the first slot.
    ///
    /// With `blocking_connect` the call waits for the first client and
    /// returns its slot; otherwise clients are picked up by [`accept_into`](Self::accept_into).
    pub fn start(&mut self, blocking_connect: bool) -> Result<Option<usize>> {
        if !blocking_connect {
            return Ok(None);
        }
        self.listener.set_nonblocking(false)?;
        let accepted = self.listener.accept();
        self.listener.set_nonblocking(true)?;
        let stream = accepted?;

        let index = self.first_listening().unwrap_or(0);
        self.channels[index].connect(stream)?;
        info!(channel = index, "first client connected");
        self.spawn_if_under_capacity();
        Ok(Some(index))
    }

    /// Accept a pending client into the listening slot `index`.
    ///
    /// Returns `false` if no client was actually waiting.
    pub fn accept_into(&mut self, index: usize) -> Result<bool> {
        let Some(stream) = self.listener.try_accept()? else {
            return Ok(false);
        };
        let channel = &mut self.channels[index];
        let peer = stream.peer_pid();
        channel.connect(stream)?;
        info!(channel = index, peer_pid = ?peer, "client connected");
        self.spawn_if_under_capacity();
        Ok(true)
    }

    /// Add a listening slot if the bound allows it.
    pub fn spawn_if_under_capacity(&mut self) -> Option<usize> {
        if self.channels.len() >= self.max_channels {
            if !self.saturated {
                self.saturated = true;
                warn!(
                    max_channels = self.max_channels,
                    "channel capacity reached; no new listener spawned"
                );
            }
            return None;
        }
        let index = self.channels.len();
        self.channels
            .push(Channel::listening(index, Arc::clone(&self.waker)));
        debug!(channel = index, "spawned listener");
        Some(index)
    }

    /// Return slot `index` to `Listening`.
    pub fn reset(&mut self, index: usize) {
        if let Some(channel) = self.channels.get_mut(index) {
            if channel.state() == ChannelState::Closed {
                return;
            }
            channel.reset();
            self.saturated = false;
            info!(channel = index, "client disconnected; slot listening again");
        }
    }

    /// Close every slot.
    pub fn close_all(&mut self) {
        for channel in &mut self.channels {
            channel.close();
        }
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.channels.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Lowest-index slot waiting for a client.
    pub fn first_listening(&self) -> Option<usize> {
        self.channels.iter().position(Channel::is_listening)
    }

    pub fn listening_count(&self) -> usize {
        self.count(ChannelState::Listening)
    }

    pub fn connected_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_connected()).count()
    }

    fn count(&self, state: ChannelState) -> usize {
        self.channels.iter().filter(|c| c.state() == state).count()
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    pub fn path(&self) -> &Path {
        self.listener.path()
    }
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("path", &self.listener.path())
            .field("channels", &self.channels)
            .field("max_channels", &self.max_channels)
            .finish()
    }
}
