use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard};

use bertpipe_transport::{IpcStream, Waker};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

const READ_CHUNK_SIZE: usize = 8 * 1024;
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Lifecycle state of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for a client to attach.
    Listening,
    /// Attached, with no read armed and no write in flight.
    Connected,
    /// Attached, with a read armed.
    ReadPending,
    /// Attached, with a write waiting for the peer to drain.
    WritePending,
    /// Torn down for good.
    Closed,
}

/// Outcome of [`Channel::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes were appended to the output buffer.
    Ok,
    /// Nothing to read yet.
    WouldBlock,
    /// The peer is gone; the caller resets the channel.
    BrokenPipe,
}

/// One slot of the pool: a connection-oriented endpoint with a non-blocking
/// read side owned by the event loop and a shared, ordered write queue.
pub struct Channel {
    index: usize,
    reader: Option<IpcStream>,
    buf: BytesMut,
    reading: bool,
    closed: bool,
    writer: Arc<ChannelWriter>,
}

impl Channel {
    /// A fresh slot waiting for a client. `waker` is signaled when another
    /// thread leaves a write in flight.
    pub fn listening(index: usize, waker: Arc<Waker>) -> Self {
        Self {
            index,
            reader: None,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            reading: false,
            closed: false,
            writer: Arc::new(ChannelWriter::new(index, waker)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> ChannelState {
        if self.closed {
            ChannelState::Closed
        } else if self.reader.is_none() {
            ChannelState::Listening
        } else if self.writer.is_write_pending() {
            ChannelState::WritePending
        } else if self.reading {
            ChannelState::ReadPending
        } else {
            ChannelState::Connected
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && self.reader.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ChannelState::Listening
    }

    /// Attach a client stream and arm the first read.
    pub fn connect(&mut self, stream: IpcStream) -> bertpipe_transport::Result<()> {
        stream.set_nonblocking(true)?;
        let write_half = stream.try_clone()?;
        self.writer.attach(write_half);
        self.reader = Some(stream);
        self.buf.clear();
        self.closed = false;
        self.reading = true;
        debug!(channel = self.index, "channel connected");
        Ok(())
    }

    /// Complete the armed read: append everything currently available to `out`.
    ///
    /// With `start_new_read_after` false the read stays disarmed until
    /// [`arm_read`](Self::arm_read) is called.
    pub fn read(&mut self, out: &mut BytesMut, start_new_read_after: bool) -> ReadStatus {
        let Some(stream) = self.reader.as_ref() else {
            return ReadStatus::BrokenPipe;
        };
        self.reading = false;

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0usize;
        let status = loop {
            let mut source: &IpcStream = stream;
            match source.read(&mut chunk) {
                Ok(0) if total > 0 => break ReadStatus::Ok,
                Ok(0) => break ReadStatus::BrokenPipe,
                Ok(n) => {
                    out.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    break if total > 0 {
                        ReadStatus::Ok
                    } else {
                        ReadStatus::WouldBlock
                    };
                }
                Err(err) => {
                    debug!(channel = self.index, error = %err, "read failed");
                    break if total > 0 {
                        ReadStatus::Ok
                    } else {
                        ReadStatus::BrokenPipe
                    };
                }
            }
        };

        if status != ReadStatus::BrokenPipe && start_new_read_after {
            self.reading = true;
        }
        trace!(channel = self.index, bytes = total, ?status, "read completed");
        status
    }

    /// Read into the channel's own frame buffer and re-arm.
    pub fn fill_buffer(&mut self) -> ReadStatus {
        let mut buf = std::mem::take(&mut self.buf);
        let status = self.read(&mut buf, true);
        self.buf = buf;
        status
    }

    /// Bytes received but not yet consumed as frames.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Drop `len` bytes from the front of the frame buffer.
    pub fn consume(&mut self, len: usize) {
        self.buf.advance(len.min(self.buf.len()));
    }

    /// Arm the next read if connected.
    pub fn arm_read(&mut self) {
        if self.is_connected() {
            self.reading = true;
        }
    }

    pub fn is_reading(&self) -> bool {
        self.reading
    }

    /// Descriptor to wait on for read readiness while a read is armed.
    pub fn read_fd(&self) -> Option<RawFd> {
        match &self.reader {
            Some(stream) if self.reading && !self.closed => Some(stream.as_raw_fd()),
            _ => None,
        }
    }

    pub fn writer(&self) -> &Arc<ChannelWriter> {
        &self.writer
    }

    pub fn push_write(&self, bytes: Bytes) -> bool {
        self.writer.push_write(bytes)
    }

    pub fn next_write(&self) {
        self.writer.next_write();
    }

    pub fn queue_writes(&self, buffers: impl IntoIterator<Item = Bytes>) -> bool {
        self.writer.queue_writes(buffers)
    }

    /// Abort in-flight I/O, disconnect and return to `Listening`.
    pub fn reset(&mut self) {
        if let Some(stream) = self.reader.take() {
            let _ = stream.shutdown();
        }
        self.writer.reset();
        self.buf.clear();
        self.reading = false;
        debug!(channel = self.index, "channel reset");
    }

    /// Tear the slot down for good.
    pub fn close(&mut self) {
        self.reset();
        self.closed = true;
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("buffered", &self.buf.len())
            .finish()
    }
}

#[derive(Default)]
struct WriteState {
    stream: Option<IpcStream>,
    queue: VecDeque<Bytes>,
    offset: usize,
    in_flight: bool,
}

/// Write side of a channel, shared between the event loop and the stdio relay.
///
/// Buffers are written in enqueue order whichever thread enqueued them. When
/// the peer cannot take more bytes the front buffer stays in flight and the
/// loop is woken so it waits for write readiness and calls
/// [`next_write`](Self::next_write).
pub struct ChannelWriter {
    index: usize,
    state: Mutex<WriteState>,
    waker: Arc<Waker>,
}

impl ChannelWriter {
    pub(crate) fn new(index: usize, waker: Arc<Waker>) -> Self {
        Self {
            index,
            state: Mutex::new(WriteState::default()),
            waker,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriteState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn attach(&self, stream: IpcStream) {
        *self.lock() = WriteState {
            stream: Some(stream),
            ..WriteState::default()
        };
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether a peer is attached to write to.
    pub fn is_attached(&self) -> bool {
        self.lock().stream.is_some()
    }

    /// Enqueue one buffer, starting the write at once if none is in flight.
    ///
    /// Returns `false` (and drops the buffer) when no peer is attached.
    pub fn push_write(&self, bytes: Bytes) -> bool {
        self.queue_writes(std::iter::once(bytes))
    }

    /// Enqueue several buffers in order.
    pub fn queue_writes(&self, buffers: impl IntoIterator<Item = Bytes>) -> bool {
        let mut state = self.lock();
        if state.stream.is_none() {
            return false;
        }
        state.queue.extend(buffers);
        if !state.in_flight {
            self.flush(&mut state);
        }
        true
    }

    /// The in-flight write completed; continue with the queue.
    pub fn next_write(&self) {
        let mut state = self.lock();
        state.in_flight = false;
        self.flush(&mut state);
    }

    pub fn is_write_pending(&self) -> bool {
        self.lock().in_flight
    }

    /// Number of buffers not yet fully written.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Descriptor to wait on for write readiness while a write is in flight.
    pub fn pending_fd(&self) -> Option<RawFd> {
        let state = self.lock();
        match &state.stream {
            Some(stream) if state.in_flight => Some(stream.as_raw_fd()),
            _ => None,
        }
    }

    pub(crate) fn reset(&self) {
        *self.lock() = WriteState::default();
    }

    fn flush(&self, state: &mut WriteState) {
        loop {
            let (result, front_len) = match (state.stream.as_ref(), state.queue.front()) {
                (Some(stream), Some(front)) => {
                    let mut sink: &IpcStream = stream;
                    (sink.write(&front[state.offset..]), front.len())
                }
                _ => return,
            };

            match result {
                Ok(0) => {
                    self.abandon(state, "peer accepted no bytes");
                    return;
                }
                Ok(n) => {
                    state.offset += n;
                    if state.offset >= front_len {
                        state.queue.pop_front();
                        state.offset = 0;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !state.in_flight {
                        state.in_flight = true;
                        if let Err(err) = self.waker.wake() {
                            debug!(channel = self.index, error = %err, "failed to wake event loop");
                        }
                    }
                    return;
                }
                Err(err) => {
                    self.abandon(state, &err.to_string());
                    return;
                }
            }
        }
    }

    // The read side notices the hangup and resets the slot.
    fn abandon(&self, state: &mut WriteState, reason: &str) {
        debug!(
            channel = self.index,
            dropped = state.queue.len(),
            reason,
            "write failed; detaching writer"
        );
        *state = WriteState::default();
    }
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ChannelWriter")
            .field("index", &self.index)
            .field("attached", &state.stream.is_some())
            .field("queued", &state.queue.len())
            .field("in_flight", &state.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn connected() -> (Channel, IpcStream, Arc<Waker>) {
        let waker = Arc::new(Waker::new().unwrap());
        let mut channel = Channel::listening(3, Arc::clone(&waker));
        let (server, client) = IpcStream::pair().unwrap();
        channel.connect(server).unwrap();
        (channel, client, waker)
    }

    #[test]
    fn new_channel_is_listening() {
        let waker = Arc::new(Waker::new().unwrap());
        let channel = Channel::listening(0, waker);
        assert_eq!(channel.state(), ChannelState::Listening);
        assert!(channel.read_fd().is_none());
    }

    #[test]
    fn connect_arms_a_read() {
        let (channel, _client, _) = connected();
        assert_eq!(channel.state(), ChannelState::ReadPending);
        assert!(channel.read_fd().is_some());
    }

    #[test]
    fn read_reports_would_block_then_data() {
        let (mut channel, mut client, _) = connected();
        let mut out = BytesMut::new();
        assert_eq!(channel.read(&mut out, true), ReadStatus::WouldBlock);
        assert!(channel.is_reading());

        client.write_all(b"hello").unwrap();
        assert_eq!(channel.read(&mut out, false), ReadStatus::Ok);
        assert_eq!(&out[..], b"hello");
        assert!(!channel.is_reading());
        assert_eq!(channel.state(), ChannelState::Connected);

        channel.arm_read();
        assert!(channel.is_reading());
    }

    #[test]
    fn peer_close_is_broken_pipe() {
        let (mut channel, client, _) = connected();
        drop(client);
        assert_eq!(channel.fill_buffer(), ReadStatus::BrokenPipe);
        assert!(!channel.is_reading());
    }

    #[test]
    fn consume_drops_front_bytes() {
        let (mut channel, mut client, _) = connected();
        client.write_all(b"abcdef").unwrap();
        assert_eq!(channel.fill_buffer(), ReadStatus::Ok);
        channel.consume(2);
        assert_eq!(channel.buffer(), b"cdef");
        channel.consume(100);
        assert!(channel.buffer().is_empty());
    }

    #[test]
    fn writes_arrive_in_enqueue_order() {
        let (channel, mut client, _) = connected();
        assert!(channel.push_write(Bytes::from_static(b"one,")));
        assert!(channel.queue_writes(vec![
            Bytes::from_static(b"two,"),
            Bytes::from_static(b"three")
        ]));

        let mut received = [0u8; 13];
        client.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"one,two,three");
        assert_eq!(channel.writer().queued(), 0);
    }

    #[test]
    fn full_pipe_leaves_write_in_flight_and_wakes_loop() {
        let (channel, mut client, waker) = connected();
        let big = Bytes::from(vec![7u8; 4 * 1024 * 1024]);
        assert!(channel.push_write(big.clone()));
        assert_eq!(channel.state(), ChannelState::WritePending);
        assert!(channel.writer().pending_fd().is_some());

        let mut poll = bertpipe_transport::PollSet::new();
        poll.register(waker.as_raw_fd(), bertpipe_transport::Interest::Readable, ());
        assert!(poll
            .wait(std::time::Duration::from_millis(100))
            .unwrap()
            .is_some());

        let reader = std::thread::spawn(move || {
            let mut total = 0usize;
            let mut buf = vec![0u8; 64 * 1024];
            while total < 4 * 1024 * 1024 {
                total += client.read(&mut buf).unwrap();
            }
            total
        });
        while channel.writer().queued() > 0 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            channel.next_write();
        }
        assert_eq!(reader.join().unwrap(), big.len());
        assert_eq!(channel.state(), ChannelState::ReadPending);
    }

    #[test]
    fn reset_returns_to_listening_and_rejects_writes() {
        let (mut channel, _client, _) = connected();
        channel.reset();
        assert_eq!(channel.state(), ChannelState::Listening);
        assert!(!channel.push_write(Bytes::from_static(b"late")));
        assert!(!channel.writer().is_attached());
    }

    #[test]
    fn close_is_terminal() {
        let (mut channel, _client, _) = connected();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        channel.arm_read();
        assert!(!channel.is_reading());
    }
}
