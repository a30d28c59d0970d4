use std::sync::{Arc, Mutex, MutexGuard};

use bertpipe_protocol::{encode_message, CodecError, Message};
use bertpipe_transport::Waker;
use bytes::Bytes;
use tracing::{debug, info};

use crate::channel::ChannelWriter;

#[derive(Default)]
struct ConsoleState {
    holder: Option<(usize, Arc<ChannelWriter>)>,
    buffer: Vec<Bytes>,
}

/// The single console role and the backlog kept while nobody holds it.
///
/// Shared by the event loop and the stdio relay. Frames pushed while the role
/// is free are buffered and handed, in push order, to the next client that
/// claims it.
#[derive(Default)]
pub struct ConsoleRelay {
    state: Mutex<ConsoleState>,
}

impl ConsoleRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Give the role to channel `index` if it is free, flushing the backlog to it.
    pub fn claim(&self, index: usize, writer: &Arc<ChannelWriter>) -> bool {
        let mut state = self.lock();
        if let Some((holder, _)) = &state.holder {
            debug!(channel = index, holder, "console role already held");
            return false;
        }

        let backlog = std::mem::take(&mut state.buffer);
        let flushed = backlog.len();
        if !writer.queue_writes(backlog.iter().cloned()) {
            state.buffer = backlog;
            return false;
        }
        state.holder = Some((index, Arc::clone(writer)));
        info!(channel = index, flushed, "console role claimed");
        true
    }

    /// Clear the role if `index` holds it.
    pub fn release(&self, index: usize) {
        let mut state = self.lock();
        if matches!(&state.holder, Some((holder, _)) if *holder == index) {
            state.holder = None;
            info!(channel = index, "console role released");
        }
    }

    /// Send a framed console message to the holder, or buffer it.
    pub fn push(&self, frame: Bytes) {
        let mut state = self.lock();
        if let Some((index, writer)) = &state.holder {
            if writer.push_write(frame.clone()) {
                return;
            }
            debug!(channel = index, "console holder detached; buffering");
            state.holder = None;
        }
        state.buffer.push(frame);
    }

    pub fn push_message(&self, message: &Message) -> Result<(), CodecError> {
        self.push(encode_message(message)?);
        Ok(())
    }

    /// Slot currently holding the role.
    pub fn holder(&self) -> Option<usize> {
        self.lock().holder.as_ref().map(|(index, _)| *index)
    }

    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }
}

impl std::fmt::Debug for ConsoleRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ConsoleRelay")
            .field("holder", &state.holder.as_ref().map(|(index, _)| index))
            .field("buffered", &state.buffer.len())
            .finish()
    }
}

/// Pending prompt for the stdio relay to deliver.
///
/// Raising replaces any prompt not yet delivered, so the console sees only
/// the latest one.
#[derive(Debug)]
pub struct PromptSignal {
    pending: Mutex<Option<Message>>,
    waker: Waker,
}

impl PromptSignal {
    pub fn new() -> bertpipe_transport::Result<Self> {
        Ok(Self {
            pending: Mutex::new(None),
            waker: Waker::new()?,
        })
    }

    /// Queue `prompt` tagged with correlation `id` and wake the relay.
    pub fn raise(&self, prompt: &str, id: u32) {
        *self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Message::prompt(id, prompt));
        if let Err(err) = self.waker.wake() {
            debug!(error = %err, "failed to wake stdio relay for prompt");
        }
    }

    /// Take the pending prompt and reset the signal.
    pub fn take(&self) -> Option<Message> {
        let _ = self.waker.drain();
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn waker(&self) -> &Waker {
        &self.waker
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use bertpipe_frame::FrameReader;
    use bertpipe_protocol::{ConsoleOutput, Operation};
    use bertpipe_transport::IpcStream;

    use super::*;
    use crate::channel::Channel;

    fn console_channel(index: usize) -> (Channel, IpcStream) {
        let waker = Arc::new(Waker::new().unwrap());
        let mut channel = Channel::listening(index, waker);
        let (server, client) = IpcStream::pair().unwrap();
        channel.connect(server).unwrap();
        (channel, client)
    }

    fn read_message(reader: &mut FrameReader<IpcStream>) -> Message {
        let payload = reader.read_frame().unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    #[test]
    fn backlog_is_flushed_in_order_on_claim() {
        let relay = ConsoleRelay::new();
        for text in ["one", "two", "three"] {
            relay.push_message(&Message::console_text(text)).unwrap();
        }
        assert_eq!(relay.buffered(), 3);

        let (channel, client) = console_channel(0);
        assert!(relay.claim(0, channel.writer()));
        assert_eq!(relay.buffered(), 0);

        let mut reader = FrameReader::new(client);
        for text in ["one", "two", "three"] {
            assert_eq!(read_message(&mut reader), Message::console_text(text));
        }
    }

    #[test]
    fn second_claim_is_rejected() {
        let relay = ConsoleRelay::new();
        let (first, _a) = console_channel(0);
        let (second, _b) = console_channel(1);

        assert!(relay.claim(0, first.writer()));
        assert!(!relay.claim(1, second.writer()));
        assert_eq!(relay.holder(), Some(0));
    }

    #[test]
    fn live_pushes_go_straight_to_holder() {
        let relay = ConsoleRelay::new();
        let (channel, client) = console_channel(2);
        assert!(relay.claim(2, channel.writer()));

        relay.push_message(&Message::prompt(4, "julia> ")).unwrap();
        assert_eq!(relay.buffered(), 0);

        let mut reader = FrameReader::new(client);
        let message = read_message(&mut reader);
        assert_eq!(message.id, 4);
        assert_eq!(
            message.operation,
            Operation::Console(ConsoleOutput::Prompt("julia> ".to_string()))
        );
    }

    #[test]
    fn release_by_non_holder_is_ignored() {
        let relay = ConsoleRelay::new();
        let (channel, _client) = console_channel(0);
        assert!(relay.claim(0, channel.writer()));
        relay.release(5);
        assert_eq!(relay.holder(), Some(0));
        relay.release(0);
        assert_eq!(relay.holder(), None);
    }

    #[test]
    fn detached_holder_falls_back_to_buffer() {
        let relay = ConsoleRelay::new();
        let (mut channel, mut client) = console_channel(0);
        assert!(relay.claim(0, channel.writer()));
        channel.reset();

        relay.push(Bytes::from_static(b"kept"));
        assert_eq!(relay.holder(), None);
        assert_eq!(relay.buffered(), 1);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn claim_by_detached_channel_keeps_backlog() {
        let relay = ConsoleRelay::new();
        relay.push(Bytes::from_static(b"early"));
        let waker = Arc::new(Waker::new().unwrap());
        let listening = Channel::listening(0, waker);

        assert!(!relay.claim(0, listening.writer()));
        assert_eq!(relay.buffered(), 1);
        assert_eq!(relay.holder(), None);
    }

    #[test]
    fn raised_prompt_replaces_pending_one() {
        let signal = PromptSignal::new().unwrap();
        signal.raise("julia> ", 1);
        signal.raise("julia> ", 9);
        let prompt = signal.take().unwrap();
        assert_eq!(prompt.id, 9);
        assert!(signal.take().is_none());
    }
}
