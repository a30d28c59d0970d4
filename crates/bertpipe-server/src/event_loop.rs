use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bertpipe_protocol::{decode_message, encode_message, CodecError};
use bertpipe_transport::{Interest, PollSet, Readiness, Waker};
use tracing::{debug, error, info, warn};

use crate::channel::ReadStatus;
use crate::config::ServerConfig;
use crate::console::{ConsoleRelay, PromptSignal};
use crate::dispatch::{CallDispatcher, Disposition, SystemTable};
use crate::error::{Result, ServerError};
use crate::pool::ChannelPool;
use crate::runtime::LanguageRuntime;
use crate::stdio::StdioRelay;

/// Correlation id of the prompt raised at startup.
pub const INITIAL_PROMPT_ID: u32 = 1;

/// Stops a running [`EventLoop`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            warn!(error = %err, "failed to wake event loop for shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Read(usize),
    Write(usize),
    Wake,
}

enum Step {
    Continue,
    Stop,
}

/// Keeps the listener out of the wait after a failed accept. A client left
/// in the backlog keeps the listener readable while accepts fail (`EMFILE`).
#[derive(Debug, Default)]
struct AcceptBackoff {
    until: Option<Instant>,
    failing: bool,
}

impl AcceptBackoff {
    /// Start a pause; true for the first failure of an episode.
    fn trip(&mut self, now: Instant, delay: Duration) -> bool {
        self.until = Some(now + delay);
        !std::mem::replace(&mut self.failing, true)
    }

    fn is_active(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    fn clear(&mut self) {
        self.until = None;
        self.failing = false;
    }
}

/// The primary control loop.
///
/// Owns the pool and the dispatcher. Each pass waits on every armed read,
/// every in-flight write and the loop waker, then services exactly one
/// readiness.
pub struct EventLoop {
    config: ServerConfig,
    pool: ChannelPool,
    dispatcher: CallDispatcher,
    console: Arc<ConsoleRelay>,
    prompt: Arc<PromptSignal>,
    waker: Arc<Waker>,
    shutdown: ShutdownHandle,
    poll: PollSet<Token>,
    last_serviced: usize,
    accept_backoff: AcceptBackoff,
}

impl EventLoop {
    /// Bind the control pipe. Clients may connect as soon as this returns.
    pub fn bind(config: ServerConfig, runtime: Box<dyn LanguageRuntime>) -> Result<Self> {
        let waker = Arc::new(Waker::new()?);
        let pool = ChannelPool::bind(config.pipe_path(), config.max_channels, Arc::clone(&waker))?;
        let console = Arc::new(ConsoleRelay::new());
        let prompt = Arc::new(PromptSignal::new()?);
        let dispatcher = CallDispatcher::new(runtime, Arc::clone(&console), Arc::clone(&prompt));
        let shutdown = ShutdownHandle {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::clone(&waker),
        };

        Ok(Self {
            config,
            pool,
            dispatcher,
            console,
            prompt,
            waker,
            shutdown,
            poll: PollSet::new(),
            last_serviced: 0,
            accept_backoff: AcceptBackoff::default(),
        })
    }

    pub fn with_system_table(mut self, system: SystemTable) -> Self {
        self.dispatcher = self.dispatcher.with_system_table(system);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn console(&self) -> &Arc<ConsoleRelay> {
        &self.console
    }

    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    /// Serve until shutdown.
    ///
    /// Waits for the first client, initializes the runtime, raises the first
    /// prompt, then loops. Only a failed multiplexed wait is an error.
    pub fn run(mut self) -> Result<()> {
        let (relay, sinks) = StdioRelay::start(
            Arc::clone(&self.console),
            Arc::clone(&self.prompt),
            self.config.stdio_poll_timeout,
        )?;
        self.dispatcher.runtime_mut().attach_stdio(sinks);

        let result = self.serve();
        self.finish(relay);
        result
    }

    fn serve(&mut self) -> Result<()> {
        if !self.wait_for_first_client()? {
            return Ok(());
        }
        self.pool.start(true)?;
        self.dispatcher.runtime_mut().init()?;
        self.dispatcher.raise_prompt(INITIAL_PROMPT_ID);
        info!(path = %self.pool.path().display(), "control loop running");

        while !self.shutdown.is_shutdown() {
            if let Step::Stop = self.poll_once()? {
                break;
            }
        }
        Ok(())
    }

    // Bounded waits on the listener so a shutdown before the first client is honored.
    fn wait_for_first_client(&mut self) -> Result<bool> {
        loop {
            if self.shutdown.is_shutdown() {
                return Ok(false);
            }
            self.poll.clear();
            self.poll
                .register(self.pool.listener_fd(), Interest::Readable, Token::Read(0));
            self.poll
                .register(self.waker.as_raw_fd(), Interest::Readable, Token::Wake);
            match self
                .poll
                .wait(self.config.poll_timeout)
                .map_err(ServerError::Wait)?
            {
                Some(Readiness {
                    token: Token::Read(_),
                    ..
                }) => return Ok(true),
                Some(_) => {
                    let _ = self.waker.drain();
                }
                None => {}
            }
        }
    }

    fn poll_once(&mut self) -> Result<Step> {
        self.rebuild_poll_set();
        let ready = self
            .poll
            .wait(self.config.poll_timeout)
            .map_err(ServerError::Wait)?;
        match ready {
            Some(ready) => Ok(self.service(ready)),
            None => Ok(Step::Continue),
        }
    }

    // Registration starts after the last serviced slot so one busy client
    // cannot starve the rest.
    fn rebuild_poll_set(&mut self) {
        self.poll.clear();
        let len = self.pool.len();
        let first_listening = if self.accept_backoff.is_active(Instant::now()) {
            None
        } else {
            self.pool.first_listening()
        };
        for offset in 1..=len {
            let index = (self.last_serviced + offset) % len;
            let Some(channel) = self.pool.get(index) else {
                continue;
            };
            if Some(index) == first_listening {
                self.poll
                    .register(self.pool.listener_fd(), Interest::Readable, Token::Read(index));
                continue;
            }
            if let Some(fd) = channel.read_fd() {
                self.poll.register(fd, Interest::Readable, Token::Read(index));
            }
            if let Some(fd) = channel.writer().pending_fd() {
                self.poll.register(fd, Interest::Writable, Token::Write(index));
            }
        }
        self.poll
            .register(self.waker.as_raw_fd(), Interest::Readable, Token::Wake);
    }

    fn service(&mut self, ready: Readiness<Token>) -> Step {
        match ready.token {
            Token::Wake => {
                let _ = self.waker.drain();
                Step::Continue
            }
            Token::Write(index) => {
                self.last_serviced = index;
                if let Some(channel) = self.pool.get(index) {
                    channel.next_write();
                }
                Step::Continue
            }
            Token::Read(index) => {
                self.last_serviced = index;
                let listening = self.pool.get(index).is_some_and(|c| c.is_listening());
                if listening {
                    match self.pool.accept_into(index) {
                        Ok(_) => self.accept_backoff.clear(),
                        Err(err) => {
                            let first = self
                                .accept_backoff
                                .trip(Instant::now(), self.config.poll_timeout);
                            if first {
                                warn!(
                                    channel = index,
                                    error = %err,
                                    "failed to accept client; pausing accepts"
                                );
                            } else {
                                debug!(channel = index, error = %err, "accept still failing");
                            }
                        }
                    }
                    Step::Continue
                } else {
                    self.service_read(index)
                }
            }
        }
    }

    fn service_read(&mut self, index: usize) -> Step {
        let status = match self.pool.get_mut(index) {
            Some(channel) => channel.fill_buffer(),
            None => return Step::Continue,
        };
        match status {
            ReadStatus::Ok => {}
            ReadStatus::WouldBlock => return Step::Continue,
            ReadStatus::BrokenPipe => {
                self.reset_channel(index);
                return Step::Continue;
            }
        }

        let step = self.process_frames(index);
        if let Some(channel) = self.pool.get_mut(index) {
            if channel.is_connected() && !channel.is_reading() {
                channel.arm_read();
            }
        }
        step
    }

    fn process_frames(&mut self, index: usize) -> Step {
        let max_payload = self.config.max_payload_size;
        loop {
            let Some(channel) = self.pool.get_mut(index) else {
                return Step::Continue;
            };
            if !channel.is_connected() {
                return Step::Continue;
            }
            let message = match decode_message(channel.buffer(), max_payload) {
                Ok((message, consumed)) => {
                    channel.consume(consumed);
                    message
                }
                Err(CodecError::Incomplete { .. }) => return Step::Continue,
                Err(CodecError::MalformedPayload { consumed, source }) => {
                    warn!(channel = index, error = %source, "dropping malformed message");
                    channel.consume(consumed);
                    continue;
                }
                Err(err) => {
                    warn!(channel = index, error = %err, "unrecoverable frame; resetting channel");
                    self.reset_channel(index);
                    return Step::Continue;
                }
            };

            let writer = Arc::clone(channel.writer());
            match self.dispatcher.dispatch(index, &writer, &message) {
                Disposition::Reply(response) => match encode_message(&response) {
                    Ok(frame) => {
                        if !writer.push_write(frame) {
                            debug!(channel = index, id = response.id, "reply dropped; peer gone");
                        }
                    }
                    Err(err) => error!(channel = index, error = %err, "failed to encode reply"),
                },
                Disposition::NoReply => writer.next_write(),
                Disposition::Close => {
                    self.reset_channel(index);
                    return Step::Continue;
                }
                Disposition::Shutdown => {
                    self.shutdown.requested.store(true, Ordering::SeqCst);
                    return Step::Stop;
                }
            }
        }
    }

    fn reset_channel(&mut self, index: usize) {
        // The role goes first so the relay never writes to a reset slot.
        self.console.release(index);
        self.pool.reset(index);
    }

    fn finish(&mut self, relay: StdioRelay) {
        self.drain_writes();
        self.pool.close_all();
        relay.stop();
        self.dispatcher.runtime_mut().shutdown();
        info!("control loop stopped");
    }

    // Give queued replies a bounded chance to reach their clients.
    fn drain_writes(&mut self) {
        let deadline = Instant::now() + self.config.drain_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            self.poll.clear();
            for channel in self.pool.iter() {
                if let Some(fd) = channel.writer().pending_fd() {
                    self.poll
                        .register(fd, Interest::Writable, Token::Write(channel.index()));
                }
            }
            if self.poll.is_empty() {
                return;
            }
            match self.poll.wait(deadline - now) {
                Ok(Some(Readiness {
                    token: Token::Write(index),
                    ..
                })) => {
                    if let Some(channel) = self.pool.get(index) {
                        channel.next_write();
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(error = %err, "drain wait failed");
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pool", &self.pool)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use bertpipe_protocol::{Message, Variable};

    use super::*;

    struct Quiet;

    impl LanguageRuntime for Quiet {
        fn language(&self) -> &str {
            "Quiet"
        }

        fn prompt(&self) -> &str {
            "> "
        }

        fn handle_function_call(&mut self, message: &Message) -> Message {
            Message::result(message.id, Variable::Nil)
        }

        fn handle_code(&mut self, message: &Message) -> Message {
            Message::result(message.id, Variable::Nil)
        }

        fn handle_shell_command(&mut self, _text: &str) {}

        fn read_source_file(&mut self, _path: &Path) -> bool {
            false
        }
    }

    fn sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/bertpipe-loop-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("ctl.sock")
    }

    #[test]
    fn shutdown_before_first_client_returns_cleanly() {
        let path = sock_path("early");
        let config = ServerConfig::new(path.display().to_string())
            .with_poll_timeout(Duration::from_millis(20));
        let event_loop = EventLoop::bind(config, Box::new(Quiet)).unwrap();
        let handle = event_loop.shutdown_handle();
        assert!(!handle.is_shutdown());

        let runner = std::thread::spawn(move || event_loop.run());
        handle.shutdown();
        runner.join().unwrap().unwrap();
        assert!(handle.is_shutdown());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn accept_backoff_pauses_for_one_delay() {
        let mut backoff = AcceptBackoff::default();
        let now = Instant::now();
        assert!(!backoff.is_active(now));

        assert!(backoff.trip(now, Duration::from_millis(50)));
        assert!(backoff.is_active(now + Duration::from_millis(10)));
        assert!(!backoff.is_active(now + Duration::from_millis(50)));

        // Repeated failures extend the pause but only the first one reports.
        assert!(!backoff.trip(now + Duration::from_millis(60), Duration::from_millis(50)));
        assert!(backoff.is_active(now + Duration::from_millis(100)));

        backoff.clear();
        assert!(!backoff.is_active(now + Duration::from_millis(100)));
        assert!(backoff.trip(now, Duration::from_millis(50)));
    }

    #[test]
    fn bind_reports_path() {
        let path = sock_path("path");
        let event_loop =
            EventLoop::bind(ServerConfig::new(path.display().to_string()), Box::new(Quiet))
                .unwrap();
        assert_eq!(event_loop.path(), path.as_path());
        assert_eq!(event_loop.console().holder(), None);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
