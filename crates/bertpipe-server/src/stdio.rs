use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bertpipe_protocol::Message;
use bertpipe_transport::{Interest, IpcStream, PollSet, Waker};
use bytes::BytesMut;
use tracing::{debug, error, trace};

use crate::channel::{Channel, ReadStatus};
use crate::console::{ConsoleRelay, PromptSignal};
use crate::error::Result;
use crate::runtime::StdioSinks;

const STDOUT: usize = 0;
const STDERR: usize = 1;

#[derive(Debug, Clone, Copy)]
enum Source {
    Capture(usize),
    Prompt,
    Stop,
}

/// Second loop, on its own thread: forwards captured runtime output and
/// pending prompts to the console relay.
#[derive(Debug)]
pub struct StdioRelay {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    stop_waker: Arc<Waker>,
}

impl StdioRelay {
    /// Create the capture pipes and start the relay thread.
    ///
    /// Returns the write ends for the runtime to hand to its children.
    pub fn start(
        console: Arc<ConsoleRelay>,
        prompt: Arc<PromptSignal>,
        poll_timeout: Duration,
    ) -> Result<(Self, StdioSinks)> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_waker = Arc::new(Waker::new()?);

        let (stdout_read, stdout_write) = IpcStream::pair()?;
        let (stderr_read, stderr_write) = IpcStream::pair()?;
        let mut captures = Vec::with_capacity(2);
        for (index, read_end) in [(STDOUT, stdout_read), (STDERR, stderr_read)] {
            let mut capture = Channel::listening(index, Arc::clone(&stop_waker));
            capture.connect(read_end)?;
            captures.push(capture);
        }

        let worker = RelayWorker {
            captures,
            console,
            prompt,
            stop: Arc::clone(&stop),
            stop_waker: Arc::clone(&stop_waker),
            poll_timeout,
        };
        let handle = std::thread::Builder::new()
            .name("bertpipe-stdio".to_string())
            .spawn(move || worker.run())?;

        Ok((
            Self {
                handle: Some(handle),
                stop,
                stop_waker,
            },
            StdioSinks {
                stdout: stdout_write.into(),
                stderr: stderr_write.into(),
            },
        ))
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("stdio relay thread panicked");
            }
        }
    }

    fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.stop_waker.wake();
    }
}

impl Drop for StdioRelay {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.signal_stop();
        }
    }
}

struct RelayWorker {
    captures: Vec<Channel>,
    console: Arc<ConsoleRelay>,
    prompt: Arc<PromptSignal>,
    stop: Arc<AtomicBool>,
    stop_waker: Arc<Waker>,
    poll_timeout: Duration,
}

impl RelayWorker {
    fn run(mut self) {
        debug!("stdio relay started");
        let mut poll = PollSet::new();
        let mut out = BytesMut::with_capacity(8 * 1024);

        while !self.stop.load(Ordering::SeqCst) {
            poll.clear();
            // Output before the prompt: a command's output must precede the
            // prompt raised after it.
            for capture in &self.captures {
                if let Some(fd) = capture.read_fd() {
                    poll.register(fd, Interest::Readable, Source::Capture(capture.index()));
                }
            }
            poll.register(
                self.prompt.waker().as_raw_fd(),
                Interest::Readable,
                Source::Prompt,
            );
            poll.register(self.stop_waker.as_raw_fd(), Interest::Readable, Source::Stop);

            let ready = match poll.wait(self.poll_timeout) {
                Ok(Some(ready)) => ready,
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "stdio relay wait failed");
                    break;
                }
            };

            match ready.token {
                Source::Capture(index) => self.forward(index, &mut out),
                Source::Prompt => {
                    if let Some(prompt) = self.prompt.take() {
                        trace!(id = prompt.id, "delivering prompt");
                        self.push(&prompt);
                    }
                }
                Source::Stop => {
                    let _ = self.stop_waker.drain();
                }
            }
        }
        debug!("stdio relay stopped");
    }

    fn forward(&mut self, index: usize, out: &mut BytesMut) {
        let capture = &mut self.captures[index];
        out.clear();
        match capture.read(out, false) {
            ReadStatus::Ok => {
                let text = String::from_utf8_lossy(&out[..]).into_owned();
                capture.arm_read();
                let message = if index == STDERR {
                    Message::console_err(text)
                } else {
                    Message::console_text(text)
                };
                self.push(&message);
            }
            ReadStatus::WouldBlock => capture.arm_read(),
            ReadStatus::BrokenPipe => {
                debug!(capture = index, "capture pipe closed");
                capture.close();
            }
        }
    }

    fn push(&self, message: &Message) {
        if let Err(err) = self.console.push_message(message) {
            error!(error = %err, "failed to encode console message");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bertpipe_frame::FrameReader;
    use bertpipe_protocol::{ConsoleOutput, Operation};

    use super::*;

    fn console_client(console: &ConsoleRelay) -> (Channel, FrameReader<IpcStream>) {
        let mut channel = Channel::listening(0, Arc::new(Waker::new().unwrap()));
        let (server, client) = IpcStream::pair().unwrap();
        channel.connect(server).unwrap();
        assert!(console.claim(0, channel.writer()));
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (channel, FrameReader::new(client))
    }

    fn next(reader: &mut FrameReader<IpcStream>) -> Message {
        serde_json::from_slice(&reader.read_frame().unwrap()).unwrap()
    }

    #[test]
    fn captured_output_reaches_console() {
        let console = Arc::new(ConsoleRelay::new());
        let prompt = Arc::new(PromptSignal::new().unwrap());
        let (relay, sinks) =
            StdioRelay::start(Arc::clone(&console), prompt, Duration::from_millis(50)).unwrap();
        let (_channel, mut reader) = console_client(&console);

        sinks.write_stdout(b"hello\n").unwrap();
        assert_eq!(next(&mut reader), Message::console_text("hello\n"));
        sinks.write_stderr(b"oops\n").unwrap();
        assert_eq!(next(&mut reader), Message::console_err("oops\n"));

        relay.stop();
    }

    #[test]
    fn output_precedes_prompt_raised_after_it() {
        let console = Arc::new(ConsoleRelay::new());
        let prompt = Arc::new(PromptSignal::new().unwrap());
        let (relay, sinks) = StdioRelay::start(
            Arc::clone(&console),
            Arc::clone(&prompt),
            Duration::from_millis(50),
        )
        .unwrap();

        // No console client yet: both land in the backlog, output first.
        sinks.write_stdout(b"4\n").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        prompt.raise("julia> ", 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        while console.buffered() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let (_channel, mut reader) = console_client(&console);
        assert_eq!(next(&mut reader), Message::console_text("4\n"));
        let prompt_message = next(&mut reader);
        assert_eq!(prompt_message.id, 2);
        assert_eq!(
            prompt_message.operation,
            Operation::Console(ConsoleOutput::Prompt("julia> ".to_string()))
        );

        relay.stop();
    }

    #[test]
    fn stop_joins_the_thread() {
        let console = Arc::new(ConsoleRelay::new());
        let prompt = Arc::new(PromptSignal::new().unwrap());
        let (relay, _sinks) =
            StdioRelay::start(console, prompt, Duration::from_secs(10)).unwrap();
        let started = Instant::now();
        relay.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
