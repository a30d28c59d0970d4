use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use bertpipe_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use bertpipe_transport::{IpcStream, PipeListener};
use tracing::debug;

use crate::codec::encode_message;
use crate::error::{ClientError, CodecError, Result};
use crate::message::{CallTarget, ControlCommand, Message, Variable};

/// Blocking client for the control channel.
///
/// Ids are allocated from 1 upward per client. Responses are matched to
/// requests by id; console traffic that arrives in between (when this client
/// holds the console role) is handed to the `on_console` hook of
/// [`request_with`](Self::request_with) or dropped by [`request`](Self::request).
pub struct Client {
    reader: FrameReader<IpcStream>,
    writer: FrameWriter<IpcStream>,
    config: FrameConfig,
    next_id: u32,
}

impl Client {
    /// Connect to a listening control pipe.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_config(path, FrameConfig::default())
    }

    pub fn connect_with_config(path: impl AsRef<Path>, config: FrameConfig) -> Result<Self> {
        let stream = PipeListener::connect(path)?;
        let reader_stream = stream.try_clone()?;
        let reader = FrameReader::with_config_ipc(reader_stream, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config.clone())?;
        Ok(Self {
            reader,
            writer,
            config,
            next_id: 1,
        })
    }

    /// Allocate the next correlation id.
    pub fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    /// Send one message without waiting.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        let framed = encode_message(message)?;
        self.writer.send_raw(&framed).map_err(disconnect_on_close)?;
        debug!(id = message.id, kind = message.kind(), "sent message");
        Ok(())
    }

    /// Receive the next message of any kind (blocking, subject to the read timeout).
    pub fn recv(&mut self) -> Result<Message> {
        let payload = match self.reader.read_frame() {
            Ok(payload) => payload,
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                return Err(ClientError::Timeout(
                    self.config.read_timeout.unwrap_or_default(),
                ))
            }
            Err(err) => return Err(disconnect_on_close(err)),
        };
        let consumed = bertpipe_frame::HEADER_SIZE + payload.len();
        serde_json::from_slice(&payload)
            .map_err(|source| ClientError::Codec(CodecError::MalformedPayload { consumed, source }))
    }

    /// Receive with a one-off timeout.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Message> {
        let previous = self.config.read_timeout;
        self.reader.set_read_timeout(Some(timeout))?;
        self.config.read_timeout = Some(timeout);
        let result = self.recv();
        self.reader.set_read_timeout(previous)?;
        self.config.read_timeout = previous;
        result
    }

    /// Send a request and wait for the response with the same id.
    pub fn request(&mut self, message: &Message) -> Result<Message> {
        self.request_with(message, |_| {})
    }

    /// Like [`request`](Self::request), passing interleaved console messages to `on_console`.
    pub fn request_with(
        &mut self,
        message: &Message,
        mut on_console: impl FnMut(&Message),
    ) -> Result<Message> {
        let message = message.clone().with_wait(true);
        self.send(&message)?;
        loop {
            let reply = self.recv()?;
            if reply.is_console() {
                on_console(&reply);
                continue;
            }
            if reply.id == message.id {
                return Ok(reply);
            }
            debug!(
                expected = message.id,
                got = reply.id,
                "skipping unmatched response"
            );
        }
    }

    /// Call a function on the system table or the language runtime.
    pub fn call(
        &mut self,
        target: CallTarget,
        function: &str,
        arguments: Vec<Variable>,
    ) -> Result<Message> {
        let id = self.next_id();
        self.request(&Message::function_call(id, target, function, arguments))
    }

    /// Execute a block of code in the runtime.
    pub fn exec(&mut self, source: &str) -> Result<Message> {
        let id = self.next_id();
        self.request(&Message::code(id, source))
    }

    /// Run a shell command. There is no direct reply; the console client
    /// receives output and then a prompt carrying the returned id.
    pub fn shell(&mut self, text: &str) -> Result<u32> {
        let id = self.next_id();
        self.send(&Message::shell_command(id, text))?;
        Ok(id)
    }

    /// Send a control command; with `wait` the acknowledgement is returned.
    pub fn control(&mut self, command: &ControlCommand, wait: bool) -> Result<Option<Message>> {
        let id = self.next_id();
        let message = Message::control(id, command, wait);
        if wait {
            self.request(&message).map(Some)
        } else {
            self.send(&message).map(|()| None)
        }
    }

    /// Ask for the console role. The reply carries `Boolean(true)` when the
    /// claim won; buffered console output arrives ahead of it.
    pub fn claim_console(&mut self) -> Result<Message> {
        self.control(&ControlCommand::Console, true)?
            .ok_or(ClientError::Disconnected)
    }

    /// Ask the server to close this pipe. The server never replies.
    pub fn close(mut self) -> Result<()> {
        self.control(&ControlCommand::Close, false).map(|_| ())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("stream", self.writer.get_ref())
            .field("next_id", &self.next_id)
            .finish()
    }
}

fn disconnect_on_close(err: FrameError) -> ClientError {
    match err {
        FrameError::ConnectionClosed => ClientError::Disconnected,
        FrameError::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof
            ) =>
        {
            ClientError::Disconnected
        }
        other => ClientError::Frame(other),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use bertpipe_frame::FrameReader;

    use super::*;
    use crate::message::Operation;

    fn sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/bertpipe-client-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("ctl.sock")
    }

    fn serve_once(
        listener: PipeListener,
        reply: impl FnOnce(Message) -> Vec<Message> + Send + 'static,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let stream = listener.accept().expect("accept should succeed");
            let mut reader = FrameReader::new(stream.try_clone().unwrap());
            let mut writer = FrameWriter::new(stream);
            let payload = reader.read_frame().expect("request frame");
            let request: Message = serde_json::from_slice(&payload).expect("request json");
            for message in reply(request) {
                writer
                    .send_raw(&encode_message(&message).unwrap())
                    .expect("reply should send");
            }
        })
    }

    #[test]
    fn request_returns_matching_response() {
        let path = sock_path("request");
        let listener = PipeListener::bind(&path).unwrap();
        let server = serve_once(listener, |req| vec![Message::result(req.id, "Julia")]);

        let mut client = Client::connect(&path).unwrap();
        let reply = client
            .call(CallTarget::System, "get-language", vec![])
            .unwrap();
        assert_eq!(reply.id, 1);
        assert_eq!(reply.result_value().and_then(Variable::as_str), Some("Julia"));

        server.join().unwrap();
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn console_traffic_is_routed_to_hook() {
        let path = sock_path("console");
        let listener = PipeListener::bind(&path).unwrap();
        let server = serve_once(listener, |req| {
            vec![
                Message::console_text("buffered"),
                Message::prompt(1, "julia> "),
                Message::result(req.id, true),
            ]
        });

        let mut client = Client::connect(&path).unwrap();
        let id = client.next_id();
        let mut seen = Vec::new();
        let reply = client
            .request_with(&Message::control(id, &ControlCommand::Console, true), |m| {
                seen.push(m.clone())
            })
            .unwrap();
        assert_eq!(reply.operation, Operation::Result(Variable::Boolean(true)));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Message::console_text("buffered"));

        server.join().unwrap();
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn closed_server_reports_disconnected() {
        let path = sock_path("closed");
        let listener = PipeListener::bind(&path).unwrap();
        let server = serve_once(listener, |_| Vec::new());

        let mut client = Client::connect(&path).unwrap();
        let err = client.exec("1 + 1").unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));

        server.join().unwrap();
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn recv_timeout_expires() {
        let path = sock_path("timeout");
        let listener = PipeListener::bind(&path).unwrap();
        let mut client = Client::connect(&path).unwrap();
        let _held = listener.accept().unwrap();

        let err = client.recv_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));

        drop(listener);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let path = sock_path("ids");
        let listener = PipeListener::bind(&path).unwrap();
        let mut client = Client::connect(&path).unwrap();
        assert_eq!(client.next_id(), 1);
        assert_eq!(client.next_id(), 2);
        drop(listener);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
