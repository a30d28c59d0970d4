use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::MessageCodec;
use crate::error::{ClientError, Result};
use crate::message::{CallTarget, ControlCommand, Message, Variable};

/// Async counterpart of [`Client`](crate::Client) built on `tokio_util::codec::Framed`.
pub struct AsyncClient {
    framed: Framed<UnixStream, MessageCodec>,
    next_id: u32,
}

impl AsyncClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|source| {
            bertpipe_transport::TransportError::Connect {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::from_stream(stream))
    }

    /// Adopt a blocking [`IpcStream`](bertpipe_transport::IpcStream). Must be
    /// called inside a tokio runtime.
    pub fn from_ipc(stream: bertpipe_transport::IpcStream) -> Result<Self> {
        Ok(Self::from_stream(stream.into_tokio()?))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            framed: Framed::new(stream, MessageCodec::default()),
            next_id: 1,
        }
    }

    pub fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    pub async fn send(&mut self, message: Message) -> Result<()> {
        debug!(id = message.id, kind = message.kind(), "sending message");
        self.framed.send(message).await?;
        Ok(())
    }

    /// Next message of any kind; `Disconnected` at end of stream.
    pub async fn recv(&mut self) -> Result<Message> {
        match self.framed.next().await {
            Some(message) => Ok(message?),
            None => Err(ClientError::Disconnected),
        }
    }

    /// Send a request and wait for the response with the same id, dropping console traffic.
    pub async fn request(&mut self, message: Message) -> Result<Message> {
        let message = message.with_wait(true);
        let id = message.id;
        self.send(message).await?;
        loop {
            let reply = self.recv().await?;
            if !reply.is_console() && reply.id == id {
                return Ok(reply);
            }
        }
    }

    pub async fn call(
        &mut self,
        target: CallTarget,
        function: &str,
        arguments: Vec<Variable>,
    ) -> Result<Message> {
        let id = self.next_id();
        self.request(Message::function_call(id, target, function, arguments))
            .await
    }

    pub async fn exec(&mut self, source: &str) -> Result<Message> {
        let id = self.next_id();
        self.request(Message::code(id, source)).await
    }

    pub async fn control(&mut self, command: &ControlCommand, wait: bool) -> Result<Option<Message>> {
        let id = self.next_id();
        let message = Message::control(id, command, wait);
        if wait {
            self.request(message).await.map(Some)
        } else {
            self.send(message).await.map(|()| None)
        }
    }
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Operation;

    #[tokio::test]
    async fn request_skips_console_and_matches_id() {
        let (client_side, server_side) = UnixStream::pair().unwrap();
        let mut client = AsyncClient::from_stream(client_side);
        let mut server = Framed::new(server_side, MessageCodec::default());

        let server_task = tokio::spawn(async move {
            let request = server.next().await.unwrap().unwrap();
            server
                .send(Message::console_text("noise"))
                .await
                .unwrap();
            server
                .send(Message::result(request.id, "Julia"))
                .await
                .unwrap();
        });

        let reply = client
            .call(CallTarget::System, "get-language", vec![])
            .await
            .unwrap();
        assert_eq!(reply.id, 1);
        assert_eq!(reply.operation, Operation::Result(Variable::from("Julia")));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn closed_peer_is_disconnected() {
        let (client_side, server_side) = bertpipe_transport::IpcStream::pair().unwrap();
        drop(server_side);
        let mut client = AsyncClient::from_ipc(client_side).unwrap();
        let err = client.recv().await.unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));
    }
}
