use bertpipe_frame::{decode_frame, encode_frame, HEADER_SIZE};
use bytes::{Bytes, BytesMut};

use crate::error::CodecError;
use crate::message::Message;

/// Serialize `message` and prefix it with its length.
pub fn encode_message(message: &Message) -> Result<Bytes, CodecError> {
    let payload = serde_json::to_vec(message).map_err(CodecError::Encode)?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(&payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode the first message in `src`.
///
/// Returns the message and the number of bytes its frame occupies. A short
/// buffer is [`CodecError::Incomplete`]; a complete frame with an unreadable
/// payload is [`CodecError::MalformedPayload`], whose `consumed` lets the
/// caller drop just that frame.
pub fn decode_message(src: &[u8], max_payload: usize) -> Result<(Message, usize), CodecError> {
    let (payload, consumed) = decode_frame(src, max_payload)?;
    let message = serde_json::from_slice(payload)
        .map_err(|source| CodecError::MalformedPayload { consumed, source })?;
    Ok((message, consumed))
}

/// `tokio_util` codec over [`Message`] for async clients.
#[cfg(feature = "async")]
pub struct MessageCodec {
    inner: tokio_util::codec::LengthDelimitedCodec,
}

#[cfg(feature = "async")]
impl MessageCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            inner: bertpipe_frame::length_prefix_codec(max_payload),
        }
    }
}

#[cfg(feature = "async")]
impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(bertpipe_frame::DEFAULT_MAX_PAYLOAD)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        match self.inner.decode(src)? {
            Some(payload) => {
                let consumed = HEADER_SIZE + payload.len();
                serde_json::from_slice(&payload)
                    .map(Some)
                    .map_err(|source| CodecError::MalformedPayload { consumed, source })
            }
            None => Ok(None),
        }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = serde_json::to_vec(&item).map_err(CodecError::Encode)?;
        self.inner.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
