use tokio_util::codec::LengthDelimitedCodec;

/// A `tokio_util` codec speaking the same wire format as [`encode_frame`](crate::encode_frame).
pub fn length_prefix_codec(max_payload: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(crate::HEADER_SIZE)
        .little_endian()
        .max_frame_length(max_payload)
        .new_codec()
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use super::*;
    use crate::codec::{decode_frame, encode_frame, DEFAULT_MAX_PAYLOAD};

    #[test]
    fn tokio_codec_reads_sync_frames() {
        let mut wire = BytesMut::new();
        encode_frame(b"from-sync", &mut wire).unwrap();

        let mut codec = length_prefix_codec(DEFAULT_MAX_PAYLOAD);
        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.as_ref(), b"from-sync");
    }

    #[test]
    fn sync_decoder_reads_tokio_frames() {
        let mut codec = length_prefix_codec(DEFAULT_MAX_PAYLOAD);
        let mut wire = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"from-tokio"), &mut wire)
            .unwrap();

        let (payload, consumed) = decode_frame(&wire, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(payload, b"from-tokio");
        assert_eq!(consumed, wire.len());
    }
}
