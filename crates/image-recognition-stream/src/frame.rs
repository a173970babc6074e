//! Wire frames exchanged with the Zipper broker.
//!
//! Every frame is `[kind: u8][len: u32 BE][body]`:
//!
//! | kind   | frame          | body                                  |
//! |--------|----------------|---------------------------------------|
//! | `0x01` | Handshake      | JSON `{"name": str, "observe": [u8]}` |
//! | `0x02` | HandshakeAck   | empty                                 |
//! | `0x03` | Data           | `[tag: u8][payload]`                  |
//! | `0x04` | Goaway         | UTF-8 reason                          |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use image_recognition_common::StreamError;

/// Length of the frame header.
pub const HEADER_LEN: usize = 5;

const KIND_HANDSHAKE: u8 = 0x01;
const KIND_HANDSHAKE_ACK: u8 = 0x02;
const KIND_DATA: u8 = 0x03;
const KIND_GOAWAY: u8 = 0x04;

/// Registration sent by a stream function when it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Stream function name.
    pub name: String,
    /// Data keys the function wants to receive.
    pub observe: Vec<u8>,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Handshake(Handshake),
    HandshakeAck,
    Data { tag: u8, payload: Bytes },
    Goaway(String),
}

impl Frame {
    /// Create a data frame.
    pub fn data(tag: u8, payload: impl Into<Bytes>) -> Self {
        Frame::Data {
            tag,
            payload: payload.into(),
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Frame::Handshake(_) => KIND_HANDSHAKE,
            Frame::HandshakeAck => KIND_HANDSHAKE_ACK,
            Frame::Data { .. } => KIND_DATA,
            Frame::Goaway(_) => KIND_GOAWAY,
        }
    }
}

/// Length-prefixed frame codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec rejecting bodies larger than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    fn check_len(&self, len: usize) -> Result<(), StreamError> {
        if len > self.max_frame_bytes {
            return Err(StreamError::frame(format!(
                "Frame body of {len} bytes exceeds limit of {} bytes",
                self.max_frame_bytes
            )));
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StreamError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        self.check_len(len)?;

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut body = src.split_to(len).freeze();

        let frame = match kind {
            KIND_HANDSHAKE => {
                let handshake = serde_json::from_slice(&body)
                    .map_err(|e| StreamError::frame(format!("Invalid handshake: {e}")))?;
                Frame::Handshake(handshake)
            }
            KIND_HANDSHAKE_ACK => Frame::HandshakeAck,
            KIND_DATA => {
                if body.is_empty() {
                    return Err(StreamError::frame("Data frame without tag"));
                }
                let tag = body.get_u8();
                Frame::Data { tag, payload: body }
            }
            KIND_GOAWAY => Frame::Goaway(String::from_utf8_lossy(&body).into_owned()),
            other => {
                let reason = format!("Unknown frame kind {other:#04x}");
                return Err(StreamError::frame(reason));
            }
        };

        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = StreamError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), StreamError> {
        let kind = frame.kind();
        let body: Bytes = match frame {
            Frame::Handshake(handshake) => serde_json::to_vec(&handshake)
                .map_err(|e| StreamError::frame(format!("Invalid handshake: {e}")))?
                .into(),
            Frame::HandshakeAck => Bytes::new(),
            Frame::Data { tag, payload } => {
                let mut body = BytesMut::with_capacity(1 + payload.len());
                body.put_u8(tag);
                body.extend_from_slice(&payload);
                body.freeze()
            }
            Frame::Goaway(reason) => reason.into_bytes().into(),
        };

        self.check_len(body.len())?;
        let len = u32::try_from(body.len())
            .map_err(|_| StreamError::frame("Frame body exceeds u32 length"))?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(kind);
        dst.put_u32(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameCodec::new(1024).encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_data_frame_layout() {
        let buf = encode(Frame::data(0x10, &b"jpg"[..]));
        assert_eq!(&buf[..], &[0x03, 0, 0, 0, 4, 0x10, b'j', b'p', b'g']);
    }

    #[test]
    fn test_handshake_body_is_json() {
        let buf = encode(Frame::Handshake(Handshake {
            name: "image-recognition".into(),
            observe: vec![0x10],
        }));

        assert_eq!(buf[0], 0x01);
        let body: serde_json::Value = serde_json::from_slice(&buf[HEADER_LEN..]).unwrap();
        assert_eq!(body["name"], "image-recognition");
        assert_eq!(body["observe"], serde_json::json!([16]));
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new(1024);
        let full = encode(Frame::data(0x10, &b"payload"[..]));

        let mut partial = BytesMut::from(&full[..7]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);

        partial.extend_from_slice(&full[7..]);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(Frame::data(0x10, &b"payload"[..]))
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_consecutive_frames() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = encode(Frame::HandshakeAck);
        buf.extend_from_slice(&encode(Frame::Goaway("bye".into())));

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::HandshakeAck));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Goaway("bye".into()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_empty_data_payload() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = encode(Frame::data(0x11, Bytes::new()));

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::data(0x11, Bytes::new()));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::from(&[0x03, 0, 0, 0, 5][..]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(StreamError::Frame { .. })));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        let result = FrameCodec::new(2).encode(Frame::data(0x10, &b"abc"[..]), &mut buf);

        assert!(matches!(result, Err(StreamError::Frame { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_kind_and_untagged_data() {
        let mut codec = FrameCodec::new(1024);

        let mut unknown = BytesMut::from(&[0x7f, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut unknown).is_err());

        let mut untagged = BytesMut::from(&[0x03, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut untagged).is_err());
    }
}
