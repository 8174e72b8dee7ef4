//! Remoting frame codec.
//!
//! Frame format:
//! ```text
//! +-------------+---------+------------------+--------+------+
//! | length (4)  | ser (1) | header length (3)| header | body |
//! +-------------+---------+------------------+--------+------+
//! ```
//! `length` counts everything after itself. The header is JSON.

use super::errors::RemotingError;
use super::protocol::{CommandHeader, RemotingCommand};
use bytes::{Buf, BufMut, BytesMut};
use shared_types::{MqError, MqResult};
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame accepted from a peer (16MB).
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
const HEADER_LEN_MASK: u32 = 0x00FF_FFFF;
const SERIALIZE_JSON: u8 = 0;

pub struct RemotingCodec {
    max_frame_size: usize,
}

impl Default for RemotingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RemotingCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for RemotingCodec {
    type Item = RemotingCommand;
    type Error = MqError;

    fn decode(&mut self, src: &mut BytesMut) -> MqResult<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = (&src[..4]).get_u32() as usize;
        if length > self.max_frame_size {
            return Err(RemotingError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            }
            .into());
        }
        if length < 4 {
            return Err(RemotingError::FrameTooSmall(length).into());
        }

        let total = 4 + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(length);
        let mark = frame.get_u32();
        let serialize_type = (mark >> 24) as u8;
        let header_len = (mark & HEADER_LEN_MASK) as usize;
        if serialize_type != SERIALIZE_JSON {
            return Err(RemotingError::UnsupportedSerialization(serialize_type).into());
        }
        if header_len > frame.len() {
            return Err(RemotingError::HeaderOverrun {
                header: header_len,
                remaining: frame.len(),
            }
            .into());
        }

        let header_bytes = frame.split_to(header_len);
        let header: CommandHeader =
            serde_json::from_slice(&header_bytes).map_err(RemotingError::from)?;
        let body = if frame.is_empty() {
            None
        } else {
            Some(frame.freeze())
        };

        Ok(Some(RemotingCommand { header, body }))
    }
}

impl Encoder<RemotingCommand> for RemotingCodec {
    type Error = MqError;

    fn encode(&mut self, item: RemotingCommand, dst: &mut BytesMut) -> MqResult<()> {
        let header = serde_json::to_vec(&item.header).map_err(RemotingError::from)?;
        if header.len() > HEADER_LEN_MASK as usize {
            return Err(RemotingError::HeaderTooLarge.into());
        }
        let body_len = item.body.as_ref().map_or(0, |b| b.len());
        let length = 4 + header.len() + body_len;
        if length > self.max_frame_size {
            return Err(RemotingError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            }
            .into());
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u32((u32::from(SERIALIZE_JSON) << 24) | header.len() as u32);
        dst.extend_from_slice(&header);
        if let Some(body) = item.body {
            dst.extend_from_slice(&body);
        }
        Ok(())
    }
}
