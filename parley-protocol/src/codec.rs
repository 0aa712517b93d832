//! Encoder and buffered decoder for parley frames.

use crate::checksum;
use crate::command::Command;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::reply::{Reply, ReplyChunk};
use bytes::{Bytes, BytesMut};

/// Encodes commands and replies into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a command into a sealed frame.
    pub fn encode_command(command: &Command) -> Result<BytesMut, ProtocolError> {
        command.validate()?;
        Ok(Frame::sealed(&command.to_payload())?.encode())
    }

    /// Encodes a reply into one or more sealed frames, back to back.
    pub fn encode_reply(reply: &Reply) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        for frame in reply.to_frames()? {
            buf.extend_from_slice(&frame.encode());
        }
        Ok(buf)
    }
}

/// Incremental decoder for a byte stream with no message boundaries.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// A framing error leaves the stream unrecoverable; callers must close it.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next reply from the buffer.
    ///
    /// The outer result carries framing errors; the inner one carries
    /// errors scoped to the single frame (checksum or unknown verb), after
    /// which decoding may continue.
    #[allow(clippy::type_complexity)]
    pub fn decode_reply(&mut self) -> Result<Option<Result<Reply, ProtocolError>>, ProtocolError> {
        Ok(self.decode_frame()?.map(|frame| {
            let sealed = checksum::open(frame.body())?;
            Reply::from_payload(sealed.payload)
        }))
    }

    /// Like [`Decoder::decode_reply`], keeping the listing continuation flag.
    #[allow(clippy::type_complexity)]
    pub fn decode_chunk(
        &mut self,
    ) -> Result<Option<Result<ReplyChunk, ProtocolError>>, ProtocolError> {
        Ok(self.decode_frame()?.map(|frame| {
            let sealed = checksum::open(frame.body())?;
            Reply::chunk_from_payload(sealed.payload)
        }))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
