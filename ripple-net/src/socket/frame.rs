use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

/// Size of the frame header: kind byte, flags byte and little endian `u32`
/// payload length.
pub const FRAME_HEADER_LEN: usize = 6;

/// Flag bit signalling lz4 compressed payload.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Single message as seen on the wire.
///
/// ```text
/// [kind: u8][flags: u8][len: u32 LE][payload: len bytes]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: u8, flags: u8, payload: Vec<u8>) -> Self {
        Self {
            kind,
            flags,
            payload,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Serializes the frame, header included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        let mut len_buf = [0; 4];
        LittleEndian::write_u32(&mut len_buf, self.payload.len() as u32);
        bytes.push(self.kind);
        bytes.push(self.flags);
        bytes.extend_from_slice(&len_buf);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// Accumulates bytes read from a stream and splits them into frames.
///
/// Partial reads are kept in the buffer, decoding resumes at the frame
/// boundary once more bytes arrive.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Takes the next complete frame out of the buffer, if there is one.
    ///
    /// Fails if the announced payload length is above the configured limit,
    /// at which point the stream can't be trusted anymore.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = LittleEndian::read_u32(&self.buffer[2..FRAME_HEADER_LEN]) as usize;
        if len > self.max_frame_size {
            return Err(Error::FrameTooLarge(len, self.max_frame_size));
        }
        let total = FRAME_HEADER_LEN + len;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let frame = Frame {
            kind: self.buffer[0],
            flags: self.buffer[1],
            payload: self.buffer[FRAME_HEADER_LEN..total].to_vec(),
        };
        self.buffer.drain(..total);
        Ok(Some(frame))
    }
}
