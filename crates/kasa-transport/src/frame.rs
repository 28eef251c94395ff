//! Incremental decoder for length-prefixed frames.
//!
//! IOT devices answer with a 4-byte big-endian length followed by the XOR
//! payload. Reads off the socket may split a frame or carry several, so bytes
//! are buffered until a complete frame is available.

use bytes::{Buf, Bytes, BytesMut};
use kasa_protocol::xor::BLOCK_SIZE;
use kasa_protocol::{KasaError, Result};

/// Larger replies than this are treated as a corrupt stream.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame_len,
        }
    }

    /// Append bytes read from the socket.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame payload, without its length prefix.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < BLOCK_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > self.max_frame_len {
            return Err(KasaError::kasa(format!(
                "Frame of {len} bytes exceeds limit of {}",
                self.max_frame_len
            )));
        }
        if self.buf.len() < BLOCK_SIZE + len {
            return Ok(None);
        }
        self.buf.advance(BLOCK_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasa_protocol::XorEncryption;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn single_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame(b"hello"));
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::from("hello"));
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn frame_split_across_chunks() {
        let bytes = frame(b"hello world");
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..2]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&bytes[2..7]);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(&bytes[7..]);
        assert_eq!(
            decoder.next_frame().unwrap().unwrap(),
            Bytes::from("hello world")
        );
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut bytes = frame(b"one");
        bytes.extend(frame(b"two"));
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::from("one"));
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::from("two"));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn empty_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame(b""));
        assert_eq!(decoder.next_frame().unwrap().unwrap(), Bytes::new());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut decoder = FrameDecoder::with_max_frame_len(4);
        decoder.extend(&frame(b"too long"));
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn decodes_xor_encrypted_reply() {
        let reply = r#"{"system":{"get_sysinfo":{"err_code":0}}}"#;
        let mut decoder = FrameDecoder::new();
        decoder.extend(&XorEncryption::encrypt(reply));
        let payload = decoder.next_frame().unwrap().unwrap();
        assert_eq!(XorEncryption::decrypt(&payload).unwrap(), reply);
    }
}
