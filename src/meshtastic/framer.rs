//! Length-prefixed framer for the Meshtastic serial stream API.
//!
//! Each protobuf message on the wire is preceded by a 4 byte header:
//!
//!   `0x94 0xC3 <len_hi> <len_lo>`
//!
//! The device also prints plain-text debug output on the same link, so the decoder
//! resynchronizes on the next `0x94` whenever the buffer does not start with a header
//! and discards headers that declare an implausible length.
use bytes::{Buf, BufMut, BytesMut};

use crate::errors::{RelayError, RelayResult};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;
/// Largest `ToRadio` payload the firmware accepts.
pub const MAX_FRAME_LEN: usize = 512;
// Declared lengths above this are line noise rather than a header.
const MAX_DECLARED_LEN: usize = 8192;

#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame payload, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return None;
            }

            if !(self.buf[0] == START1 && self.buf[1] == START2) {
                match self.buf.iter().skip(1).position(|&b| b == START1) {
                    Some(pos) => {
                        self.buf.advance(pos + 1);
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
                continue;
            }

            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_DECLARED_LEN {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }

            self.buf.advance(HEADER_LEN);
            return Some(self.buf.split_to(declared).to_vec());
        }
    }

    /// Drain every complete frame currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(f) = self.next_frame() {
            frames.push(f);
        }
        frames
    }
}

/// Prefix `payload` with the stream header.
pub fn encode_frame(payload: &[u8]) -> RelayResult<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_FRAME_LEN {
        return Err(RelayError::Transport(format!(
            "frame payload of {} bytes is outside 1..={}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u8(START1);
    out.put_u8(START2);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    Ok(out.to_vec())
}
