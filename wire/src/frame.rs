// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Length-prefixed framing:
//!
//! ```text
//! +----------------+----------------+----------------------+
//! | 4B big-endian  | 2B type-id     | payload (variable)    |
//! | total length   |                |                       |
//! +----------------+----------------+----------------------+
//! ```
//!
//! `total length` counts the whole frame, header included, so a frame's
//! payload is `total_length - FRAME_HEADER_LEN` bytes. [`FrameDecoder`]
//! accumulates bytes from a socket and yields complete frames only once
//! they are fully buffered; a partial frame is held rather than decoded.

use thiserror::Error;

/// Bytes occupied by the length prefix plus the type-id.
pub const FRAME_HEADER_LEN: usize = 4 + 2;

/// A frame whose declared length would exceed this is a protocol violation,
/// not a truncated read; this bounds how much a single malformed peer can
/// make us buffer before we give up on it.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge(u32),
    #[error("frame declares length {declared} shorter than the {FRAME_HEADER_LEN} byte header")]
    ShorterThanHeader { declared: u32 },
}

/// Encode `body` tagged with `type_id` into a complete frame.
#[must_use]
pub fn write_frame(type_id: u16, body: &[u8]) -> Vec<u8> {
    let total_len = (FRAME_HEADER_LEN + body.len()) as u32;
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&total_len.to_be_bytes());
    out.extend_from_slice(&type_id.to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Accumulates bytes read from a stream and extracts complete frames.
///
/// Follows a "fill, then decode only what's whole" discipline: a decoder
/// never hands out a frame it hasn't fully received, and `compact()` lets
/// the caller reclaim consumed bytes from the front of the buffer once
/// nothing partial remains behind the read pointer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// read cursor: bytes before this index are fully consumed frames.
    read_pos: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly-read bytes from the socket.
    pub fn fill(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is fully buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed, `Err` on a malformed
    /// declared length (the caller should treat this as a protocol error
    /// and close the connection), `Ok(Some((type_id, body)))` otherwise.
    pub fn try_take_frame(&mut self) -> Result<Option<(u16, Vec<u8>)>, FrameError> {
        let available = self.buf.len() - self.read_pos;
        if available < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header = &self.buf[self.read_pos..self.read_pos + FRAME_HEADER_LEN];
        let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if declared > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(declared));
        }
        if (declared as usize) < FRAME_HEADER_LEN {
            return Err(FrameError::ShorterThanHeader { declared });
        }
        let type_id = u16::from_be_bytes([header[4], header[5]]);

        if available < declared as usize {
            return Ok(None);
        }

        let body_start = self.read_pos + FRAME_HEADER_LEN;
        let body_end = self.read_pos + declared as usize;
        let body = self.buf[body_start..body_end].to_vec();
        self.read_pos = body_end;
        Ok(Some((type_id, body)))
    }

    /// Reclaim memory behind the read cursor. Safe to call at any time;
    /// a no-op when the cursor is already at the start.
    pub fn compact(&mut self) {
        if self.read_pos > 0 {
            self.buf.drain(0..self.read_pos);
            self.read_pos = 0;
        }
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.read_pos
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_frame_round_trips() {
        let frame = write_frame(7, b"hello");
        let mut dec = FrameDecoder::new();
        dec.fill(&frame);
        let (ty, body) = dec.try_take_frame().unwrap().unwrap();
        assert_eq!(ty, 7);
        assert_eq!(body, b"hello");
        assert!(dec.try_take_frame().unwrap().is_none());
    }

    #[test]
    fn partial_frame_is_held() {
        let frame = write_frame(1, b"0123456789");
        let mut dec = FrameDecoder::new();
        dec.fill(&frame[..frame.len() - 3]);
        assert!(dec.try_take_frame().unwrap().is_none());
        dec.fill(&frame[frame.len() - 3..]);
        let (ty, body) = dec.try_take_frame().unwrap().unwrap();
        assert_eq!(ty, 1);
        assert_eq!(body, b"0123456789");
    }

    #[test]
    fn multiple_frames_in_one_fill() {
        let mut bytes = write_frame(1, b"a");
        bytes.extend(write_frame(2, b"bb"));
        bytes.extend(write_frame(3, b"ccc"));

        let mut dec = FrameDecoder::new();
        dec.fill(&bytes);
        let mut got = Vec::new();
        while let Some((ty, body)) = dec.try_take_frame().unwrap() {
            got.push((ty, body));
        }
        assert_eq!(
            got,
            vec![
                (1, b"a".to_vec()),
                (2, b"bb".to_vec()),
                (3, b"ccc".to_vec())
            ]
        );
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut dec = FrameDecoder::new();
        let mut header = (MAX_FRAME_LEN + 1).to_be_bytes().to_vec();
        header.extend_from_slice(&0u16.to_be_bytes());
        dec.fill(&header);
        assert_eq!(
            dec.try_take_frame().unwrap_err(),
            FrameError::TooLarge(MAX_FRAME_LEN + 1)
        );
    }

    #[test]
    fn compact_reclaims_consumed_bytes() {
        let frame = write_frame(1, b"abc");
        let mut dec = FrameDecoder::new();
        dec.fill(&frame);
        dec.try_take_frame().unwrap();
        assert_eq!(dec.buffered_len(), 0);
        dec.compact();
        assert_eq!(dec.buf.len(), 0);
    }

    #[test]
    fn byte_at_a_time_feed() {
        let frame = write_frame(42, b"streamed byte by byte");
        let mut dec = FrameDecoder::new();
        let mut result = None;
        for b in &frame {
            dec.fill(std::slice::from_ref(b));
            if let Some(f) = dec.try_take_frame().unwrap() {
                result = Some(f);
            }
        }
        let (ty, body) = result.unwrap();
        assert_eq!(ty, 42);
        assert_eq!(body, b"streamed byte by byte");
    }
}
