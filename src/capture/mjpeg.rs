//! MJPEG stream splitter
//!
//! Extracts complete JPEG images (SOI .. EOI) from the raw byte stream an
//! MJPEG pipe produces. Bytes ahead of a start-of-image marker are dropped,
//! which resynchronizes the stream after a torn write.

use bytes::{Bytes, BytesMut};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on bytes buffered while waiting for an end-of-image marker.
/// A stream that exceeds it has lost its framing and is resynced from scratch.
const MAX_PENDING: usize = 8 * 1024 * 1024;

/// MjpegSplitter instance
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: BytesMut,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the pipe.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete JPEG, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let start = find_marker(&self.buf, &SOI)?;
        if start > 0 {
            let _ = self.buf.split_to(start);
        }

        match find_marker(&self.buf[2..], &EOI) {
            Some(offset) => Some(self.buf.split_to(offset + 4).freeze()),
            None => {
                if self.buf.len() > MAX_PENDING {
                    tracing::warn!(
                        pending = self.buf.len(),
                        "No end-of-image marker within the buffer bound, resyncing"
                    );
                    self.buf.clear();
                }
                None
            }
        }
    }

    /// Bytes currently buffered (diagnostics)
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|window| window == marker)
}
