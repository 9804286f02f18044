//! Beast binary framing.
//!
//! Wire format per frame: `0x1A`, a type byte ('1' Mode A/C, '2' Mode S
//! short, '3' Mode S long), a 6-byte big-endian device timestamp, one signal
//! level byte, then the payload. Any literal `0x1A` inside the timestamp,
//! signal, or payload is escaped by doubling.
//!
//! The splitter keeps a rolling buffer across reads: it scans for the escape
//! byte, computes the expected end of the candidate frame, then rescans the
//! interior extending the end once per embedded escape. A frame that runs
//! past the buffered bytes is retained for the next read; an unknown type
//! byte forces a resync to the next escape.

use crate::types::{LONG_MSG_BYTES, SHORT_MSG_BYTES};

const ESCAPE: u8 = 0x1A;

/// Mode A/C payload bytes behind a type '1' header.
pub const MODE_AC_BYTES: usize = 2;

/// Timestamp + signal bytes between the type byte and the payload.
const HEADER_BYTES: usize = 7;

/// A buffer that grows this large without a single frame boundary is
/// discarded wholesale so corrupted input cannot wedge the splitter.
const MAX_BUFFER: usize = 1024;

/// Handshake sent upstream after connecting, Mode A/C enabled.
pub const HANDSHAKE_MODE_AC: [u8; 3] = [ESCAPE, b'1', b'J'];

/// Handshake sent upstream after connecting, Mode S only.
pub const HANDSHAKE_MODE_S: [u8; 3] = [ESCAPE, b'1', b'j'];

/// One de-escaped frame off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeastFrame {
    /// 48-bit device-domain timestamp.
    pub timestamp: u64,
    pub signal_level: u8,
    /// 2, 7 or 14 bytes.
    pub payload: Vec<u8>,
}

impl BeastFrame {
    /// True for the 2-byte Mode A/C payload.
    pub fn is_mode_ac(&self) -> bool {
        self.payload.len() == MODE_AC_BYTES
    }

    /// The Mode A/C reply word, hex-packed.
    pub fn mode_ac_word(&self) -> u16 {
        (self.payload[0] as u16) << 8 | self.payload[1] as u16
    }
}

/// Escape-aware segmentation of the Beast byte stream.
#[derive(Debug, Default)]
pub struct BeastSplitter {
    buf: Vec<u8>,
}

impl BeastSplitter {
    pub fn new() -> Self {
        BeastSplitter::default()
    }

    /// Append freshly read bytes and return every complete frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<BeastFrame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut som = 0; // start of message: offset of the frame's escape byte

        loop {
            match self.buf[som..].iter().position(|&b| b == ESCAPE) {
                Some(at) => som += at,
                None => {
                    // No boundary anywhere: everything buffered is garbage
                    som = self.buf.len();
                    break;
                }
            }

            if som + 1 >= self.buf.len() {
                break; // type byte not read yet
            }

            let payload_len = match self.buf[som + 1] {
                b'1' => MODE_AC_BYTES,
                b'2' => SHORT_MSG_BYTES,
                b'3' => LONG_MSG_BYTES,
                _ => {
                    // Not a frame start: resync to the next escape
                    som += 1;
                    continue;
                }
            };

            // Expected end, then stretch it once per doubled escape inside
            let mut end = som + 2 + HEADER_BYTES + payload_len;
            let mut at = som + 2;
            while at < end && at < self.buf.len() {
                if self.buf[at] == ESCAPE {
                    at += 1;
                    end += 1;
                }
                at += 1;
            }

            if end > self.buf.len() {
                break; // partial frame: wait for more bytes
            }

            match unescape(&self.buf[som + 2..end], payload_len) {
                Some(frame) => frames.push(frame),
                None => log::warn!("malformed frame body, dropped"),
            }
            som = end;
        }

        self.buf.drain(..som);
        if self.buf.len() >= MAX_BUFFER {
            log::warn!("no frame boundary in {} buffered bytes, discarding", self.buf.len());
            self.buf.clear();
        }

        frames
    }

    /// Bytes held over waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Collapse doubled escapes and split the header from the payload.
fn unescape(body: &[u8], payload_len: usize) -> Option<BeastFrame> {
    let mut out = Vec::with_capacity(HEADER_BYTES + payload_len);
    let mut at = 0;
    while at < body.len() {
        let byte = body[at];
        out.push(byte);
        if byte == ESCAPE {
            at += 1; // the double
        }
        at += 1;
    }

    if out.len() != HEADER_BYTES + payload_len {
        return None;
    }

    let mut timestamp = 0u64;
    for &byte in &out[..6] {
        timestamp = timestamp << 8 | byte as u64;
    }

    Some(BeastFrame {
        timestamp,
        signal_level: out[6],
        payload: out[7..].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn long_frame_bytes() -> Vec<u8> {
        // type '3', timestamp 0x000000000001, signal 0x60, then a real
        // 14-byte extended squitter
        let mut bytes = vec![0x1A, b'3', 0, 0, 0, 0, 0, 1, 0x60];
        bytes.extend_from_slice(&[
            0x8D, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3, 0x71, 0xC3, 0x2C, 0xE0, 0x57, 0x60, 0x98,
        ]);
        bytes
    }

    #[test]
    fn test_single_long_frame() {
        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&long_frame_bytes());

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.timestamp, 1);
        assert_eq!(frame.signal_level, 0x60);
        assert_eq!(frame.payload.len(), 14);
        assert_eq!(frame.payload[0], 0x8D);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_escaped_timestamp() {
        // Doubled 0x1A in the first timestamp byte of a short frame
        let mut bytes = vec![0x1A, b'2', 0x1A, 0x1A, 0, 0, 0, 0, 0, 0x30];
        bytes.extend_from_slice(&[0x5D, 0x48, 0x40, 0xD6, 0xAA, 0xBB, 0xCC]);

        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&bytes);

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.timestamp, 0x1A00_0000_0000, "escape collapsed to one literal");
        assert_eq!(frame.signal_level, 0x30);
        assert_eq!(frame.payload, vec![0x5D, 0x48, 0x40, 0xD6, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_escaped_payload_byte() {
        let mut bytes = vec![0x1A, b'1', 0, 0, 0, 0, 0, 0, 0x10];
        bytes.extend_from_slice(&[0x1A, 0x1A, 0x75]); // payload 0x1A 0x75

        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&bytes);

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_mode_ac());
        assert_eq!(frames[0].mode_ac_word(), 0x1A75);
    }

    #[test]
    fn test_partial_frame_retained() {
        let bytes = long_frame_bytes();
        let mut splitter = BeastSplitter::new();

        let frames = splitter.feed(&bytes[..10]);
        assert!(frames.is_empty());
        assert_eq!(splitter.pending(), 10);

        let frames = splitter.feed(&bytes[10..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), 14);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_partial_escape_at_buffer_end() {
        // The frame's trailing payload byte is an escaped 0x1A split across
        // reads: the stretched end must wait for the second half.
        let mut bytes = vec![0x1A, b'1', 0, 0, 0, 0, 0, 0, 0x10, 0x75, 0x1A];
        let mut splitter = BeastSplitter::new();
        assert!(splitter.feed(&bytes).is_empty());

        bytes.clear();
        bytes.push(0x1A);
        let frames = splitter.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].mode_ac_word(), 0x751A);
    }

    #[test]
    fn test_garbage_before_frame() {
        let mut bytes = vec![0x00, 0xFF, 0x13];
        bytes.extend_from_slice(&long_frame_bytes());

        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&bytes);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_resync_on_unknown_type() {
        // 0x1A followed by a non-type byte, then a real frame
        let mut bytes = vec![0x1A, 0x99];
        bytes.extend_from_slice(&long_frame_bytes());

        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&bytes);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut bytes = long_frame_bytes();
        bytes.extend_from_slice(&long_frame_bytes());

        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&bytes);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_escape_run_resynced() {
        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&[0x1A; 2048]);
        assert!(frames.is_empty());
        assert!(splitter.pending() <= 1, "escape run must not accumulate");
    }

    #[test]
    fn test_no_boundary_garbage_dropped() {
        let mut splitter = BeastSplitter::new();
        let frames = splitter.feed(&[0x55; 2048]);
        assert!(frames.is_empty());
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_handshake_bytes() {
        assert_eq!(HANDSHAKE_MODE_AC, [0x1A, 0x31, b'J']);
        assert_eq!(HANDSHAKE_MODE_S, [0x1A, 0x31, b'j']);
    }
}
