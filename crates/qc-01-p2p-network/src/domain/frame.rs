//! # Wire Framing
//!
//! ```text
//! +-----------+-----------+-----------+----------+------------+
//! | len (u32) | payload   | adler32   | priority | 0xC0DEFEED |
//! +-----------+-----------+-----------+----------+------------+
//!   4 bytes     len - 9     4 bytes     1 byte     4 bytes
//! ```
//!
//! All integers are big-endian. `len` counts everything after itself. The
//! end marker is only used to resynchronize after a bad frame.

/// Sentinel closing every frame.
pub const END_MARKER: u32 = 0xC0DE_FEED;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// checksum + priority + end marker
pub const TRAILER_LEN: usize = 4 + 1 + 4;

/// Default upper bound on `len`.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Only the low nibble of the priority byte is meaningful.
pub const PRIORITY_MASK: u8 = 0x0F;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub priority: u8,
}

/// Why a frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// Declared length cannot even hold the trailer
    LengthTooShort { declared: usize },
    /// Adler-32 over the payload did not match
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Trailer did not end with [`END_MARKER`]
    MissingEndMarker,
}

/// Result of trying to decode one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// More bytes are needed
    Incomplete,
    /// One valid frame; `consumed` bytes belong to it
    Complete { frame: Frame, consumed: usize },
    /// Declared length is above the configured limit
    Oversized { declared: usize },
    /// Frame is malformed
    Corrupt { reason: CorruptReason },
}

/// Encode `payload` into a frame.
///
/// The caller bounds `payload` so the length field fits in a `u32`.
pub fn frame(payload: &[u8], priority: u8) -> Vec<u8> {
    let total_len = payload.len() + TRAILER_LEN;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + total_len);

    out.extend_from_slice(&(total_len as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&adler32(payload).to_be_bytes());
    out.push(priority & PRIORITY_MASK);
    out.extend_from_slice(&END_MARKER.to_be_bytes());
    out
}

/// Try to decode one frame from the start of `bytes`.
///
/// Never panics on malformed input.
pub fn unframe(bytes: &[u8], max_frame_size: usize) -> FrameStatus {
    let Some(prefix) = bytes.get(..LENGTH_PREFIX_LEN) else {
        return FrameStatus::Incomplete;
    };
    let declared = read_u32(prefix) as usize;

    if declared > max_frame_size {
        return FrameStatus::Oversized { declared };
    }
    if declared < TRAILER_LEN {
        return FrameStatus::Corrupt {
            reason: CorruptReason::LengthTooShort { declared },
        };
    }

    let consumed = LENGTH_PREFIX_LEN + declared;
    let Some(body) = bytes.get(LENGTH_PREFIX_LEN..consumed) else {
        return FrameStatus::Incomplete;
    };

    let payload_len = declared - TRAILER_LEN;
    let (payload, trailer) = body.split_at(payload_len);

    if read_u32(&trailer[5..9]) != END_MARKER {
        return FrameStatus::Corrupt {
            reason: CorruptReason::MissingEndMarker,
        };
    }

    let expected = read_u32(&trailer[..4]);
    let actual = adler32(payload);
    if expected != actual {
        return FrameStatus::Corrupt {
            reason: CorruptReason::ChecksumMismatch { expected, actual },
        };
    }

    FrameStatus::Complete {
        frame: Frame {
            payload: payload.to_vec(),
            priority: trailer[4] & PRIORITY_MASK,
        },
        consumed,
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

/// Adler-32 (RFC 1950).
pub fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65_521;
    // Largest n such that 255n(n+1)/2 + (n+1)(MOD_ADLER-1) fits in u32
    const NMAX: usize = 5552;

    let (mut a, mut b) = (1u32, 0u32);
    for chunk in data.chunks(NMAX) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    (b << 16) | a
}
