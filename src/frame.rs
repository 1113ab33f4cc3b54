//! Byte framing shared by the command and trace directions
//!
//! A frame carries a sequence number, the record bytes and a checksum. The
//! `FLAG` and `ESC` bytes are escaped inside the frame and a single `FLAG`
//! terminates it, so a receiver can reassemble frames from an arbitrary byte
//! stream without any external length information.

use bytes::{BufMut, Bytes, BytesMut};

/// Frame terminator.
pub const FLAG: u8 = 0x7E;
/// Escape marker: the following byte is transmitted XOR [`ESC_XOR`].
pub const ESC: u8 = 0x7D;
pub const ESC_XOR: u8 = 0x20;
/// Wrapping sum of all unescaped bytes of a valid frame, checksum included.
pub const GOOD_CHECKSUM: u8 = 0xFF;
/// Longest unescaped frame (sequence, record, checksum) a receiver buffers.
pub const MAX_FRAME_LEN: usize = 1024;

/// A frame that could not be reassembled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("bad checksum (sum 0x{sum:02X}) in {len}-byte frame")]
    Checksum { sum: u8, len: usize },
    #[error("escape byte immediately followed by the frame flag")]
    DanglingEscape,
    #[error("frame longer than {} bytes without a flag", MAX_FRAME_LEN)]
    TooLong,
}

/// Encode one frame: `seq`, `record`, checksum, escaped and flag-terminated.
pub fn encode_frame(seq: u8, record: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(record.len() + 4);
    let mut sum = seq;
    put_escaped(&mut out, seq);
    for &b in record {
        sum = sum.wrapping_add(b);
        put_escaped(&mut out, b);
    }
    put_escaped(&mut out, !sum);
    out.put_u8(FLAG);
    out.freeze()
}

fn put_escaped(out: &mut BytesMut, b: u8) {
    if b == FLAG || b == ESC {
        out.put_u8(ESC);
        out.put_u8(b ^ ESC_XOR);
    } else {
        out.put_u8(b);
    }
}

/// Incremental frame reassembly.
///
/// Bytes are pushed one at a time; a complete frame body (sequence number and
/// record bytes, checksum stripped) is returned when its terminating flag
/// arrives. Idle flags between frames are ignored, and after an error the
/// deframer starts over with the next byte. An overlong frame is reported
/// once and the rest of it is dropped up to the next flag.
#[derive(Debug, Default)]
pub struct Deframer {
    buf: BytesMut,
    escaped: bool,
    sum: u8,
    overflowed: bool,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte from the wire.
    pub fn push(&mut self, byte: u8) -> Option<Result<Bytes, FrameError>> {
        match byte {
            FLAG if std::mem::take(&mut self.overflowed) => None,
            _ if self.overflowed => None,
            FLAG => {
                let escaped = std::mem::take(&mut self.escaped);
                let sum = std::mem::take(&mut self.sum);
                let body = self.buf.split().freeze();
                if escaped {
                    return Some(Err(FrameError::DanglingEscape));
                }
                if body.is_empty() {
                    return None;
                }
                if sum != GOOD_CHECKSUM {
                    return Some(Err(FrameError::Checksum { sum, len: body.len() }));
                }
                Some(Ok(body.slice(..body.len() - 1)))
            }
            ESC if !self.escaped => {
                self.escaped = true;
                None
            }
            _ => {
                let b = if std::mem::take(&mut self.escaped) {
                    byte ^ ESC_XOR
                } else {
                    byte
                };
                if self.buf.len() == MAX_FRAME_LEN {
                    self.buf.clear();
                    self.sum = 0;
                    self.overflowed = true;
                    return Some(Err(FrameError::TooLong));
                }
                self.sum = self.sum.wrapping_add(b);
                self.buf.put_u8(b);
                None
            }
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.buf.is_empty() && !self.escaped && !self.overflowed
    }
}
