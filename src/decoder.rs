//! Trace decoder
//!
//! Turns the target's byte stream into an ordered sequence of
//! [`TraceRecord`]s. A trace frame's record bytes are laid out as:
//!
//! ```text
//! rec: u8 | flags: u8 | [timestamp: u32 LE] | text: UTF-8 fields
//! ```
//!
//! where bit 0 of `flags` announces the timestamp and the text holds the
//! kind token followed by the field tokens, separated by ASCII whitespace.
//! Any decoding failure ends the sequence: a corrupted stream cannot be
//! matched against anything afterwards.

use std::io::{self, Read};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::{encode_frame, Deframer, FrameError};
use crate::record::{rec, TraceRecord};

/// `flags` bit: a little-endian `u32` timestamp follows.
pub const FLAG_TIMESTAMP: u8 = 0x01;

const READ_CHUNK: usize = 512;

/// A malformed or unexpected inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("truncated frame: {0}")]
    Truncated(&'static str),
    #[error("unknown record kind {0}")]
    UnknownRecord(u8),
    #[error("record text is not valid UTF-8")]
    Utf8,
    #[error("record {0} carries no kind token")]
    MissingKind(u8),
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u8, got: u8 },
    #[error("trace channel read failed: {0}")]
    Io(#[from] io::Error),
}

/// Parse one deframed body (sequence number first) into a record.
pub fn parse_record(mut body: Bytes) -> Result<TraceRecord, DecodeError> {
    if body.remaining() < 3 {
        return Err(DecodeError::Truncated("missing record header"));
    }
    let seq = body.get_u8();
    let rec_id = body.get_u8();
    let flags = body.get_u8();
    if !rec::is_known(rec_id) {
        return Err(DecodeError::UnknownRecord(rec_id));
    }
    let timestamp = if flags & FLAG_TIMESTAMP != 0 {
        if body.remaining() < 4 {
            return Err(DecodeError::Truncated("missing timestamp"));
        }
        Some(body.get_u32_le())
    } else {
        None
    };
    let text = std::str::from_utf8(&body).map_err(|_| DecodeError::Utf8)?;
    let record = TraceRecord::new(seq, rec_id, timestamp, text);
    if record.fields.is_empty() {
        return Err(DecodeError::MissingKind(rec_id));
    }
    Ok(record)
}

/// Encode a record as a trace frame, the inverse of [`parse_record`].
///
/// The harness never sends trace frames; simulated targets and stream
/// replays use this to produce them.
pub fn encode_record(record: &TraceRecord) -> Bytes {
    let mut body = BytesMut::with_capacity(16 + record.fields.len() * 8);
    body.put_u8(record.rec);
    match record.timestamp {
        Some(ts) => {
            body.put_u8(FLAG_TIMESTAMP);
            body.put_u32_le(ts);
        }
        None => body.put_u8(0),
    }
    body.put_slice(record.fields.join(" ").as_bytes());
    encode_frame(record.seq, &body)
}

/// Lazy decoder over a byte source.
pub struct TraceDecoder<R> {
    reader: R,
    deframer: Deframer,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    last_seq: Option<u8>,
    done: bool,
}

impl<R: Read> TraceDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            deframer: Deframer::new(),
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            pos: 0,
            len: 0,
            last_seq: None,
            done: false,
        }
    }

    /// Records must arrive with consecutive sequence numbers. A target reset
    /// restarts the target's counter, so its announcement resynchronises.
    fn check_sequence(&mut self, record: TraceRecord) -> Result<TraceRecord, DecodeError> {
        if let Some(last) = self.last_seq {
            let expected = last.wrapping_add(1);
            if record.seq != expected && !record.is_reset_marker() {
                return Err(DecodeError::SequenceGap { expected, got: record.seq });
            }
        }
        self.last_seq = Some(record.seq);
        Ok(record)
    }
}

impl<R: Read> Iterator for TraceDecoder<R> {
    type Item = Result<TraceRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            while self.pos < self.len {
                let b = self.buf[self.pos];
                self.pos += 1;
                if let Some(frame) = self.deframer.push(b) {
                    let item = frame
                        .map_err(DecodeError::from)
                        .and_then(parse_record)
                        .and_then(|r| self.check_sequence(r));
                    self.done = item.is_err();
                    return Some(item);
                }
            }
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    if self.deframer.is_idle() {
                        return None;
                    }
                    return Some(Err(DecodeError::Truncated("stream ended inside a frame")));
                }
                Ok(n) => {
                    self.pos = 0;
                    self.len = n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

/// Run a decoder on its own thread, forwarding every item in arrival order.
///
/// The thread ends after the first error, at end of stream, or when the
/// receiving side hangs up.
pub fn spawn_reader<R>(
    reader: R,
    tx: Sender<Result<TraceRecord, DecodeError>>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("trace-reader".into())
        .spawn(move || {
            for item in TraceDecoder::new(reader) {
                let fatal = item.is_err();
                if let Ok(ref record) = item {
                    tracing::trace!(seq = record.seq, rec = record.rec, "decoded {}", record);
                }
                if tx.send(item).is_err() || fatal {
                    break;
                }
            }
            tracing::debug!("trace reader finished");
        })
}
