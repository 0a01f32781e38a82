//! Channel framing (length + crc32c).
//!
//! Every framed body is `[type:u8][sender:i8][message body]`; the header is
//! `[len:u32 LE][crc32c:u32 LE]` where the crc covers the framed body.
//! Framing belongs to the channel; the coherency codec never sees it.

use std::io::{Read, Write};

use crc32c::crc32c;
use thiserror::Error;

pub const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame length invalid: {reason}")]
    LengthInvalid { reason: &'static str },
    #[error("frame too large: max {max_frame_bytes} got {got_bytes}")]
    TooLarge {
        max_frame_bytes: usize,
        got_bytes: usize,
    },
    #[error("frame crc mismatch: expected {expected} got {got}")]
    CrcMismatch { expected: u32, got: u32 },
}

pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
        }
    }

    /// Read one framed body. `Ok(None)` is a clean end of stream (EOF on a
    /// frame boundary); EOF inside a frame is an error.
    pub fn read_next(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0usize;
        while filled < header.len() {
            let n = self.reader.read(&mut header[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "frame header truncated",
                )
                .into());
            }
            filled += n;
        }

        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length == 0 {
            return Err(FrameError::LengthInvalid {
                reason: "frame length cannot be zero",
            });
        }
        if length > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                max_frame_bytes: self.max_frame_bytes,
                got_bytes: length,
            });
        }
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body)?;

        let actual_crc = crc32c(&body);
        if actual_crc != expected_crc {
            return Err(FrameError::CrcMismatch {
                expected: expected_crc,
                got: actual_crc,
            });
        }

        Ok(Some(body))
    }
}

pub struct FrameWriter<W> {
    writer: W,
    max_frame_bytes: usize,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W, max_frame_bytes: usize) -> Self {
        Self {
            writer,
            max_frame_bytes,
        }
    }

    pub fn write_frame(&mut self, body: &[u8]) -> Result<(), FrameError> {
        let frame = encode_frame(body, self.max_frame_bytes)?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(())
    }
}

pub fn encode_frame(body: &[u8], max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    if body.is_empty() {
        return Err(FrameError::LengthInvalid {
            reason: "frame length cannot be zero",
        });
    }
    if body.len() > max_frame_bytes {
        return Err(FrameError::TooLarge {
            max_frame_bytes,
            got_bytes: body.len(),
        });
    }
    let length = u32::try_from(body.len()).map_err(|_| FrameError::LengthInvalid {
        reason: "frame length exceeds u32",
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32c(body).to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trip_validates_crc() {
        let body = b"\x01\x02hello";
        let frame = encode_frame(body, 1024).unwrap();

        let mut reader = FrameReader::new(Cursor::new(frame), 1024);
        let decoded = reader.read_next().unwrap().unwrap();
        assert_eq!(decoded, body);
        assert!(reader.read_next().unwrap().is_none(), "clean EOF follows");
    }

    #[test]
    fn corrupted_body_fails_crc() {
        let mut frame = encode_frame(b"\x01\x02payload", 1024).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;

        let mut reader = FrameReader::new(Cursor::new(frame), 1024);
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, FrameError::CrcMismatch { .. }));
    }

    #[test]
    fn oversize_frames_are_rejected_on_both_sides() {
        let body = vec![1u8; 64];
        assert!(matches!(
            encode_frame(&body, 32).unwrap_err(),
            FrameError::TooLarge { got_bytes: 64, .. }
        ));

        let frame = encode_frame(&body, 1024).unwrap();
        let mut reader = FrameReader::new(Cursor::new(frame), 32);
        assert!(matches!(
            reader.read_next().unwrap_err(),
            FrameError::TooLarge { got_bytes: 64, .. }
        ));
    }

    #[test]
    fn truncated_header_is_an_error_not_eof() {
        let frame = encode_frame(b"\x01\x02x", 1024).unwrap();
        let mut reader = FrameReader::new(Cursor::new(&frame[..5]), 1024);
        assert!(matches!(reader.read_next().unwrap_err(), FrameError::Io(_)));
    }

    #[test]
    fn empty_body_cannot_be_framed() {
        assert!(matches!(
            encode_frame(&[], 1024).unwrap_err(),
            FrameError::LengthInvalid { .. }
        ));
    }
}
