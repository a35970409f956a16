//! `Content-Length` framed transport over a blocking byte stream.
//!
//! A frame is `Content-Length: <N>\r\n\r\n` followed by exactly `N` body
//! bytes. The transport never looks inside the body.

use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::time::Duration;

use tracing::{debug, warn};

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
/// Headers longer than this are treated as a desync.
const MAX_HEADER_BYTES: usize = 8 * 1024;
/// Bodies larger than this are treated as a desync.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(5);
/// Largest single read while filling a body.
const BODY_CHUNK_BYTES: usize = 8 * 1024;

/// Reads frames from a blocking byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Read the next frame body.
    ///
    /// `Ok(None)` means there is no message to process: the stream ended, or
    /// the framing could not be trusted (missing, malformed or zero
    /// `Content-Length`, oversized header, or a body cut short). Only hard
    /// I/O failures surface as `Err`.
    pub fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let header = match self.read_header()? {
            Some(h) => h,
            None => return Ok(None),
        };

        let length = match parse_content_length(&header) {
            Some(0) => {
                warn!("Frame declared zero Content-Length");
                return Ok(None);
            }
            Some(n) if n > MAX_FRAME_BYTES => {
                warn!(length = n, "Frame exceeds maximum size");
                return Ok(None);
            }
            Some(n) => n,
            None => {
                warn!(header = %String::from_utf8_lossy(&header), "Malformed frame header");
                return Ok(None);
            }
        };

        // The buffer grows with the bytes received, not with the declared length.
        let mut body = Vec::with_capacity(length.min(BODY_CHUNK_BYTES));
        let mut chunk = [0u8; BODY_CHUNK_BYTES];
        while body.len() < length {
            let want = (length - body.len()).min(BODY_CHUNK_BYTES);
            match self.inner.read(&mut chunk[..want]) {
                Ok(0) => {
                    debug!(expected = length, got = body.len(), "Stream ended inside frame body");
                    return Ok(None);
                }
                Ok(n) => body.extend_from_slice(&chunk[..n]),
                Err(e) if is_transient(&e) => backoff(&e),
                Err(e) => return Err(e),
            }
        }

        Ok(Some(body))
    }

    /// Accumulate header bytes up to and excluding the blank-line terminator.
    fn read_header(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut header = Vec::with_capacity(64);
        let mut byte = [0u8; 1];

        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => {
                    if !header.is_empty() {
                        debug!("Stream ended inside frame header");
                    }
                    return Ok(None);
                }
                Ok(_) => {
                    header.push(byte[0]);
                    if header.ends_with(HEADER_TERMINATOR) {
                        header.truncate(header.len() - HEADER_TERMINATOR.len());
                        return Ok(Some(header));
                    }
                    if header.len() > MAX_HEADER_BYTES {
                        warn!("Frame header exceeds {} bytes", MAX_HEADER_BYTES);
                        return Ok(None);
                    }
                }
                Err(e) if is_transient(&e) => backoff(&e),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Extract the `Content-Length` value from a raw header block.
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("Content-Length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    })
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

fn backoff(e: &io::Error) {
    if e.kind() == ErrorKind::WouldBlock {
        std::thread::sleep(WOULD_BLOCK_BACKOFF);
    }
}

/// Encode a body into its wire form.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(body);
    out
}

/// Write one frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    writer.write_all(&encode_frame(body))?;
    writer.flush()
}
