//! Incremental slice parser for a single STOMP frame.
//!
//! Works on whatever bytes the transport has buffered so far: returns
//! `Ok(None)` until a complete frame is present, and on success reports how
//! many bytes were consumed so the caller can advance its buffer. Heartbeat
//! LFs are not handled here; the codec consumes them before calling in.

use crate::error::{Error, Result};

/// A raw parsed frame: undecoded command, header and body bytes, plus the
/// number of input bytes consumed.
#[derive(Debug)]
pub(crate) struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    pub consumed: usize,
}

/// Parse one frame from `input`.
///
/// `Ok(Some(raw))` when a full frame was present, `Ok(None)` when more bytes
/// are required, `Err` on a protocol violation.
pub(crate) fn parse_frame(input: &[u8]) -> Result<Option<RawFrame>> {
    let len = input.len();
    let mut pos = 0usize;

    // Command line.
    let cmd_end = match input.iter().position(|&b| b == b'\n') {
        Some(i) => i,
        None => return Ok(None),
    };
    let mut command = input[..cmd_end].to_vec();
    if command.last() == Some(&b'\r') {
        command.pop();
    }
    if command.is_empty() {
        return Err(Error::MalformedFrame);
    }
    pos += cmd_end + 1;

    // Header lines until the blank separator.
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        if pos >= len {
            return Ok(None);
        }
        let line_end = match input[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None => return Ok(None),
        };
        let mut line = &input[pos..pos + line_end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        pos += line_end + 1;
        if line.is_empty() {
            break;
        }
        match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec()));
            }
            None => return Err(Error::CorruptHeaders),
        }
    }

    // Body: sized by content-length when present, NUL-delimited otherwise.
    match content_length(&headers)? {
        Some(n) => {
            if pos + n + 1 > len {
                return Ok(None);
            }
            let body = input[pos..pos + n].to_vec();
            pos += n;
            if input[pos] != 0 {
                return Err(Error::MalformedFrame);
            }
            pos += 1;
            Ok(Some(RawFrame {
                command,
                headers,
                body,
                consumed: pos,
            }))
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul) => {
                let body = input[pos..pos + nul].to_vec();
                pos += nul + 1;
                Ok(Some(RawFrame {
                    command,
                    headers,
                    body,
                    consumed: pos,
                }))
            }
            None => Ok(None),
        },
    }
}

/// First `content-length` header parsed as a byte count.
fn content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>> {
    for (k, v) in headers {
        if k.eq_ignore_ascii_case(b"content-length") {
            let s = std::str::from_utf8(v).map_err(|_| Error::MalformedFrame)?;
            return match s.trim().parse::<usize>() {
                Ok(n) => Ok(Some(n)),
                Err(_) => Err(Error::MalformedFrame),
            };
        }
    }
    Ok(None)
}
