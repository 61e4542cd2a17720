//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server replies, keeping
//! allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are read by declared length, never by
//!    scanning for CRLF, so payloads may contain the delimiter.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{self, BufRead, Write};

use crate::error::{ClientError, ClientResult};

/// Largest bulk payload accepted from a server (512 MiB, the server default).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest array nesting accepted from a server.
pub const MAX_NESTING_DEPTH: usize = 128;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// +OK or +PONG style replies.
    Simple(String),
    /// -ERR ... replies.
    Error(String),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for the null bulk string.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for the null array.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Short variant name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Simple(_) => "simple string",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk string",
            Reply::Array(_) => "array",
        }
    }
}

/// Encodes a RESP2 array-of-bulk-strings command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) -> ClientResult<()> {
    if args.is_empty() {
        return Err(ClientError::EmptyCommand);
    }
    write!(out, "*{}\r\n", args.len())?;
    for arg in args {
        write!(out, "${}\r\n", arg.len())?;
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    Ok(())
}

/// Reads exactly one RESP reply from the buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    read_nested(reader, line_buf, 0)
}

fn read_nested<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>, depth: usize) -> ClientResult<Reply> {
    read_line(reader, line_buf)?;
    let Some(&tag) = line_buf.first() else {
        return Err(ClientError::protocol("empty reply line"));
    };

    match tag {
        b'+' => Ok(Reply::Simple(String::from_utf8_lossy(&line_buf[1..]).into_owned())),
        b'-' => Ok(Reply::Error(String::from_utf8_lossy(&line_buf[1..]).into_owned())),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            read_array(reader, len, line_buf, depth + 1)
        }
        other => Err(ClientError::Protocol(format!(
            "unrecognized type byte 0x{:02x}",
            other
        ))),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<Reply> {
    match len {
        // The CRLF after the length line was already consumed.
        -1 => return Ok(Reply::Bulk(None)),
        len if len < -1 => {
            return Err(ClientError::Protocol(format!("invalid bulk length {}", len)));
        }
        len if len > MAX_BULK_LEN => {
            return Err(ClientError::Protocol(format!("bulk length {} too large", len)));
        }
        _ => {}
    }

    // Payload and trailing CRLF are read by count in one go.
    let len = len as usize;
    let mut data = vec![0u8; len + 2];
    reader.read_exact(&mut data).map_err(short_read)?;
    if data[len..] != *b"\r\n" {
        return Err(ClientError::protocol("bulk string not terminated by CRLF"));
    }
    data.truncate(len);
    Ok(Reply::Bulk(Some(data)))
}

fn read_array<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> ClientResult<Reply> {
    match len {
        -1 => return Ok(Reply::Array(None)),
        len if len < -1 => {
            return Err(ClientError::Protocol(format!("invalid array length {}", len)));
        }
        _ => {}
    }
    if depth > MAX_NESTING_DEPTH {
        return Err(ClientError::Protocol(format!(
            "arrays nested deeper than {}",
            MAX_NESTING_DEPTH
        )));
    }

    // Cap the preallocation; a hostile count must not reserve gigabytes.
    let mut items = Vec::with_capacity((len as usize).min(1024));
    for _ in 0..len {
        items.push(read_nested(reader, line_buf, depth)?);
    }
    Ok(Reply::Array(Some(items)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).map_err(short_read)?;
    if bytes == 0 {
        return Err(ClientError::protocol("connection closed before reply"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::protocol("line not terminated by CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn short_read(err: io::Error) -> ClientError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ClientError::protocol("stream ended mid-frame")
    } else {
        ClientError::Io(err)
    }
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let invalid = || ClientError::Protocol(format!("invalid integer {:?}", String::from_utf8_lossy(data)));

    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    // Accumulate towards the sign so i64::MIN parses without overflow.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid());
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) })
            .ok_or_else(invalid)?;
    }
    Ok(value)
}
