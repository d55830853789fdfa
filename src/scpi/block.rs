//! Definite-length arbitrary block framing: `#<n><len digits><payload><terminator>`.
//!
//! `<n>` is one decimal digit giving how many length digits follow; the
//! length digits give the payload size in bytes.

use std::io;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use super::transport::{Transport, LINE_TERMINATOR};

pub const BLOCK_MARKER: u8 = b'#';

/// Upper bound on a single block payload.
pub const MAX_BLOCK_SIZE: usize = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{reason}")]
    Malformed { reason: String, raw: Vec<u8> },
}

impl BlockError {
    fn malformed(reason: impl Into<String>, raw: &[u8]) -> Self {
        BlockError::Malformed {
            reason: reason.into(),
            raw: raw.to_vec(),
        }
    }
}

/// Parse the length digits of a block header given the `<n>` digit and the digits that follow it.
pub fn parse_length(digit_count: u8, digits: &[u8]) -> Result<usize, BlockError> {
    let count = match digit_count {
        b'1'..=b'9' => (digit_count - b'0') as usize,
        _ => {
            return Err(BlockError::malformed(
                format!("invalid length-digit count {:?}", digit_count as char),
                &[BLOCK_MARKER, digit_count],
            ))
        }
    };

    if digits.len() != count || !digits.iter().all(u8::is_ascii_digit) {
        return Err(BlockError::malformed(
            format!("expected {count} length digits"),
            digits,
        ));
    }

    let length = digits
        .iter()
        .fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize);

    if length > MAX_BLOCK_SIZE {
        return Err(BlockError::malformed(
            format!("block length {length} exceeds maximum {MAX_BLOCK_SIZE}"),
            digits,
        ));
    }

    Ok(length)
}

/// Split a complete in-memory block (`#<n><len><payload>[terminator]`) into its payload.
pub fn parse_block(bytes: &[u8]) -> Result<&[u8], BlockError> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| BlockError::malformed("empty block", bytes))?;
    let bytes = &bytes[start..];

    if bytes[0] != BLOCK_MARKER {
        return Err(BlockError::malformed("missing block marker", bytes));
    }
    let digit_count = *bytes
        .get(1)
        .ok_or_else(|| BlockError::malformed("truncated block header", bytes))?;
    let count = digit_count.wrapping_sub(b'0') as usize;
    let digits = bytes
        .get(2..2 + count)
        .ok_or_else(|| BlockError::malformed("truncated block header", bytes))?;
    let length = parse_length(digit_count, digits)?;

    let payload_start = 2 + count;
    bytes
        .get(payload_start..payload_start + length)
        .ok_or_else(|| {
            BlockError::malformed(
                format!(
                    "declared {length} payload bytes, only {} present",
                    bytes.len() - payload_start
                ),
                bytes,
            )
        })
}

fn read_byte<T: Transport + ?Sized>(transport: &mut T, timeout: Duration) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    transport.read_exact(&mut byte, timeout)?;
    Ok(byte[0])
}

/// Read one block from the transport, consuming the trailing terminator.
///
/// Leading whitespace is skipped. A channel that closes before the declared
/// payload length arrives yields [`BlockError::Malformed`]; timeouts and other
/// link errors are passed through as [`BlockError::Io`].
pub fn read_block<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<Vec<u8>, BlockError> {
    let mut marker = read_byte(transport, timeout)?;
    while marker.is_ascii_whitespace() {
        marker = read_byte(transport, timeout)?;
    }
    if marker != BLOCK_MARKER {
        return Err(BlockError::malformed(
            format!("expected block marker '#', got {:?}", marker as char),
            &[marker],
        ));
    }

    let digit_count = read_byte(transport, timeout)?;
    let count = match digit_count {
        b'1'..=b'9' => (digit_count - b'0') as usize,
        _ => {
            return Err(BlockError::malformed(
                format!("invalid length-digit count {:?}", digit_count as char),
                &[marker, digit_count],
            ))
        }
    };

    let mut digits = vec![0u8; count];
    transport.read_exact(&mut digits, timeout)?;
    let length = parse_length(digit_count, &digits)?;
    debug!("Block header declares {length} payload bytes");

    let mut payload = vec![0u8; length];
    if let Err(e) = transport.read_exact(&mut payload, timeout) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Err(BlockError::malformed(
                format!("channel closed before {length} payload bytes arrived"),
                &digits,
            ));
        }
        return Err(e.into());
    }

    let mut terminator = read_byte(transport, timeout).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            BlockError::malformed("channel closed before block terminator", &[])
        }
        _ => e.into(),
    })?;
    if terminator == b'\r' {
        terminator = read_byte(transport, timeout)?;
    }
    if terminator != LINE_TERMINATOR {
        return Err(BlockError::malformed(
            format!("expected block terminator, got {:?}", terminator as char),
            &[terminator],
        ));
    }

    Ok(payload)
}
