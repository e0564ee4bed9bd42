//! Request Framer
//!
//! Decides whether the bytes accumulated so far contain one complete
//! request. TCP delivers arbitrary splits, so the connection calls this
//! after every read: a request may arrive in pieces, or several requests
//! may arrive glued together.
//!
//! The framer is purely a byte walker. It measures the frame's length by
//! skipping over each field, never validates semantics (an unknown store
//! name or a garbage vector clock is the handler's problem, answered with
//! an error response instead of a torn-down connection), and never reads
//! past the provided bytes.

use super::wire::{opcode, WireError, WireReader, WireResult};

/// The framer's verdict on a partially filled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// More bytes are needed before the request's extent is known.
    Incomplete,
    /// One complete request occupies the first `.0` bytes. Anything after
    /// it belongs to the next request.
    Complete(usize),
    /// The bytes cannot be a request prefix (negative length field); the
    /// connection is beyond recovery.
    Malformed,
}

/// Measures one request frame at the start of `buf`.
pub fn frame(buf: &[u8]) -> FrameOutcome {
    let mut reader = WireReader::new(buf);
    match walk_request(&mut reader) {
        Ok(()) => FrameOutcome::Complete(reader.position()),
        Err(WireError::ShortBuffer { .. }) => FrameOutcome::Incomplete,
        Err(_) => FrameOutcome::Malformed,
    }
}

/// Skips every field of one request, leaving the cursor just past it.
fn walk_request(reader: &mut WireReader<'_>) -> WireResult<()> {
    let op = reader.read_u8()?;

    // Store name and the routed flag.
    reader.skip_utf()?;
    reader.skip(1)?;

    match op {
        opcode::GET => {
            reader.skip_key()?;
        }
        opcode::GET_ALL => {
            let num_keys = read_non_negative_i32(reader)?;
            for _ in 0..num_keys {
                reader.skip_key()?;
            }
        }
        opcode::PUT => {
            reader.skip_key()?;
            let data_size = read_non_negative_i32(reader)?;
            reader.skip(data_size)?;
        }
        opcode::DELETE => {
            reader.skip_key()?;
            let version_size = reader.read_i16()?;
            if version_size < 0 {
                return Err(WireError::NegativeLength(version_size as i32));
            }
            reader.skip(version_size as usize)?;
        }
        // Unknown opcode: framed at the current position. The handler
        // rejects it and the connection closes.
        _ => {}
    }

    Ok(())
}

fn read_non_negative_i32(reader: &mut WireReader<'_>) -> WireResult<usize> {
    let v = reader.read_i32()?;
    if v < 0 {
        return Err(WireError::NegativeLength(v));
    }
    Ok(v as usize)
}
