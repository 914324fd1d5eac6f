use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;

use super::scanner::{APP1, MARKER_PREFIX};

/// Largest payload a single APPn segment can carry (length field is u16 and
/// counts its own two bytes).
pub const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

/// Where the new metadata segment lands in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewritePlan {
    /// Byte range of an existing segment that the new one replaces.
    pub replacement: Option<Range<u64>>,
    /// Offset to insert at when nothing is replaced.
    pub insertion_point: u64,
}

impl RewritePlan {
    /// Source bytes that do not make it into the output.
    pub fn dropped(&self) -> Range<u64> {
        match &self.replacement {
            Some(range) => range.clone(),
            None => self.insertion_point..self.insertion_point,
        }
    }
}

/// Copy `src` to `out`, swapping the planned range for one APP1 segment
/// holding `payload`. Everything after the splice, trailing previews
/// included, is copied as opaque bytes. Returns the number of bytes written.
pub fn rewrite<R, W>(src: &mut R, out: &mut W, plan: &RewritePlan, payload: &[u8]) -> io::Result<u64>
where
    R: Read + Seek,
    W: Write,
{
    let dropped = plan.dropped();

    src.seek(SeekFrom::Start(0))?;
    let mut written = copy_exact(src, out, dropped.start)?;
    written += write_segment(out, APP1, payload)?;

    src.seek(SeekFrom::Start(dropped.end))?;
    written += io::copy(src, out)?;
    out.flush()?;

    log::debug!(
        "rewrote stream: dropped {}..{}, inserted {} byte segment, {written} bytes total",
        dropped.start,
        dropped.end,
        payload.len() + 4
    );
    Ok(written)
}

/// Write a marker segment with a big-endian length prefix.
pub fn write_segment<W: Write>(out: &mut W, marker: u8, payload: &[u8]) -> io::Result<u64> {
    if payload.len() > MAX_SEGMENT_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("segment payload of {} bytes does not fit in one segment", payload.len()),
        ));
    }
    let len = (payload.len() + 2) as u16;
    out.write_all(&[MARKER_PREFIX, marker])?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(payload)?;
    Ok(payload.len() as u64 + 4)
}

fn copy_exact<R: Read, W: Write>(src: &mut R, out: &mut W, len: u64) -> io::Result<u64> {
    let copied = io::copy(&mut src.by_ref().take(len), out)?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("source ended after {copied} of {len} bytes"),
        ));
    }
    Ok(copied)
}
