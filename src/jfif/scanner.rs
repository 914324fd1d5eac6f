use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{EmbedError, Result};

pub const MARKER_PREFIX: u8 = 0xFF;
pub const SOI: u8 = 0xD8;
pub const EOI: u8 = 0xD9;
pub const APP0: u8 = 0xE0;
pub const APP1: u8 = 0xE1;
pub const APP15: u8 = 0xEF;

/// The marker byte that follows 0xFF, grouped the way the rewriter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCode {
    StartOfImage,
    /// APP0..=APP15, carrying `n` for APPn.
    App(u8),
    /// Anything else: tables, frame headers, start-of-scan and beyond.
    ImageData(u8),
}

impl MarkerCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            SOI => Self::StartOfImage,
            APP0..=APP15 => Self::App(byte - APP0),
            other => Self::ImageData(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Self::StartOfImage => SOI,
            Self::App(n) => APP0 + n,
            Self::ImageData(b) => b,
        }
    }
}

/// A segment header found in the metadata region of the stream.
///
/// `offset` points at the 0xFF of the marker, `size` covers the marker, the
/// length field and the payload. Payload bytes are only read on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub marker: MarkerCode,
    pub offset: u64,
    pub size: u32,
}

impl Segment {
    fn header_len(&self) -> u64 {
        match self.marker {
            MarkerCode::StartOfImage => 2,
            _ => 4,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }

    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_len()
    }

    pub fn payload_len(&self) -> u64 {
        self.size as u64 - self.header_len()
    }

    /// Read the whole payload (everything after the length field).
    pub fn read_payload<R: Read + Seek>(&self, src: &mut R) -> io::Result<Vec<u8>> {
        self.read_payload_prefix(src, usize::MAX)
    }

    /// Read at most `limit` leading payload bytes, enough to test a signature.
    pub fn read_payload_prefix<R: Read + Seek>(&self, src: &mut R, limit: usize) -> io::Result<Vec<u8>> {
        let len = usize::try_from(self.payload_len()).unwrap_or(usize::MAX).min(limit);
        src.seek(SeekFrom::Start(self.payload_offset()))?;
        let mut buf = vec![0u8; len];
        src.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Result of scanning the head of a JPEG stream.
#[derive(Debug, Clone)]
pub struct JfifLayout {
    /// Start-of-image followed by every APPn segment before the image data.
    pub segments: Vec<Segment>,
    /// Offset of the first byte belonging to the image data (the trailer).
    pub image_data_start: u64,
    pub stream_len: u64,
}

/// Walk the marker segments at the head of a JPEG stream.
///
/// Stops at the first marker that is neither start-of-image nor APPn; from
/// there on the stream is treated as opaque image data and never read.
pub fn scan<R: Read + Seek>(src: &mut R) -> Result<JfifLayout> {
    let stream_len = src.seek(SeekFrom::End(0))?;
    src.seek(SeekFrom::Start(0))?;

    if stream_len < 2 {
        return Err(EmbedError::MalformedStream(
            "stream is shorter than a start-of-image marker".into(),
        ));
    }
    let mut magic = [0u8; 2];
    src.read_exact(&mut magic)?;
    if magic != [MARKER_PREFIX, SOI] {
        return Err(EmbedError::MalformedStream(format!(
            "expected start-of-image marker, found {:02X}{:02X}",
            magic[0], magic[1]
        )));
    }

    let mut segments = vec![Segment {
        marker: MarkerCode::StartOfImage,
        offset: 0,
        size: 2,
    }];
    let mut pos = 2u64;

    loop {
        let run_start = pos;
        let Some(first) = next_byte(src)? else {
            return Err(EmbedError::MissingImageBoundary);
        };
        pos += 1;
        if first != MARKER_PREFIX {
            return Err(EmbedError::MalformedStream(format!(
                "expected a marker at offset {run_start}, found 0x{first:02X}"
            )));
        }

        // Any number of 0xFF fill bytes may precede the marker code.
        let code = loop {
            let Some(byte) = next_byte(src)? else {
                return Err(EmbedError::MissingImageBoundary);
            };
            pos += 1;
            if byte != MARKER_PREFIX {
                break byte;
            }
        };
        let marker_offset = pos - 2;

        match MarkerCode::from_byte(code) {
            marker @ MarkerCode::App(n) => {
                if pos + 2 > stream_len {
                    return Err(EmbedError::MalformedStream(format!(
                        "APP{n} at offset {marker_offset} is missing its length field"
                    )));
                }
                let mut len_bytes = [0u8; 2];
                src.read_exact(&mut len_bytes)?;
                let declared = u16::from_be_bytes(len_bytes);
                if declared < 2 {
                    return Err(EmbedError::MalformedStream(format!(
                        "APP{n} at offset {marker_offset} declares invalid length {declared}"
                    )));
                }
                let segment = Segment {
                    marker,
                    offset: marker_offset,
                    size: declared as u32 + 2,
                };
                if segment.end() > stream_len {
                    return Err(EmbedError::MalformedStream(format!(
                        "APP{n} at offset {marker_offset} runs {} bytes past the end of the stream",
                        segment.end() - stream_len
                    )));
                }
                log::debug!("APP{n} at {marker_offset}, {} bytes", segment.size);
                pos = segment.end();
                src.seek(SeekFrom::Start(pos))?;
                segments.push(segment);
            }
            MarkerCode::StartOfImage => {
                return Err(EmbedError::MalformedStream(format!(
                    "unexpected start-of-image marker at offset {marker_offset}"
                )));
            }
            MarkerCode::ImageData(EOI) => return Err(EmbedError::MissingImageBoundary),
            MarkerCode::ImageData(0x00) => {
                return Err(EmbedError::MalformedStream(format!(
                    "stuffed byte where a marker was expected at offset {marker_offset}"
                )));
            }
            MarkerCode::ImageData(byte) => {
                log::debug!("image data starts at {run_start} with marker 0x{byte:02X}");
                return Ok(JfifLayout {
                    segments,
                    image_data_start: run_start,
                    stream_len,
                });
            }
        }
    }
}

fn next_byte<R: Read>(src: &mut R) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match src.read_exact(&mut buf) {
        Ok(()) => Ok(Some(buf[0])),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}
