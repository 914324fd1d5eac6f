use std::io::{Read, Seek};
use std::ops::Range;

use super::reader::{XmpPacket, decode_packet};
use super::{EXTENDED_XMP_SIGNATURE, XMP_SIGNATURE};
use crate::error::{EmbedError, Result};
use crate::jfif::{APP1, JfifLayout, MarkerCode, RewritePlan, Segment};

/// The scanned head of a JPEG split around its XMP segment.
#[derive(Debug, Clone)]
pub struct MetadataLayout {
    /// Every head segment that is not the XMP segment, in stream order.
    pub head: Vec<Segment>,
    pub xmp_segment: Option<Segment>,
    pub packet: Option<XmpPacket>,
    /// From the first image-data marker to end of stream.
    pub trailer: Range<u64>,
}

impl MetadataLayout {
    /// Replace the existing XMP segment in place, or insert a new one right
    /// before the image data.
    pub fn rewrite_plan(&self) -> RewritePlan {
        RewritePlan {
            replacement: self.xmp_segment.as_ref().map(|s| s.offset..s.end()),
            insertion_point: self.trailer.start,
        }
    }
}

/// Find and decode the standard XMP segment among the scanned head segments.
///
/// A second standard XMP segment fails with `DuplicateMetadata`, any extended
/// XMP segment with `UnsupportedExtendedMetadata`.
pub fn locate<R: Read + Seek>(layout: &JfifLayout, src: &mut R) -> Result<MetadataLayout> {
    let signature_len = XMP_SIGNATURE.len().max(EXTENDED_XMP_SIGNATURE.len());

    let mut head = Vec::with_capacity(layout.segments.len());
    let mut xmp_segment: Option<Segment> = None;
    let mut packet = None;

    for segment in &layout.segments {
        if segment.marker != MarkerCode::from_byte(APP1) {
            head.push(segment.clone());
            continue;
        }

        let prefix = segment.read_payload_prefix(src, signature_len)?;
        if prefix.starts_with(EXTENDED_XMP_SIGNATURE) {
            return Err(EmbedError::UnsupportedExtendedMetadata {
                offset: segment.offset,
            });
        }
        if !prefix.starts_with(XMP_SIGNATURE) {
            head.push(segment.clone());
            continue;
        }
        if xmp_segment.is_some() {
            return Err(EmbedError::DuplicateMetadata {
                offset: segment.offset,
            });
        }

        log::debug!("XMP segment at {}, {} bytes", segment.offset, segment.size);
        let payload = segment.read_payload(src)?;
        packet = Some(decode_packet(&payload[XMP_SIGNATURE.len()..])?);
        xmp_segment = Some(segment.clone());
    }

    Ok(MetadataLayout {
        head,
        xmp_segment,
        packet,
        trailer: layout.image_data_start..layout.stream_len,
    })
}
