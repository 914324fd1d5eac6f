//! JPEG/JFIF segment plumbing.
//!
//! - [`scan`]: walk the marker segments in front of the image data
//! - [`rewrite`]: copy a stream while splicing in one metadata segment
//!
//! Neither function decodes or re-encodes pixel data; everything from the first
//! image-data marker to the end of the file is copied as opaque bytes.

mod rewriter;
mod scanner;

pub use rewriter::{MAX_SEGMENT_PAYLOAD, RewritePlan, rewrite, write_segment};
pub use scanner::{APP1, JfifLayout, MarkerCode, Segment, scan};
