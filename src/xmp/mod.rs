//! XMP packet handling for MWG region metadata.
//!
//! - [`locate`]: find the XMP segment among the scanned JPEG segments
//! - [`decode_packet`]: parse a packet and pull out `mwg-rs:Regions`
//! - [`encode`]: serialize a [`RegionDocument`](crate::regions::RegionDocument)
//!   into a segment payload, keeping unrelated XMP from the replaced packet

mod locator;
mod reader;
mod writer;

pub use locator::{MetadataLayout, locate};
pub use reader::{XmpPacket, decode_packet};
pub use writer::encode;

/// Payload prefix of a standard XMP APP1 segment.
pub const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
/// Payload prefix of an extended XMP APP1 segment.
pub const EXTENDED_XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xmp/extension/\0";

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const MWG_RS_NS: &str = "http://www.metadataworkinggroup.com/schemas/regions/";
pub const ST_AREA_NS: &str = "http://ns.adobe.com/xmp/sType/Area#";
pub const ST_DIM_NS: &str = "http://ns.adobe.com/xap/1.0/sType/Dimensions#";
