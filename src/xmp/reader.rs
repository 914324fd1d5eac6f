use quick_xml::NsReader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use std::ops::Range;

use super::{MWG_RS_NS, RDF_NS, ST_AREA_NS, ST_DIM_NS};
use crate::error::{EmbedError, Result};
use crate::regions::{Area, Dimensions, FocusUsage, NORMALIZED, Region, RegionDocument, RegionType};

/// A decoded XMP packet.
///
/// Keeps the original text so that an encoder can replace just the region
/// metadata and leave every other property alone.
#[derive(Debug, Clone)]
pub struct XmpPacket {
    pub text: String,
    /// The `mwg-rs:Regions` value, if the packet has one.
    pub regions: Option<RegionDocument>,
    /// Byte range of the `mwg-rs:Regions` element in `text`.
    pub(super) regions_span: Option<Range<usize>>,
    /// Byte offset of the closing tag of the `mwg-rs:RegionList` container
    /// (`</rdf:Bag>` or similar). New items can go right before it.
    pub(super) region_list_end: Option<usize>,
    /// Byte offset of the `</rdf:RDF>` closing tag in `text`.
    pub(super) rdf_end: Option<usize>,
}

/// Parse an XMP packet (the payload after the segment signature).
///
/// Region properties are recognised by namespace, whichever prefixes the
/// packet binds, and may be written as attributes or as child elements. A
/// packet without `mwg-rs:Regions` decodes with `regions: None`; one whose
/// regions do not fit the schema fails with `SchemaMismatch`.
pub fn decode_packet(bytes: &[u8]) -> Result<XmpPacket> {
    // Some writers pad the segment with NULs after the packet.
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|e| mismatch(format!("packet is not valid UTF-8: {e}")))?
        .to_string();

    let mut decoder = Decoder::default();
    decoder.run(&text)?;

    let regions_span = decoder.regions_span.clone();
    let region_list_end = decoder.region_list_end;
    let rdf_end = decoder.rdf_end;
    let regions = decoder.into_document()?;
    if let Some(doc) = &regions {
        log::debug!("decoded {} existing region(s)", doc.regions.len());
    }

    Ok(XmpPacket {
        text,
        regions,
        regions_span,
        region_list_end,
        rdf_end,
    })
}

fn mismatch(msg: impl Into<String>) -> EmbedError {
    EmbedError::SchemaMismatch(msg.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    Rdf,
    MwgRs,
    StArea,
    StDim,
    Other,
}

impl Ns {
    fn of(res: ResolveResult) -> Self {
        match res {
            ResolveResult::Bound(Namespace(uri)) if uri == RDF_NS.as_bytes() => Self::Rdf,
            ResolveResult::Bound(Namespace(uri)) if uri == MWG_RS_NS.as_bytes() => Self::MwgRs,
            ResolveResult::Bound(Namespace(uri)) if uri == ST_AREA_NS.as_bytes() => Self::StArea,
            ResolveResult::Bound(Namespace(uri)) if uri == ST_DIM_NS.as_bytes() => Self::StDim,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Default)]
struct PartialArea {
    x: Option<String>,
    y: Option<String>,
    w: Option<String>,
    h: Option<String>,
    d: Option<String>,
    unit: Option<String>,
}

impl PartialArea {
    fn set(&mut self, key: &str, value: &str) {
        let slot = match key {
            "x" => &mut self.x,
            "y" => &mut self.y,
            "w" => &mut self.w,
            "h" => &mut self.h,
            "d" => &mut self.d,
            "unit" => &mut self.unit,
            _ => return,
        };
        *slot = Some(value.trim().to_string());
    }

    fn finish(self) -> Result<Area> {
        Ok(Area {
            x: required("stArea:x", self.x)?,
            y: required("stArea:y", self.y)?,
            w: number("stArea:w", self.w)?,
            h: number("stArea:h", self.h)?,
            d: number("stArea:d", self.d)?,
            unit: self.unit.unwrap_or_else(|| NORMALIZED.to_string()),
        })
    }
}

#[derive(Debug, Default)]
struct PartialDims {
    w: Option<String>,
    h: Option<String>,
    unit: Option<String>,
}

impl PartialDims {
    fn set(&mut self, key: &str, value: &str) {
        let slot = match key {
            "w" => &mut self.w,
            "h" => &mut self.h,
            "unit" => &mut self.unit,
            _ => return,
        };
        *slot = Some(value.trim().to_string());
    }

    fn finish(self) -> Result<Dimensions> {
        Ok(Dimensions {
            w: required("stDim:w", self.w)?,
            h: required("stDim:h", self.h)?,
            unit: self.unit.unwrap_or_else(|| "pixel".to_string()),
        })
    }
}

#[derive(Debug, Default)]
struct PartialRegion {
    kind: Option<String>,
    area: Option<PartialArea>,
    name: Option<String>,
    description: Option<String>,
    focus_usage: Option<String>,
    barcode_value: Option<String>,
}

impl PartialRegion {
    fn set(&mut self, key: &str, value: &str) {
        let slot = match key {
            "Type" => &mut self.kind,
            "Name" => &mut self.name,
            "Description" => &mut self.description,
            "FocusUsage" => &mut self.focus_usage,
            "BarCodeValue" => &mut self.barcode_value,
            _ => return,
        };
        *slot = Some(value.to_string());
    }

    fn finish(self) -> Result<Region> {
        let kind = self
            .kind
            .ok_or_else(|| mismatch("region without mwg-rs:Type"))?
            .trim()
            .parse::<RegionType>()
            .map_err(mismatch)?;
        let area = self
            .area
            .ok_or_else(|| mismatch(format!("{kind} region without mwg-rs:Area")))?
            .finish()?;
        let focus_usage = self
            .focus_usage
            .map(|v| v.trim().parse::<FocusUsage>())
            .transpose()
            .map_err(mismatch)?;

        Ok(Region {
            kind,
            area,
            name: self.name,
            description: self.description,
            focus_usage,
            barcode_value: self.barcode_value,
        })
    }
}

fn number(key: &str, value: Option<String>) -> Result<Option<f64>> {
    value
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| mismatch(format!("{key} is not a number: '{v}'")))
        })
        .transpose()
}

fn required(key: &str, value: Option<String>) -> Result<f64> {
    number(key, value)?.ok_or_else(|| mismatch(format!("missing {key}")))
}

/// Event-driven walk over the packet, tracking the element path.
#[derive(Debug, Default)]
struct Decoder {
    stack: Vec<(Ns, String)>,
    regions_depth: Option<usize>,
    regions_start: usize,
    regions_span: Option<Range<usize>>,
    region_list_end: Option<usize>,
    rdf_end: Option<usize>,
    dims: Option<PartialDims>,
    regions: Vec<Region>,
    current: Option<(usize, PartialRegion)>,
}

impl Decoder {
    fn run(&mut self, text: &str) -> Result<()> {
        let mut reader = NsReader::from_str(text);
        reader.config_mut().trim_text(true);

        loop {
            let (res, event) = reader
                .read_resolved_event()
                .map_err(|e| mismatch(format!("invalid XMP: {e}")))?;
            let ns = Ns::of(res);
            let pos = reader.buffer_position() as usize;
            let tag_start = text[..pos].rfind('<').unwrap_or(0);

            match event {
                Event::Start(e) => self.open(&reader, ns, &e, tag_start)?,
                Event::Empty(e) => {
                    self.open(&reader, ns, &e, tag_start)?;
                    self.close(tag_start, pos)?;
                }
                Event::End(_) => {
                    if self.current.is_none() && self.at_region_list() {
                        self.region_list_end = Some(tag_start);
                    }
                    self.close(tag_start, pos)?;
                }
                Event::Text(t) => {
                    let value = t
                        .unescape()
                        .map_err(|e| mismatch(format!("invalid XMP text: {e}")))?;
                    self.text(&value);
                }
                Event::CData(c) => self.text(&String::from_utf8_lossy(&c)),
                Event::Eof => break,
                _ => {}
            }
        }

        if self.regions_depth.is_some() {
            return Err(mismatch("unterminated mwg-rs:Regions"));
        }
        Ok(())
    }

    fn open(&mut self, reader: &NsReader<&[u8]>, ns: Ns, e: &BytesStart, tag_start: usize) -> Result<()> {
        let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let starts_region = ns == Ns::Rdf && local == "li" && self.current.is_none() && self.at_region_list();

        self.stack.push((ns, local));
        let depth = self.stack.len();

        match (ns, self.stack[depth - 1].1.as_str()) {
            (Ns::MwgRs, "Regions") => {
                if self.regions_depth.is_some() || self.regions_span.is_some() {
                    return Err(mismatch("more than one mwg-rs:Regions"));
                }
                self.regions_depth = Some(depth);
                self.regions_start = tag_start;
            }
            (Ns::MwgRs, "AppliedToDimensions") => {
                if self.regions_depth.is_some() && self.current.is_none() {
                    self.dims.get_or_insert_with(PartialDims::default);
                }
            }
            (Ns::MwgRs, "Area") => {
                if let Some((_, region)) = &mut self.current {
                    region.area.get_or_insert_with(PartialArea::default);
                }
            }
            _ => {}
        }
        if starts_region {
            self.current = Some((depth, PartialRegion::default()));
        }

        for attr in e.attributes() {
            let attr = attr.map_err(|e| mismatch(format!("invalid XMP attribute: {e}")))?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let (res, key) = reader.resolve_attribute(attr.key);
            let attr_ns = Ns::of(res);
            let key = String::from_utf8_lossy(key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| mismatch(format!("invalid XMP attribute value: {e}")))?;
            self.assign(attr_ns, &key, &value);
        }
        Ok(())
    }

    fn close(&mut self, tag_start: usize, tag_end: usize) -> Result<()> {
        let depth = self.stack.len();

        if self.current.as_ref().is_some_and(|(d, _)| *d == depth) {
            if let Some((_, partial)) = self.current.take() {
                self.regions.push(partial.finish()?);
            }
        }
        if self.regions_depth == Some(depth) {
            self.regions_depth = None;
            self.regions_span = Some(self.regions_start..tag_end);
        }
        if self.rdf_end.is_none()
            && self.stack.last().is_some_and(|(ns, local)| *ns == Ns::Rdf && local == "RDF")
        {
            self.rdf_end = Some(tag_start);
        }

        self.stack.pop();
        Ok(())
    }

    /// Text content belongs to the property named by the innermost element.
    fn text(&mut self, value: &str) {
        if let Some((ns, key)) = self.stack.last().cloned() {
            self.assign(ns, &key, value);
        }
    }

    fn assign(&mut self, ns: Ns, key: &str, value: &str) {
        if self.regions_depth.is_none() || self.inside(Ns::MwgRs, "Extensions") {
            return;
        }
        let in_area = self.inside(Ns::MwgRs, "Area");
        let in_dims = self.inside(Ns::MwgRs, "AppliedToDimensions");

        match ns {
            Ns::StArea if in_area => {
                if let Some((_, region)) = &mut self.current {
                    region.area.get_or_insert_with(PartialArea::default).set(key, value);
                }
            }
            Ns::StDim if in_dims => {
                if let Some(dims) = &mut self.dims {
                    dims.set(key, value);
                }
            }
            Ns::MwgRs if !in_area && !in_dims => {
                if let Some((_, region)) = &mut self.current {
                    region.set(key, value);
                }
            }
            _ => {}
        }
    }

    fn inside(&self, ns: Ns, local: &str) -> bool {
        self.stack.iter().any(|(n, l)| *n == ns && l == local)
    }

    fn at_region_list(&self) -> bool {
        self.regions_depth.is_some()
            && matches!(
                self.stack.as_slice(),
                [.., (Ns::MwgRs, list), (Ns::Rdf, container)]
                    if list == "RegionList" && matches!(container.as_str(), "Bag" | "Seq" | "Alt")
            )
    }

    fn into_document(self) -> Result<Option<RegionDocument>> {
        if self.regions_span.is_none() {
            return Ok(None);
        }
        let applied_to_dimensions = self
            .dims
            .ok_or_else(|| mismatch("mwg-rs:Regions without mwg-rs:AppliedToDimensions"))?
            .finish()?;
        Ok(Some(RegionDocument {
            applied_to_dimensions,
            regions: self.regions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ELEMENT_FORM: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
        xmlns:dc="http://purl.org/dc/elements/1.1/"
        xmlns:mwg-rs="http://www.metadataworkinggroup.com/schemas/regions/"
        xmlns:stDim="http://ns.adobe.com/xap/1.0/sType/Dimensions#"
        xmlns:stArea="http://ns.adobe.com/xmp/sType/Area#">
      <dc:title><rdf:Alt><rdf:li xml:lang="x-default">Picnic</rdf:li></rdf:Alt></dc:title>
      <mwg-rs:Regions rdf:parseType="Resource">
        <mwg-rs:AppliedToDimensions rdf:parseType="Resource">
          <stDim:w>4288</stDim:w>
          <stDim:h>2848</stDim:h>
          <stDim:unit>pixel</stDim:unit>
        </mwg-rs:AppliedToDimensions>
        <mwg-rs:RegionList>
          <rdf:Bag>
            <rdf:li>
              <rdf:Description mwg-rs:Name="John Doe" mwg-rs:Type="Face">
                <mwg-rs:Area stArea:h="0.17" stArea:unit="normalized" stArea:w="0.12" stArea:x="0.6" stArea:y="0.4"/>
              </rdf:Description>
            </rdf:li>
            <rdf:li rdf:parseType="Resource">
              <mwg-rs:Type>Focus</mwg-rs:Type>
              <mwg-rs:FocusUsage>EvaluatedUsed</mwg-rs:FocusUsage>
              <mwg-rs:Description>AF point &amp; more</mwg-rs:Description>
              <mwg-rs:Area rdf:parseType="Resource">
                <stArea:x>0.5</stArea:x>
                <stArea:y>0.5</stArea:y>
                <stArea:d>0.01</stArea:d>
              </mwg-rs:Area>
            </rdf:li>
          </rdf:Bag>
        </mwg-rs:RegionList>
      </mwg-rs:Regions>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    // ── decode_packet: regions ───────────────────────────────────────

    #[test]
    fn decode_element_and_attribute_forms() {
        let packet = decode_packet(ELEMENT_FORM.as_bytes()).unwrap();
        let doc = packet.regions.expect("regions");

        assert_eq!(doc.applied_to_dimensions, Dimensions::new(4288, 2848, "pixel"));
        assert_eq!(doc.regions.len(), 2);

        let face = &doc.regions[0];
        assert_eq!(face.kind, RegionType::Face);
        assert_eq!(face.name.as_deref(), Some("John Doe"));
        assert_eq!(face.area.x, 0.6);
        assert_eq!(face.area.y, 0.4);
        assert_eq!(face.area.w, Some(0.12));
        assert_eq!(face.area.h, Some(0.17));
        assert_eq!(face.area.d, None);

        let focus = &doc.regions[1];
        assert_eq!(focus.kind, RegionType::Focus);
        assert_eq!(focus.focus_usage, Some(FocusUsage::EvaluatedUsed));
        assert_eq!(focus.description.as_deref(), Some("AF point & more"));
        assert_eq!(focus.area.d, Some(0.01));
        assert_eq!(focus.area.unit, NORMALIZED);
    }

    #[test]
    fn decode_records_splice_points() {
        let packet = decode_packet(ELEMENT_FORM.as_bytes()).unwrap();
        let span = packet.regions_span.clone().unwrap();
        assert!(packet.text[span.clone()].starts_with("<mwg-rs:Regions"));
        assert!(packet.text[span].ends_with("</mwg-rs:Regions>"));

        let rdf_end = packet.rdf_end.unwrap();
        assert!(packet.text[rdf_end..].starts_with("</rdf:RDF>"));

        let list_end = packet.region_list_end.unwrap();
        assert!(packet.text[list_end..].starts_with("</rdf:Bag>"));
    }

    #[test]
    fn decode_empty_region_list_has_no_insertion_point() {
        let xmp = single_region("").replace(
            r#"<rdf:Bag><rdf:li rdf:parseType="Resource"></rdf:li></rdf:Bag>"#,
            "<rdf:Bag/>",
        );
        let packet = decode_packet(xmp.as_bytes()).unwrap();
        assert_eq!(packet.regions.unwrap().regions.len(), 0);
        assert!(packet.region_list_end.is_none());
    }

    #[test]
    fn decode_resolves_unusual_prefixes() {
        let xmp = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
<r:RDF xmlns:r="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<r:Description xmlns:reg="http://www.metadataworkinggroup.com/schemas/regions/"
    xmlns:a="http://ns.adobe.com/xmp/sType/Area#"
    xmlns:dim="http://ns.adobe.com/xap/1.0/sType/Dimensions#">
<reg:Regions r:parseType="Resource">
<reg:AppliedToDimensions dim:w="10" dim:h="20" dim:unit="pixel"/>
<reg:RegionList><r:Seq>
<r:li r:parseType="Resource"><reg:Type>Pet</reg:Type><reg:Area a:x="0.1" a:y="0.2" a:d="0.3"/></r:li>
</r:Seq></reg:RegionList>
</reg:Regions>
</r:Description>
</r:RDF>
</x:xmpmeta>"#;
        let packet = decode_packet(xmp.as_bytes()).unwrap();
        let doc = packet.regions.unwrap();
        assert_eq!(doc.regions.len(), 1);
        assert_eq!(doc.regions[0].kind, RegionType::Pet);
        assert!(packet.text[packet.rdf_end.unwrap()..].starts_with("</r:RDF>"));
    }

    #[test]
    fn decode_ignores_trailing_padding() {
        let mut bytes = ELEMENT_FORM.as_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 0]);
        assert!(decode_packet(&bytes).unwrap().regions.is_some());
    }

    // ── decode_packet: no regions ────────────────────────────────────

    #[test]
    fn decode_without_regions() {
        let xmp = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/" dc:format="image/jpeg"/>
</rdf:RDF>
</x:xmpmeta>"#;
        let packet = decode_packet(xmp.as_bytes()).unwrap();
        assert!(packet.regions.is_none());
        assert!(packet.regions_span.is_none());
        assert!(packet.rdf_end.is_some());
    }

    // ── decode_packet: schema mismatches ─────────────────────────────

    fn single_region(body: &str) -> String {
        format!(
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description xmlns:mwg-rs="http://www.metadataworkinggroup.com/schemas/regions/"
    xmlns:stArea="http://ns.adobe.com/xmp/sType/Area#"
    xmlns:stDim="http://ns.adobe.com/xap/1.0/sType/Dimensions#">
<mwg-rs:Regions rdf:parseType="Resource">
<mwg-rs:AppliedToDimensions stDim:w="10" stDim:h="10"/>
<mwg-rs:RegionList><rdf:Bag><rdf:li rdf:parseType="Resource">{body}</rdf:li></rdf:Bag></mwg-rs:RegionList>
</mwg-rs:Regions>
</rdf:Description>
</rdf:RDF>"#
        )
    }

    #[test]
    fn decode_rejects_unknown_region_type() {
        let xmp = single_region(r#"<mwg-rs:Type>Car</mwg-rs:Type><mwg-rs:Area stArea:x="0" stArea:y="0"/>"#);
        let err = decode_packet(xmp.as_bytes()).unwrap_err();
        assert!(matches!(err, EmbedError::SchemaMismatch(_)));
    }

    #[test]
    fn decode_rejects_non_numeric_area() {
        let xmp = single_region(r#"<mwg-rs:Type>Face</mwg-rs:Type><mwg-rs:Area stArea:x="left" stArea:y="0"/>"#);
        let err = decode_packet(xmp.as_bytes()).unwrap_err();
        assert!(matches!(err, EmbedError::SchemaMismatch(_)));
    }

    #[test]
    fn decode_rejects_region_without_area() {
        let xmp = single_region(r#"<mwg-rs:Type>Face</mwg-rs:Type>"#);
        assert!(decode_packet(xmp.as_bytes()).is_err());
    }

    #[test]
    fn decode_accepts_well_formed_single_region() {
        let xmp = single_region(r#"<mwg-rs:Type>BarCode</mwg-rs:Type><mwg-rs:BarCodeValue>4006381333931</mwg-rs:BarCodeValue><mwg-rs:Area stArea:x="0.5" stArea:y="0.5" stArea:w="0.2" stArea:h="0.1"/>"#);
        let doc = decode_packet(xmp.as_bytes()).unwrap().regions.unwrap();
        assert_eq!(doc.regions[0].kind, RegionType::BarCode);
        assert_eq!(doc.regions[0].barcode_value.as_deref(), Some("4006381333931"));
        assert_eq!(doc.applied_to_dimensions.unit, "pixel");
    }

    #[test]
    fn decode_rejects_broken_xml() {
        let err = decode_packet(b"<x:xmpmeta><rdf:RDF></x:xmpmeta>").unwrap_err();
        assert!(matches!(err, EmbedError::SchemaMismatch(_)));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let err = decode_packet(&[0x3C, 0xFF, 0xFE, 0x3E]).unwrap_err();
        assert!(matches!(err, EmbedError::SchemaMismatch(_)));
    }
}
