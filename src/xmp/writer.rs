use super::reader::XmpPacket;
use super::{MWG_RS_NS, RDF_NS, ST_AREA_NS, ST_DIM_NS, XMP_SIGNATURE};
use crate::error::{EmbedError, Result};
use crate::jfif::MAX_SEGMENT_PAYLOAD;
use crate::regions::{Area, Region, RegionDocument};

/// Serialize a region document into a complete XMP segment payload
/// (signature included).
///
/// With `base`, the packet text is kept as is. When `doc` is `base`'s regions
/// followed by new ones (what [`merge`](crate::regions::merge) produces), only
/// the new items are added to the end of the existing region list, so the
/// existing regions keep every property, extensions included. Otherwise the
/// old `mwg-rs:Regions` element is dropped and the whole document goes into
/// its own `rdf:Description` right before `</rdf:RDF>`. Without `base` a fresh
/// packet is built.
pub fn encode(doc: &RegionDocument, base: Option<&XmpPacket>) -> Result<Vec<u8>> {
    validate(doc)?;

    let xmp = match base {
        Some(packet) => match appended_regions(doc, packet) {
            Some((at, new)) => extend_region_list(packet, at, new),
            None => splice_into(packet, &build_description(doc))?,
        },
        None => build_packet(&build_description(doc)),
    };

    let mut payload = Vec::with_capacity(XMP_SIGNATURE.len() + xmp.len());
    payload.extend_from_slice(XMP_SIGNATURE);
    payload.extend_from_slice(xmp.as_bytes());

    if payload.len() > MAX_SEGMENT_PAYLOAD {
        return Err(EmbedError::Encoding(format!(
            "XMP payload of {} bytes exceeds the {MAX_SEGMENT_PAYLOAD} byte segment limit",
            payload.len()
        )));
    }
    log::debug!(
        "encoded {} region(s) into {} byte XMP payload",
        doc.regions.len(),
        payload.len()
    );
    Ok(payload)
}

fn validate(doc: &RegionDocument) -> Result<()> {
    let dims = &doc.applied_to_dimensions;
    if !dims.w.is_finite() || !dims.h.is_finite() {
        return Err(EmbedError::Encoding(format!(
            "applied dimensions {}x{} are not finite",
            dims.w, dims.h
        )));
    }
    for (i, region) in doc.regions.iter().enumerate() {
        let area = &region.area;
        let finite = [Some(area.x), Some(area.y), area.w, area.h, area.d]
            .into_iter()
            .flatten()
            .all(f64::is_finite);
        if !finite {
            return Err(EmbedError::Encoding(format!(
                "region {i} ({}) has a non-finite coordinate",
                region.kind
            )));
        }
    }
    Ok(())
}

fn build_packet(description: &str) -> String {
    let mut xmp = String::new();
    xmp.push_str("<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
    xmp.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    xmp.push_str(&format!("<rdf:RDF xmlns:rdf=\"{RDF_NS}\">\n"));
    xmp.push_str(description);
    xmp.push_str("</rdf:RDF>\n");
    xmp.push_str("</x:xmpmeta>\n");
    xmp.push_str("<?xpacket end=\"w\"?>");
    xmp
}

/// The regions `doc` adds after `packet`'s own, and where they go. `None`
/// when `doc` does not start with the packet's regions unchanged.
fn appended_regions<'a>(doc: &'a RegionDocument, packet: &XmpPacket) -> Option<(usize, &'a [Region])> {
    let existing = packet.regions.as_ref()?;
    let at = packet.region_list_end?;
    if existing.applied_to_dimensions != doc.applied_to_dimensions {
        return None;
    }
    let new = doc.regions.strip_prefix(existing.regions.as_slice())?;
    Some((at, new))
}

fn extend_region_list(packet: &XmpPacket, at: usize, new: &[Region]) -> String {
    let mut items = String::new();
    for region in new {
        push_region(&mut items, region, true);
    }
    let mut xmp = packet.text.clone();
    xmp.insert_str(at, &items);
    xmp
}

fn splice_into(packet: &XmpPacket, description: &str) -> Result<String> {
    let rdf_end = packet.rdf_end.ok_or_else(|| {
        EmbedError::Encoding("existing XMP packet has no rdf:RDF element to extend".into())
    })?;

    let mut xmp = packet.text.clone();
    let mut insert_at = rdf_end;
    if let Some(span) = &packet.regions_span {
        xmp.replace_range(span.clone(), "");
        if span.end <= rdf_end {
            insert_at -= span.len();
        }
    }
    xmp.insert_str(insert_at, description);
    Ok(xmp)
}

/// One `rdf:Description` carrying `mwg-rs:Regions`. It declares every prefix
/// it uses so it can be dropped into any packet.
fn build_description(doc: &RegionDocument) -> String {
    let dims = &doc.applied_to_dimensions;

    let mut xml = String::new();
    xml.push_str("<rdf:Description rdf:about=\"\"\n");
    xml.push_str(&format!("  xmlns:rdf=\"{RDF_NS}\"\n"));
    xml.push_str(&format!("  xmlns:mwg-rs=\"{MWG_RS_NS}\"\n"));
    xml.push_str(&format!("  xmlns:stArea=\"{ST_AREA_NS}\"\n"));
    xml.push_str(&format!("  xmlns:stDim=\"{ST_DIM_NS}\">\n"));
    xml.push_str("  <mwg-rs:Regions rdf:parseType=\"Resource\">\n");
    xml.push_str(&format!(
        "    <mwg-rs:AppliedToDimensions stDim:w=\"{}\" stDim:h=\"{}\" stDim:unit=\"{}\"/>\n",
        dims.w,
        dims.h,
        xml_escape(&dims.unit)
    ));
    xml.push_str("    <mwg-rs:RegionList>\n");
    xml.push_str("      <rdf:Bag>\n");
    for region in &doc.regions {
        push_region(&mut xml, region, false);
    }
    xml.push_str("      </rdf:Bag>\n");
    xml.push_str("    </mwg-rs:RegionList>\n");
    xml.push_str("  </mwg-rs:Regions>\n");
    xml.push_str("</rdf:Description>\n");
    xml
}

/// One `rdf:li` item. A `standalone` item declares its own prefixes, for
/// insertion into a list whose packet may bind them differently.
fn push_region(xml: &mut String, region: &Region, standalone: bool) {
    if standalone {
        xml.push_str(&format!(
            "        <rdf:li xmlns:rdf=\"{RDF_NS}\" xmlns:mwg-rs=\"{MWG_RS_NS}\" xmlns:stArea=\"{ST_AREA_NS}\" rdf:parseType=\"Resource\">\n"
        ));
    } else {
        xml.push_str("        <rdf:li rdf:parseType=\"Resource\">\n");
    }
    xml.push_str(&format!("          <mwg-rs:Area {}/>\n", area_attributes(&region.area)));
    xml.push_str(&format!("          <mwg-rs:Type>{}</mwg-rs:Type>\n", region.kind));

    if let Some(name) = &region.name {
        xml.push_str(&format!("          <mwg-rs:Name>{}</mwg-rs:Name>\n", xml_escape(name)));
    }
    if let Some(desc) = &region.description {
        xml.push_str(&format!(
            "          <mwg-rs:Description>{}</mwg-rs:Description>\n",
            xml_escape(desc)
        ));
    }
    if let Some(usage) = region.focus_usage {
        xml.push_str(&format!(
            "          <mwg-rs:FocusUsage>{}</mwg-rs:FocusUsage>\n",
            usage.as_str()
        ));
    }
    if let Some(value) = &region.barcode_value {
        xml.push_str(&format!(
            "          <mwg-rs:BarCodeValue>{}</mwg-rs:BarCodeValue>\n",
            xml_escape(value)
        ));
    }
    xml.push_str("        </rdf:li>\n");
}

fn area_attributes(area: &Area) -> String {
    let mut attrs = format!("stArea:x=\"{}\" stArea:y=\"{}\"", area.x, area.y);
    if let Some(w) = area.w {
        attrs.push_str(&format!(" stArea:w=\"{w}\""));
    }
    if let Some(h) = area.h {
        attrs.push_str(&format!(" stArea:h=\"{h}\""));
    }
    if let Some(d) = area.d {
        attrs.push_str(&format!(" stArea:d=\"{d}\""));
    }
    attrs.push_str(&format!(" stArea:unit=\"{}\"", xml_escape(&area.unit)));
    attrs
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{Dimensions, FocusUsage, RegionType, merge};
    use crate::xmp::decode_packet;

    fn face(x: f64, y: f64, d: f64, name: &str) -> Region {
        Region::new(RegionType::Face, Area::circle(x, y, d)).with_name(name)
    }

    fn sample_doc() -> RegionDocument {
        RegionDocument {
            applied_to_dimensions: Dimensions::new(4032, 3024, "pixel"),
            regions: vec![face(0.4, 0.75, 0.2, "Ada & Bob")],
        }
    }

    fn packet_text(payload: &[u8]) -> &str {
        assert!(payload.starts_with(XMP_SIGNATURE));
        std::str::from_utf8(&payload[XMP_SIGNATURE.len()..]).unwrap()
    }

    // ── encode: fresh packet ─────────────────────────────────────────

    #[test]
    fn encode_fresh_packet_uses_region_schema() {
        let payload = encode(&sample_doc(), None).unwrap();
        let xmp = packet_text(&payload);

        assert!(xmp.starts_with("<?xpacket begin="));
        assert!(xmp.ends_with("<?xpacket end=\"w\"?>"));
        assert!(xmp.contains("stDim:w=\"4032\" stDim:h=\"3024\" stDim:unit=\"pixel\""));
        assert!(xmp.contains("stArea:x=\"0.4\" stArea:y=\"0.75\" stArea:d=\"0.2\" stArea:unit=\"normalized\""));
        assert!(xmp.contains("<mwg-rs:Type>Face</mwg-rs:Type>"));
        assert!(xmp.contains("<mwg-rs:Name>Ada &amp; Bob</mwg-rs:Name>"));
    }

    #[test]
    fn encode_fresh_packet_decodes_to_same_document() {
        let mut doc = sample_doc();
        let mut focus = Region::new(
            RegionType::Focus,
            Area { x: 0.5, y: 0.5, w: Some(0.1), h: Some(0.05), d: None, unit: "normalized".into() },
        );
        focus.focus_usage = Some(FocusUsage::EvaluatedUsed);
        focus.description = Some("<center>".into());
        doc.regions.push(focus);

        let payload = encode(&doc, None).unwrap();
        let packet = decode_packet(&payload[XMP_SIGNATURE.len()..]).unwrap();
        assert_eq!(packet.regions, Some(doc));
    }

    // ── encode: splice ───────────────────────────────────────────────

    const EXISTING: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description rdf:about=""
  xmlns:dc="http://purl.org/dc/elements/1.1/"
  xmlns:mwg-rs="http://www.metadataworkinggroup.com/schemas/regions/"
  xmlns:stArea="http://ns.adobe.com/xmp/sType/Area#"
  xmlns:stDim="http://ns.adobe.com/xap/1.0/sType/Dimensions#">
  <dc:title><rdf:Alt><rdf:li xml:lang="x-default">Beach</rdf:li></rdf:Alt></dc:title>
  <mwg-rs:Regions rdf:parseType="Resource">
    <mwg-rs:AppliedToDimensions stDim:w="4032" stDim:h="3024" stDim:unit="pixel"/>
    <mwg-rs:RegionList><rdf:Bag>
      <rdf:li rdf:parseType="Resource">
        <mwg-rs:Type>Pet</mwg-rs:Type>
        <mwg-rs:Area stArea:x="0.1" stArea:y="0.2" stArea:w="0.3" stArea:h="0.4" stArea:unit="normalized"/>
      </rdf:li>
    </rdf:Bag></mwg-rs:RegionList>
  </mwg-rs:Regions>
</rdf:Description>
</rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    #[test]
    fn encode_splice_keeps_unrelated_properties() {
        let packet = decode_packet(EXISTING.as_bytes()).unwrap();
        let merged = merge(
            packet.regions.clone(),
            Dimensions::new(4032, 3024, "pixel"),
            vec![face(0.5, 0.5, 0.1, "Cat owner")],
        );

        let payload = encode(&merged, Some(&packet)).unwrap();
        let xmp = packet_text(&payload);

        assert!(xmp.contains("<dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">Beach</rdf:li></rdf:Alt></dc:title>"));
        assert_eq!(xmp.matches("<mwg-rs:Regions").count(), 1);
        assert!(xmp.ends_with("<?xpacket end=\"w\"?>"));

        let decoded = decode_packet(xmp.as_bytes()).unwrap();
        let doc = decoded.regions.unwrap();
        assert_eq!(doc.regions.len(), 2);
        assert_eq!(doc.regions[0].kind, RegionType::Pet);
        assert_eq!(doc.regions[0].area.w, Some(0.3));
        assert_eq!(doc.regions[1].name.as_deref(), Some("Cat owner"));
    }

    const WITH_EXTENSIONS: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description rdf:about=""
  xmlns:mwg-rs="http://www.metadataworkinggroup.com/schemas/regions/"
  xmlns:stArea="http://ns.adobe.com/xmp/sType/Area#"
  xmlns:stDim="http://ns.adobe.com/xap/1.0/sType/Dimensions#"
  xmlns:acdsee="http://ns.acdsee.com/regions/">
  <mwg-rs:Regions rdf:parseType="Resource">
    <mwg-rs:AppliedToDimensions stDim:w="640" stDim:h="480" stDim:unit="pixel"/>
    <mwg-rs:RegionList><rdf:Bag>
      <rdf:li rdf:parseType="Resource">
        <mwg-rs:Type>Face</mwg-rs:Type>
        <mwg-rs:Name>Ada</mwg-rs:Name>
        <mwg-rs:Area stArea:x="0.3" stArea:y="0.3" stArea:d="0.1" stArea:unit="normalized"/>
        <mwg-rs:Rotation>0.5</mwg-rs:Rotation>
        <mwg-rs:Extensions rdf:parseType="Resource"><acdsee:DLYArea>keep-me</acdsee:DLYArea></mwg-rs:Extensions>
      </rdf:li>
    </rdf:Bag></mwg-rs:RegionList>
  </mwg-rs:Regions>
</rdf:Description>
</rdf:RDF>
</x:xmpmeta>"#;

    #[test]
    fn encode_keeps_existing_region_properties() {
        let packet = decode_packet(WITH_EXTENSIONS.as_bytes()).unwrap();
        let merged = merge(
            packet.regions.clone(),
            Dimensions::new(640, 480, "pixel"),
            vec![face(0.7, 0.7, 0.1, "Bea")],
        );

        let payload = encode(&merged, Some(&packet)).unwrap();
        let xmp = packet_text(&payload);

        assert!(xmp.contains("<mwg-rs:Rotation>0.5</mwg-rs:Rotation>"));
        assert!(xmp.contains("<acdsee:DLYArea>keep-me</acdsee:DLYArea>"));
        let list_end = WITH_EXTENSIONS.find("</rdf:Bag>").unwrap();
        assert!(xmp.starts_with(&WITH_EXTENSIONS[..list_end]));
        assert!(xmp.ends_with(&WITH_EXTENSIONS[list_end..]));
        assert_eq!(decode_packet(xmp.as_bytes()).unwrap().regions, Some(merged));
    }

    #[test]
    fn encode_rebuilds_regions_that_are_not_an_extension() {
        let packet = decode_packet(EXISTING.as_bytes()).unwrap();

        let payload = encode(&sample_doc(), Some(&packet)).unwrap();
        let xmp = packet_text(&payload);

        assert_eq!(xmp.matches("<mwg-rs:Regions").count(), 1);
        assert!(!xmp.contains("<mwg-rs:Type>Pet</mwg-rs:Type>"));
        assert!(xmp.contains("Beach"));
        assert_eq!(decode_packet(xmp.as_bytes()).unwrap().regions, Some(sample_doc()));
    }

    #[test]
    fn encode_splice_into_packet_without_regions() {
        let xmp = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/" dc:format="image/jpeg"/></rdf:RDF></x:xmpmeta>"#;
        let packet = decode_packet(xmp.as_bytes()).unwrap();

        let payload = encode(&sample_doc(), Some(&packet)).unwrap();
        let out = packet_text(&payload);
        assert!(out.contains("dc:format=\"image/jpeg\""));
        assert!(out.ends_with("</rdf:RDF></x:xmpmeta>"));
        assert_eq!(decode_packet(out.as_bytes()).unwrap().regions, Some(sample_doc()));
    }

    // ── encode: failures ─────────────────────────────────────────────

    #[test]
    fn encode_rejects_non_finite_coordinates() {
        let mut doc = sample_doc();
        doc.regions[0].area.x = f64::NAN;
        assert!(matches!(encode(&doc, None), Err(EmbedError::Encoding(_))));

        let mut doc = sample_doc();
        doc.regions[0].area.d = Some(f64::INFINITY);
        assert!(matches!(encode(&doc, None), Err(EmbedError::Encoding(_))));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut doc = sample_doc();
        doc.regions[0].name = Some("x".repeat(MAX_SEGMENT_PAYLOAD));
        assert!(matches!(encode(&doc, None), Err(EmbedError::Encoding(_))));
    }

    #[test]
    fn encode_writes_shortest_float_form() {
        let doc = RegionDocument {
            applied_to_dimensions: Dimensions::new(10, 20, "pixel"),
            regions: vec![face(0.1 + 0.2, 1.0, 0.25, "n")],
        };
        let payload = encode(&doc, None).unwrap();
        let xmp = packet_text(&payload);
        assert!(xmp.contains("stArea:x=\"0.30000000000000004\" stArea:y=\"1\""));
    }
}
