//! Normalisation of harvested metadata documents.
//!
//! EasyDB decorates the `<objects>` root with namespace declarations and
//! export attributes that change between server versions. They are stripped
//! before the document is written so two harvests of an unchanged item
//! produce identical files.

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::bytes::Regex;

static RE_OBJECTS_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<objects\b[^>]*>").unwrap());

/// Replace the first `<objects ...>` start tag with a bare `<objects>`.
///
/// A self-closing `<objects/>` is left as is.
pub fn normalize(doc: &[u8]) -> Vec<u8> {
    match RE_OBJECTS_OPEN.find(doc) {
        Some(m) if !m.as_bytes().ends_with(b"/>") => {
            let mut out = Vec::with_capacity(doc.len());
            out.extend_from_slice(&doc[..m.start()]);
            out.extend_from_slice(b"<objects>");
            out.extend_from_slice(&doc[m.end()..]);
            out
        }
        _ => doc.to_vec(),
    }
}

/// Check that `doc` is a well-formed XML document with a root element.
///
/// Returns a short description of the first problem found.
pub fn check_well_formed(doc: &[u8]) -> Result<(), String> {
    let mut reader = Reader::from_reader(doc);
    reader.config_mut().check_end_names = true;
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                depth += 1;
                saw_root = true;
            }
            Ok(Event::Empty(_)) => saw_root = true,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
        buf.clear();
    }

    if !saw_root {
        return Err("document has no root element".into());
    }
    if depth != 0 {
        return Err("document ends inside an element".into());
    }
    Ok(())
}
