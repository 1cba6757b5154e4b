//! Asset lookup in a harvested metadata document.
//!
//! Namespaces differ between exports, so matching is done on local names
//! only. The parser walks the event stream once with a stack of open
//! element names and never builds a DOM.
//!
//! Both lookups are anchored at the record element directly below the
//! root. Linked records embedded in the document carry their own `_id` and
//! `files`, and must not leak into the row.
//!
//! ```text
//! <objects>
//!   <do_grpm_06>                                     ← record (objecttype)
//!     <_id>17</_id>                                  ← id
//!     <linked_author>…<files>…</files>…</linked_author>   (ignored)
//!     <do_digitalobject>                             ← asset element
//!       <files><file><versions>
//!         <version name="original">
//!           <class>image</class>
//!           <download_url>https://…/a.jpg</download_url>  ← image_url
//! ```

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// What the extractor needs from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAssets {
    pub id: String,
    pub image_url: String,
    /// First original version whose URL names a PDF.
    pub pdf_url: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("XML error: {0}")]
    Xml(String),

    #[error("no <_id> directly inside <{0}>")]
    MissingId(String),

    #[error("no original version of class 'image' with a download_url")]
    MissingImageUrl,
}

/// An `original` version collected while walking the document.
#[derive(Debug, Default)]
struct Version {
    /// Stack depth of the `<version>` element itself.
    depth: usize,
    class: String,
    download_url: String,
}

/// Parse `xml` and pick the id and asset URLs of the `objecttype` record.
///
/// Versions are read from
/// `<objecttype>/<asset_element>/files/file/versions/version[@name='original']`
/// only.
pub fn parse_document(xml: &[u8], objecttype: &str, asset_element: &str) -> Result<DocumentAssets, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut id: Option<String> = None;
    let mut id_text: Option<String> = None;
    let mut current: Option<Version> = None;
    let mut versions: Vec<Version> = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(format!("at byte {}: {}", reader.buffer_position(), e)))?;

        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                stack.push(name);
                if current.is_none() && is_original_version(&e, &stack, objecttype, asset_element) {
                    current = Some(Version {
                        depth: stack.len(),
                        ..Version::default()
                    });
                }
                if id.is_none() && is_record_path(&stack, &[objecttype, "_id"]) {
                    id_text = Some(String::new());
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| ParseError::Xml(e.to_string()))?;
                append_text(&stack, &text, &mut id_text, current.as_mut());
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                append_text(&stack, &text, &mut id_text, current.as_mut());
            }
            Event::End(_) => {
                if let Some(text) = id_text.take() {
                    let text = text.trim();
                    if !text.is_empty() {
                        id = Some(text.to_string());
                    }
                }
                if current.as_ref().is_some_and(|v| v.depth == stack.len()) {
                    versions.extend(current.take());
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let id = id.ok_or_else(|| ParseError::MissingId(objecttype.to_string()))?;

    let image_url = versions
        .iter()
        .find(|v| v.class.trim() == "image" && !v.download_url.trim().is_empty())
        .map(|v| v.download_url.trim().to_string())
        .ok_or(ParseError::MissingImageUrl)?;

    let pdf_url = versions
        .iter()
        .map(|v| v.download_url.trim())
        .find(|u| is_pdf_url(u))
        .map(str::to_string);

    Ok(DocumentAssets {
        id,
        image_url,
        pdf_url,
    })
}

fn append_text(stack: &[String], text: &str, id_text: &mut Option<String>, current: Option<&mut Version>) {
    if let Some(buf) = id_text.as_mut() {
        if stack.last().is_some_and(|n| n == "_id") {
            buf.push_str(text);
        }
    }
    if let Some(v) = current {
        // Only direct children of the version count.
        if stack.len() == v.depth + 1 {
            match stack.last().map(String::as_str) {
                Some("class") => v.class.push_str(text),
                Some("download_url") => v.download_url.push_str(text),
                _ => {}
            }
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Whether the open elements below the root are exactly `path`.
fn is_record_path(stack: &[String], path: &[&str]) -> bool {
    stack.len() == path.len() + 1 && stack[1..].iter().zip(path).all(|(a, b)| a == b)
}

/// `<root>/<objecttype>/<asset_element>/files/file/versions/version[@name='original']`
fn is_original_version(e: &BytesStart<'_>, stack: &[String], objecttype: &str, asset_element: &str) -> bool {
    let path = [objecttype, asset_element, "files", "file", "versions", "version"];
    if !is_record_path(stack, &path) {
        return false;
    }
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == b"name"
            && a.unescape_value().map(|v| v == "original").unwrap_or(false)
    })
}

/// Path ends in `.pdf`, ignoring case and any query string.
pub fn is_pdf_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".pdf")
}
