//! Single-purpose stages used by the three entry points.
//!
//! ```text
//! harvest ──▶ document              (normalise + check each XML document)
//! extract ──▶ metadata              (id / image URL / PDF URL per document)
//! fetch   ──▶ download ──▶ convert  (HTTP with retry, then TIFF or PDF on disk)
//! ```
//!
//! 1. [`document`]: strip volatile root attributes, reject broken XML
//! 2. [`metadata`]: namespace-agnostic streaming parse of one document
//! 3. [`download`]: asset GET through the retry wrapper with content checks
//! 4. [`convert`]:  decode/encode on `spawn_blocking`, create-exclusive write

pub mod convert;
pub mod document;
pub mod download;
pub mod metadata;
