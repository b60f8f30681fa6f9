//! Media-type classification for uploaded documents.

use super::types::MediaClass;

/// Route a declared media type to an extractor.
///
/// `application/pdf` must match exactly; any `image/` prefix is an image. Parameters after `;`
/// and surrounding whitespace are ignored and the comparison is case-insensitive.
pub fn classify(declared_media_type: &str) -> MediaClass {
    let essence = declared_media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence == "application/pdf" {
        MediaClass::Pdf
    } else if essence.starts_with("image/") {
        MediaClass::Image
    } else {
        MediaClass::Unsupported
    }
}
