use crate::intake::extension_for_mime;
use crate::session::SourceImage;

/// Context text as it appears in download names: whitespace runs collapse to
/// single underscores.
pub fn sanitize_context(context: &str) -> String {
    context.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Download name for the untouched upload, keeping its original file name.
pub fn original_download_name(image: &SourceImage) -> String {
    format!("original-{}", image.file_name)
}

/// Download name for variation `index` (zero-based): the sanitized context,
/// the 1-based position, and an extension matching the rendered mime type.
pub fn variation_download_name(context: &str, index: usize, mime_type: &str) -> String {
    format!(
        "remix-{}-{}.{}",
        sanitize_context(context),
        index + 1,
        extension_for_mime(mime_type)
    )
}
