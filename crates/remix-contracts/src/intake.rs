use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::errors::UploadError;
use crate::session::SourceImage;

/// Mime types the upload boundary accepts, by declared type.
pub const SUPPORTED_MIME_TYPES: &[&str] =
    &["image/png", "image/jpeg", "image/gif", "image/webp"];

pub fn is_supported_mime(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// File extension for a rendered image's mime type, defaulting to png when
/// the subtype is missing or unrecognised.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpeg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}

pub fn make_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

/// Base64 payload of a data URL (the part after the first comma).
pub fn data_url_payload(data_url: &str) -> Option<&str> {
    let (_, payload) = data_url.split_once(',')?;
    if payload.is_empty() {
        return None;
    }
    Some(payload)
}

/// Declared mime type of a data URL (`data:<mime>;...`).
pub fn data_url_mime(data_url: &str) -> Option<&str> {
    let rest = data_url.strip_prefix("data:")?;
    let head = rest.split_once(',')?.0;
    let mime = head.split(';').next().unwrap_or("");
    if mime.is_empty() {
        return None;
    }
    Some(mime)
}

pub fn source_image_from_bytes(
    file_name: &str,
    mime_type: &str,
    bytes: &[u8],
) -> Result<SourceImage, UploadError> {
    if !is_supported_mime(mime_type) {
        return Err(UploadError::UnsupportedType(mime_type.to_string()));
    }
    if bytes.is_empty() {
        return Err(UploadError::Unreadable(format!("{file_name} is empty")));
    }
    Ok(SourceImage {
        file_name: file_name.to_string(),
        mime_type: mime_type.to_string(),
        data_url: make_data_url(mime_type, bytes),
    })
}

pub fn source_image_from_path(path: &Path) -> Result<SourceImage, UploadError> {
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default();
    let mime_type = mime_for_extension(extension)
        .ok_or_else(|| UploadError::UnsupportedType(format!(".{extension}")))?;
    let bytes = std::fs::read(path)
        .map_err(|err| UploadError::Unreadable(format!("{}: {err}", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("upload")
        .to_string();
    source_image_from_bytes(&file_name, mime_type, &bytes)
}
