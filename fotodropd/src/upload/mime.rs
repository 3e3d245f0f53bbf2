use std::path::Path;

/// Returns the MIME type for a whitelisted image extension, or `None` for
/// anything the platform does not ingest.
pub fn from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
