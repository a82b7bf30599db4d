use std::path::{Component, Path};

/// Content type for an uploaded artifact. Streaming formats are pinned, since
/// guessers disagree on `.ts` and `.m4s`.
pub fn content_type_for(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/mp2t".to_string(),
        Some("mpd") => "application/dash+xml".to_string(),
        Some("m4s") => "video/iso.segment".to_string(),
        _ => mime_guess::from_path(path)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string(),
    }
}

/// Destination key for `file`: `prefix` followed by its path relative to
/// `root`, always with forward slashes. `None` if `file` is not under `root`.
pub fn object_key(prefix: &str, root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }

    Some(format!("{}/{}", prefix.trim_end_matches('/'), parts.join("/")))
}

/// File extension of an object key, used to name the local input copy.
pub fn input_extension(key: &str) -> &str {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("mp4")
}
