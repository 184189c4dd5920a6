//! Upload metadata helpers.

use std::path::Path;

/// Fallback MIME type for unrecognized extensions.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Infers a MIME type from the file extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("wav" | "wave") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg" | "oga") => "audio/ogg",
        Some("opus") => "audio/opus",
        Some("m4a" | "mp4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("aif" | "aiff") => "audio/aiff",
        Some("webm") => "audio/webm",
        Some("3gp") => "audio/3gpp",
        Some("amr") => "audio/amr",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Parses a comma-separated tag string into trimmed, non-empty tags.
pub fn parse_tags(tags_str: &str) -> Vec<String> {
    tags_str
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
