//! Content-Type resolution by file extension.

use std::path::Path;

/// Resolves the `Content-Type` for a filesystem path. Unknown extensions are
/// served as opaque bytes.
pub fn from_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::from_path;

    #[test]
    fn resolves_common_extensions() {
        assert_eq!("text/html", from_path(Path::new("/srv/index.html")));
        assert_eq!("text/css", from_path(Path::new("site.css")));
        assert_eq!("image/png", from_path(Path::new("logo.png")));
        assert_eq!("application/json", from_path(Path::new("data.json")));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!("image/jpeg", from_path(Path::new("PHOTO.JPG")));
    }

    #[test]
    fn unknown_or_missing_extension_is_octet_stream() {
        assert_eq!("application/octet-stream", from_path(Path::new("core.xyz")));
        assert_eq!("application/octet-stream", from_path(Path::new("Makefile")));
    }
}
