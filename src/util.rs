//! Text, file-name and path helpers shared by the adapters and the CLI. No state.

use reqwest::Url;
use std::collections::HashSet;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use unicode_normalization::UnicodeNormalization;

/// Default file name when neither author nor title is known.
pub const FALLBACK_FILENAME: &str = "gutenberg-book.epub";

const OCTET_STREAM: &str = "application/octet-stream";

/// ASCII-fold, lowercase, and collapse every run of non-alphanumerics into a single `-`.
/// Returns `book` when nothing survives.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.nfkd().filter(char::is_ascii) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        out.push_str("book");
    }
    out
}

/// `author-title` slug plus `.epub`, or [FALLBACK_FILENAME] when both are absent.
pub fn make_book_filename(author: Option<&str>, title: Option<&str>) -> String {
    let parts: Vec<&str> = [author, title]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return FALLBACK_FILENAME.to_string();
    }
    format!("{}.epub", slugify(&parts.join("-")))
}

/// An existing directory, or a path spelled with a trailing separator.
pub fn is_dir_like(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    raw.ends_with(MAIN_SEPARATOR) || raw.ends_with('/') || path.is_dir()
}

/// Directory-like outputs get `default_name` appended.
pub fn resolve_output_path(out_path: Option<&Path>, default_name: &str) -> PathBuf {
    match out_path {
        Some(p) if p.as_os_str().is_empty() => PathBuf::from(default_name),
        Some(p) if is_dir_like(p) => p.join(default_name),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(default_name),
    }
}

pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Split `name` into stem and extension (with the dot). A leading dot is part of the stem.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

/// Register `filename` in `used`, appending `-1`, `-2`, ... before the extension on collision.
pub fn unique_filename(filename: &str, used: &mut HashSet<String>) -> String {
    if used.insert(filename.to_string()) {
        return filename.to_string();
    }
    let (stem, ext) = split_extension(filename);
    let mut index = 1u32;
    loop {
        let candidate = format!("{}-{}{}", stem, index, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        index += 1;
    }
}

fn preferred_extension(media_type: &str) -> Option<&'static str> {
    match media_type {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/svg+xml" => Some(".svg"),
        "image/webp" => Some(".webp"),
        "image/bmp" => Some(".bmp"),
        "image/tiff" => Some(".tif"),
        "image/avif" => Some(".avif"),
        _ => None,
    }
}

/// Extension (with leading dot) for a fetched resource: from the media type first, then the
/// URL path, else `.bin`.
pub fn guess_extension(url: &str, media_type: Option<&str>) -> String {
    if let Some(mt) = media_type.map(strip_parameters).filter(|m| !m.is_empty()) {
        let mt = mt.to_ascii_lowercase();
        if let Some(ext) = preferred_extension(&mt) {
            return ext.to_string();
        }
        if mt != OCTET_STREAM {
            if let Some(ext) = mime_guess::get_mime_extensions_str(&mt).and_then(|e| e.first()) {
                return format!(".{}", ext);
            }
        }
    }
    let (_, ext) = split_extension(url_basename(url));
    if ext.len() > 1 {
        ext.to_string()
    } else {
        ".bin".to_string()
    }
}

fn strip_parameters(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

/// Media type for a fetched resource: declared type without parameters, else guessed from the URL.
pub fn media_type_from_response(content_type: Option<&str>, url: &str) -> String {
    if let Some(ct) = content_type.map(strip_parameters).filter(|c| !c.is_empty()) {
        return ct.to_string();
    }
    mime_guess::from_path(url_path(url))
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

fn url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    }
}

/// Last path segment of `url`, without query or fragment.
pub fn url_basename(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let path = path
        .split_once("://")
        .map(|(_, rest)| rest.find('/').map(|i| &rest[i..]).unwrap_or(""))
        .unwrap_or(path);
    path.rsplit('/').next().unwrap_or("")
}

/// Collapse whitespace runs to single spaces and trim; empty results become `None`.
pub fn clean_text(value: Option<&str>) -> Option<String> {
    let cleaned = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_folds_accents_and_collapses() {
        assert_eq!(
            slugify("Goethe - Die Leiden des jungen Werther"),
            "goethe-die-leiden-des-jungen-werther"
        );
        assert_eq!(
            slugify("Ödön von Horváth: Jugend ohne Gott!"),
            "odon-von-horvath-jugend-ohne-gott"
        );
        assert_eq!(slugify("  --  a  --  b  --  "), "a-b");
    }

    #[test]
    fn slugify_empty_falls_back_to_book() {
        assert_eq!(slugify(""), "book");
        assert_eq!(slugify("???"), "book");
        assert_eq!(slugify("漢字"), "book");
    }

    #[test]
    fn slugify_url() {
        assert_eq!(
            slugify("https://www.projekt-gutenberg.org/goethe/werther/"),
            "https-www-projekt-gutenberg-org-goethe-werther"
        );
    }

    #[test]
    fn make_book_filename_variants() {
        assert_eq!(
            make_book_filename(Some("Franz Kafka"), Some("Der Prozess")),
            "franz-kafka-der-prozess.epub"
        );
        assert_eq!(make_book_filename(None, Some("Faust")), "faust.epub");
        assert_eq!(make_book_filename(Some(""), None), FALLBACK_FILENAME);
        assert_eq!(make_book_filename(None, None), FALLBACK_FILENAME);
    }

    #[test]
    fn unique_filename_appends_counter() {
        let mut used = HashSet::new();
        assert_eq!(unique_filename("cover.png", &mut used), "cover.png");
        assert_eq!(unique_filename("cover.png", &mut used), "cover-1.png");
        assert_eq!(unique_filename("cover.png", &mut used), "cover-2.png");
        assert_eq!(unique_filename("cover-1.png", &mut used), "cover-1-1.png");
        assert_eq!(unique_filename("noext", &mut used), "noext");
        assert_eq!(unique_filename("noext", &mut used), "noext-1");
    }

    #[test]
    fn resolve_output_path_none_uses_default() {
        assert_eq!(resolve_output_path(None, "a.epub"), PathBuf::from("a.epub"));
    }

    #[test]
    fn resolve_output_path_directory_appends_default() {
        let dir = std::env::temp_dir();
        assert_eq!(resolve_output_path(Some(&dir), "a.epub"), dir.join("a.epub"));
        let trailing = PathBuf::from(format!("not-yet-created{}", MAIN_SEPARATOR));
        assert_eq!(
            resolve_output_path(Some(&trailing), "a.epub"),
            PathBuf::from("not-yet-created").join("a.epub")
        );
    }

    #[test]
    fn is_dir_like_detects_trailing_separator() {
        assert!(is_dir_like(Path::new("books/")));
        assert!(is_dir_like(&std::env::temp_dir()));
        assert!(!is_dir_like(Path::new("books/faust.epub")));
        assert!(!is_dir_like(Path::new("gutenberg_dl_not_a_dir")));
    }

    #[test]
    fn resolve_output_path_file_is_verbatim() {
        let p = PathBuf::from("out/my.epub");
        assert_eq!(resolve_output_path(Some(&p), "a.epub"), p);
    }

    #[test]
    fn guess_extension_prefers_media_type() {
        assert_eq!(guess_extension("https://x.org/a/pic", Some("image/jpeg")), ".jpg");
        assert_eq!(guess_extension("https://x.org/a/pic.gif", Some("image/png; q=1")), ".png");
        assert_eq!(guess_extension("https://x.org/a/pic.gif?v=2", None), ".gif");
        assert_eq!(guess_extension("https://x.org/a/pic", None), ".bin");
    }

    #[test]
    fn media_type_strips_parameters_and_guesses() {
        assert_eq!(media_type_from_response(Some("image/png; charset=binary"), "x"), "image/png");
        assert_eq!(media_type_from_response(None, "https://x.org/b/c.jpg"), "image/jpeg");
        assert_eq!(media_type_from_response(None, "https://x.org/b/c"), OCTET_STREAM);
    }

    #[test]
    fn url_basename_ignores_query_and_host() {
        assert_eq!(url_basename("https://x.org/a/b/pic.png?x=1#f"), "pic.png");
        assert_eq!(url_basename("https://x.org"), "");
        assert_eq!(url_basename("https://x.org/a/"), "");
    }

    #[test]
    fn clean_text_collapses_and_empties() {
        assert_eq!(clean_text(Some("  Erstes\n\t Kapitel ")).as_deref(), Some("Erstes Kapitel"));
        assert_eq!(clean_text(Some(" \n ")), None);
        assert_eq!(clean_text(None), None);
    }
}
