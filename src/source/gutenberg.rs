//! Project Gutenberg adapter. The catalog already serves EPUBs, so this derives the direct
//! download URL, saves the file, and reads enough metadata back to name it.

use crate::model::EpubMetadata;
use crate::source::{Fetcher, SourceError};
use crate::util::{ensure_parent_dir, make_book_filename, resolve_output_path};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Url;
use std::io::Read;
use std::path::{Path, PathBuf};

const EPUB_SUFFIXES: [&str; 3] = [".epub", ".epub3", ".epub3.images"];
const EBOOKS_SEGMENT: &str = "/ebooks/";
const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Where the EPUB ended up and what it says about itself.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub output_path: PathBuf,
    pub metadata: EpubMetadata,
}

/// Direct EPUB URL for a catalog page. Already-direct `.epub*` URLs pass through.
pub fn derive_download_url(url: &str, no_images: bool) -> Result<String, SourceError> {
    let parsed = Url::parse(url).map_err(|e| SourceError::InvalidUrl {
        input: url.to_string(),
        reason: e.to_string(),
    })?;
    let path = parsed.path().to_ascii_lowercase();
    if EPUB_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        return Ok(url.to_string());
    }

    let ebook_id = ebook_id(parsed.path()).ok_or_else(|| SourceError::UrlDerivation {
        url: url.to_string(),
    })?;
    let host = parsed.host_str().ok_or_else(|| SourceError::UrlDerivation {
        url: url.to_string(),
    })?;
    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let suffix = if no_images { ".epub3" } else { ".epub3.images" };
    Ok(format!(
        "{}://{}/ebooks/{}{}",
        parsed.scheme(),
        authority,
        ebook_id,
        suffix
    ))
}

/// Digits right after the first `/ebooks/` in `path`.
fn ebook_id(path: &str) -> Option<&str> {
    let start = path.find(EBOOKS_SEGMENT)? + EBOOKS_SEGMENT.len();
    let rest = &path[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

/// Download to a temp file, read its metadata, then move it to the resolved output path.
pub fn download_epub(
    download_url: &str,
    out_path: Option<&Path>,
    fetcher: &Fetcher,
) -> Result<DownloadResult, SourceError> {
    let temp_path = std::env::temp_dir().join(format!("gutenberg-dl-{}.epub", std::process::id()));
    let moved = fetcher
        .download_to(download_url, &temp_path)
        .map_err(SourceError::from)
        .and_then(|_| {
            let metadata = read_epub_metadata(&temp_path);
            let default_name =
                make_book_filename(metadata.author.as_deref(), metadata.title.as_deref());
            let output_path = resolve_output_path(out_path, &default_name);
            ensure_parent_dir(&output_path).map_err(|e| SourceError::Io {
                path: output_path.clone(),
                source: e,
            })?;
            move_file(&temp_path, &output_path)?;
            Ok(DownloadResult {
                output_path,
                metadata,
            })
        });
    if moved.is_err() {
        std::fs::remove_file(&temp_path).ok();
    }
    moved
}

/// Rename, falling back to copy + delete when the rename crosses filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), SourceError> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| SourceError::Io {
        path: to.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(from).ok();
    Ok(())
}

/// Title, author and language from the package document of an EPUB on disk.
///
/// Lenient: a missing or unreadable archive, container or package document yields `None`
/// fields instead of an error.
pub fn read_epub_metadata(path: &Path) -> EpubMetadata {
    read_package_metadata(path).unwrap_or_default()
}

fn read_package_metadata(path: &Path) -> Option<EpubMetadata> {
    let file = std::fs::File::open(path).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;
    let container = read_entry(&mut archive, CONTAINER_PATH)?;
    let opf_path = rootfile_path(&container)?;
    let opf = read_entry(&mut archive, &opf_path)?;
    Some(parse_package_metadata(&opf))
}

fn read_entry(archive: &mut zip::ZipArchive<std::fs::File>, name: &str) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// `full-path` of the first `rootfile` in container.xml.
fn rootfile_path(container_xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(container_xml);
    reader.trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"full-path" {
                        let value = attr.unescape_value().ok()?;
                        let value = value.trim();
                        if !value.is_empty() {
                            return Some(value.to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Creator,
    Language,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"creator" => Some(Field::Creator),
            b"language" => Some(Field::Language),
            _ => None,
        }
    }
}

/// First non-empty title, creator and language inside `<metadata>`, whatever their namespace.
fn parse_package_metadata(opf_xml: &str) -> EpubMetadata {
    let mut reader = Reader::from_str(opf_xml);
    reader.trim_text(true);
    let mut meta = EpubMetadata::default();
    let mut in_metadata = false;
    let mut current: Option<(Field, String)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"metadata" {
                    in_metadata = true;
                } else if in_metadata && current.is_none() {
                    current = Field::from_local_name(name.as_ref()).map(|f| (f, String::new()));
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((_, buf)) = current.as_mut() {
                    if let Ok(text) = t.unescape() {
                        buf.push_str(&text);
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if let Some((_, buf)) = current.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"metadata" {
                    break;
                }
                if let Some((field, buf)) = current.take() {
                    if Field::from_local_name(name.as_ref()) != Some(field) {
                        current = Some((field, buf));
                        continue;
                    }
                    let value = buf.trim();
                    if value.is_empty() {
                        continue;
                    }
                    let slot = match field {
                        Field::Title => &mut meta.title,
                        Field::Creator => &mut meta.author,
                        Field::Language => &mut meta.language,
                    };
                    if slot.is_none() {
                        *slot = Some(value.to_string());
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    meta
}
