//! EPUB writer. Consumes a [Book](crate::model::Book) and writes an EPUB 3 package
//! (mimetype, container, OPF, nav, NCX, stylesheet, images, chapters).

use crate::model::Book;
use crate::util::{ensure_parent_dir, xml_escape};
use chrono::{DateTime, Utc};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";

/// Shared stylesheet, relative to the package directory. Chapters live next to `nav.xhtml`.
pub const STYLESHEET_HREF: &str = "style/style.css";

/// Body used when a chapter's content fragment is empty.
pub const EMPTY_BODY: &str = "<p></p>";

const DEFAULT_CSS: &str = r#"body {
  font-family: serif;
  line-height: 1.6;
  margin: 1.2em;
}
h1, h2 {
  text-align: center;
}
.center {
  text-align: center;
}
.centersml {
  text-align: center;
  font-size: 0.9em;
}
.title {
  text-align: center;
  font-size: 1.4em;
  margin-bottom: 0.8em;
}
img {
  max-width: 100%;
  height: auto;
}
"#;

/// Errors from the EPUB writer. Maps to CLI exit code 3.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: book identifier is empty.")]
    EmptyIdentifier,

    #[error("Cannot write EPUB: book has no chapters.")]
    NoChapters,

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Wrap a content fragment into a complete chapter document.
///
/// An empty (or whitespace-only) fragment is replaced by a single empty paragraph.
pub fn wrap_chapter_html(title: &str, body_html: &str, language: &str) -> String {
    let safe_title = xml_escape(title);
    let lang = xml_escape(language);
    let body = if body_html.trim().is_empty() {
        EMPTY_BODY
    } else {
        body_html
    };
    format!(
        r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="{lang}" xml:lang="{lang}">
<head>
  <title>{title}</title>
  <meta charset="utf-8"/>
  <link rel="stylesheet" type="text/css" href="{css}"/>
</head>
<body>
  <h2>{title}</h2>
{body}
</body>
</html>
"#,
        lang = lang,
        title = safe_title,
        css = STYLESHEET_HREF,
        body = body
    )
}

/// Write `book` to an EPUB file at `path`, creating missing parent directories.
///
/// Spine is the navigation document followed by the chapters in book order. Returns `path`.
pub fn write_epub(book: &Book, path: &Path) -> Result<PathBuf, EpubError> {
    validate_book(book)?;

    let path = path.to_path_buf();
    ensure_parent_dir(&path).map_err(|e| EpubError::Io {
        path: path.clone(),
        source: e,
    })?;
    let file = std::fs::File::create(&path).map_err(|e| EpubError::CreateFile {
        path: path.clone(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // Mimetype first, uncompressed.
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML)?;

    write_opf(book, &mut zip, options_deflate)?;
    write_nav_xhtml(book, &mut zip, options_deflate)?;
    write_ncx(book, &mut zip, options_deflate)?;

    zip.start_file(format!("{}{}", OEBPS_PREFIX, STYLESHEET_HREF), options_deflate)?;
    zip.write_all(DEFAULT_CSS.as_bytes())?;

    for image in &book.images {
        // Already-compressed formats gain nothing from deflate.
        zip.start_file(format!("{}{}", OEBPS_PREFIX, image.file_name), options_stored)?;
        zip.write_all(&image.content)?;
    }

    for ch in &book.chapters {
        zip.start_file(format!("{}{}", OEBPS_PREFIX, ch.file_name), options_deflate)?;
        zip.write_all(ch.html.as_bytes())?;
    }

    zip.finish()?;
    Ok(path)
}

fn validate_book(book: &Book) -> Result<(), EpubError> {
    if book.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if book.identifier.trim().is_empty() {
        return Err(EpubError::EmptyIdentifier);
    }
    if book.chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }
    Ok(())
}

/// Manifest id for a chapter file name (`chap_001.xhtml` -> `chap_001`).
fn chapter_id(file_name: &str) -> String {
    let stem = file_name.strip_suffix(".xhtml").unwrap_or(file_name);
    let id: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("ch-{}", id)
}

/// `dcterms:modified` value: UTC, whole seconds, `Z` suffix.
fn modified_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn write_opf(
    book: &Book,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut metadata = format!(
        r#"    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{language}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
"#,
        id = xml_escape(&book.identifier),
        title = xml_escape(&book.title),
        language = xml_escape(&book.language),
        modified = modified_timestamp(Utc::now()),
    );
    if !book.author.trim().is_empty() {
        metadata.push_str(&format!(
            "    <dc:creator id=\"creator\">{}</dc:creator>\n",
            xml_escape(&book.author)
        ));
    }
    if let Some(description) = book.description.as_deref().filter(|d| !d.is_empty()) {
        metadata.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            xml_escape(description)
        ));
    }
    if !book.source_url.is_empty() {
        metadata.push_str(&format!(
            "    <dc:source>{}</dc:source>\n",
            xml_escape(&book.source_url)
        ));
    }

    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
    );
    manifest.push_str(&format!(
        "    <item id=\"style\" href=\"{}\" media-type=\"text/css\"/>\n",
        STYLESHEET_HREF
    ));
    for (i, image) in book.images.iter().enumerate() {
        manifest.push_str(&format!(
            "    <item id=\"img-{}\" href=\"{}\" media-type=\"{}\"/>\n",
            i + 1,
            xml_escape(&image.file_name),
            xml_escape(&image.media_type)
        ));
    }
    for ch in &book.chapters {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            chapter_id(&ch.file_name),
            xml_escape(&ch.file_name)
        ));
    }

    let mut spine = String::from("    <itemref idref=\"nav\"/>\n");
    for ch in &book.chapters {
        spine.push_str(&format!(
            "    <itemref idref=\"{}\"/>\n",
            chapter_id(&ch.file_name)
        ));
    }

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0" xml:lang="{lang}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
{metadata}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        lang = xml_escape(&book.language),
        metadata = metadata,
        manifest = manifest,
        spine = spine,
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

fn write_nav_xhtml(
    book: &Book,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_links = String::new();
    for ch in &book.chapters {
        nav_links.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            xml_escape(&ch.file_name),
            xml_escape(&ch.title)
        ));
    }
    let nav = format!(
        r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <meta charset="utf-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="{css}"/>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h2>{title}</h2>
    <ol>
{links}    </ol>
  </nav>
</body>
</html>
"#,
        lang = xml_escape(&book.language),
        title = xml_escape(&book.title),
        css = STYLESHEET_HREF,
        links = nav_links
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

fn write_ncx(
    book: &Book,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_points = String::new();
    for (i, ch) in book.chapters.iter().enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="{src}"/>
    </navPoint>
"#,
            n = i + 1,
            label = xml_escape(&ch.title),
            src = xml_escape(&ch.file_name)
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        uid = xml_escape(&book.identifier),
        title = xml_escape(&book.title),
        points = nav_points
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chapter, ImageAsset};
    use chrono::TimeZone;
    use std::io::Read;
    use zip::read::ZipArchive;

    fn minimal_book() -> Book {
        Book {
            title: "Testbuch".to_string(),
            author: "Tester".to_string(),
            language: "de".to_string(),
            identifier: "test-id".to_string(),
            description: None,
            source_url: "https://www.projekt-gutenberg.org/".to_string(),
            chapters: vec![Chapter {
                title: "Kapitel 1".to_string(),
                html: wrap_chapter_html("Kapitel 1", "", "de"),
                file_name: Chapter::file_name_for(1),
            }],
            images: Vec::new(),
        }
    }

    fn read_entry(zip: &mut ZipArchive<std::fs::File>, name: &str) -> String {
        let mut entry = zip.by_name(name).unwrap();
        let mut s = String::new();
        entry.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn wrap_chapter_html_empty_body_gets_placeholder() {
        let html = wrap_chapter_html("Titel", "", "de");
        assert!(html.contains("<h2>Titel</h2>"));
        assert!(html.contains("<p></p>"));
        assert!(html.contains(r#"lang="de""#));
    }

    #[test]
    fn wrap_chapter_html_whitespace_body_gets_placeholder() {
        let html = wrap_chapter_html("Titel", "  \n ", "de");
        assert!(html.contains("<p></p>"));
    }

    #[test]
    fn wrap_chapter_html_escapes_title_and_keeps_body_verbatim() {
        let html = wrap_chapter_html("Tom & \"Jerry\" <1>", "<p>Text &amp; mehr</p>", "en");
        assert!(html.contains("<title>Tom &amp; &quot;Jerry&quot; &lt;1&gt;</title>"));
        assert!(html.contains("<h2>Tom &amp; &quot;Jerry&quot; &lt;1&gt;</h2>"));
        assert!(html.contains("<p>Text &amp; mehr</p>"));
        assert!(!html.contains("<p></p>"));
    }

    #[test]
    fn validate_book_rejects_empty_title() {
        let mut book = minimal_book();
        book.title.clear();
        let path = std::env::temp_dir().join("gutenberg_dl_epub_void.epub");
        assert!(matches!(write_epub(&book, &path), Err(EpubError::EmptyTitle)));
    }

    #[test]
    fn validate_book_rejects_empty_identifier() {
        let mut book = minimal_book();
        book.identifier = "  ".to_string();
        let path = std::env::temp_dir().join("gutenberg_dl_epub_void.epub");
        assert!(matches!(write_epub(&book, &path), Err(EpubError::EmptyIdentifier)));
    }

    #[test]
    fn validate_book_rejects_no_chapters() {
        let mut book = minimal_book();
        book.chapters.clear();
        let path = std::env::temp_dir().join("gutenberg_dl_epub_void.epub");
        assert!(matches!(write_epub(&book, &path), Err(EpubError::NoChapters)));
    }

    #[test]
    fn write_epub_one_chapter_returns_requested_path() {
        let book = minimal_book();
        let path = std::env::temp_dir().join("gutenberg_dl_epub_one_chapter.epub");
        let written = write_epub(&book, &path).unwrap();
        assert_eq!(written, path);

        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert!(names.contains(&"mimetype".to_string()));
        assert!(names.contains(&"META-INF/container.xml".to_string()));
        assert!(names.contains(&"OEBPS/content.opf".to_string()));
        assert!(names.contains(&"OEBPS/nav.xhtml".to_string()));
        assert!(names.contains(&"OEBPS/toc.ncx".to_string()));
        assert!(names.contains(&"OEBPS/style/style.css".to_string()));
        let chapter_docs = names.iter().filter(|n| n.starts_with("OEBPS/chap_")).count();
        assert_eq!(chapter_docs, 1);
        assert!(!names.iter().any(|n| n.starts_with("OEBPS/images/")));

        let first = zip.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        drop(first);
        assert_eq!(read_entry(&mut zip, "mimetype"), "application/epub+zip");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn modified_timestamp_is_utc_seconds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(modified_timestamp(at), "2024-03-09T07:05:01Z");
    }

    #[test]
    fn write_epub_opf_has_one_modified_date() {
        let path = std::env::temp_dir().join("gutenberg_dl_epub_modified.epub");
        write_epub(&minimal_book(), &path).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let opf = read_entry(&mut zip, "OEBPS/content.opf");
        assert_eq!(opf.matches(r#"<meta property="dcterms:modified">"#).count(), 1);
        let start = opf.find(r#"<meta property="dcterms:modified">"#).unwrap()
            + r#"<meta property="dcterms:modified">"#.len();
        let value = &opf[start..start + 20];
        assert!(DateTime::parse_from_rfc3339(value).is_ok(), "bad timestamp {}", value);
        assert!(value.ends_with('Z'));
        assert!(opf[start + 20..].starts_with("</meta>"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_epub_spine_starts_with_nav_then_chapters_in_order() {
        let mut book = minimal_book();
        book.chapters.push(Chapter {
            title: "Kapitel 2".to_string(),
            html: wrap_chapter_html("Kapitel 2", "<p>Zwei</p>", "de"),
            file_name: Chapter::file_name_for(2),
        });
        let path = std::env::temp_dir().join("gutenberg_dl_epub_spine.epub");
        write_epub(&book, &path).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let opf = read_entry(&mut zip, "OEBPS/content.opf");
        let nav_pos = opf.find(r#"<itemref idref="nav"/>"#).unwrap();
        let ch1_pos = opf.find(r#"<itemref idref="ch-chap_001"/>"#).unwrap();
        let ch2_pos = opf.find(r#"<itemref idref="ch-chap_002"/>"#).unwrap();
        assert!(nav_pos < ch1_pos && ch1_pos < ch2_pos);
        assert!(opf.contains("<dc:language>de</dc:language>"));
        assert!(opf.contains("<dc:creator id=\"creator\">Tester</dc:creator>"));
        assert!(opf.contains("<dc:source>https://www.projekt-gutenberg.org/</dc:source>"));

        let nav = read_entry(&mut zip, "OEBPS/nav.xhtml");
        assert!(nav.contains(r#"<a href="chap_001.xhtml">Kapitel 1</a>"#));
        assert!(nav.contains(r#"<a href="chap_002.xhtml">Kapitel 2</a>"#));
        let ncx = read_entry(&mut zip, "OEBPS/toc.ncx");
        assert!(ncx.contains(r#"<content src="chap_002.xhtml"/>"#));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_epub_includes_images_in_manifest_and_archive() {
        let mut book = minimal_book();
        book.description = Some("Eine Beschreibung".to_string());
        book.images.push(ImageAsset {
            url: "https://www.projekt-gutenberg.org/bilder/cover.png".to_string(),
            file_name: "images/cover.png".to_string(),
            media_type: "image/png".to_string(),
            content: vec![0x89, b'P', b'N', b'G'],
        });
        let path = std::env::temp_dir().join("gutenberg_dl_epub_images.epub");
        write_epub(&book, &path).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let opf = read_entry(&mut zip, "OEBPS/content.opf");
        assert!(opf.contains(r#"href="images/cover.png" media-type="image/png""#));
        assert!(opf.contains("<dc:description>Eine Beschreibung</dc:description>"));
        let mut img = zip.by_name("OEBPS/images/cover.png").unwrap();
        let mut bytes = Vec::new();
        img.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
        drop(img);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn write_epub_creates_missing_parent_dirs() {
        let dir = std::env::temp_dir().join("gutenberg_dl_epub_nested").join("a").join("b");
        std::fs::remove_dir_all(std::env::temp_dir().join("gutenberg_dl_epub_nested")).ok();
        let path = dir.join("book.epub");
        let written = write_epub(&minimal_book(), &path).unwrap();
        assert!(written.exists());
        std::fs::remove_dir_all(std::env::temp_dir().join("gutenberg_dl_epub_nested")).ok();
    }
}
