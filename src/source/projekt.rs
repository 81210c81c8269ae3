//! Projekt Gutenberg adapter. Fetches the reader page (metadata + chapter list), then each
//! chapter in order, rewriting images to package-local files; produces a [Book].

use crate::epub::wrap_chapter_html;
use crate::model::{Book, Chapter, ChapterRef, ImageAsset, UNKNOWN_AUTHOR, UNKNOWN_TITLE};
use crate::source::fragment::{render_fragment, FragmentEdits};
use crate::source::{Fetch, SourceError};
use crate::util::{
    clean_text, guess_extension, media_type_from_response, slugify, split_extension,
    unique_filename, url_basename,
};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

const DEFAULT_LANGUAGE: &str = "de";
const IMAGE_DIR: &str = "images/";

const BOOK_TITLE: &str = ".book-reader__title";
const BOOK_AUTHOR: &str = ".book-reader__author-link";
const BOOK_DESCRIPTION: &str = ".book-reader__description";
const BOOK_READER: &str = ".book-reader";
const BOOK_ID_ATTR: &str = "data-gutenberg-book-id";

const CHAPTER_LIST_LINK: &str = ".book-reader__chapter-list a";
const CHAPTER_LIST_TITLE: &str = ".book-reader__chapter-title";
const CHAPTER_SELECT_OPTION: &str = "#book-reader__chapter-select option";

const CHAPTER_HEADING: &str = ".book-reader__chapter-heading";
/// Content containers, tried in order.
const CONTENT_SELECTORS: [&str; 2] = [
    ".book-reader__chapter-content-wrapper",
    ".book-reader__chapter-text",
];

/// Chapter discovery strategies, tried in order until one finds something.
const DISCOVERY_STRATEGIES: [fn(&Html, &Url) -> Result<Vec<ChapterRef>, SourceError>; 2] =
    [chapter_list_links, chapter_select_options];

/// Parse a CSS selector or return an error (avoids panics from Selector::parse).
fn parse_selector(sel: &str) -> Result<Selector, SourceError> {
    Selector::parse(sel).map_err(|e| SourceError::InvalidSelector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}

fn parse_url(url: &str) -> Result<Url, SourceError> {
    Url::parse(url).map_err(|e| SourceError::InvalidUrl {
        input: url.to_string(),
        reason: e.to_string(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

fn first_match<'a>(doc: &'a Html, selector: &str) -> Result<Option<ElementRef<'a>>, SourceError> {
    let sel = parse_selector(selector)?;
    let found = doc.select(&sel).next();
    Ok(found)
}

fn first_text(doc: &Html, selector: &str) -> Result<Option<String>, SourceError> {
    Ok(first_match(doc, selector)?.and_then(|el| clean_text(Some(&element_text(el)))))
}

/// Options for one book build.
#[derive(Default)]
pub struct BuildOptions<'a> {
    /// Drop every `<img>` instead of fetching and packaging images.
    pub no_images: bool,
    /// Called with (chapter, total) before each chapter fetch.
    pub progress: Option<&'a dyn Fn(u32, u32)>,
    /// Dump raw pages, extracted fragments and wrapped documents here.
    pub debug_dir: Option<&'a Path>,
}

/// Book-level fields read from the reader page. Absent values stay `None`.
#[derive(Debug, Default, PartialEq, Eq)]
struct BookPage {
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    language: Option<String>,
    identifier: Option<String>,
}

fn parse_book_page(doc: &Html) -> Result<BookPage, SourceError> {
    let language = doc
        .root_element()
        .value()
        .attr("lang")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    let identifier = first_match(doc, BOOK_READER)?
        .and_then(|el| el.value().attr(BOOK_ID_ATTR))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    Ok(BookPage {
        title: first_text(doc, BOOK_TITLE)?,
        author: first_text(doc, BOOK_AUTHOR)?,
        description: first_text(doc, BOOK_DESCRIPTION)?,
        language,
        identifier,
    })
}

/// Identifier for pages without a book id: stable per final URL.
fn fallback_identifier(final_url: &str) -> String {
    format!(
        "projekt-gutenberg:{}",
        hex::encode(Sha256::digest(final_url.as_bytes()))
    )
}

fn resolve_href(base: &Url, href: Option<&str>) -> Option<String> {
    let href = href.map(str::trim).filter(|h| !h.is_empty())?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Links in the chapter list; title from the nested title element, else the link text.
fn chapter_list_links(doc: &Html, base: &Url) -> Result<Vec<ChapterRef>, SourceError> {
    let link_sel = parse_selector(CHAPTER_LIST_LINK)?;
    let title_sel = parse_selector(CHAPTER_LIST_TITLE)?;
    Ok(doc
        .select(&link_sel)
        .filter_map(|link| {
            let url = resolve_href(base, link.value().attr("href"))?;
            let title = link
                .select(&title_sel)
                .next()
                .and_then(|t| clean_text(Some(&element_text(t))))
                .or_else(|| clean_text(Some(&element_text(link))));
            Some(ChapterRef { url, title })
        })
        .collect())
}

/// Options of the chapter `<select>`; value is the chapter URL, text the title.
fn chapter_select_options(doc: &Html, base: &Url) -> Result<Vec<ChapterRef>, SourceError> {
    let option_sel = parse_selector(CHAPTER_SELECT_OPTION)?;
    Ok(doc
        .select(&option_sel)
        .filter_map(|option| {
            let url = resolve_href(base, option.value().attr("value"))?;
            let title = clean_text(Some(&element_text(option)));
            Some(ChapterRef { url, title })
        })
        .collect())
}

/// Chapter links in document order. Fails only when every strategy comes up empty.
pub fn discover_chapters(doc: &Html, base_url: &str) -> Result<Vec<ChapterRef>, SourceError> {
    let base = parse_url(base_url)?;
    for strategy in DISCOVERY_STRATEGIES {
        let refs = strategy(doc, &base)?;
        if !refs.is_empty() {
            return Ok(refs);
        }
    }
    Err(SourceError::NoChaptersFound {
        url: base_url.to_string(),
    })
}

/// Book-wide image assets, keyed by absolute source URL.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    assets: Vec<ImageAsset>,
    by_url: HashMap<String, usize>,
    used_names: HashSet<String>,
}

impl ImageRegistry {
    /// Package-local file name for `image_url`, fetching and registering the image on first sight.
    pub fn resolve(&mut self, image_url: &str, fetcher: &dyn Fetch) -> Result<String, SourceError> {
        if let Some(&i) = self.by_url.get(image_url) {
            return Ok(self.assets[i].file_name.clone());
        }
        let fetched = fetcher.fetch(image_url)?;
        let media_type = media_type_from_response(fetched.content_type.as_deref(), image_url);
        let ext = guess_extension(image_url, Some(&media_type));
        let base_name = match url_basename(image_url) {
            "" => "image",
            name => name,
        };
        let (stem, _) = split_extension(base_name);
        let name = unique_filename(&format!("{}{}", slugify(stem), ext), &mut self.used_names);
        let file_name = format!("{}{}", IMAGE_DIR, name);
        self.by_url.insert(image_url.to_string(), self.assets.len());
        self.assets.push(ImageAsset {
            url: image_url.to_string(),
            file_name: file_name.clone(),
            media_type,
            content: fetched.content,
        });
        Ok(file_name)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn assets(&self) -> &[ImageAsset] {
        &self.assets
    }

    pub fn into_assets(self) -> Vec<ImageAsset> {
        self.assets
    }
}

/// Heading and XHTML content fragment of one chapter page. The fragment may be empty.
pub fn parse_chapter_content(
    html: &str,
    base_url: &str,
    no_images: bool,
    images: &mut ImageRegistry,
    fetcher: &dyn Fetch,
) -> Result<(Option<String>, String), SourceError> {
    let doc = Html::parse_document(html);
    let title = first_text(&doc, CHAPTER_HEADING)?;

    let mut content = None;
    for selector in CONTENT_SELECTORS {
        content = first_match(&doc, selector)?;
        if content.is_some() {
            break;
        }
    }
    let content = match content {
        Some(c) => c,
        None => return Ok((title, String::new())),
    };

    let mut edits = FragmentEdits::default();
    let strip_sel = parse_selector("script, style")?;
    for el in content.select(&strip_sel) {
        edits.remove(el.id());
    }

    let img_sel = parse_selector("img")?;
    if no_images {
        for img in content.select(&img_sel) {
            edits.remove(img.id());
        }
    } else {
        let base = parse_url(base_url)?;
        for img in content.select(&img_sel) {
            let src = match img.value().attr("src").map(str::trim) {
                Some(s) if !s.is_empty() => s,
                _ => continue,
            };
            let image_url = base
                .join(src)
                .map_err(|e| SourceError::InvalidUrl {
                    input: src.to_string(),
                    reason: e.to_string(),
                })?
                .to_string();
            let file_name = images.resolve(&image_url, fetcher)?;
            edits.rewrite_image(img.id(), file_name);
        }
    }

    let container = content.id();
    let body = render_fragment(doc, container, &edits).map_err(SourceError::Serialize)?;
    Ok((title, body))
}

/// Writes intermediate pages for `--debug`.
struct DebugDump {
    dir: PathBuf,
}

impl DebugDump {
    fn create(dir: &Path) -> Result<Self, SourceError> {
        std::fs::create_dir_all(dir).map_err(|e| SourceError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn write(&self, name: &str, content: impl AsRef<[u8]>) -> Result<(), SourceError> {
        let path = self.dir.join(name);
        std::fs::write(&path, content).map_err(|e| SourceError::Io { path, source: e })
    }
}

/// Build a [Book] from a Projekt Gutenberg reader page.
///
/// Chapters are fetched one at a time in discovery order. Any failure aborts the build;
/// no partial book is returned.
pub fn fetch_book(
    url: &str,
    fetcher: &dyn Fetch,
    options: &BuildOptions<'_>,
) -> Result<Book, SourceError> {
    let page = fetcher.fetch(url)?;
    let debug = options.debug_dir.map(DebugDump::create).transpose()?;
    if let Some(d) = &debug {
        d.write("book.html", &page.content)?;
    }

    let doc = Html::parse_document(&page.text());
    let meta = parse_book_page(&doc)?;
    let chapter_refs = discover_chapters(&doc, &page.final_url)?;

    let language = meta
        .language
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    let identifier = meta
        .identifier
        .unwrap_or_else(|| fallback_identifier(&page.final_url));

    let mut images = ImageRegistry::default();
    let total = chapter_refs.len() as u32;
    let mut chapters = Vec::with_capacity(chapter_refs.len());

    for (i, chapter_ref) in chapter_refs.into_iter().enumerate() {
        let index = i + 1;
        if let Some(p) = options.progress {
            p(index as u32, total);
        }
        let chapter_page = fetcher.fetch(&chapter_ref.url)?;
        if let Some(d) = &debug {
            d.write(&format!("chapter-{:03}.raw.html", index), &chapter_page.content)?;
        }

        let (heading, body) = parse_chapter_content(
            &chapter_page.text(),
            &chapter_page.final_url,
            options.no_images,
            &mut images,
            fetcher,
        )?;
        let title = heading
            .or(chapter_ref.title)
            .unwrap_or_else(|| format!("Chapter {}", index));
        let html = wrap_chapter_html(&title, &body, &language);
        if let Some(d) = &debug {
            d.write(&format!("chapter-{:03}.content.html", index), &body)?;
            d.write(&format!("chapter-{:03}.xhtml", index), &html)?;
        }

        chapters.push(Chapter {
            title,
            html,
            file_name: Chapter::file_name_for(index),
        });
    }

    Ok(Book {
        title: meta.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        author: meta.author.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        language,
        identifier,
        description: meta.description,
        source_url: page.final_url,
        chapters,
        images: images.into_assets(),
    })
}
