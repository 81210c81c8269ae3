//! gutenberg-dl: CLI downloader for Project Gutenberg and Projekt Gutenberg books, outputting EPUB.

pub mod cli;
pub mod config;
pub mod epub;
pub mod model;
pub mod source;
pub mod util;

// Re-exports for CLI and consumers.
pub use epub::{wrap_chapter_html, write_epub, EpubError};
pub use model::{Book, Chapter, ChapterRef, EpubMetadata, ImageAsset};
pub use source::gutenberg::{
    derive_download_url, download_epub, read_epub_metadata, DownloadResult,
};
pub use source::projekt::{
    discover_chapters, fetch_book, parse_chapter_content, BuildOptions, ImageRegistry,
};
pub use source::{
    normalize_url, resolve_source, Fetch, FetchError, FetchResult, Fetcher, FetcherBuilder, Source,
    SourceError,
};
