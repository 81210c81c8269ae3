//! In-memory book model.
//!
//! The HTML-source adapter builds a [Book] once; the EPUB writer consumes it immutably.

/// Title used when a source page carries no title.
pub const UNKNOWN_TITLE: &str = "Unknown title";
/// Author used when a source page carries no author.
pub const UNKNOWN_AUTHOR: &str = "Unknown author";

/// One book, ready for packaging.
#[derive(Debug, Clone)]
pub struct Book {
    pub title: String,
    pub author: String,
    /// BCP-47-ish language code, written to the package and every chapter.
    pub language: String,
    /// Non-empty package identifier.
    pub identifier: String,
    pub description: Option<String>,
    /// Final URL of the book page after redirects.
    pub source_url: String,
    /// Spine order.
    pub chapters: Vec<Chapter>,
    /// One entry per distinct source URL, in first-reference order.
    pub images: Vec<ImageAsset>,
}

/// One chapter document.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub title: String,
    /// Complete XHTML document (already wrapped); the body is never empty.
    pub html: String,
    /// `chap_NNN.xhtml`, unique within the book.
    pub file_name: String,
}

impl Chapter {
    /// File name for the 1-based chapter `index`.
    pub fn file_name_for(index: usize) -> String {
        format!("chap_{:03}.xhtml", index)
    }
}

/// An image referenced from chapter content and stored in the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    /// Absolute source URL; the dedup key.
    pub url: String,
    /// `images/<name>`, unique within the book.
    pub file_name: String,
    pub media_type: String,
    pub content: Vec<u8>,
}

/// A chapter link found on the book page. Consumed immediately to produce a [Chapter].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRef {
    pub url: String,
    pub title: Option<String>,
}

/// Metadata read back from a downloaded EPUB. Absent fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpubMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub language: Option<String>,
}
