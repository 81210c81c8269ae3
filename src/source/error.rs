//! Shared error type for both source adapters.

use super::client::FetchError;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal adapter error. Nothing here is retried or recovered.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Unsupported URL host '{host}'. Use projekt-gutenberg.org or gutenberg.org URLs.")]
    UnsupportedSource { host: String },

    #[error("Could not determine Project Gutenberg ebook id from URL: {url}")]
    UrlDerivation { url: String },

    #[error("No chapters found on Projekt Gutenberg page: {url}")]
    NoChaptersFound { url: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot serialize chapter content: {0}")]
    Serialize(#[source] std::io::Error),

    #[error("Invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },
}
