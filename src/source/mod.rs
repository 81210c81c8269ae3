//! Source adapters. Host detection, the shared fetcher, and the two adapters.

mod client;
mod error;
mod fragment;

pub mod gutenberg;
pub mod projekt;

pub use client::{Fetch, FetchError, FetchResult, Fetcher, FetcherBuilder};
pub use error::SourceError;

use reqwest::Url;

/// Supported book source. Used for dispatch and for the --source override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// projekt-gutenberg.org reader pages, built into an EPUB chapter by chapter.
    Projekt,
    /// gutenberg.org catalog pages, downloaded as a ready EPUB.
    Gutenberg,
}

/// Prepend `https://` when the input does not start with a scheme.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed.trim_start_matches('/'))
    }
}

/// Leading `scheme://`: an ASCII letter, then letters, digits, `+`, `-` or `.`.
fn has_scheme(url: &str) -> bool {
    let scheme = match url.split_once("://") {
        Some((scheme, _)) => scheme,
        None => return false,
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Pick the source from the override, else from the URL host.
pub fn resolve_source(
    url_input: &str,
    override_source: Option<Source>,
) -> Result<Source, SourceError> {
    if let Some(source) = override_source {
        return Ok(source);
    }
    let url = Url::parse(url_input).map_err(|e| SourceError::InvalidUrl {
        input: url_input.to_string(),
        reason: e.to_string(),
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| SourceError::InvalidUrl {
            input: url_input.to_string(),
            reason: "URL has no host".to_string(),
        })?
        .to_ascii_lowercase();
    // projekt-gutenberg.org also contains "gutenberg.org"; check it first.
    if host.contains("projekt-gutenberg.org") {
        Ok(Source::Projekt)
    } else if host.contains("gutenberg.org") {
        Ok(Source::Gutenberg)
    } else {
        Err(SourceError::UnsupportedSource { host })
    }
}
