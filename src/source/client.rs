//! Blocking HTTP fetcher with a fixed header set and per-request timeouts. No retries.

use encoding_rs::{Encoding, UTF_8};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_USER_AGENT: &str = concat!(
    "gutenberg-dl/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/holgern/gutenberg-dl)"
);
const ACCEPT_VALUE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const MAX_REDIRECTS: usize = 10;
const META_SNIFF_BYTES: usize = 1024;

/// Transport, HTTP, or write failure. Always fatal for the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("Cannot write download to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Body, final URL after redirects, and declared `Content-Type` of one GET.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: Vec<u8>,
    pub final_url: String,
    pub content_type: Option<String>,
}

impl FetchResult {
    /// Body decoded with the declared charset: `Content-Type` first, then a `<meta>` charset
    /// near the top of the page, else UTF-8. A byte-order mark wins over both. Invalid
    /// sequences are replaced.
    pub fn text(&self) -> String {
        let encoding = self
            .content_type
            .as_deref()
            .and_then(charset_from_content_type)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .or_else(|| charset_from_meta(&self.content))
            .unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(&self.content);
        text.into_owned()
    }
}

fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches(|c: char| c == '"' || c == '\''))
        } else {
            None
        }
    })
}

/// Charset from `<meta charset=...>` or `<meta http-equiv ... content="...; charset=...">`
/// within the first [META_SNIFF_BYTES] of the page.
fn charset_from_meta(content: &[u8]) -> Option<&'static Encoding> {
    let head = &content[..content.len().min(META_SNIFF_BYTES)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let mut rest = head.as_str();
    while let Some(start) = rest.find("<meta") {
        rest = &rest[start + "<meta".len()..];
        let tag = &rest[..rest.find('>').unwrap_or(rest.len())];
        let value = match tag.find("charset=") {
            Some(i) => tag[i + "charset=".len()..]
                .trim_start_matches(|c: char| c == '"' || c == '\'' || c == ' '),
            None => continue,
        };
        let end = value
            .find(|c: char| matches!(c, '"' | '\'' | ';' | ' ' | '/'))
            .unwrap_or(value.len());
        if let Some(encoding) = Encoding::for_label(value[..end].as_bytes()) {
            return Some(encoding);
        }
    }
    None
}

/// Page-fetching seam used by the HTML-source adapter.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<FetchResult, FetchError>;
}

/// Blocking HTTP client. One instance serves a whole run.
#[derive(Debug)]
pub struct Fetcher {
    inner: reqwest::blocking::Client,
    timeout: Duration,
    download_timeout: Duration,
}

impl Fetcher {
    /// Build a fetcher with default User-Agent and timeouts.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::default()
    }

    fn get(&self, url: &str, timeout: Duration) -> Result<FetchResult, FetchError> {
        let response = self
            .inner
            .get(url)
            .header(ACCEPT, ACCEPT_VALUE)
            .timeout(timeout)
            .send()
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content = response.bytes().map_err(|e| FetchError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        Ok(FetchResult {
            content: content.to_vec(),
            final_url,
            content_type,
        })
    }

    /// GET `url` with the download timeout and write the body to `dest`, replacing any
    /// existing file.
    pub fn download_to(&self, url: &str, dest: &Path) -> Result<FetchResult, FetchError> {
        let result = self.get(url, self.download_timeout)?;
        std::fs::write(dest, &result.content).map_err(|e| FetchError::Write {
            path: dest.to_path_buf(),
            source: e,
        })?;
        Ok(result)
    }
}

impl Fetch for Fetcher {
    /// GET `url` with the page timeout.
    fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        self.get(url, self.timeout)
    }
}

/// Builder for [Fetcher] with optional User-Agent and timeouts.
#[derive(Debug)]
pub struct FetcherBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    download_timeout_secs: u64,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

impl FetcherBuilder {
    /// Set a custom User-Agent. If not set, the gutenberg-dl default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Page request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Whole-file download timeout in seconds. Default 60.
    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<Fetcher, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Fetcher {
            inner,
            timeout: Duration::from_secs(self.timeout_secs),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_timeouts() -> Result<(), reqwest::Error> {
        let fetcher = Fetcher::builder()
            .timeout_secs(5)
            .download_timeout_secs(7)
            .user_agent("Test/1.0")
            .build()?;
        assert_eq!(fetcher.timeout, Duration::from_secs(5));
        assert_eq!(fetcher.download_timeout, Duration::from_secs(7));
        Ok(())
    }

    #[test]
    fn default_timeouts() -> Result<(), reqwest::Error> {
        let fetcher = Fetcher::new()?;
        assert_eq!(fetcher.timeout, Duration::from_secs(30));
        assert_eq!(fetcher.download_timeout, Duration::from_secs(60));
        Ok(())
    }

    fn page(content: &[u8], content_type: Option<&str>) -> FetchResult {
        FetchResult {
            content: content.to_vec(),
            final_url: "https://example.org/".to_string(),
            content_type: content_type.map(String::from),
        }
    }

    #[test]
    fn text_defaults_to_lossy_utf8() {
        assert_eq!(page(&[b'a', 0xff, b'b'], None).text(), "a\u{fffd}b");
        assert_eq!(page("Über".as_bytes(), Some("text/html")).text(), "Über");
    }

    #[test]
    fn text_uses_header_charset() {
        let latin1 = b"<h2>\xdcber M\xe4nner und Stra\xdfen</h2>";
        let result = page(latin1, Some("text/html; charset=ISO-8859-1"));
        assert_eq!(result.text(), "<h2>Über Männer und Straßen</h2>");
        let quoted = page(latin1, Some(r#"text/html; charset="iso-8859-1""#));
        assert_eq!(quoted.text(), "<h2>Über Männer und Straßen</h2>");
    }

    #[test]
    fn text_falls_back_to_meta_charset() {
        let html =
            b"<html><head><meta charset=\"windows-1252\"></head><body>Gr\xfc\xdfe</body></html>";
        assert!(page(html, Some("text/html")).text().contains("Grüße"));
        let http_equiv =
            b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\"><p>\xe4</p>";
        assert!(page(http_equiv, None).text().contains("<p>ä</p>"));
    }

    #[test]
    fn header_charset_wins_over_meta() {
        let html = "<meta charset=\"iso-8859-1\"><p>Ä</p>".as_bytes();
        let result = page(html, Some("text/html; charset=utf-8"));
        assert!(result.text().contains("<p>Ä</p>"));
    }

    #[test]
    fn unknown_header_charset_is_ignored() {
        let html = b"<meta charset=\"iso-8859-1\"><p>\xe4</p>";
        let result = page(html, Some("text/html; charset=x-bogus"));
        assert!(result.text().contains("<p>ä</p>"));
    }

    #[test]
    fn default_user_agent_names_the_tool() {
        assert!(DEFAULT_USER_AGENT.starts_with("gutenberg-dl/"));
    }
}
