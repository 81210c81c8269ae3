//! CLI parsing and orchestration. Parses args, dispatches to the download or build path,
//! writes the EPUB. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::epub::{write_epub, EpubError};
use crate::source::{
    gutenberg, normalize_url, projekt, resolve_source, Fetcher, Source, SourceError,
};
use crate::util::{is_dir_like, make_book_filename, resolve_output_path, slugify};
use clap::Parser;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEBUG_DIR_NAME: &str = "gutenberg-dl-debug";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Epub(#[from] EpubError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Source(_) => 2,
            CliRunError::Epub(_) => 3,
        }
    }
}

/// Value of `--source`: detect from the host, or force one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChoice {
    Auto,
    Projekt,
    Gutenberg,
}

impl SourceChoice {
    fn forced(self) -> Option<Source> {
        match self {
            SourceChoice::Auto => None,
            SourceChoice::Projekt => Some(Source::Projekt),
            SourceChoice::Gutenberg => Some(Source::Gutenberg),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gutenberg-dl")]
#[command(about = "Download or build EPUB files from Project Gutenberg and Projekt Gutenberg")]
#[command(
    after_help = "Config file keys (output_dir, user_agent, timeout_secs, download_timeout_secs, no_images) are read from ./gutenberg-dl.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    /// Book URL (gutenberg.org ebook page or projekt-gutenberg.org reader page). The scheme may be omitted.
    pub url: String,

    /// Output file or directory. Default: ./{author}-{title}.epub
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Source: auto (detect from host), projekt, or gutenberg.
    #[arg(long, default_value = "auto", value_parser = parse_source)]
    pub source: SourceChoice,

    /// Skip downloading images.
    #[arg(long)]
    pub no_images: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Save fetched pages and generated chapters to gutenberg-dl-debug/ next to the output.
    #[arg(long)]
    pub debug: bool,

    /// Print verbose error chain.
    #[arg(long)]
    pub verbose: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Page request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn parse_source(s: &str) -> Result<SourceChoice, String> {
    match s.to_lowercase().as_str() {
        "auto" => Ok(SourceChoice::Auto),
        "projekt" => Ok(SourceChoice::Projekt),
        "gutenberg" => Ok(SourceChoice::Gutenberg),
        _ => Err(format!(
            "Invalid --source value: '{}'. Use auto, projekt, or gutenberg.",
            s
        )),
    }
}

/// `--out`, else the configured output directory. The directory form keeps a trailing
/// separator so the default file name is appended even before it exists.
fn effective_out(out: Option<&Path>, config: Option<&Config>) -> Option<PathBuf> {
    match out {
        Some(p) => Some(p.to_path_buf()),
        None => config
            .and_then(|c| c.output_dir.as_ref())
            .map(|dir| dir.join("")),
    }
}

/// Where `--debug` dumps go for `url`: next to the output, else under the CWD.
fn debug_dir_for(url: &str, out: Option<&Path>, cwd: &Path) -> PathBuf {
    let base = match out {
        Some(p) if is_dir_like(p) => p.to_path_buf(),
        Some(p) => match p.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => cwd.to_path_buf(),
        },
        None => cwd.to_path_buf(),
    };
    base.join(DEBUG_DIR_NAME).join(slugify(url))
}

fn map_source_error(e: SourceError) -> CliRunError {
    match &e {
        SourceError::InvalidUrl { input, reason } => CliRunError::InvalidInput(format!(
            "Expected a book URL. Example: https://www.gutenberg.org/ebooks/77830. Invalid: {}: {}",
            input, reason
        )),
        SourceError::UnsupportedSource { host } => CliRunError::InvalidInput(format!(
            "Unsupported URL host: {}. Use projekt-gutenberg.org or gutenberg.org URLs, or --source to override.",
            host
        )),
        _ => CliRunError::Source(e),
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let url = normalize_url(&args.url);
    let source = resolve_source(&url, args.source.forced()).map_err(map_source_error)?;

    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let no_images = args.no_images || config.as_ref().and_then(|c| c.no_images).unwrap_or(false);
    let out = effective_out(args.out.as_deref(), config.as_ref());

    let timeout_secs = args
        .timeout
        .or_else(|| config.as_ref().and_then(|c| c.timeout_secs));
    let download_timeout_secs = config.as_ref().and_then(|c| c.download_timeout_secs);
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.as_ref().and_then(|c| c.user_agent.clone()));

    let mut builder = Fetcher::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout_secs(secs);
    }
    if let Some(secs) = download_timeout_secs {
        builder = builder.download_timeout_secs(secs);
    }
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    let fetcher = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let log = |message: String| {
        if !args.quiet {
            eprintln!("{}", message);
        }
    };

    if source == Source::Gutenberg {
        let download_url =
            gutenberg::derive_download_url(&url, no_images).map_err(map_source_error)?;
        log(format!("Downloading EPUB from {}", download_url));
        let result = gutenberg::download_epub(&download_url, out.as_deref(), &fetcher)?;
        log(format!("Saved EPUB to {}", result.output_path.display()));
        return Ok(());
    }

    let debug_dir = if args.debug {
        let cwd = std::env::current_dir().map_err(|e| {
            CliRunError::InvalidInput(format!("Cannot determine current directory: {}", e))
        })?;
        let dir = debug_dir_for(&url, out.as_deref(), &cwd);
        log(format!("Writing debug files to {}", dir.display()));
        Some(dir)
    } else {
        None
    };

    let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |n: u32, total: u32| {
        if total == 0 {
            return;
        }
        let mut state = progress_state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            if let Ok(style) = indicatif::ProgressStyle::default_bar()
                .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
            {
                bar.set_style(
                    style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                        .progress_chars("█▉▊▋▌▍▎▏ "),
                );
            }
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_position(n as u64);
        pb.set_message(format!("Downloading chapter {}/{}", n, total));
    };
    let progress: Option<&dyn Fn(u32, u32)> = if args.quiet { None } else { Some(&progress_cb) };

    let options = projekt::BuildOptions {
        no_images,
        progress,
        debug_dir: debug_dir.as_deref(),
    };
    let built = projekt::fetch_book(&url, &fetcher, &options);

    if let Some(pb) = progress_state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let book = built?;

    let default_name = make_book_filename(Some(&book.author), Some(&book.title));
    let output_path = resolve_output_path(out.as_deref(), &default_name);
    let written = write_epub(&book, &output_path)?;
    log(format!("Saved EPUB to {}", written.display()));
    Ok(())
}
