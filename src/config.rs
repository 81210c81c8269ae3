//! Optional config file loading. Search order: ./gutenberg-dl.toml, then
//! $XDG_CONFIG_HOME/gutenberg-dl/config.toml (or ~/.config/gutenberg-dl/config.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};

const LOCAL_CONFIG: &str = "gutenberg-dl.toml";
const APP_DIR: &str = "gutenberg-dl";

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Output directory when -o is not set. Paths are relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// HTTP User-Agent header.
    pub user_agent: Option<String>,
    /// Page request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Whole-file EPUB download timeout in seconds.
    pub download_timeout_secs: Option<u64>,
    /// Skip images by default (same as --no-images).
    pub no_images: Option<bool>,
}

/// Search order: (1) ./gutenberg-dl.toml, (2) $XDG_CONFIG_HOME/gutenberg-dl/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join(LOCAL_CONFIG)];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join(APP_DIR).join("config.toml"));
    }
    load_first(&paths)
}

fn load_first(paths: &[PathBuf]) -> Result<Option<Config>, String> {
    for path in paths {
        if path.exists() {
            return load_file(path).map(Some);
        }
    }
    Ok(None)
}

fn load_file(path: &Path) -> Result<Config, String> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    toml::from_str(&s).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}
