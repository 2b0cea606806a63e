//! Layered configuration for the simplecache tools.
//!
//! Values are merged, later layers winning, from:
//!
//! 1. built-in defaults,
//! 2. a config file: the one given explicitly, otherwise `config.toml` in the
//!    platform config directory (if it exists). YAML and JSON are picked by
//!    extension, anything else is read as TOML,
//! 3. environment variables prefixed with `SIMPLECACHE_`, such as
//!    `SIMPLECACHE_CACHE_DIR`.

mod error;

pub use crate::error::{Error, ErrorKind, Result};
use directories::{BaseDirs, ProjectDirs};
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of the environment variables read into [`Config`].
pub const ENV_PREFIX: &str = "SIMPLECACHE_";
/// Name of the config file looked for in the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache directory to read. When unset, a well-known browser cache
    /// location is used instead; see [`Config::cache_dir`].
    pub cache_dir: Option<PathBuf>,
    /// Default `tracing` filter, used when `RUST_LOG` is not set.
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self { cache_dir: None, log: "warn".to_string() }
    }
}

impl Config {
    /// Load configuration from every layer.
    ///
    /// An explicit `path` must exist. Without one, the platform config file
    /// is used only if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::MissingFile(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|path| path.is_file()),
        };
        if let Some(file) = &file {
            tracing::debug!(file = %file.display(), "Loading config file");
        }
        Self::from_figment(&Self::figment(file.as_deref()))
    }

    /// The merged providers: defaults, then `file` (if any), then environment.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => figment.merge(Toml::file_exact(file)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        figment.extract().or_raise(|| ErrorKind::Load)
    }

    /// The configured cache directory, or the first well-known browser cache
    /// directory that exists.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let detected = first_existing(candidate_cache_dirs()).ok_or_raise(|| ErrorKind::NoCacheDir)?;
        tracing::debug!(dir = %detected.display(), "Detected cache directory");
        Ok(detected)
    }
}

/// `config.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "simplecache").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Default-profile `Cache_Data` directories of Chrome and Chromium on Linux,
/// macOS and Windows, in that order.
pub fn candidate_cache_dirs() -> Vec<PathBuf> {
    let Some(base) = BaseDirs::new() else {
        return Vec::new();
    };
    let profile = ["Default", "Cache", "Cache_Data"];
    let roots = [
        (base.cache_dir(), &["google-chrome"][..]),
        (base.cache_dir(), &["chromium"][..]),
        (base.cache_dir(), &["Google", "Chrome"][..]),
        (base.cache_dir(), &["Chromium"][..]),
        (base.data_local_dir(), &["Google", "Chrome", "User Data"][..]),
        (base.data_local_dir(), &["Chromium", "User Data"][..]),
    ];
    roots
        .into_iter()
        .map(|(root, parts)| parts.iter().chain(profile.iter()).fold(root.to_path_buf(), |path, part| path.join(part)))
        .collect()
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|path| path.is_dir())
}
