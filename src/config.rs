//! Runtime configuration.
//!
//! Values are resolved in order, later sources winning: built-in defaults,
//! an optional TOML file, then `MICROSEARCH_*` environment variables. The
//! binary applies command-line flags on top.
//!
//! ```toml
//! data_dir = "static/representations"
//! feature_file = "vgg16_multiscale_block5_conv3-vlad-32.msfs"
//! n_components = 64
//! layout = { nested = { perplexity = 40 } }
//! ```

use crate::error::{Result, SearchError};
use crate::index::{BuildOptions, DEFAULT_COMPONENTS};
use crate::service::BuildSpec;
use crate::store::{DEFAULT_PERPLEXITY, StoreLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of results returned by a similarity query.
pub const DEFAULT_RESULTS: usize = 16;
/// Default port of the HTTP server.
pub const DEFAULT_PORT: u16 = 7878;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding feature containers.
    pub data_dir: PathBuf,
    /// Container file name inside `data_dir`.
    pub feature_file: String,
    pub layout: StoreLayout,
    /// Principal components kept after reduction.
    pub n_components: usize,
    /// Results per query when the caller does not ask for a count.
    pub default_results: usize,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            feature_file: "features.msfs".to_string(),
            layout: StoreLayout::Flat,
            n_components: DEFAULT_COMPONENTS,
            default_results: DEFAULT_RESULTS,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Reads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Config::default(),
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Parses a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SearchError::Config(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| SearchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `MICROSEARCH_*` overrides looked up through `lookup`.
    ///
    /// - `MICROSEARCH_DATA_DIR`, `MICROSEARCH_FEATURE_FILE`
    /// - `MICROSEARCH_PERPLEXITY`: switches to the nested layout
    /// - `MICROSEARCH_COMPONENTS`, `MICROSEARCH_RESULTS`
    /// - `MICROSEARCH_HOST`, `MICROSEARCH_PORT`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MICROSEARCH_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("MICROSEARCH_FEATURE_FILE") {
            self.feature_file = file;
        }
        if let Some(value) = lookup("MICROSEARCH_PERPLEXITY") {
            self.layout = StoreLayout::Nested { perplexity: parse_var("MICROSEARCH_PERPLEXITY", &value)? };
        }
        if let Some(value) = lookup("MICROSEARCH_COMPONENTS") {
            self.n_components = parse_var("MICROSEARCH_COMPONENTS", &value)?;
        }
        if let Some(value) = lookup("MICROSEARCH_RESULTS") {
            self.default_results = parse_var("MICROSEARCH_RESULTS", &value)?;
        }
        if let Some(host) = lookup("MICROSEARCH_HOST") {
            self.host = host;
        }
        if let Some(value) = lookup("MICROSEARCH_PORT") {
            self.port = parse_var("MICROSEARCH_PORT", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Switches to the nested layout with `perplexity`, or the default one.
    pub fn with_perplexity(mut self, perplexity: Option<u32>) -> Self {
        self.layout = StoreLayout::Nested { perplexity: perplexity.unwrap_or(DEFAULT_PERPLEXITY) };
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(SearchError::Config("n_components must be at least 1".to_string()));
        }
        if self.default_results == 0 {
            return Err(SearchError::Config("default_results must be at least 1".to_string()));
        }
        if self.feature_file.is_empty() {
            return Err(SearchError::Config("feature_file must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn feature_path(&self) -> PathBuf {
        self.data_dir.join(&self.feature_file)
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions { n_components: self.n_components, layout: self.layout }
    }

    pub fn build_spec(&self) -> BuildSpec {
        BuildSpec { source: self.feature_path(), options: self.build_options() }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SearchError::Config(format!("invalid value for {}: '{}'", key, value)))
}
