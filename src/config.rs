use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/truerng.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Hardware RNG device first, then RDSEED, then RDRAND
    Auto,
    /// Character device (default /dev/hwrng)
    Hwrng,
    /// CPU RDRAND instruction
    Rdrand,
    /// CPU RDSEED instruction
    Rdseed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DebiasMethod {
    /// Von Neumann extraction over paired samples
    VonNeumann,
    /// Pass usable samples through unchanged
    None,
}

impl DebiasMethod {
    pub fn label(self) -> &'static str {
        match self {
            DebiasMethod::VonNeumann => "von-neumann",
            DebiasMethod::None => "none",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub device: String,
    pub read_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Auto,
            device: "/dev/hwrng".into(),
            read_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebiasConfig {
    pub method: DebiasMethod,
    pub max_consecutive_discards: u32,
}

impl Default for DebiasConfig {
    fn default() -> Self {
        Self {
            method: DebiasMethod::VonNeumann,
            max_consecutive_discards: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub debias: DebiasConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Clamp fields to valid ranges.
    pub fn validate(&mut self) {
        self.source.read_timeout_ms = self.source.read_timeout_ms.clamp(1, 60_000);
        self.debias.max_consecutive_discards =
            self.debias.max_consecutive_discards.clamp(1, 1_000_000);
        self.dispatch.workers = self.dispatch.workers.clamp(1, 64);
    }
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/truerng.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let mut config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;
    config.validate();

    Ok(config)
}
