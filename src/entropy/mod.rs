pub mod cpurng;
pub mod hwrng;

#[cfg(test)]
pub(crate) mod stub;

use std::time::Duration;

use crate::config::{SourceConfig, SourceKind};
use crate::error::Error;

/// A single 32-bit pattern pulled from the hardware source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample(pub u32);

/// An open connection to an entropy source.
///
/// Handles are only ever driven by one draw at a time; the engine holds its
/// lock for the whole read sequence.
pub trait EntropyHandle: Send {
    /// Short name of the backend actually serving reads.
    fn label(&self) -> &'static str;

    /// Pulls one raw sample.
    ///
    /// `Ok(None)` means the source produced a pull it flagged as unusable
    /// (e.g. RDRAND with the carry flag clear). Such pulls are discarded by
    /// the caller and counted as corrections.
    fn read_raw(&mut self) -> Result<Option<RawSample>, Error>;
}

/// A physical entropy source that can be opened on demand.
pub trait EntropySource: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self) -> Result<Box<dyn EntropyHandle>, Error>;

    /// Whether the source can be opened right now. Never cached.
    fn is_available(&self) -> bool {
        self.open().is_ok()
    }
}

/// Tries the hardware RNG device, then RDSEED, then RDRAND.
/// Re-evaluated on every `open`, so a device that appears later is picked up.
pub struct AutoSource {
    candidates: Vec<Box<dyn EntropySource>>,
}

impl AutoSource {
    pub fn new(device: &str, read_timeout: Duration) -> Self {
        Self {
            candidates: vec![
                Box::new(hwrng::DeviceSource::new(device, read_timeout)),
                Box::new(cpurng::CpuSource::rdseed()),
                Box::new(cpurng::CpuSource::rdrand()),
            ],
        }
    }
}

impl EntropySource for AutoSource {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn open(&self) -> Result<Box<dyn EntropyHandle>, Error> {
        let mut reasons = Vec::new();
        for candidate in &self.candidates {
            match candidate.open() {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    log::debug!("{} unavailable: {}", candidate.name(), e);
                    reasons.push(format!("{}: {}", candidate.name(), e));
                }
            }
        }
        Err(Error::DeviceUnavailable(format!(
            "no hardware entropy source found ({})",
            reasons.join("; ")
        )))
    }
}

/// Builds the source described by the configuration.
pub fn build_source(config: &SourceConfig) -> Box<dyn EntropySource> {
    let timeout = Duration::from_millis(config.read_timeout_ms);
    match config.kind {
        SourceKind::Auto => Box::new(AutoSource::new(&config.device, timeout)),
        SourceKind::Hwrng => Box::new(hwrng::DeviceSource::new(&config.device, timeout)),
        SourceKind::Rdrand => Box::new(cpurng::CpuSource::rdrand()),
        SourceKind::Rdseed => Box::new(cpurng::CpuSource::rdseed()),
    }
}
