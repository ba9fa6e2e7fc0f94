use std::fmt;

use crate::config::DebiasMethod;

/// Crate version reported by `get_version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Point-in-time view of a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub available: bool,
    pub version: &'static str,
    /// Configured source kind.
    pub source: &'static str,
    /// Backend behind the currently open handle, if one is open.
    pub backend: Option<&'static str>,
    pub debias: DebiasMethod,
    pub corrections: u64,
    pub debias_corrections: u64,
    pub range_corrections: u64,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version:      {}", self.version)?;
        writeln!(f, "available:    {}", if self.available { "yes" } else { "no" })?;
        writeln!(f, "source:       {}", self.source)?;
        writeln!(f, "backend:      {}", self.backend.unwrap_or("(not open)"))?;
        writeln!(f, "debias:       {}", self.debias.label())?;
        write!(
            f,
            "corrections:  {} (debias {}, range {})",
            self.corrections, self.debias_corrections, self.range_corrections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_package() {
        assert_eq!(VERSION, "0.1.1");
    }

    #[test]
    fn test_display() {
        let diag = Diagnostics {
            available: false,
            version: VERSION,
            source: "hwrng",
            backend: None,
            debias: DebiasMethod::VonNeumann,
            corrections: 5,
            debias_corrections: 3,
            range_corrections: 2,
        };
        let text = diag.to_string();
        assert!(text.contains("available:    no"));
        assert!(text.contains("(not open)"));
        assert!(text.contains("von-neumann"));
        assert!(text.contains("5 (debias 3, range 2)"));
    }
}
