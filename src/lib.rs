//! # truerng
//!
//! Uniform random integers from a hardware entropy source.
//!
//! Raw 32-bit samples come from a hardware RNG device (`/dev/hwrng`) or the
//! CPU's RDSEED/RDRAND instructions, pass through a debiasing stage (von
//! Neumann extraction by default), and are served synchronously or through a
//! worker pool. Range requests use rejection sampling, so results carry no
//! modulo bias. Every discarded sample is counted.
//!
//! No pseudo-random fallback is ever used: if the hardware is missing, calls
//! fail with [`Error::DeviceUnavailable`]. Processes that depend on hardware
//! randomness should check [`is_available`] once at startup and bail out.
//!
//! ```no_run
//! if !truerng::is_available() {
//!     eprintln!("no hardware RNG");
//!     std::process::exit(1);
//! }
//! let roll = truerng::get_random_range(1, 6)?;
//! truerng::get_random_async(|result| match result {
//!     Ok(value) => println!("async value {}", value),
//!     Err(e) => eprintln!("{}", e),
//! });
//! println!("corrections so far: {}", truerng::get_corrections());
//! # Ok::<(), truerng::Error>(())
//! ```

pub mod config;
pub mod debias;
pub mod diagnostics;
pub mod dispatch;
pub mod entropy;
pub mod error;
pub mod generator;
pub mod pending;
pub mod range;
pub mod stats;

use std::sync::OnceLock;

pub use config::Config;
pub use diagnostics::{Diagnostics, VERSION};
pub use error::Error;
pub use generator::Generator;
pub use pending::Pending;

static GLOBAL: OnceLock<Generator> = OnceLock::new();

/// Installs the process-wide generator. Returns `false` if one already
/// exists (either installed earlier or created lazily by another call).
pub fn init(config: &Config) -> bool {
    let mut installed = false;
    GLOBAL.get_or_init(|| {
        installed = true;
        Generator::from_config(config)
    });
    installed
}

/// The process-wide generator, built from `/etc/truerng.toml` (or defaults)
/// on first use unless [`init`] ran earlier.
pub fn global() -> &'static Generator {
    GLOBAL.get_or_init(|| {
        let config = config::load_config(None).unwrap_or_else(|e| {
            log::warn!("{}", e);
            Config::default()
        });
        Generator::from_config(&config)
    })
}

pub fn is_available() -> bool {
    global().is_available()
}

pub fn get_version() -> &'static str {
    VERSION
}

pub fn get_random() -> Result<u32, Error> {
    global().random()
}

pub fn get_random_async<F>(on_complete: F)
where
    F: FnOnce(Result<u32, Error>) + Send + 'static,
{
    global().random_async(on_complete)
}

pub fn get_random_range(lower: i32, upper: i32) -> Result<i32, Error> {
    global().random_range(lower, upper)
}

pub fn get_random_range_async<F>(lower: i32, upper: i32, on_complete: F)
where
    F: FnOnce(Result<i32, Error>) + Send + 'static,
{
    global().random_range_async(lower, upper, on_complete)
}

pub fn get_corrections() -> u64 {
    global().corrections()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_static() {
        assert_eq!(get_version(), env!("CARGO_PKG_VERSION"));
        assert_eq!(get_version(), get_version());
    }

    #[test]
    fn test_global_range_validation_precedes_device_access() {
        // Holds whether or not this machine has hardware entropy.
        assert!(matches!(
            get_random_range(5, 4),
            Err(Error::InvalidRange { lower: 5, upper: 4 })
        ));
        assert_eq!(get_random_range(-3, -3).unwrap(), -3);
    }

    #[test]
    fn test_global_matches_availability() {
        match get_random() {
            Ok(_) => {}
            Err(e) => assert!(
                matches!(e, Error::DeviceUnavailable(_) | Error::DeviceReadFailure(_)),
                "unexpected error: {}",
                e
            ),
        }
        assert!(!init(&Config::default()));
    }
}
