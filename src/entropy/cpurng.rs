use crate::error::Error;

use super::{EntropyHandle, EntropySource, RawSample};

// ---------------------------------------------------------------------------
// x86_64 implementation
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::asm;
    use core::arch::x86_64::__cpuid_count;
    use core::sync::atomic::{AtomicU8, Ordering};

    // 0 = unchecked, 1 = absent, 2 = present
    static RDRAND_SUPPORT: AtomicU8 = AtomicU8::new(0);
    static RDSEED_SUPPORT: AtomicU8 = AtomicU8::new(0);

    fn cached_feature(slot: &AtomicU8, probe: impl FnOnce() -> bool) -> bool {
        let cached = slot.load(Ordering::Relaxed);
        if cached != 0 {
            return cached == 2;
        }
        let present = probe();
        slot.store(if present { 2 } else { 1 }, Ordering::Relaxed);
        present
    }

    /// Checks CPUID leaf 1, ECX bit 30 for RDRAND support.
    pub fn has_rdrand() -> bool {
        cached_feature(&RDRAND_SUPPORT, || {
            // SAFETY: CPUID is always available on x86_64.
            let leaf = unsafe { __cpuid_count(1, 0) };
            (leaf.ecx >> 30) & 1 == 1
        })
    }

    /// Checks CPUID leaf 7 subleaf 0, EBX bit 18 for RDSEED support.
    pub fn has_rdseed() -> bool {
        cached_feature(&RDSEED_SUPPORT, || {
            // SAFETY: CPUID is always available on x86_64.
            let max_leaf = unsafe { __cpuid_count(0, 0) }.eax;
            if max_leaf < 7 {
                return false;
            }
            let leaf = unsafe { __cpuid_count(7, 0) };
            (leaf.ebx >> 18) & 1 == 1
        })
    }

    /// Executes RDRAND once. `None` when the carry flag reports no data.
    pub fn rdrand32() -> Option<u32> {
        let value: u32;
        let success: u8;
        // SAFETY: only called after has_rdrand() confirmed support.
        unsafe {
            asm!(
                "rdrand {val:e}",
                "setc {ok}",
                val = out(reg) value,
                ok = out(reg_byte) success,
                options(nomem, nostack),
            );
        }
        (success != 0).then_some(value)
    }

    /// Executes RDSEED once. `None` when the carry flag reports no data.
    pub fn rdseed32() -> Option<u32> {
        let value: u32;
        let success: u8;
        // SAFETY: only called after has_rdseed() confirmed support.
        unsafe {
            asm!(
                "rdseed {val:e}",
                "setc {ok}",
                val = out(reg) value,
                ok = out(reg_byte) success,
                options(nomem, nostack),
            );
        }
        (success != 0).then_some(value)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Rdrand,
    Rdseed,
}

impl Instruction {
    fn label(self) -> &'static str {
        match self {
            Instruction::Rdrand => "rdrand",
            Instruction::Rdseed => "rdseed",
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn supported(self) -> bool {
        match self {
            Instruction::Rdrand => x86::has_rdrand(),
            Instruction::Rdseed => x86::has_rdseed(),
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn supported(self) -> bool {
        false
    }
}

/// CPU hardware RNG instruction as an entropy source.
///
/// Each raw pull executes the instruction exactly once; a clear carry flag
/// is reported as an unusable pull rather than retried here, so the engine
/// sees and counts every failure.
pub struct CpuSource {
    instruction: Instruction,
}

impl CpuSource {
    pub fn rdrand() -> Self {
        Self {
            instruction: Instruction::Rdrand,
        }
    }

    pub fn rdseed() -> Self {
        Self {
            instruction: Instruction::Rdseed,
        }
    }
}

impl EntropySource for CpuSource {
    fn name(&self) -> &'static str {
        self.instruction.label()
    }

    fn open(&self) -> Result<Box<dyn EntropyHandle>, Error> {
        if !self.instruction.supported() {
            return Err(Error::DeviceUnavailable(format!(
                "{} not supported on this CPU",
                self.instruction.label().to_uppercase()
            )));
        }
        Ok(Box::new(CpuHandle {
            instruction: self.instruction,
        }))
    }
}

struct CpuHandle {
    instruction: Instruction,
}

impl EntropyHandle for CpuHandle {
    fn label(&self) -> &'static str {
        self.instruction.label()
    }

    #[cfg(target_arch = "x86_64")]
    fn read_raw(&mut self) -> Result<Option<RawSample>, Error> {
        let value = match self.instruction {
            Instruction::Rdrand => x86::rdrand32(),
            Instruction::Rdseed => x86::rdseed32(),
        };
        Ok(value.map(RawSample))
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn read_raw(&mut self) -> Result<Option<RawSample>, Error> {
        Err(Error::DeviceReadFailure(
            "CPU hardware RNG not available on this architecture".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(CpuSource::rdrand().name(), "rdrand");
        assert_eq!(CpuSource::rdseed().name(), "rdseed");
    }

    #[test]
    fn test_open_matches_availability() {
        for source in [CpuSource::rdrand(), CpuSource::rdseed()] {
            match source.open() {
                Ok(mut handle) => {
                    assert_eq!(handle.label(), source.name());
                    // A supported instruction either yields data or flags the pull.
                    assert!(handle.read_raw().is_ok());
                }
                Err(e) => {
                    assert!(matches!(e, Error::DeviceUnavailable(_)));
                    assert!(!source.is_available());
                }
            }
        }
    }
}
