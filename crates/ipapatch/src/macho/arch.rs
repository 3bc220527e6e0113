//! CPU identification and the set of slices the patcher handles.

use goblin::mach::constants::cputype::{CPU_TYPE_ARM64, CPU_TYPE_X86_64};
use std::fmt;

/// Capability bits carried in the top byte of a CPU subtype.
const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;

const CPU_SUBTYPE_ARM64_ALL: u32 = 0;
const CPU_SUBTYPE_ARM64_V8: u32 = 1;
const CPU_SUBTYPE_ARM64E: u32 = 2;
const CPU_SUBTYPE_X86_64_ALL: u32 = 3;
const CPU_SUBTYPE_X86_64_H: u32 = 8;

/// CPU type and subtype of a single-architecture image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arch {
    pub cputype: u32,
    pub cpusubtype: u32,
}

impl Arch {
    pub fn new(cputype: u32, cpusubtype: u32) -> Self {
        Self { cputype, cpusubtype }
    }

    fn subtype(&self) -> u32 {
        self.cpusubtype & !CPU_SUBTYPE_MASK
    }

    /// Whether slices of this architecture are patched inside fat binaries.
    ///
    /// Covers arm64 (plain, v8 and arm64e) and x86_64 (plain and Haswell).
    /// Anything else is dropped from the rebuilt container.
    pub fn is_supported(&self) -> bool {
        match self.cputype {
            CPU_TYPE_ARM64 => matches!(
                self.subtype(),
                CPU_SUBTYPE_ARM64_ALL | CPU_SUBTYPE_ARM64_V8 | CPU_SUBTYPE_ARM64E
            ),
            CPU_TYPE_X86_64 => {
                matches!(self.subtype(), CPU_SUBTYPE_X86_64_ALL | CPU_SUBTYPE_X86_64_H)
            }
            _ => false,
        }
    }

    /// Short name used in reports and scratch file names.
    pub fn name(&self) -> String {
        match (self.cputype, self.subtype()) {
            (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E) => "arm64e".into(),
            (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_V8) => "arm64v8".into(),
            (CPU_TYPE_ARM64, _) => "arm64".into(),
            (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_H) => "x86_64h".into(),
            (CPU_TYPE_X86_64, _) => "x86_64".into(),
            _ => format!("cpu{:#x}.{:#x}", self.cputype, self.subtype()),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
