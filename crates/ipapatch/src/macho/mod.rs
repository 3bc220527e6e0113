//! Mach-O parsing, dylib injection and fat binary handling

pub mod arch;
pub mod command;
pub mod fat;
pub mod image;
pub mod inject;

#[cfg(test)]
pub(crate) mod fixtures;

pub use arch::Arch;
pub use command::{DylibCommand, LinkeditData, LoadCommand};
pub use fat::{patch_slice, Container, FatCoordinator, SliceRequest};
pub use image::MachOImage;
pub use inject::{inject_dylib, RemovedSignature};

/// Rounds `value` up to a multiple of `alignment` (a power of two).
pub fn align_to(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 16), 0);
        assert_eq!(align_to(1, 16), 16);
        assert_eq!(align_to(0x4000, 0x4000), 0x4000);
        assert_eq!(align_to(0x4001, 0x4000), 0x8000);
    }
}
