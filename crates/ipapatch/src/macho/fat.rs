//! Per-slice patching of thin and fat binaries.

use super::arch::Arch;
use super::image::MachOImage;
use super::{align_to, inject::inject_dylib};
use crate::codesign::resign;
use crate::report::{Event, Reporter};
use crate::{Error, Result};
use goblin::mach::fat::{FAT_MAGIC, SIZEOF_FAT_ARCH, SIZEOF_FAT_HEADER};
use goblin::mach::MultiArch;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Magic of the 64-bit fat header variant.
const FAT_MAGIC_64: u32 = 0xcafebabf;

/// First slice offset in a rebuilt fat file.
const FAT_FIRST_SLICE_ALIGN: usize = 0x4000;

/// Largest slice alignment (as a power of two) accepted from a fat header.
const MAX_SLICE_ALIGN: u32 = 15;

/// What to inject into every slice of one binary.
#[derive(Debug, Clone, Copy)]
pub struct SliceRequest<'a> {
    /// `@rpath/...` install name to add.
    pub reference: &'a str,
    /// Identifier of the enclosing bundle, used when re-signing.
    pub bundle_identifier: &'a str,
    /// Emit `LC_LOAD_WEAK_DYLIB` instead of `LC_LOAD_DYLIB`.
    pub weak: bool,
}

/// Container layout of a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Thin,
    Fat,
}

impl Container {
    /// Classifies `data` by its magic number.
    ///
    /// Anything that is not a fat header is treated as thin and left for
    /// [`MachOImage::parse`] to accept or reject.
    pub fn detect(data: &[u8]) -> Result<Self> {
        let magic = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_be_bytes)
            .ok_or_else(|| Error::MalformedBinary(format!("file of {} bytes", data.len())))?;

        match magic {
            FAT_MAGIC => Ok(Container::Fat),
            FAT_MAGIC_64 => Err(Error::MalformedBinary("64-bit fat headers are not supported".into())),
            _ => Ok(Container::Thin),
        }
    }
}

/// Parse, inject and re-sign a single-architecture image.
///
/// The image is only re-signed if it carried a signature before.
pub fn patch_slice(data: Vec<u8>, request: &SliceRequest<'_>) -> Result<Vec<u8>> {
    let mut image = MachOImage::parse(data)?;
    match inject_dylib(&mut image, request.reference, request.weak)? {
        Some(removed) => {
            resign(&mut image, &removed, request.bundle_identifier)?;
            Ok(image.into_payload())
        }
        None => image.serialize(),
    }
}

/// Applies a [`SliceRequest`] to thin or fat binaries.
///
/// Patched fat slices are staged in scratch files under `scratch_dir`, and the
/// destination is rewritten only after every slice succeeded. Slices outside
/// the supported architectures are dropped and reported.
pub struct FatCoordinator<'a> {
    scratch_dir: &'a Path,
    reporter: &'a dyn Reporter,
}

impl<'a> FatCoordinator<'a> {
    pub fn new(scratch_dir: &'a Path, reporter: &'a dyn Reporter) -> Self {
        Self {
            scratch_dir,
            reporter,
        }
    }

    /// Patch the binary at `path` in place.
    pub fn patch_file(&self, path: &Path, request: &SliceRequest<'_>) -> Result<()> {
        let data = fs::read(path).map_err(|e| Error::fs("reading", path, e))?;
        let patched = self.prepare(data, request)?;

        let mut file = File::create(path).map_err(|e| Error::fs("writing", path, e))?;
        patched
            .write_to(&mut file)
            .and_then(|_| file.flush())
            .map_err(|e| Error::fs("writing", path, e))
    }

    /// Patch a binary held in memory.
    pub fn patch_bytes(&self, data: Vec<u8>, request: &SliceRequest<'_>) -> Result<Vec<u8>> {
        let patched = self.prepare(data, request)?;
        let mut out = Vec::new();
        patched.write_to(&mut out)?;
        Ok(out)
    }

    fn prepare(&self, data: Vec<u8>, request: &SliceRequest<'_>) -> Result<Patched> {
        match Container::detect(&data)? {
            Container::Thin => patch_slice(data, request).map(Patched::Thin),
            Container::Fat => self.prepare_fat(&data, request).map(Patched::Fat),
        }
    }

    fn prepare_fat(&self, data: &[u8], request: &SliceRequest<'_>) -> Result<Vec<ScratchSlice>> {
        let fat = MultiArch::new(data)
            .map_err(|e| Error::MalformedBinary(format!("fat header: {}", e)))?;

        let mut slices = Vec::new();
        for (index, arch) in fat.iter_arches().enumerate() {
            let fat_arch = arch.map_err(|e| Error::MalformedBinary(format!("fat arch {}: {}", index, e)))?;
            let arch = Arch::new(fat_arch.cputype, fat_arch.cpusubtype);
            if fat_arch.align > MAX_SLICE_ALIGN {
                return Err(Error::MalformedBinary(format!(
                    "{} slice alignment 2^{} exceeds 2^{}",
                    arch, fat_arch.align, MAX_SLICE_ALIGN
                )));
            }

            if !arch.is_supported() {
                self.reporter
                    .report(Event::Notice(format!("dropping unsupported {} slice", arch)));
                continue;
            }

            let start = fat_arch.offset as usize;
            let slice = start
                .checked_add(fat_arch.size as usize)
                .and_then(|end| data.get(start..end))
                .ok_or_else(|| {
                    Error::MalformedBinary(format!("{} slice overruns the fat file", arch))
                })?;

            let patched = patch_slice(slice.to_vec(), request)?;
            let mut file = tempfile::Builder::new()
                .prefix(&format!("macho_{}_", arch))
                .tempfile_in(self.scratch_dir)
                .map_err(|e| Error::fs("creating scratch file in", self.scratch_dir, e))?;
            file.write_all(&patched)
                .map_err(|e| Error::fs("writing", file.path(), e))?;

            tracing::debug!(%arch, size = patched.len(), "staged patched slice");
            slices.push(ScratchSlice {
                arch,
                align: fat_arch.align,
                size: patched.len(),
                file,
            });
        }

        if slices.is_empty() {
            return Err(Error::MalformedBinary(
                "fat binary has no supported architecture".into(),
            ));
        }
        Ok(slices)
    }
}

/// A patched slice waiting in its scratch file.
struct ScratchSlice {
    arch: Arch,
    align: u32,
    size: usize,
    file: NamedTempFile,
}

enum Patched {
    Thin(Vec<u8>),
    Fat(Vec<ScratchSlice>),
}

impl Patched {
    fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self {
            Patched::Thin(data) => out.write_all(data),
            Patched::Fat(slices) => write_fat(out, slices),
        }
    }
}

/// Writes a fat file: header, then each slice at its alignment, in order.
fn write_fat<W: Write>(out: &mut W, slices: &[ScratchSlice]) -> io::Result<()> {
    let header_size = SIZEOF_FAT_HEADER + slices.len() * SIZEOF_FAT_ARCH;

    // Start slices after header, aligned to page boundary
    let mut offsets = Vec::with_capacity(slices.len());
    let mut current = align_to(header_size, FAT_FIRST_SLICE_ALIGN);
    for slice in slices {
        current = align_to(current, 1usize << slice.align);
        offsets.push(current);
        current += slice.size;
    }
    if u32::try_from(current).is_err() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "fat binary exceeds 4 GiB",
        ));
    }

    // Header is always big-endian
    let mut header = Vec::with_capacity(header_size);
    header.extend(&FAT_MAGIC.to_be_bytes());
    header.extend(&(slices.len() as u32).to_be_bytes());
    for (slice, &offset) in slices.iter().zip(&offsets) {
        header.extend(&slice.arch.cputype.to_be_bytes());
        header.extend(&slice.arch.cpusubtype.to_be_bytes());
        header.extend(&(offset as u32).to_be_bytes());
        header.extend(&(slice.size as u32).to_be_bytes());
        header.extend(&slice.align.to_be_bytes());
    }
    out.write_all(&header)?;

    let mut written = header.len();
    for (slice, &offset) in slices.iter().zip(&offsets) {
        io::copy(&mut io::Read::take(io::repeat(0), (offset - written) as u64), out)?;
        let copied = io::copy(&mut slice.file.reopen()?, out)?;
        written = offset + copied as usize;
    }
    Ok(())
}
