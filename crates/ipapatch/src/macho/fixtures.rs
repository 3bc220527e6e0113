//! Synthetic arm64/x86_64 executables for unit tests.
//!
//! Layout: `__PAGEZERO`, `__TEXT` with one `__text` section at 0x1000,
//! `__LINKEDIT` at 0x4000 holding 0x100 bytes of filler and, when signed,
//! the signature at 0x4100.

use crate::codesign::code_directory::{CodeDirectoryBuilder, HashType};
use crate::codesign::constants::CS_EXECSEG_MAIN_BINARY;
use crate::codesign::superblob::*;
use goblin::mach::constants::cputype::CPU_TYPE_ARM64;
use goblin::mach::fat::FAT_MAGIC;
use goblin::mach::header::{MH_EXECUTE, MH_MAGIC_64};
use goblin::mach::load_command::{LC_CODE_SIGNATURE, LC_LOAD_DYLIB, LC_SEGMENT_64};

const TEXT_OFFSET: usize = 0x1000;
const TEXT_LEN: usize = 0x100;
const LINKEDIT_OFFSET: usize = 0x4000;
const LINKEDIT_DATA_LEN: usize = 0x100;
const VM_BASE: u64 = 0x1_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signature {
    Unsigned,
    Signed,
    NoDirectories,
}

#[derive(Debug, Clone)]
pub(crate) struct ImageFixture {
    cputype: u32,
    cpusubtype: u32,
    signature: Signature,
    sha1: bool,
}

impl ImageFixture {
    pub const TEAM_ID: &'static str = "ABCDE12345";
    pub const IDENTIFIER: &'static str = "com.example.app";
    pub const ENTITLEMENTS: &'static [u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<plist version=\"1.0\"><dict><key>application-identifier</key><string>ABCDE12345.com.example.app</string></dict></plist>\n";
    pub const DER_ENTITLEMENTS: &'static [u8] = &[0x70, 0x06, 0x02, 0x01, 0x01, 0xb0, 0x01, 0x00];

    pub fn new() -> Self {
        Self {
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            signature: Signature::Unsigned,
            sha1: false,
        }
    }

    pub fn cpu(mut self, cputype: u32, cpusubtype: u32) -> Self {
        self.cputype = cputype;
        self.cpusubtype = cpusubtype;
        self
    }

    /// Sign with a developer-style SHA-256 signature.
    pub fn signed(mut self) -> Self {
        self.signature = Signature::Signed;
        self
    }

    /// Add a SHA-1 primary directory in front of the SHA-256 one.
    pub fn with_sha1(mut self) -> Self {
        self.sha1 = true;
        self
    }

    pub fn signed_without_directories(mut self) -> Self {
        self.signature = Signature::NoDirectories;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let sig_offset = LINKEDIT_OFFSET + LINKEDIT_DATA_LEN;
        let sig_len = match self.signature {
            Signature::Unsigned => 0,
            _ => self.signature_blob(&vec![0; sig_offset]).len(),
        };

        let mut commands = vec![
            segment("__PAGEZERO", 0, VM_BASE, 0, 0, 0, None),
            segment(
                "__TEXT",
                VM_BASE,
                LINKEDIT_OFFSET as u64,
                0,
                LINKEDIT_OFFSET as u64,
                5,
                Some(("__text", TEXT_OFFSET as u32, TEXT_LEN as u64)),
            ),
            segment(
                "__LINKEDIT",
                VM_BASE + LINKEDIT_OFFSET as u64,
                0x4000,
                LINKEDIT_OFFSET as u64,
                (LINKEDIT_DATA_LEN + sig_len) as u64,
                1,
                None,
            ),
            dylib("/usr/lib/libSystem.B.dylib"),
        ];
        if self.signature != Signature::Unsigned {
            let mut cmd = Vec::new();
            for value in [LC_CODE_SIGNATURE, 16, sig_offset as u32, sig_len as u32] {
                cmd.extend(value.to_le_bytes());
            }
            commands.push(cmd);
        }

        let sizeofcmds: usize = commands.iter().map(Vec::len).sum();
        let mut data = Vec::with_capacity(sig_offset + sig_len);
        for value in [
            MH_MAGIC_64,
            self.cputype,
            self.cpusubtype,
            MH_EXECUTE,
            commands.len() as u32,
            sizeofcmds as u32,
            0x0020_0085,
            0,
        ] {
            data.extend(value.to_le_bytes());
        }
        for command in &commands {
            data.extend(command);
        }

        data.resize(TEXT_OFFSET, 0);
        data.extend((0..TEXT_LEN).map(|i| (i % 251) as u8));
        data.resize(LINKEDIT_OFFSET, 0);
        data.extend(std::iter::repeat(0xee).take(LINKEDIT_DATA_LEN));

        if self.signature != Signature::Unsigned {
            let blob = self.signature_blob(&data);
            data.extend(blob);
        }
        data
    }

    fn signature_blob(&self, code: &[u8]) -> Vec<u8> {
        let mut superblob = SuperBlobBuilder::new();
        if self.signature == Signature::Signed {
            let requirements = empty_requirements_blob();
            let entitlements = entitlements_blob(Self::ENTITLEMENTS);
            let der = der_entitlements_blob(Self::DER_ENTITLEMENTS);

            let directory = |hash_type: HashType| {
                CodeDirectoryBuilder::new(Self::IDENTIFIER)
                    .team_id(Self::TEAM_ID)
                    .exec_seg_limit(LINKEDIT_OFFSET as u64)
                    .exec_seg_flags(CS_EXECSEG_MAIN_BINARY)
                    .requirements_hash(hash_type.digest(&requirements))
                    .entitlements_hash(hash_type.digest(&entitlements))
                    .der_entitlements_hash(hash_type.digest(&der))
                    .info_hash(hash_type.digest(b"Info.plist"))
                    .build(hash_type, code)
            };

            superblob = if self.sha1 {
                superblob
                    .code_directory(directory(HashType::Sha1))
                    .alternate_code_directory(directory(HashType::Sha256))
            } else {
                superblob.code_directory(directory(HashType::Sha256))
            };
            superblob = superblob
                .requirements(requirements)
                .entitlements(entitlements)
                .der_entitlements(der);
        }

        let mut blob = superblob
            .cms_signature(blob_wrapper(&[0x30, 0x80, 0x06, 0x09, 0x2a, 0x86]))
            .build();
        blob.resize(crate::macho::align_to(blob.len(), 16), 0);
        blob
    }
}

fn segment(
    name: &str,
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    prot: u32,
    section: Option<(&str, u32, u64)>,
) -> Vec<u8> {
    let nsects = section.is_some() as u32;
    let mut cmd = Vec::new();
    cmd.extend(LC_SEGMENT_64.to_le_bytes());
    cmd.extend((72 + 80 * nsects).to_le_bytes());
    cmd.extend(fixed_name(name));
    for value in [vmaddr, vmsize, fileoff, filesize] {
        cmd.extend(value.to_le_bytes());
    }
    for value in [prot, prot, nsects, 0] {
        cmd.extend(value.to_le_bytes());
    }

    if let Some((sectname, offset, size)) = section {
        cmd.extend(fixed_name(sectname));
        cmd.extend(fixed_name(name));
        cmd.extend((vmaddr + offset as u64).to_le_bytes());
        cmd.extend(size.to_le_bytes());
        // offset, align, reloff, nreloc, flags, reserved1-3
        for value in [offset, 2, 0, 0, 0x8000_0400, 0, 0, 0] {
            cmd.extend(value.to_le_bytes());
        }
    }
    cmd
}

fn dylib(name: &str) -> Vec<u8> {
    let size = crate::macho::command::pointer_align(24 + name.len() as u32 + 1);
    let mut cmd = Vec::new();
    for value in [LC_LOAD_DYLIB, size, 24, 2, 0x050c_3c01, 0x0001_0000] {
        cmd.extend(value.to_le_bytes());
    }
    cmd.extend(name.as_bytes());
    cmd.resize(size as usize, 0);
    cmd
}

fn fixed_name(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

/// Wraps thin images into a fat file with 0x4000-aligned slices.
pub(crate) fn fat_binary(slices: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(FAT_MAGIC.to_be_bytes());
    data.extend((slices.len() as u32).to_be_bytes());

    let mut offset = crate::macho::align_to(8 + 20 * slices.len(), 0x4000);
    let mut offsets = Vec::new();
    for slice in slices {
        let cputype = u32::from_le_bytes([slice[4], slice[5], slice[6], slice[7]]);
        let cpusubtype = u32::from_le_bytes([slice[8], slice[9], slice[10], slice[11]]);
        for value in [cputype, cpusubtype, offset as u32, slice.len() as u32, 14] {
            data.extend(value.to_be_bytes());
        }
        offsets.push(offset);
        offset = crate::macho::align_to(offset + slice.len(), 0x4000);
    }
    for (slice, offset) in slices.iter().zip(offsets) {
        data.resize(offset, 0);
        data.extend(slice);
    }
    data
}
