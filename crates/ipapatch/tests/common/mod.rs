//! Shared fixtures for the archive and bundle integration tests.

#![allow(dead_code)]

use goblin::mach::MultiArch;
use ipapatch::codesign::superblob::{
    blob_wrapper, empty_requirements_blob, entitlements_blob, SuperBlobBuilder,
};
use ipapatch::codesign::{CodeDirectoryBuilder, HashType};
use ipapatch::MachOImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_SUBTYPE_ARMV7: u32 = 9;

pub const TEAM_ID: &str = "TEAM123456";
pub const ENTITLEMENTS: &[u8] = b"<plist version=\"1.0\"><dict><key>get-task-allow</key><true/></dict></plist>";

const LC_SEGMENT_64: u32 = 0x19;
const LC_LOAD_DYLIB: u32 = 0xc;
const LC_CODE_SIGNATURE: u32 = 0x1d;
const TEXT_OFFSET: usize = 0x1000;
const LINKEDIT_OFFSET: usize = 0x4000;
const LINKEDIT_DATA_LEN: usize = 0x80;
const VM_BASE: u64 = 0x1_0000_0000;

/// A minimal executable: `__TEXT` with one section, `__LINKEDIT`, a
/// libSystem load and, when `identifier` is set, a developer-style signature.
pub fn executable(cputype: u32, cpusubtype: u32, identifier: Option<&str>) -> Vec<u8> {
    let sig_offset = LINKEDIT_OFFSET + LINKEDIT_DATA_LEN;
    let sig_len = identifier.map_or(0, |id| signature(id, &vec![0; sig_offset]).len());

    let mut commands = vec![
        segment("__TEXT", VM_BASE, 0, LINKEDIT_OFFSET as u64, true),
        segment(
            "__LINKEDIT",
            VM_BASE + LINKEDIT_OFFSET as u64,
            LINKEDIT_OFFSET as u64,
            (LINKEDIT_DATA_LEN + sig_len) as u64,
            false,
        ),
        load_dylib("/usr/lib/libSystem.B.dylib"),
    ];
    if identifier.is_some() {
        commands.push(words(&[LC_CODE_SIGNATURE, 16, sig_offset as u32, sig_len as u32]));
    }

    let sizeofcmds: usize = commands.iter().map(Vec::len).sum();
    let mut data = words(&[
        0xfeed_facf,
        cputype,
        cpusubtype,
        2,
        commands.len() as u32,
        sizeofcmds as u32,
        0x0020_0085,
        0,
    ]);
    for command in &commands {
        data.extend(command);
    }
    data.resize(TEXT_OFFSET, 0);
    data.extend((0..0x200u32).map(|i| (i * 7) as u8));
    data.resize(LINKEDIT_OFFSET, 0);
    data.resize(sig_offset, 0x5a);

    if let Some(id) = identifier {
        let blob = signature(id, &data);
        data.extend(blob);
    }
    data
}

fn signature(identifier: &str, code: &[u8]) -> Vec<u8> {
    let requirements = empty_requirements_blob();
    let entitlements = entitlements_blob(ENTITLEMENTS);
    let directory = CodeDirectoryBuilder::new(identifier)
        .team_id(TEAM_ID)
        .exec_seg_limit(LINKEDIT_OFFSET as u64)
        .exec_seg_flags(1)
        .requirements_hash(HashType::Sha256.digest(&requirements))
        .entitlements_hash(HashType::Sha256.digest(&entitlements))
        .info_hash(HashType::Sha256.digest(b"Info.plist contents"))
        .build(HashType::Sha256, code);

    let mut blob = SuperBlobBuilder::new()
        .code_directory(directory)
        .requirements(requirements)
        .entitlements(entitlements)
        .cms_signature(blob_wrapper(&[0x30, 0x80]))
        .build();
    blob.resize((blob.len() + 15) & !15, 0);
    blob
}

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn name16(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

fn segment(name: &str, vmaddr: u64, fileoff: u64, filesize: u64, text: bool) -> Vec<u8> {
    let nsects = text as u32;
    let mut cmd = words(&[LC_SEGMENT_64, 72 + 80 * nsects]);
    cmd.extend(name16(name));
    for value in [vmaddr, 0x4000, fileoff, filesize] {
        cmd.extend(value.to_le_bytes());
    }
    let prot = if text { 5 } else { 1 };
    cmd.extend(words(&[prot, prot, nsects, 0]));

    if text {
        cmd.extend(name16("__text"));
        cmd.extend(name16(name));
        cmd.extend((vmaddr + TEXT_OFFSET as u64).to_le_bytes());
        cmd.extend(0x200u64.to_le_bytes());
        cmd.extend(words(&[TEXT_OFFSET as u32, 2, 0, 0, 0x8000_0400, 0, 0, 0]));
    }
    cmd
}

fn load_dylib(name: &str) -> Vec<u8> {
    let size = (24 + name.len() + 1 + 7) & !7;
    let mut cmd = words(&[LC_LOAD_DYLIB, size as u32, 24, 2, 0x0001_0000, 0x0001_0000]);
    cmd.extend(name.as_bytes());
    cmd.resize(size, 0);
    cmd
}

/// Wraps thin images into a fat file, each slice 0x4000-aligned.
pub fn fat(slices: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(0xcafe_babeu32.to_be_bytes());
    data.extend((slices.len() as u32).to_be_bytes());

    let mut offset = 0x4000;
    let mut offsets = Vec::new();
    for slice in slices {
        let cputype = u32::from_le_bytes([slice[4], slice[5], slice[6], slice[7]]);
        let cpusubtype = u32::from_le_bytes([slice[8], slice[9], slice[10], slice[11]]);
        for value in [cputype, cpusubtype, offset as u32, slice.len() as u32, 14] {
            data.extend(value.to_be_bytes());
        }
        offsets.push(offset);
        offset = (offset + slice.len() + 0x3fff) & !0x3fff;
    }
    for (slice, offset) in slices.iter().zip(offsets) {
        data.resize(offset, 0);
        data.extend(slice);
    }
    data
}

/// An XML `Info.plist`.
pub fn info_plist(executable: &str, identifier: Option<&str>) -> Vec<u8> {
    let mut dict = plist::Dictionary::new();
    dict.insert("CFBundleExecutable".into(), executable.into());
    if let Some(identifier) = identifier {
        dict.insert("CFBundleIdentifier".into(), identifier.into());
    }
    let mut out = Vec::new();
    plist::Value::Dictionary(dict).to_writer_xml(&mut out).unwrap();
    out
}

/// Writes a zip with the given entries, all stored uncompressed with mode 0755.
pub fn write_ipa(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o755);
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// Each thin image in `data`: a single one, or every slice of a fat file.
pub fn slices(data: &[u8]) -> Vec<MachOImage> {
    if data[..4] == 0xcafe_babeu32.to_be_bytes() {
        let fat = MultiArch::new(data).unwrap();
        fat.iter_arches()
            .map(|arch| {
                let arch = arch.unwrap();
                let start = arch.offset as usize;
                MachOImage::parse(data[start..start + arch.size as usize].to_vec()).unwrap()
            })
            .collect()
    } else {
        vec![MachOImage::parse(data.to_vec()).unwrap()]
    }
}

/// Install names loaded by `image` with their weak flag, in command order.
pub fn loads(image: &MachOImage) -> Vec<(String, bool)> {
    image
        .commands()
        .iter()
        .filter_map(|command| command.as_dylib())
        .map(|dylib| (dylib.install_name().to_string(), dylib.is_weak()))
        .collect()
}
