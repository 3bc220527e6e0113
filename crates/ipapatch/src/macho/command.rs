//! Load command variants.
//!
//! Only the dylib-load family and `LC_CODE_SIGNATURE` are decoded. Every other
//! command is carried as raw bytes and written back untouched.

use crate::{Error, Result};
use goblin::mach::load_command::{
    self as lc, LC_CODE_SIGNATURE, LC_LAZY_LOAD_DYLIB, LC_LOAD_DYLIB, LC_LOAD_UPWARD_DYLIB,
    LC_LOAD_WEAK_DYLIB, LC_REEXPORT_DYLIB, LC_SEGMENT_64, SIZEOF_LINKEDIT_DATA_COMMAND,
    SIZEOF_SECTION_64, SIZEOF_SEGMENT_COMMAND_64,
};
use scroll::{Endian, Pread, Pwrite};
use std::fmt;
use std::mem::size_of;

/// Size of a `linkedit_data_command`.
pub const LINKEDIT_DATA_COMMAND_SIZE: u32 = SIZEOF_LINKEDIT_DATA_COMMAND as u32;

/// Fixed part of a `dylib_command`; the install name follows it.
pub const DYLIB_COMMAND_HEADER: usize = size_of::<lc::DylibCommand>();

/// Timestamp written into injected dylib commands.
pub const DYLIB_TIMESTAMP: u32 = 2;

/// Rounds a command size up to the 8-byte boundary 64-bit images require.
pub fn pointer_align(size: u32) -> u32 {
    (size + 7) & !7
}

fn malformed(what: &str) -> impl Fn(scroll::Error) -> Error + '_ {
    move |e| Error::MalformedBinary(format!("{}: {}", what, e))
}

/// Packed `xxxx.yy.zz` version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version(pub u32);

impl Version {
    pub fn new(major: u16, minor: u8, patch: u8) -> Self {
        Version(((major as u32) << 16) | ((minor as u32) << 8) | patch as u32)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0 >> 16, (self.0 >> 8) & 0xff, self.0 & 0xff)
    }
}

/// A command from the `LC_*_DYLIB` family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibCommand {
    cmd: u32,
    install_name: String,
    timestamp: u32,
    current_version: Version,
    compatibility_version: Version,
    /// Bytes as read from the image, reused on write so padding survives.
    raw: Option<Vec<u8>>,
}

impl DylibCommand {
    /// Builds a fresh dylib load for `install_name`.
    ///
    /// The command uses the fixed timestamp [`DYLIB_TIMESTAMP`] and version 0.0.0.
    /// With `weak` set the loader tolerates the library being absent.
    pub fn new(install_name: impl Into<String>, weak: bool) -> Self {
        Self {
            cmd: if weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB },
            install_name: install_name.into(),
            timestamp: DYLIB_TIMESTAMP,
            current_version: Version::default(),
            compatibility_version: Version::default(),
            raw: None,
        }
    }

    pub fn cmd(&self) -> u32 {
        self.cmd
    }

    pub fn install_name(&self) -> &str {
        &self.install_name
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn current_version(&self) -> Version {
        self.current_version
    }

    pub fn compatibility_version(&self) -> Version {
        self.compatibility_version
    }

    pub fn is_weak(&self) -> bool {
        self.cmd == LC_LOAD_WEAK_DYLIB
    }

    /// Declared command length: fixed fields, name and terminator, 8-byte aligned.
    pub fn cmdsize(&self) -> u32 {
        match &self.raw {
            Some(raw) => raw.len() as u32,
            None => pointer_align((DYLIB_COMMAND_HEADER + self.install_name.len() + 1) as u32),
        }
    }

    fn parse(raw: &[u8], endian: Endian) -> Result<Self> {
        let command: lc::DylibCommand = raw
            .pread_with(0, endian)
            .map_err(malformed("dylib command"))?;

        let name_offset = command.dylib.name as usize;
        if name_offset < DYLIB_COMMAND_HEADER || name_offset >= raw.len() {
            return Err(Error::MalformedBinary(format!(
                "dylib name offset {} outside command of {} bytes",
                name_offset,
                raw.len()
            )));
        }

        let name_bytes = &raw[name_offset..];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());

        Ok(Self {
            cmd: command.cmd,
            install_name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
            timestamp: command.dylib.timestamp,
            current_version: Version(command.dylib.current_version),
            compatibility_version: Version(command.dylib.compatibility_version),
            raw: Some(raw.to_vec()),
        })
    }

    fn to_bytes(&self, endian: Endian) -> Result<Vec<u8>> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }

        let command = lc::DylibCommand {
            cmd: self.cmd,
            cmdsize: self.cmdsize(),
            dylib: lc::Dylib {
                name: DYLIB_COMMAND_HEADER as u32,
                timestamp: self.timestamp,
                current_version: self.current_version.0,
                compatibility_version: self.compatibility_version.0,
            },
        };

        let mut buf = vec![0u8; command.cmdsize as usize];
        buf.pwrite_with(command, 0, endian)
            .map_err(malformed("dylib command"))?;
        buf[DYLIB_COMMAND_HEADER..DYLIB_COMMAND_HEADER + self.install_name.len()]
            .copy_from_slice(self.install_name.as_bytes());
        Ok(buf)
    }
}

impl fmt::Display for DylibCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}){}",
            self.install_name,
            self.current_version,
            if self.is_weak() { " weak" } else { "" }
        )
    }
}

/// `LC_CODE_SIGNATURE` pointing at the signature SuperBlob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkeditData {
    pub dataoff: u32,
    pub datasize: u32,
    cmdsize: u32,
}

impl LinkeditData {
    pub fn new(dataoff: u32, datasize: u32) -> Self {
        Self {
            dataoff,
            datasize,
            cmdsize: LINKEDIT_DATA_COMMAND_SIZE,
        }
    }

    fn parse(raw: &[u8], endian: Endian) -> Result<Self> {
        let command: lc::LinkeditDataCommand = raw
            .pread_with(0, endian)
            .map_err(malformed("LC_CODE_SIGNATURE"))?;
        Ok(Self {
            dataoff: command.dataoff,
            datasize: command.datasize,
            cmdsize: raw.len() as u32,
        })
    }

    fn to_bytes(&self, endian: Endian) -> Result<Vec<u8>> {
        let command = lc::LinkeditDataCommand {
            cmd: LC_CODE_SIGNATURE,
            cmdsize: self.cmdsize,
            dataoff: self.dataoff,
            datasize: self.datasize,
        };
        let mut buf = vec![0u8; self.cmdsize as usize];
        buf.pwrite_with(command, 0, endian)
            .map_err(malformed("LC_CODE_SIGNATURE"))?;
        Ok(buf)
    }
}

/// Any command this crate does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub cmd: u32,
    pub bytes: Vec<u8>,
}

impl RawCommand {
    fn segment(&self, endian: Endian) -> Option<lc::SegmentCommand64> {
        if self.cmd != LC_SEGMENT_64 {
            return None;
        }
        self.bytes.pread_with(0, endian).ok()
    }

    /// Segment name when this is an `LC_SEGMENT_64`.
    pub fn segment_name(&self) -> Option<&str> {
        if self.cmd != LC_SEGMENT_64 || self.bytes.len() < SIZEOF_SEGMENT_COMMAND_64 {
            return None;
        }
        // segname follows cmd and cmdsize
        let name = &self.bytes[8..24];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        std::str::from_utf8(&name[..end]).ok()
    }

    /// `(fileoff, filesize)` of an `LC_SEGMENT_64`.
    pub fn segment_file_range(&self, endian: Endian) -> Option<(u64, u64)> {
        self.segment(endian)
            .map(|segment| (segment.fileoff, segment.filesize))
    }

    /// Smallest non-zero file offset of any section in this segment.
    pub fn first_section_offset(&self, endian: Endian) -> Option<u64> {
        let segment = self.segment(endian)?;
        (0..segment.nsects as usize)
            .map_while(|i| {
                let at = SIZEOF_SEGMENT_COMMAND_64 + i * SIZEOF_SECTION_64;
                self.bytes.pread_with::<lc::Section64>(at, endian).ok()
            })
            .map(|section| section.offset)
            .filter(|&offset| offset > 0)
            .map(u64::from)
            .min()
    }

    /// Rewrites `filesize` and `vmsize` of an `LC_SEGMENT_64`.
    pub fn set_segment_sizes(&mut self, filesize: u64, vmsize: u64, endian: Endian) -> Result<()> {
        let mut segment = self
            .segment(endian)
            .ok_or_else(|| Error::MalformedBinary("not a 64-bit segment command".into()))?;
        segment.filesize = filesize;
        segment.vmsize = vmsize;
        self.bytes
            .pwrite_with(segment, 0, endian)
            .map_err(malformed("segment command"))?;
        Ok(())
    }
}

/// One entry of the load-command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadCommand {
    Dylib(DylibCommand),
    CodeSignature(LinkeditData),
    Opaque(RawCommand),
}

/// Whether `cmd` belongs to the dylib-load family.
pub fn is_dylib_load(cmd: u32) -> bool {
    matches!(
        cmd,
        LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB | LC_LAZY_LOAD_DYLIB | LC_LOAD_UPWARD_DYLIB
    )
}

impl LoadCommand {
    pub(crate) fn parse(raw: &[u8], endian: Endian) -> Result<Self> {
        let header: lc::LoadCommandHeader = raw
            .pread_with(0, endian)
            .map_err(malformed("load command"))?;
        let cmd = header.cmd;

        if is_dylib_load(cmd) {
            DylibCommand::parse(raw, endian).map(LoadCommand::Dylib)
        } else if cmd == LC_CODE_SIGNATURE {
            LinkeditData::parse(raw, endian).map(LoadCommand::CodeSignature)
        } else {
            Ok(LoadCommand::Opaque(RawCommand {
                cmd,
                bytes: raw.to_vec(),
            }))
        }
    }

    pub(crate) fn to_bytes(&self, endian: Endian) -> Result<Vec<u8>> {
        match self {
            LoadCommand::Dylib(dylib) => dylib.to_bytes(endian),
            LoadCommand::CodeSignature(sig) => sig.to_bytes(endian),
            LoadCommand::Opaque(raw) => Ok(raw.bytes.clone()),
        }
    }

    pub fn cmd(&self) -> u32 {
        match self {
            LoadCommand::Dylib(dylib) => dylib.cmd,
            LoadCommand::CodeSignature(_) => LC_CODE_SIGNATURE,
            LoadCommand::Opaque(raw) => raw.cmd,
        }
    }

    pub fn cmdsize(&self) -> u32 {
        match self {
            LoadCommand::Dylib(dylib) => dylib.cmdsize(),
            LoadCommand::CodeSignature(sig) => sig.cmdsize,
            LoadCommand::Opaque(raw) => raw.bytes.len() as u32,
        }
    }

    pub fn as_dylib(&self) -> Option<&DylibCommand> {
        match self {
            LoadCommand::Dylib(dylib) => Some(dylib),
            _ => None,
        }
    }

    pub fn as_code_signature(&self) -> Option<&LinkeditData> {
        match self {
            LoadCommand::CodeSignature(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn as_raw_mut(&mut self) -> Option<&mut RawCommand> {
        match self {
            LoadCommand::Opaque(raw) => Some(raw),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawCommand> {
        match self {
            LoadCommand::Opaque(raw) => Some(raw),
            _ => None,
        }
    }
}
