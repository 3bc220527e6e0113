//! In-memory model of a single-architecture 64-bit Mach-O image.

use super::arch::Arch;
use super::command::LoadCommand;
use crate::codesign::CodeSignatureBlob;
use crate::{Error, Result};
use goblin::mach::fat::FAT_MAGIC;
use goblin::mach::header::{Header64, MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64, SIZEOF_HEADER_64};
use goblin::mach::load_command::{LoadCommandHeader, SIZEOF_LOAD_COMMAND};
use scroll::{Endian, Pread, Pwrite, BE, LE};
use std::path::Path;

/// Size of `mach_header_64`.
pub const HEADER_SIZE: usize = SIZEOF_HEADER_64;

/// A parsed thin 64-bit Mach-O image.
///
/// The image owns the complete slice bytes. Load commands are decoded into
/// [`LoadCommand`]s and only written back by [`MachOImage::serialize`], which
/// overlays the header and command table on the original payload. An image
/// that is parsed and serialized without mutation reproduces its input exactly.
#[derive(Debug, Clone)]
pub struct MachOImage {
    endian: Endian,
    arch: Arch,
    filetype: u32,
    flags: u32,
    commands: Vec<LoadCommand>,
    /// Size of the command table currently present in `data`.
    table_size: usize,
    data: Vec<u8>,
    signature: Option<CodeSignatureBlob>,
}

impl MachOImage {
    /// Open and parse a Mach-O image.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| Error::fs("reading", path, e))?;
        Self::parse(data)
    }

    /// Parse a thin 64-bit image from bytes.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::MalformedBinary(format!(
                "truncated header ({} bytes)",
                data.len()
            )));
        }

        let magic: u32 = data.pread_with(0, LE).map_err(malformed)?;
        let endian = match magic {
            MH_MAGIC_64 => LE,
            MH_CIGAM_64 => BE,
            MH_MAGIC | MH_CIGAM => {
                return Err(Error::MalformedBinary("32-bit images are not supported".into()))
            }
            _ if data.pread_with::<u32>(0, BE).ok() == Some(FAT_MAGIC) => {
                return Err(Error::MalformedBinary(
                    "fat container where a single architecture was expected".into(),
                ))
            }
            other => {
                return Err(Error::MalformedBinary(format!(
                    "unrecognized magic {:#010x}",
                    other
                )))
            }
        };

        let header: Header64 = data.pread_with(0, endian).map_err(malformed)?;
        let arch = Arch::new(header.cputype, header.cpusubtype);
        let ncmds = header.ncmds as usize;
        let sizeofcmds = header.sizeofcmds as usize;

        let table_end = HEADER_SIZE
            .checked_add(sizeofcmds)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::MalformedBinary(format!(
                    "load commands ({} bytes) overrun the file ({} bytes)",
                    sizeofcmds,
                    data.len()
                ))
            })?;

        let mut commands = Vec::with_capacity(ncmds);
        let mut offset = HEADER_SIZE;
        for index in 0..ncmds {
            if offset + SIZEOF_LOAD_COMMAND > table_end {
                return Err(Error::MalformedBinary(format!(
                    "load command {} starts past the command table",
                    index
                )));
            }
            let command: LoadCommandHeader = data.pread_with(offset, endian).map_err(malformed)?;
            let cmdsize = command.cmdsize as usize;
            if cmdsize < SIZEOF_LOAD_COMMAND || cmdsize % 8 != 0 || offset + cmdsize > table_end {
                return Err(Error::MalformedBinary(format!(
                    "load command {} has invalid size {}",
                    index, cmdsize
                )));
            }
            commands.push(LoadCommand::parse(&data[offset..offset + cmdsize], endian)?);
            offset += cmdsize;
        }

        let signature = match commands.iter().rev().find_map(LoadCommand::as_code_signature) {
            Some(sig) => {
                let start = sig.dataoff as usize;
                let end = start + sig.datasize as usize;
                if sig.datasize == 0 || end > data.len() {
                    return Err(Error::MalformedBinary(format!(
                        "code signature {:#x}..{:#x} outside file of {} bytes",
                        start,
                        end,
                        data.len()
                    )));
                }
                Some(CodeSignatureBlob::parse(&data[start..end])?)
            }
            None => None,
        };

        tracing::debug!(arch = %arch, ncmds, sizeofcmds, signed = signature.is_some(), "parsed Mach-O image");

        Ok(Self {
            endian,
            arch,
            filetype: header.filetype,
            flags: header.flags,
            commands,
            table_size: offset - HEADER_SIZE,
            data,
            signature,
        })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn filetype(&self) -> u32 {
        self.filetype
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn commands(&self) -> &[LoadCommand] {
        &self.commands
    }

    pub(crate) fn commands_mut(&mut self) -> &mut [LoadCommand] {
        &mut self.commands
    }

    /// Bytes of the image as last parsed or committed.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the image, returning its committed bytes.
    pub fn into_payload(self) -> Vec<u8> {
        self.data
    }

    /// Parsed signature of the image, if it carries one.
    pub fn signature(&self) -> Option<&CodeSignatureBlob> {
        self.signature.as_ref()
    }

    pub(crate) fn take_signature(&mut self) -> Option<CodeSignatureBlob> {
        self.signature.take()
    }

    /// Indices of commands matching `predicate`, last command first.
    pub fn find_from_end<P>(&self, mut predicate: P) -> Vec<usize>
    where
        P: FnMut(&LoadCommand) -> bool,
    {
        (0..self.commands.len())
            .rev()
            .filter(|&i| predicate(&self.commands[i]))
            .collect()
    }

    /// Removes the command at `index`.
    pub fn remove(&mut self, index: usize) -> LoadCommand {
        self.commands.remove(index)
    }

    /// Appends a command at the end of the table.
    pub fn append(&mut self, command: LoadCommand) {
        self.commands.push(command);
    }

    /// Total declared size of the current command table.
    pub fn commands_size(&self) -> usize {
        self.commands.iter().map(|c| c.cmdsize() as usize).sum()
    }

    /// File offset of the first section or segment content.
    ///
    /// The command table may grow up to this offset without overwriting data.
    pub fn first_data_offset(&self) -> usize {
        self.commands
            .iter()
            .filter_map(LoadCommand::as_raw)
            .flat_map(|raw| {
                let segment = raw
                    .segment_file_range(self.endian)
                    .filter(|&(fileoff, filesize)| fileoff > 0 && filesize > 0)
                    .map(|(fileoff, _)| fileoff);
                segment.into_iter().chain(raw.first_section_offset(self.endian))
            })
            .min()
            .map(|offset| offset as usize)
            .unwrap_or(self.data.len())
    }

    /// Fails with [`Error::NoLoadCommandSpace`] if the table no longer fits.
    pub fn ensure_header_space(&self) -> Result<()> {
        let needed = self.commands_size();
        let available = self.first_data_offset().saturating_sub(HEADER_SIZE);
        if needed > available {
            return Err(Error::NoLoadCommandSpace { needed, available });
        }
        Ok(())
    }

    /// Replaces the image bytes, typically with the output of [`serialize`](Self::serialize)
    /// followed by appended data.
    pub(crate) fn commit(&mut self, data: Vec<u8>) {
        self.table_size = self.commands_size();
        self.data = data;
    }

    /// Records the signature now embedded in the payload.
    pub(crate) fn set_signature(&mut self, signature: Option<CodeSignatureBlob>) {
        self.signature = signature;
    }

    /// Cuts the payload at `len` bytes.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Zero-pads the payload up to `len` bytes.
    pub(crate) fn pad_to(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
    }

    /// Produce the image bytes with the current header and command table.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.ensure_header_space()?;

        let mut table = Vec::with_capacity(self.commands_size());
        for command in &self.commands {
            table.extend_from_slice(&command.to_bytes(self.endian)?);
        }

        let end = HEADER_SIZE + table.len().max(self.table_size);
        let mut out = self.data.clone();
        if out.len() < end {
            out.resize(end, 0);
        }

        let mut header: Header64 = out.pread_with(0, self.endian).map_err(malformed)?;
        header.ncmds = self.commands.len() as u32;
        header.sizeofcmds = table.len() as u32;
        out.pwrite_with(header, 0, self.endian).map_err(malformed)?;
        out[HEADER_SIZE..HEADER_SIZE + table.len()].copy_from_slice(&table);
        // stale bytes of a table that shrank
        out[HEADER_SIZE + table.len()..end].fill(0);

        Ok(out)
    }
}

fn malformed(e: scroll::Error) -> Error {
    Error::MalformedBinary(e.to_string())
}
