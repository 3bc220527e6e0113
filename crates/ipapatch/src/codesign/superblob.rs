//! The embedded-signature SuperBlob: a big-endian `{magic, length, count}`
//! header, `count` `{slot, offset}` index entries, then the blobs themselves.
//! Every blob starts with its own `{magic, length}` header.

use super::constants::*;
use crate::{Error, Result};
use scroll::{Pread, BE};

/// Size of the `{magic, length}` header every blob starts with.
pub const BLOB_HEADER_SIZE: usize = 8;

/// One slot of a SuperBlob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// `CSSLOT_*` value.
    pub slot_type: u32,
    /// The blob, header included.
    pub data: Vec<u8>,
}

impl BlobEntry {
    pub fn new(slot_type: u32, data: Vec<u8>) -> Self {
        Self { slot_type, data }
    }

    pub fn magic(&self) -> u32 {
        self.data.pread_with::<u32>(0, BE).unwrap_or(0)
    }

    /// Blob content after its header.
    pub fn payload(&self) -> &[u8] {
        self.data.get(BLOB_HEADER_SIZE..).unwrap_or(&[])
    }

    pub fn is_code_directory(&self) -> bool {
        self.slot_type == CSSLOT_CODEDIRECTORY
            || (CSSLOT_ALTERNATE_CODEDIRECTORIES..CSSLOT_ALTERNATE_CODEDIRECTORY_LIMIT)
                .contains(&self.slot_type)
    }
}

/// Encoded size of a SuperBlob holding blobs of the given lengths.
pub fn superblob_len<I>(blob_lens: I) -> usize
where
    I: IntoIterator<Item = usize>,
{
    blob_lens
        .into_iter()
        .fold(SUPERBLOB_HEADER_SIZE, |total, len| total + BLOB_INDEX_SIZE + len)
}

/// Encodes `entries` in the order given.
pub fn encode_superblob(entries: &[BlobEntry]) -> Vec<u8> {
    let total = superblob_len(entries.iter().map(|entry| entry.data.len()));
    let mut buf = Vec::with_capacity(total);
    for word in [CSMAGIC_EMBEDDED_SIGNATURE, total as u32, entries.len() as u32] {
        buf.extend_from_slice(&word.to_be_bytes());
    }

    let mut offset = SUPERBLOB_HEADER_SIZE + entries.len() * BLOB_INDEX_SIZE;
    for entry in entries {
        buf.extend_from_slice(&entry.slot_type.to_be_bytes());
        buf.extend_from_slice(&(offset as u32).to_be_bytes());
        offset += entry.data.len();
    }
    for entry in entries {
        buf.extend_from_slice(&entry.data);
    }
    buf
}

/// Splits a SuperBlob into its entries, in index order.
pub fn parse_superblob(data: &[u8]) -> Result<Vec<BlobEntry>> {
    let word = |offset: usize| -> Result<u32> {
        data.pread_with::<u32>(offset, BE)
            .map_err(|e| Error::MalformedBinary(format!("signature superblob: {}", e)))
    };

    let magic = word(0)?;
    if magic != CSMAGIC_EMBEDDED_SIGNATURE {
        return Err(Error::MalformedBinary(format!(
            "signature superblob: unexpected magic {:#010x}",
            magic
        )));
    }
    let length = (word(4)? as usize).min(data.len());
    let count = word(8)? as usize;

    (0..count)
        .map(|i| {
            let index = SUPERBLOB_HEADER_SIZE + i * BLOB_INDEX_SIZE;
            let slot_type = word(index)?;
            let offset = word(index + 4)? as usize;
            let blob_len = word(offset + 4)? as usize;

            let blob = offset
                .checked_add(blob_len)
                .filter(|&end| blob_len >= BLOB_HEADER_SIZE && end <= length)
                .map(|end| &data[offset..end])
                .ok_or_else(|| {
                    Error::MalformedBinary(format!(
                        "signature slot {:#x} overruns superblob of {} bytes",
                        slot_type, length
                    ))
                })?;
            Ok(BlobEntry::new(slot_type, blob.to_vec()))
        })
        .collect()
}

/// Prefixes `payload` with a `{magic, length}` header.
pub fn wrap_blob(magic: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BLOB_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&magic.to_be_bytes());
    buf.extend_from_slice(&((BLOB_HEADER_SIZE + payload.len()) as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Entitlements blob around plist bytes.
pub fn entitlements_blob(plist: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_EMBEDDED_ENTITLEMENTS, plist)
}

/// Entitlements blob around DER bytes.
pub fn der_entitlements_blob(der: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_EMBEDDED_DER_ENTITLEMENTS, der)
}

/// A requirements set with no requirements.
pub fn empty_requirements_blob() -> Vec<u8> {
    // count = 0
    wrap_blob(CSMAGIC_REQUIREMENTS, &[0; 4])
}

/// CMS wrapper around `cms`; empty for ad-hoc signatures.
pub fn blob_wrapper(cms: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_BLOBWRAPPER, cms)
}

/// Collects signature blobs and lays them out in slot order: code
/// directory, requirements, entitlements, DER entitlements, alternate code
/// directories, CMS wrapper.
///
/// ```
/// use ipapatch::codesign::superblob::{blob_wrapper, SuperBlobBuilder};
///
/// let blob = SuperBlobBuilder::new()
///     .code_directory(vec![0xfa, 0xde, 0x0c, 0x02, 0, 0, 0, 8])
///     .cms_signature(blob_wrapper(&[]))
///     .build();
/// assert_eq!(&blob[..4], &[0xfa, 0xde, 0x0c, 0xc0]);
/// ```
#[derive(Debug, Default)]
pub struct SuperBlobBuilder {
    code_directory: Option<Vec<u8>>,
    alternates: Vec<Vec<u8>>,
    requirements: Option<Vec<u8>>,
    entitlements: Option<Vec<u8>>,
    der_entitlements: Option<Vec<u8>>,
    cms_signature: Option<Vec<u8>>,
}

impl SuperBlobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code_directory(mut self, cd: Vec<u8>) -> Self {
        self.code_directory = Some(cd);
        self
    }

    /// Alternates take slots `0x1000` onwards in the order they are added.
    pub fn alternate_code_directory(mut self, cd: Vec<u8>) -> Self {
        self.alternates.push(cd);
        self
    }

    /// Defaults to [`empty_requirements_blob`].
    pub fn requirements(mut self, blob: Vec<u8>) -> Self {
        self.requirements = Some(blob);
        self
    }

    pub fn entitlements(mut self, blob: Vec<u8>) -> Self {
        self.entitlements = Some(blob);
        self
    }

    pub fn der_entitlements(mut self, blob: Vec<u8>) -> Self {
        self.der_entitlements = Some(blob);
        self
    }

    pub fn cms_signature(mut self, blob: Vec<u8>) -> Self {
        self.cms_signature = Some(blob);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let requirements = self.requirements.unwrap_or_else(empty_requirements_blob);

        let entries: Vec<BlobEntry> = [
            self.code_directory.map(|cd| BlobEntry::new(CSSLOT_CODEDIRECTORY, cd)),
            Some(BlobEntry::new(CSSLOT_REQUIREMENTS, requirements)),
            self.entitlements.map(|blob| BlobEntry::new(CSSLOT_ENTITLEMENTS, blob)),
            self.der_entitlements
                .map(|blob| BlobEntry::new(CSSLOT_DER_ENTITLEMENTS, blob)),
        ]
        .into_iter()
        .flatten()
        .chain(
            (CSSLOT_ALTERNATE_CODEDIRECTORIES..)
                .zip(self.alternates)
                .map(|(slot, cd)| BlobEntry::new(slot, cd)),
        )
        .chain(
            self.cms_signature
                .map(|blob| BlobEntry::new(CSSLOT_SIGNATURESLOT, blob)),
        )
        .collect();

        encode_superblob(&entries)
    }
}
