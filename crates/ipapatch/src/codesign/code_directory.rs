//! CodeDirectory blobs: the page hashes and special-slot hashes a signature
//! commits to, plus the identity fields re-signing carries over.
//!
//! [`CodeDirectory::parse`] reads an existing directory and
//! [`CodeDirectoryBuilder`] emits one per hash type.

use super::constants::*;
use crate::{Error, Result};
use scroll::{Pread, BE};
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Fixed header length up to and including `execSegFlags`.
const HEADER_LEN: usize = 88;

/// Special slots run from -1 (Info.plist) to -7 (DER entitlements).
const MAX_SPECIAL_SLOTS: usize = 7;

/// Slots -1 to -3 are always emitted.
const MIN_SPECIAL_SLOTS: usize = 3;

const SLOT_INFO: usize = 1;
const SLOT_REQUIREMENTS: usize = 2;
const SLOT_ENTITLEMENTS: usize = 5;
const SLOT_DER_ENTITLEMENTS: usize = 7;

/// Hash algorithm of a CodeDirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Sha1,
    Sha256,
}

impl HashType {
    /// Maps a `CS_HASHTYPE_*` value, `None` for algorithms we cannot produce.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            CS_HASHTYPE_SHA1 => Some(HashType::Sha1),
            CS_HASHTYPE_SHA256 => Some(HashType::Sha256),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            HashType::Sha1 => CS_HASHTYPE_SHA1,
            HashType::Sha256 => CS_HASHTYPE_SHA256,
        }
    }

    pub fn size(self) -> usize {
        match self {
            HashType::Sha1 => CS_SHA1_LEN,
            HashType::Sha256 => CS_SHA256_LEN,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashType::Sha1 => Sha1::digest(data).to_vec(),
            HashType::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Emits version 0x20400 CodeDirectory blobs.
///
/// Special-slot hashes are raw digests and must already match the hash type
/// later passed to [`build`](Self::build). Slots without a hash are zeroed.
///
/// ```
/// use ipapatch::codesign::{CodeDirectoryBuilder, HashType};
///
/// let cd = CodeDirectoryBuilder::new("com.example.app")
///     .team_id("TEAMID1234")
///     .exec_seg_limit(0x4000)
///     .build(HashType::Sha256, &[0u8; 8192]);
/// assert_eq!(&cd[..4], &[0xfa, 0xde, 0x0c, 0x02]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CodeDirectoryBuilder {
    identifier: String,
    team_id: Option<String>,
    /// Index `n - 1` holds slot `-n`.
    special: [Option<Vec<u8>>; MAX_SPECIAL_SLOTS],
    exec_seg_base: u64,
    exec_seg_limit: u64,
    exec_seg_flags: u64,
    flags: u32,
}

impl CodeDirectoryBuilder {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    pub fn team_id(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    /// Slot -1.
    pub fn info_hash(self, hash: Vec<u8>) -> Self {
        self.special_hash(SLOT_INFO, hash)
    }

    /// Slot -2.
    pub fn requirements_hash(self, hash: Vec<u8>) -> Self {
        self.special_hash(SLOT_REQUIREMENTS, hash)
    }

    /// Slot -5.
    pub fn entitlements_hash(self, hash: Vec<u8>) -> Self {
        self.special_hash(SLOT_ENTITLEMENTS, hash)
    }

    /// Slot -7.
    pub fn der_entitlements_hash(self, hash: Vec<u8>) -> Self {
        self.special_hash(SLOT_DER_ENTITLEMENTS, hash)
    }

    fn special_hash(mut self, slot: usize, hash: Vec<u8>) -> Self {
        self.special[slot - 1] = Some(hash);
        self
    }

    pub fn exec_seg_base(mut self, base: u64) -> Self {
        self.exec_seg_base = base;
        self
    }

    pub fn exec_seg_limit(mut self, limit: u64) -> Self {
        self.exec_seg_limit = limit;
        self
    }

    pub fn exec_seg_flags(mut self, flags: u64) -> Self {
        self.exec_seg_flags = flags;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Size of the blob [`build`](Self::build) produces for `code_len` bytes of code.
    pub fn encoded_len(&self, hash_type: HashType, code_len: usize) -> usize {
        self.layout(hash_type, code_len).total
    }

    /// Hashes `code` in 4 KiB pages and encodes the directory.
    pub fn build(&self, hash_type: HashType, code: &[u8]) -> Vec<u8> {
        let layout = self.layout(hash_type, code.len());
        let hash_size = hash_type.size();
        let mut buf = Vec::with_capacity(layout.total);

        for word in [
            CSMAGIC_CODEDIRECTORY,
            layout.total as u32,
            CODEDIRECTORY_VERSION,
            self.flags,
            layout.hash_offset as u32,
            HEADER_LEN as u32,
            layout.special_slots as u32,
            layout.code_slots as u32,
            code.len() as u32,
        ] {
            buf.extend_from_slice(&word.to_be_bytes());
        }
        buf.extend_from_slice(&[hash_size as u8, hash_type.raw(), 0, PAGE_SIZE_LOG2]);
        // spare2, scatter offset
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&(layout.team_offset as u32).to_be_bytes());
        // spare3, 64-bit code limit
        buf.extend_from_slice(&[0; 12]);
        for word in [self.exec_seg_base, self.exec_seg_limit, self.exec_seg_flags] {
            buf.extend_from_slice(&word.to_be_bytes());
        }
        debug_assert_eq!(buf.len(), HEADER_LEN);
        buf.resize(layout.total, 0);

        let ident_end = HEADER_LEN + self.identifier.len();
        buf[HEADER_LEN..ident_end].copy_from_slice(self.identifier.as_bytes());
        if let Some(team) = &self.team_id {
            buf[layout.team_offset..layout.team_offset + team.len()]
                .copy_from_slice(team.as_bytes());
        }

        // slot -n sits n hashes before hash_offset
        for (index, hash) in self.special[..layout.special_slots].iter().enumerate() {
            if let Some(hash) = hash {
                let start = layout.hash_offset - (index + 1) * hash_size;
                let len = hash.len().min(hash_size);
                buf[start..start + len].copy_from_slice(&hash[..len]);
            }
        }

        for (page, slot) in code
            .chunks(PAGE_SIZE)
            .zip(buf[layout.hash_offset..].chunks_mut(hash_size))
        {
            slot.copy_from_slice(&hash_type.digest(page));
        }

        buf
    }

    fn layout(&self, hash_type: HashType, code_len: usize) -> Layout {
        let hash_size = hash_type.size();
        let special_slots = self
            .special
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |index| index + 1)
            .max(MIN_SPECIAL_SLOTS);
        let code_slots = code_len.div_ceil(PAGE_SIZE);

        let mut cursor = HEADER_LEN + self.identifier.len() + 1;
        let team_offset = match &self.team_id {
            Some(team) => {
                let offset = cursor;
                cursor += team.len() + 1;
                offset
            }
            None => 0,
        };
        let hash_offset = cursor + special_slots * hash_size;

        Layout {
            special_slots,
            code_slots,
            team_offset,
            hash_offset,
            total: hash_offset + code_slots * hash_size,
        }
    }
}

struct Layout {
    special_slots: usize,
    code_slots: usize,
    team_offset: usize,
    hash_offset: usize,
    total: usize,
}

/// A CodeDirectory read back from an existing signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDirectory {
    pub version: u32,
    pub flags: u32,
    /// Raw `CS_HASHTYPE_*` value.
    pub hash_type: u8,
    pub hash_size: u8,
    pub page_size_log2: u8,
    pub identifier: String,
    pub team_id: Option<String>,
    pub code_limit: u64,
    pub exec_seg_base: u64,
    pub exec_seg_limit: u64,
    pub exec_seg_flags: u64,
    /// Special slot hashes, index 0 holding slot -1.
    pub special_slots: Vec<Vec<u8>>,
    pub code_hashes: Vec<Vec<u8>>,
}

impl CodeDirectory {
    /// Parse a CodeDirectory blob including its magic and length header.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let u32_at = |offset: usize| -> Result<u32> {
            blob.pread_with::<u32>(offset, BE)
                .map_err(|e| Error::MalformedBinary(format!("code directory: {}", e)))
        };
        let u64_at = |offset: usize| -> Result<u64> {
            blob.pread_with::<u64>(offset, BE)
                .map_err(|e| Error::MalformedBinary(format!("code directory: {}", e)))
        };

        if u32_at(0)? != CSMAGIC_CODEDIRECTORY {
            return Err(Error::MalformedBinary("code directory: bad magic".into()));
        }
        let length = (u32_at(4)? as usize).min(blob.len());
        let blob = &blob[..length];

        let version = u32_at(8)?;
        let flags = u32_at(12)?;
        let hash_offset = u32_at(16)? as usize;
        let ident_offset = u32_at(20)? as usize;
        let n_special = u32_at(24)? as usize;
        let n_code = u32_at(28)? as usize;
        let code_limit32 = u32_at(32)?;
        let header: [u8; 4] = blob
            .get(36..40)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::MalformedBinary("code directory: truncated header".into()))?;
        let [hash_size, hash_type, _, page_size_log2] = header;

        let team_offset = if version >= CODEDIRECTORY_VERSION_TEAMID {
            u32_at(48)? as usize
        } else {
            0
        };
        let code_limit64 = if version >= 0x20300 { u64_at(56)? } else { 0 };
        let (exec_seg_base, exec_seg_limit, exec_seg_flags) = if version >= CODEDIRECTORY_VERSION {
            (u64_at(64)?, u64_at(72)?, u64_at(80)?)
        } else {
            (0, 0, 0)
        };

        let hash_size = hash_size as usize;
        if hash_size == 0 {
            return Err(Error::MalformedBinary("code directory: zero hash size".into()));
        }
        if n_special * hash_size > hash_offset {
            return Err(Error::MalformedBinary(
                "code directory: special slots before header".into(),
            ));
        }
        let hashes_end = hash_offset + n_code * hash_size;
        if hashes_end > blob.len() {
            return Err(Error::MalformedBinary(format!(
                "code directory: {} code slots overrun blob of {} bytes",
                n_code,
                blob.len()
            )));
        }

        let special_slots = (1..=n_special)
            .map(|i| {
                let start = hash_offset - i * hash_size;
                blob[start..start + hash_size].to_vec()
            })
            .collect();
        let code_hashes = blob[hash_offset..hashes_end]
            .chunks(hash_size)
            .map(<[u8]>::to_vec)
            .collect();

        Ok(Self {
            version,
            flags,
            hash_type,
            hash_size: hash_size as u8,
            page_size_log2,
            identifier: c_string_at(blob, ident_offset).unwrap_or_default(),
            team_id: if team_offset > 0 {
                c_string_at(blob, team_offset).filter(|t| !t.is_empty())
            } else {
                None
            },
            code_limit: if code_limit64 > 0 { code_limit64 } else { code_limit32 as u64 },
            exec_seg_base,
            exec_seg_limit,
            exec_seg_flags,
            special_slots,
            code_hashes,
        })
    }

    /// Hash algorithm, if one this crate can produce.
    pub fn hash(&self) -> Option<HashType> {
        HashType::from_raw(self.hash_type)
    }

    /// Hash stored in special slot `-index`.
    pub fn special_slot(&self, index: usize) -> Option<&[u8]> {
        index
            .checked_sub(1)
            .and_then(|i| self.special_slots.get(i))
            .map(Vec::as_slice)
    }
}

fn c_string_at(blob: &[u8], offset: usize) -> Option<String> {
    let bytes = blob.get(offset..)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(cd: &[u8], offset: usize) -> u32 {
        cd.pread_with::<u32>(offset, BE).unwrap()
    }

    #[test]
    fn test_header_per_hash_type() {
        for (hash_type, size) in [(HashType::Sha1, 20u8), (HashType::Sha256, 32u8)] {
            let cd = CodeDirectoryBuilder::new("com.example.app").build(hash_type, &[0; 8192]);
            assert_eq!(word(&cd, 0), CSMAGIC_CODEDIRECTORY);
            assert_eq!(word(&cd, 8), CODEDIRECTORY_VERSION);
            assert_eq!(word(&cd, 20), HEADER_LEN as u32);
            assert_eq!(cd[36], size);
            assert_eq!(cd[37], hash_type.raw());
            assert_eq!(cd[39], PAGE_SIZE_LOG2);
        }
    }

    #[test]
    fn test_partial_page_gets_a_slot() {
        let cd = CodeDirectoryBuilder::new("test").build(HashType::Sha256, &[1; 6144]);
        assert_eq!(word(&cd, 28), 2);
        assert_eq!(word(&cd, 32), 6144);

        let empty = CodeDirectoryBuilder::new("test").build(HashType::Sha256, &[]);
        assert_eq!(word(&empty, 28), 0);
    }

    #[test]
    fn test_special_slot_count() {
        let count = |builder: CodeDirectoryBuilder| {
            word(&builder.build(HashType::Sha256, &[0; 4096]), 24)
        };

        assert_eq!(count(CodeDirectoryBuilder::new("a")), 3);
        assert_eq!(count(CodeDirectoryBuilder::new("a").info_hash(vec![1; 32])), 3);
        assert_eq!(count(CodeDirectoryBuilder::new("a").entitlements_hash(vec![1; 32])), 5);
        assert_eq!(
            count(CodeDirectoryBuilder::new("a").der_entitlements_hash(vec![1; 32])),
            7
        );
    }

    #[test]
    fn test_encoded_len_matches_build() {
        let code = vec![0x5a; 12345];
        let builder = CodeDirectoryBuilder::new("com.example.app")
            .team_id("ABCDE12345")
            .entitlements_hash(vec![1; 32])
            .der_entitlements_hash(vec![2; 32])
            .requirements_hash(vec![3; 32])
            .info_hash(vec![0; 32]);

        for hash_type in [HashType::Sha1, HashType::Sha256] {
            let cd = builder.build(hash_type, &code);
            assert_eq!(cd.len(), builder.encoded_len(hash_type, code.len()));
            assert_eq!(word(&cd, 4) as usize, cd.len());
        }
    }

    #[test]
    fn test_parse_reads_back_builder_fields() {
        let code = vec![0xab; 8192 + 10];
        let blob = CodeDirectoryBuilder::new("com.example.app")
            .team_id("ABCDE12345")
            .flags(CS_ADHOC)
            .exec_seg_limit(0x4000)
            .exec_seg_flags(CS_EXECSEG_MAIN_BINARY)
            .requirements_hash(vec![7; 32])
            .entitlements_hash(vec![5; 32])
            .build(HashType::Sha256, &code);

        let cd = CodeDirectory::parse(&blob).unwrap();
        assert_eq!(cd.identifier, "com.example.app");
        assert_eq!(cd.team_id.as_deref(), Some("ABCDE12345"));
        assert_eq!(cd.flags, CS_ADHOC);
        assert_eq!(cd.hash(), Some(HashType::Sha256));
        assert_eq!(cd.code_limit, code.len() as u64);
        assert_eq!(cd.exec_seg_limit, 0x4000);
        assert_eq!(cd.exec_seg_flags, CS_EXECSEG_MAIN_BINARY);
        assert_eq!(cd.special_slots.len(), 5);
        assert_eq!(cd.special_slot(1), Some(&[0u8; 32][..]));
        assert_eq!(cd.special_slot(2), Some(&[7u8; 32][..]));
        assert_eq!(cd.special_slot(5), Some(&[5u8; 32][..]));
        assert_eq!(cd.code_hashes.len(), 3);
        assert_eq!(cd.code_hashes[2], HashType::Sha256.digest(&code[2 * PAGE_SIZE..]));
    }

    #[test]
    fn test_parse_without_team() {
        let blob = CodeDirectoryBuilder::new("x").build(HashType::Sha1, &[1, 2, 3]);
        let cd = CodeDirectory::parse(&blob).unwrap();
        assert_eq!(cd.team_id, None);
        assert_eq!(cd.hash(), Some(HashType::Sha1));
    }

    #[test]
    fn test_parse_rejects_other_magic() {
        let mut blob = CodeDirectoryBuilder::new("x").build(HashType::Sha1, &[1, 2, 3]);
        blob[3] = 0x00;
        assert!(CodeDirectory::parse(&blob).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_hashes() {
        let blob = CodeDirectoryBuilder::new("x").build(HashType::Sha256, &[0u8; 8192]);
        let mut truncated = blob[..blob.len() - 16].to_vec();
        let len = truncated.len() as u32;
        truncated[4..8].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(
            CodeDirectory::parse(&truncated),
            Err(Error::MalformedBinary(_))
        ));
    }

    #[test]
    fn test_parse_rejects_header_cut_before_exec_segment() {
        let blob = CodeDirectoryBuilder::new("x")
            .exec_seg_flags(1)
            .build(HashType::Sha256, &[0u8; 16]);
        let mut truncated = blob[..80].to_vec();
        truncated[4..8].copy_from_slice(&80u32.to_be_bytes());
        assert!(matches!(
            CodeDirectory::parse(&truncated),
            Err(Error::MalformedBinary(_))
        ));
    }
}
