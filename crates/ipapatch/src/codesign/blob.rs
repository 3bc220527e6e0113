//! Parsed view of an embedded code signature.

use super::code_directory::CodeDirectory;
use super::constants::*;
use super::superblob::{parse_superblob, BlobEntry};
use crate::Result;

/// The pieces of an existing signature that re-signing carries over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeSignatureBlob {
    /// Code directories in index order, primary first.
    pub code_directories: Vec<CodeDirectory>,
    /// Requirements blob including its header.
    pub requirements: Option<Vec<u8>>,
    /// Entitlements plist bytes.
    pub entitlements: Option<Vec<u8>>,
    /// DER-encoded entitlements.
    pub entitlements_der: Option<Vec<u8>>,
    /// Whether a CMS wrapper slot was present.
    pub has_cms: bool,
}

impl CodeSignatureBlob {
    /// Parse the SuperBlob an `LC_CODE_SIGNATURE` points at.
    ///
    /// Unknown slots are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut blob = Self::default();

        for entry in parse_superblob(data)? {
            match entry.slot_type {
                _ if entry.is_code_directory() && entry.magic() == CSMAGIC_CODEDIRECTORY => {
                    blob.code_directories.push(CodeDirectory::parse(&entry.data)?)
                }
                CSSLOT_REQUIREMENTS => blob.requirements = Some(entry.data),
                CSSLOT_ENTITLEMENTS if entry.magic() == CSMAGIC_EMBEDDED_ENTITLEMENTS => {
                    blob.entitlements = Some(payload(entry))
                }
                CSSLOT_DER_ENTITLEMENTS if entry.magic() == CSMAGIC_EMBEDDED_DER_ENTITLEMENTS => {
                    blob.entitlements_der = Some(payload(entry))
                }
                CSSLOT_SIGNATURESLOT => blob.has_cms = true,
                other => tracing::debug!(slot = other, "ignoring signature slot"),
            }
        }

        Ok(blob)
    }

    /// The primary code directory, if any.
    pub fn primary(&self) -> Option<&CodeDirectory> {
        self.code_directories.first()
    }

    /// Team identifier of the primary code directory.
    pub fn team_id(&self) -> Option<&str> {
        self.primary().and_then(|cd| cd.team_id.as_deref())
    }
}

fn payload(entry: BlobEntry) -> Vec<u8> {
    entry.payload().to_vec()
}
