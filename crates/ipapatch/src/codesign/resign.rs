//! Ad-hoc re-signing of a mutated image.
//!
//! The replacement signature keeps the identity of the one it replaces (team,
//! entitlements, flags, exec segment) but drops the CMS signature, so it is only
//! honoured where chain-of-trust enforcement is off.

use super::blob::CodeSignatureBlob;
use super::code_directory::{CodeDirectoryBuilder, HashType};
use super::constants::*;
use super::superblob::*;
use crate::macho::command::{LinkeditData, LoadCommand};
use crate::macho::inject::RemovedSignature;
use crate::macho::{align_to, MachOImage};
use crate::{Error, Result};

/// Identifier used when the enclosing bundle has none.
pub const FALLBACK_IDENTIFIER: &str = "fyi.zxcvbn.ipapatch.app";

/// Signature offset and size granularity.
const SIGNATURE_ALIGN: usize = 16;

/// VM size granularity of `__LINKEDIT`.
const SEGMENT_ALIGN: usize = 0x4000;

/// Replaces the signature removed by the mutator with an ad-hoc one.
///
/// The new SuperBlob starts at the old signature offset rounded up to 16 bytes.
/// `__LINKEDIT` grows to cover it and page hashes are taken over the final
/// header and command table.
///
/// # Errors
///
/// [`Error::NoCodeDirectories`] if the removed signature had no code directory.
pub fn resign(image: &mut MachOImage, removed: &RemovedSignature, bundle_identifier: &str) -> Result<()> {
    let identifier = if bundle_identifier.is_empty() {
        FALLBACK_IDENTIFIER
    } else {
        bundle_identifier
    };
    let plan = AdhocSignature::from_previous(&removed.blob, identifier)?;

    let code_end = removed.command.dataoff as usize;
    if code_end > image.payload().len() {
        return Err(Error::MalformedBinary(format!(
            "signature offset {:#x} beyond image of {} bytes",
            code_end,
            image.payload().len()
        )));
    }

    let sig_offset = align_to(code_end, SIGNATURE_ALIGN);
    image.truncate(code_end);
    image.pad_to(sig_offset);

    let sig_size = align_to(plan.encoded_len(sig_offset), SIGNATURE_ALIGN);
    image.append(LoadCommand::CodeSignature(LinkeditData::new(
        sig_offset as u32,
        sig_size as u32,
    )));
    grow_linkedit(image, sig_offset + sig_size)?;

    let mut data = image.serialize()?;
    let mut signature = plan.build(&data);
    signature.resize(sig_size, 0);
    data.extend_from_slice(&signature);

    tracing::debug!(
        identifier,
        offset = sig_offset,
        size = sig_size,
        directories = plan.directories.len(),
        "re-signed image ad-hoc"
    );

    image.commit(data);
    image.set_signature(Some(CodeSignatureBlob::parse(&signature)?));
    Ok(())
}

/// Extends `__LINKEDIT` so its file range ends at `end`.
fn grow_linkedit(image: &mut MachOImage, end: usize) -> Result<()> {
    let endian = image.endian();
    let linkedit = image
        .commands_mut()
        .iter_mut()
        .filter_map(LoadCommand::as_raw_mut)
        .find(|raw| raw.segment_name() == Some("__LINKEDIT"))
        .ok_or_else(|| Error::MalformedBinary("no __LINKEDIT segment".into()))?;

    let (fileoff, _) = linkedit
        .segment_file_range(endian)
        .ok_or_else(|| Error::MalformedBinary("truncated __LINKEDIT segment".into()))?;
    let filesize = (end as u64).checked_sub(fileoff).ok_or_else(|| {
        Error::MalformedBinary(format!(
            "signature end {:#x} before __LINKEDIT at {:#x}",
            end, fileoff
        ))
    })?;
    let vmsize = align_to(filesize as usize, SEGMENT_ALIGN) as u64;

    linkedit.set_segment_sizes(filesize, vmsize, endian)
}

/// Everything needed to emit the replacement SuperBlob except the code.
struct AdhocSignature {
    directories: Vec<(HashType, CodeDirectoryBuilder)>,
    requirements: Vec<u8>,
    entitlements: Option<Vec<u8>>,
    der_entitlements: Option<Vec<u8>>,
}

impl AdhocSignature {
    fn from_previous(previous: &CodeSignatureBlob, identifier: &str) -> Result<Self> {
        let primary = previous.primary().ok_or(Error::NoCodeDirectories)?;

        let mut hash_types = Vec::new();
        for hash_type in previous.code_directories.iter().filter_map(|cd| cd.hash()) {
            if !hash_types.contains(&hash_type) {
                hash_types.push(hash_type);
            }
        }
        if hash_types.is_empty() {
            hash_types.push(HashType::Sha256);
        }

        let requirements = empty_requirements_blob();
        let entitlements = previous.entitlements.as_deref().map(entitlements_blob);
        let der_entitlements = previous
            .entitlements_der
            .as_deref()
            .map(der_entitlements_blob);

        let directories = hash_types
            .into_iter()
            .map(|hash_type| {
                let mut builder = CodeDirectoryBuilder::new(identifier)
                    .flags(primary.flags | CS_ADHOC)
                    .exec_seg_base(primary.exec_seg_base)
                    .exec_seg_limit(primary.exec_seg_limit)
                    .exec_seg_flags(primary.exec_seg_flags)
                    .requirements_hash(hash_type.digest(&requirements))
                    // the bundle's Info.plist is not re-hashed
                    .info_hash(vec![0; hash_type.size()]);
                if let Some(team_id) = &primary.team_id {
                    builder = builder.team_id(team_id.as_str());
                }
                if let Some(blob) = &entitlements {
                    builder = builder.entitlements_hash(hash_type.digest(blob));
                }
                if let Some(blob) = &der_entitlements {
                    builder = builder.der_entitlements_hash(hash_type.digest(blob));
                }
                (hash_type, builder)
            })
            .collect();

        Ok(Self {
            directories,
            requirements,
            entitlements,
            der_entitlements,
        })
    }

    /// Unpadded SuperBlob size when signing `code_len` bytes.
    fn encoded_len(&self, code_len: usize) -> usize {
        let directories = self
            .directories
            .iter()
            .map(|(hash_type, builder)| builder.encoded_len(*hash_type, code_len));
        let blobs = [
            Some(self.requirements.len()),
            self.entitlements.as_ref().map(Vec::len),
            self.der_entitlements.as_ref().map(Vec::len),
            Some(blob_wrapper(&[]).len()),
        ];
        superblob_len(directories.chain(blobs.into_iter().flatten()))
    }

    fn build(&self, code: &[u8]) -> Vec<u8> {
        let mut superblob = SuperBlobBuilder::new().requirements(self.requirements.clone());

        for (index, (hash_type, builder)) in self.directories.iter().enumerate() {
            let cd = builder.build(*hash_type, code);
            superblob = if index == 0 {
                superblob.code_directory(cd)
            } else {
                superblob.alternate_code_directory(cd)
            };
        }
        if let Some(blob) = &self.entitlements {
            superblob = superblob.entitlements(blob.clone());
        }
        if let Some(blob) = &self.der_entitlements {
            superblob = superblob.der_entitlements(blob.clone());
        }

        superblob.cms_signature(blob_wrapper(&[])).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::fixtures::ImageFixture;
    use crate::macho::inject::inject_dylib;

    fn patched(fixture: ImageFixture, bundle_id: &str) -> MachOImage {
        let mut image = MachOImage::parse(fixture.build()).unwrap();
        let removed = inject_dylib(&mut image, "@rpath/zxPluginsInject.dylib", true)
            .unwrap()
            .unwrap();
        resign(&mut image, &removed, bundle_id).unwrap();
        image
    }

    #[test]
    fn test_resign_carries_identity() {
        let image = patched(ImageFixture::new().signed(), "com.example.app");
        let sig = image.signature().unwrap();
        let cd = sig.primary().unwrap();

        assert_eq!(cd.identifier, "com.example.app");
        assert_eq!(cd.team_id.as_deref(), Some(ImageFixture::TEAM_ID));
        assert_ne!(cd.flags & CS_ADHOC, 0);
        assert_eq!(cd.exec_seg_flags, CS_EXECSEG_MAIN_BINARY);
        assert_eq!(sig.entitlements.as_deref(), Some(ImageFixture::ENTITLEMENTS));
        assert_eq!(sig.entitlements_der.as_deref(), Some(ImageFixture::DER_ENTITLEMENTS));
        assert!(sig.has_cms);
        assert_eq!(cd.special_slot(1), Some(&[0u8; 32][..]));
    }

    #[test]
    fn test_resign_page_hashes_cover_final_image() {
        let image = patched(ImageFixture::new().signed(), "com.example.app");
        let reparsed = MachOImage::parse(image.payload().to_vec()).unwrap();

        let sig_cmd = reparsed
            .commands()
            .iter()
            .find_map(LoadCommand::as_code_signature)
            .copied()
            .unwrap();
        assert_eq!(sig_cmd.dataoff % 16, 0);
        assert_eq!(sig_cmd.datasize % 16, 0);
        assert_eq!((sig_cmd.dataoff + sig_cmd.datasize) as usize, reparsed.payload().len());

        let code = &reparsed.payload()[..sig_cmd.dataoff as usize];
        let cd = reparsed.signature().unwrap().primary().unwrap();
        assert_eq!(cd.code_limit, code.len() as u64);
        for (page, hash) in code.chunks(PAGE_SIZE).zip(&cd.code_hashes) {
            assert_eq!(&HashType::Sha256.digest(page), hash);
        }
    }

    #[test]
    fn test_resign_grows_linkedit() {
        let image = patched(ImageFixture::new().signed(), "com.example.app");
        let endian = image.endian();
        let (fileoff, filesize) = image
            .commands()
            .iter()
            .filter_map(LoadCommand::as_raw)
            .find(|raw| raw.segment_name() == Some("__LINKEDIT"))
            .and_then(|raw| raw.segment_file_range(endian))
            .unwrap();
        assert_eq!((fileoff + filesize) as usize, image.payload().len());
    }

    #[test]
    fn test_resign_keeps_hash_types() {
        let image = patched(ImageFixture::new().signed().with_sha1(), "com.example.app");
        let hashes: Vec<_> = image
            .signature()
            .unwrap()
            .code_directories
            .iter()
            .map(|cd| cd.hash())
            .collect();
        assert_eq!(hashes, vec![Some(HashType::Sha1), Some(HashType::Sha256)]);
    }

    #[test]
    fn test_fallback_identifier() {
        let image = patched(ImageFixture::new().signed(), "");
        let cd = image.signature().unwrap().primary().unwrap();
        assert_eq!(cd.identifier, FALLBACK_IDENTIFIER);
    }

    #[test]
    fn test_no_code_directories() {
        let mut image = MachOImage::parse(ImageFixture::new().signed_without_directories().build()).unwrap();
        let removed = inject_dylib(&mut image, "@rpath/a.dylib", true).unwrap().unwrap();
        assert!(matches!(
            resign(&mut image, &removed, "com.example.app"),
            Err(Error::NoCodeDirectories)
        ));
    }
}
