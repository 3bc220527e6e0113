//! Adds a dylib load to an image.

use super::command::{DylibCommand, LinkeditData, LoadCommand};
use super::image::MachOImage;
use crate::codesign::CodeSignatureBlob;
use crate::{Error, Result};

/// The signature command and blob taken out of an image before mutation.
#[derive(Debug, Clone)]
pub struct RemovedSignature {
    pub command: LinkeditData,
    pub blob: CodeSignatureBlob,
}

/// Appends a load of `reference` to `image`.
///
/// Existing dylib loads are scanned from the last command backwards; if any
/// install name starts with `reference` the image is left untouched and
/// [`Error::AlreadyPatched`] is returned. Otherwise every `LC_CODE_SIGNATURE`
/// is removed and a new load with timestamp 2 and version 0.0.0 is appended.
///
/// Returns the removed signature so the caller can re-sign, or `None` if the
/// image was unsigned.
pub fn inject_dylib(image: &mut MachOImage, reference: &str, weak: bool) -> Result<Option<RemovedSignature>> {
    let existing = image.find_from_end(|command| {
        command
            .as_dylib()
            .is_some_and(|dylib| dylib.install_name().starts_with(reference))
    });
    if !existing.is_empty() {
        return Err(Error::AlreadyPatched(reference.to_string()));
    }

    // indices come last-first so earlier ones stay valid while removing
    let mut removed = None;
    for index in image.find_from_end(|command| command.as_code_signature().is_some()) {
        if let LoadCommand::CodeSignature(command) = image.remove(index) {
            removed.get_or_insert(command);
        }
    }
    let blob = image.take_signature();

    image.append(LoadCommand::Dylib(DylibCommand::new(reference, weak)));
    image.ensure_header_space()?;

    tracing::debug!(reference, weak, signed = removed.is_some(), "added dylib load");

    Ok(removed.and_then(|command| blob.map(|blob| RemovedSignature { command, blob })))
}
