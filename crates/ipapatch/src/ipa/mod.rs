//! Patching of IPA archives.
//!
//! Only the manifests and executables the run needs are extracted. Patched
//! executables and the injected libraries are written back; every other
//! entry is copied through untouched.

pub mod archive;
pub mod discover;

pub use archive::{extract_entry, read_entry, rewrite_archive, Replacement};
pub use discover::{executable_path, find_manifests, top_level_bundle};

use crate::builder::PatchOptions;
use crate::manifest::ManifestDecoder;
use crate::report::{Event, Reporter};
use crate::session::{InjectionTarget, PatchReport, PatchSession, TargetLocation};
use crate::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::ZipArchive;

/// Archive patching workflow.
pub struct IpaPatcher<'a> {
    options: &'a PatchOptions,
    decoder: &'a dyn ManifestDecoder,
    reporter: &'a dyn Reporter,
}

impl<'a> IpaPatcher<'a> {
    pub fn new(
        options: &'a PatchOptions,
        decoder: &'a dyn ManifestDecoder,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            options,
            decoder,
            reporter,
        }
    }

    /// Patches `input` and writes the result to `output`, which may be `input`.
    ///
    /// Nothing is written until every target has been patched. When `output`
    /// differs from `input`, the input is never modified. An in-place run in
    /// which every reference was already present leaves the archive as is.
    pub fn patch(&self, input: &Path, output: &Path) -> Result<PatchReport> {
        let mut session = PatchSession::new()?;

        self.reporter
            .report(Event::Progress("extracting and injecting...".into()));
        let mut replacements = self.inject_all(input, &mut session)?;

        // a run that only skipped leaves the libraries as they are
        if !session.report().patched.is_empty() {
            let mut bundles: Vec<&str> = Vec::new();
            for target in session.targets() {
                if let TargetLocation::Archive(entry) = &target.location {
                    if let Some(bundle) = top_level_bundle(entry) {
                        if !bundles.contains(&bundle) {
                            bundles.push(bundle);
                        }
                    }
                }
            }
            for bundle in &bundles {
                for library in &self.options.libraries {
                    replacements.push(Replacement::library(bundle, library)?);
                }
            }
        }

        if replacements.is_empty() && input == output {
            tracing::debug!(input = %input.display(), "nothing to write back");
        } else {
            self.reporter
                .report(Event::Progress("adding files back to ipa...".into()));
            rewrite_archive(input, output, &replacements)?;
        }

        Ok(session.into_report())
    }

    /// Extracts and patches every target, returning the entries to write back.
    fn inject_all(&self, input: &Path, session: &mut PatchSession) -> Result<Vec<Replacement>> {
        let file = File::open(input).map_err(|e| Error::fs("opening", input, e))?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let manifests = find_manifests(
            archive.file_names(),
            self.options.plugins_only,
            self.reporter,
        )?;
        let references = self.options.references();

        let mut replacements = Vec::new();
        for manifest_path in &manifests {
            let bytes = read_entry(&mut archive, manifest_path)?;
            let manifest = self.decoder.decode(manifest_path, &bytes)?;
            manifest.check_executable(manifest_path)?;

            let entry = executable_path(manifest_path, &manifest.executable_name);
            if archive.index_for_name(&entry).is_none() {
                return Err(Error::Manifest {
                    path: manifest_path.clone(),
                    reason: format!("executable {} not found in archive", entry),
                });
            }

            let scratch = session.stage(&manifest.executable_name)?;
            extract_entry(&mut archive, &entry, &scratch)?;
            tracing::debug!(%entry, scratch = %scratch.display(), "extracted executable");

            let target = InjectionTarget {
                bundle_identifier: manifest.bundle_identifier,
                display_name: manifest.executable_name,
                location: TargetLocation::Archive(entry.clone()),
                references: references.clone(),
            };
            if session.inject(target, &scratch, self.options.weak, self.reporter)? {
                replacements.push(Replacement::file(entry, scratch));
            }
        }

        Ok(replacements)
    }
}
