//! Patching of `.app` bundles on disk.
//!
//! Discovery follows the archive rules of [`crate::ipa::discover`], applied
//! to paths relative to the bundle's parent directory, so `App.app/Info.plist`
//! is the main manifest and `App.app/PlugIns/Ext.appex/Info.plist` a plugin.
//! Executables are patched in place.

use crate::builder::PatchOptions;
use crate::ipa::discover::{executable_path, find_manifests};
use crate::manifest::ManifestDecoder;
use crate::report::{Event, Reporter};
use crate::session::{InjectionTarget, PatchReport, PatchSession, TargetLocation};
use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory inside the top-level bundle that receives the libraries.
pub const FRAMEWORKS_DIR: &str = "Frameworks";

/// Bundle-on-disk patching workflow.
pub struct BundlePatcher<'a> {
    options: &'a PatchOptions,
    decoder: &'a dyn ManifestDecoder,
    reporter: &'a dyn Reporter,
}

impl<'a> BundlePatcher<'a> {
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

    /// Patches the bundle at `app` and copies the libraries into its
    /// `Frameworks` directory, creating it if needed.
    pub fn patch(&self, app: &Path) -> Result<PatchReport> {
        if !app.is_dir() {
            return Err(Error::Config(format!(
                "not a bundle directory: {}",
                app.display()
            )));
        }

        let root = app.parent().unwrap_or_else(|| Path::new(""));
        let names = bundle_entries(app, root)?;
        let manifests = find_manifests(
            names.iter().map(String::as_str),
            self.options.plugins_only,
            self.reporter,
        )?;
        let references = self.options.references();

        let mut session = PatchSession::new()?;
        for manifest_name in &manifests {
            let manifest_path = root.join(manifest_name);
            let bytes =
                fs::read(&manifest_path).map_err(|e| Error::fs("reading", &manifest_path, e))?;
            let manifest = self.decoder.decode(manifest_name, &bytes)?;
            manifest.check_executable(manifest_name)?;

            let binary = root.join(executable_path(manifest_name, &manifest.executable_name));
            // symlinked executables are not followed out of the bundle
            let is_file = fs::symlink_metadata(&binary).is_ok_and(|meta| meta.is_file());
            if !is_file {
                return Err(Error::Manifest {
                    path: manifest_name.clone(),
                    reason: format!("executable not found at {}", binary.display()),
                });
            }

            let target = InjectionTarget {
                bundle_identifier: manifest.bundle_identifier,
                display_name: manifest.executable_name,
                location: TargetLocation::File(binary.clone()),
                references: references.clone(),
            };
            session.inject(target, &binary, self.options.weak, self.reporter)?;
        }

        let frameworks = app.join(FRAMEWORKS_DIR);
        fs::create_dir_all(&frameworks).map_err(|e| Error::fs("creating", &frameworks, e))?;
        for library in &self.options.libraries {
            let dest = library.copy_into(&frameworks)?;
            self.reporter.report(Event::Progress(format!(
                "copied {} into {}",
                library.file_name(),
                frameworks.display()
            )));
            tracing::debug!(dest = %dest.display(), "installed library");
        }

        Ok(session.into_report())
    }
}

/// Files under `app` as `/`-separated paths relative to `root`, sorted.
fn bundle_entries(app: &Path, root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(app).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| app.to_path_buf());
            Error::fs("walking", path, io::Error::from(e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative: PathBuf = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        names.push(name);
    }
    Ok(names)
}
