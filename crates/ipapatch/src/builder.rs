//! IpaPatch builder API
//!
//! Provides a builder pattern interface for injecting libraries into IPA
//! archives and app bundles.

use crate::bundle::BundlePatcher;
use crate::ipa::IpaPatcher;
use crate::library::{dedup_libraries, InjectedLibrary};
use crate::manifest::{ManifestDecoder, PlistManifestDecoder};
use crate::report::{Event, Reporter, TracingReporter};
use crate::session::PatchReport;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Asks whether an existing output file may be overwritten.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Answers every prompt with yes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Resolved settings shared by the archive and bundle workflows.
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Libraries to inject and copy, unique by file name.
    pub libraries: Vec<InjectedLibrary>,
    /// Skip main-bundle executables.
    pub plugins_only: bool,
    /// Emit weak loads.
    pub weak: bool,
}

impl PatchOptions {
    pub fn new(libraries: Vec<InjectedLibrary>) -> Self {
        Self {
            libraries: dedup_libraries(libraries),
            plugins_only: false,
            weak: true,
        }
    }

    /// Install names to inject, one per library, in order.
    pub fn references(&self) -> Vec<String> {
        self.libraries.iter().map(InjectedLibrary::reference_name).collect()
    }
}

/// Library injection tool with builder pattern API.
///
/// # Example
///
/// ```no_run
/// use ipapatch::IpaPatch;
///
/// let report = IpaPatch::new()
///     .dylib("libTweak.dylib")
///     .output("Patched.ipa")
///     .patch("App.ipa")?;
/// println!("patched {:?}", report.patched);
/// # Ok::<(), ipapatch::Error>(())
/// ```
pub struct IpaPatch {
    dylibs: Vec<PathBuf>,
    default_library: Option<InjectedLibrary>,
    plugins_only: bool,
    weak: bool,
    output: Option<PathBuf>,
    reporter: Box<dyn Reporter>,
    decoder: Box<dyn ManifestDecoder>,
    confirm: Box<dyn Confirm>,
}

impl IpaPatch {
    /// Create a new builder that injects weak loads into every target.
    pub fn new() -> Self {
        Self {
            dylibs: Vec::new(),
            default_library: None,
            plugins_only: false,
            weak: true,
            output: None,
            reporter: Box::new(TracingReporter),
            decoder: Box::new(PlistManifestDecoder),
            confirm: Box::new(AssumeYes),
        }
    }

    /// Add a library to inject. Repeatable; empty paths are ignored and
    /// libraries sharing a file name are injected once.
    pub fn dylib(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.as_os_str().is_empty() {
            self.dylibs.push(path.to_path_buf());
        }
        self
    }

    /// Library used when no [`dylib`](Self::dylib) is given.
    pub fn default_library(mut self, library: InjectedLibrary) -> Self {
        self.default_library = Some(library);
        self
    }

    /// Only patch plugin (`.appex`) executables.
    pub fn plugins_only(mut self, plugins_only: bool) -> Self {
        self.plugins_only = plugins_only;
        self
    }

    /// Emit `LC_LOAD_WEAK_DYLIB` (default) or `LC_LOAD_DYLIB`.
    pub fn weak(mut self, weak: bool) -> Self {
        self.weak = weak;
        self
    }

    /// Write archives here instead of patching them in place.
    ///
    /// Ignored for `.app` bundles, which are always patched in place.
    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn manifest_decoder(mut self, decoder: impl ManifestDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    /// Asked before an existing output file is replaced.
    pub fn confirm(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if:
    /// - A configured dylib does not exist
    /// - No dylib is configured and there is no default library
    pub fn validate(&self) -> Result<()> {
        self.resolve_options().map(|_| ())
    }

    fn resolve_options(&self) -> Result<PatchOptions> {
        let mut libraries = Vec::with_capacity(self.dylibs.len());
        for path in &self.dylibs {
            if !path.is_file() {
                return Err(Error::Config(format!("dylib not found: {}", path.display())));
            }
            libraries.push(InjectedLibrary::from_path(path)?);
        }

        if libraries.is_empty() {
            let library = self.default_library.clone().ok_or_else(|| {
                Error::Config("no dylib given and no default library configured".into())
            })?;
            libraries.push(library);
        }

        let mut options = PatchOptions::new(libraries);
        options.plugins_only = self.plugins_only;
        options.weak = self.weak;
        Ok(options)
    }

    /// Patch an archive (`.ipa`, `.tipa`) or an app bundle (`.app`),
    /// chosen by extension.
    pub fn patch(&self, input: impl AsRef<Path>) -> Result<PatchReport> {
        let input = input.as_ref();
        let extension = input
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("ipa") | Some("tipa") => self.patch_ipa(input),
            Some("app") => self.patch_bundle(input),
            _ => Err(Error::Config(format!(
                "unsupported input {}: expected .ipa, .tipa or .app",
                input.display()
            ))),
        }
    }

    /// Patch an archive.
    ///
    /// Without an output, or with an output naming the input, the archive is
    /// replaced in place. An existing distinct output is only replaced after
    /// the confirmation provider agrees; otherwise [`Error::Declined`] is
    /// returned and nothing is touched.
    pub fn patch_ipa(&self, input: impl AsRef<Path>) -> Result<PatchReport> {
        let input = input.as_ref();
        let options = self.resolve_options()?;
        if !input.is_file() {
            return Err(Error::Config(format!("input not found: {}", input.display())));
        }

        let output = match &self.output {
            Some(output) if !same_file(input, output) => {
                if output.exists()
                    && !self
                        .confirm
                        .confirm(&format!("{} already exists, overwrite?", output.display()))
                {
                    return Err(Error::Declined(output.clone()));
                }
                output.as_path()
            }
            _ => input,
        };

        tracing::debug!(input = %input.display(), output = %output.display(), "patching archive");
        IpaPatcher::new(&options, &*self.decoder, &*self.reporter).patch(input, output)
    }

    /// Patch an app bundle in place.
    pub fn patch_bundle(&self, path: impl AsRef<Path>) -> Result<PatchReport> {
        let path = path.as_ref();
        let options = self.resolve_options()?;
        if let Some(output) = &self.output {
            self.reporter.report(Event::Notice(format!(
                "ignoring output {} for app bundle, patching in place",
                output.display()
            )));
        }

        BundlePatcher::new(&options, &*self.decoder, &*self.reporter).patch(path)
    }
}

impl Default for IpaPatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `a` and `b` name the same file, comparing canonical paths when
/// both exist.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
