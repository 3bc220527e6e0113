//! State of one patch run.

use crate::macho::{FatCoordinator, SliceRequest};
use crate::manifest::is_plain_file_name;
use crate::report::{Event, Reporter};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where a target executable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetLocation {
    /// Entry name inside an archive.
    Archive(String),
    /// Path on disk.
    File(PathBuf),
}

/// An executable selected for injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionTarget {
    pub bundle_identifier: String,
    /// Executable name shown in progress messages.
    pub display_name: String,
    pub location: TargetLocation,
    /// `@rpath/...` names to inject, in order.
    pub references: Vec<String>,
}

/// Outcome of a patch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Display names of targets that received at least one new load.
    pub patched: Vec<String>,
    /// `(target, reference)` pairs that were already present.
    pub skipped: Vec<(String, String)>,
}

/// Scratch workspace and bookkeeping for one run.
///
/// The workspace is a private temporary directory removed when the session
/// is dropped, whether the run succeeded or not.
pub struct PatchSession {
    workspace: TempDir,
    staged: usize,
    targets: Vec<InjectionTarget>,
    report: PatchReport,
}

impl PatchSession {
    pub fn new() -> Result<Self> {
        let workspace = tempfile::Builder::new()
            .prefix(".ipapatch-")
            .tempdir()
            .map_err(|e| Error::fs("creating workspace in", std::env::temp_dir(), e))?;
        tracing::debug!(workspace = %workspace.path().display(), "created patch workspace");

        Ok(Self {
            workspace,
            staged: 0,
            targets: Vec::new(),
            report: PatchReport::default(),
        })
    }

    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Reserves a scratch path for an extracted executable.
    ///
    /// Every call gets its own directory so equally named executables of
    /// different bundles never collide. `executable_name` must be a plain
    /// file name.
    pub fn stage(&mut self, executable_name: &str) -> Result<PathBuf> {
        if !is_plain_file_name(executable_name) {
            return Err(Error::Config(format!(
                "refusing to stage {:?} outside the workspace",
                executable_name
            )));
        }

        let dir = self.workspace.path().join(self.staged.to_string());
        fs::create_dir(&dir).map_err(|e| Error::fs("creating", &dir, e))?;
        self.staged += 1;

        Ok(dir.join(executable_name))
    }

    pub fn targets(&self) -> &[InjectionTarget] {
        &self.targets
    }

    /// Injects every reference of `target` into the binary at `binary`.
    ///
    /// A reference the binary already loads is reported and recorded as
    /// skipped. Any other failure aborts with [`Error::Inject`]. Returns
    /// whether the binary was modified.
    pub fn inject(
        &mut self,
        target: InjectionTarget,
        binary: &Path,
        weak: bool,
        reporter: &dyn Reporter,
    ) -> Result<bool> {
        reporter.report(Event::Progress(format!(
            "injecting into {}...",
            target.display_name
        )));

        let coordinator = FatCoordinator::new(self.workspace.path(), reporter);
        let mut injected = false;
        for reference in &target.references {
            let request = SliceRequest {
                reference,
                bundle_identifier: &target.bundle_identifier,
                weak,
            };
            match coordinator.patch_file(binary, &request) {
                Ok(()) => injected = true,
                Err(e) if e.is_already_patched() => {
                    reporter.report(Event::Skipped {
                        target: target.display_name.clone(),
                        reference: reference.clone(),
                    });
                    self.report
                        .skipped
                        .push((target.display_name.clone(), reference.clone()));
                }
                Err(e) => {
                    return Err(Error::Inject {
                        reference: reference.clone(),
                        target: target.display_name.clone(),
                        source: Box::new(e),
                    })
                }
            }
        }

        if injected {
            self.report.patched.push(target.display_name.clone());
        }
        self.targets.push(target);
        Ok(injected)
    }

    pub fn report(&self) -> &PatchReport {
        &self.report
    }

    /// Finishes the run, removing the workspace.
    pub fn into_report(self) -> PatchReport {
        self.report
    }
}
