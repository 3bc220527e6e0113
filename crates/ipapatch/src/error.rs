//! Error types for ipapatch operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure in the
//! patch pipeline: unparseable binaries, the benign "already patched" case,
//! signature problems, manifest discovery failures and filesystem/archive I/O.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for ipapatch operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// [`Error::AlreadyPatched`] is the only benign variant: the pipeline skips the
/// reference name it was raised for and keeps going. Everything else aborts the run.
///
/// # Examples
///
/// ```no_run
/// use ipapatch::{Error, IpaPatch};
///
/// match IpaPatch::new().dylib("tweak.dylib").patch("App.ipa") {
///     Ok(report) => println!("patched {} targets", report.patched.len()),
///     Err(Error::NoPlist) => eprintln!("not an app archive"),
///     Err(e) => eprintln!("failed: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed outside of a tracked stage.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Filesystem operation failed while working on a specific path.
    #[error("{stage} {}: {source}", path.display())]
    FileSystem {
        /// What the pipeline was doing (e.g. "reading", "extracting").
        stage: &'static str,
        /// The path the operation touched.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The input is not a Mach-O image this crate can handle.
    ///
    /// Raised for unknown magic numbers, 32-bit images, truncated headers and
    /// load-command tables that overrun their declared size.
    #[error("Malformed binary: {0}")]
    MalformedBinary(String),

    /// The reference name is already loaded by the binary.
    #[error("load command '{0}' already exists (already patched)")]
    AlreadyPatched(String),

    /// The existing signature contained no code directory to carry over.
    #[error("no code directories")]
    NoCodeDirectories,

    /// The new load command does not fit in front of the first section.
    #[error("no room for load command: need {needed} bytes, {available} available")]
    NoLoadCommandSpace {
        /// Size of the load-command table after the mutation.
        needed: usize,
        /// Bytes between the Mach-O header and the first file data.
        available: usize,
    },

    /// No main-bundle or plugin manifest was found.
    #[error("no Info.plist found in ipa")]
    NoPlist,

    /// Plugins-only mode found no plugin manifest.
    #[error("no plugins found")]
    NoPlugins,

    /// A manifest was readable but lacks a required key.
    #[error("Invalid manifest {path}: {reason}")]
    Manifest {
        /// Archive-relative or filesystem path of the manifest.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Property list parsing failed.
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    /// ZIP archive operation failed.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Invalid patch configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The user declined to overwrite an existing output file.
    #[error("refusing to overwrite {}", .0.display())]
    Declined(PathBuf),

    /// Injecting a reference name into a target failed.
    #[error("couldn't inject '{reference}' into {target}: {source}")]
    Inject {
        /// The `@rpath/...` reference name being injected.
        reference: String,
        /// Display name of the target executable.
        target: String,
        /// The failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps an I/O error with the stage and path it happened on.
    pub fn fs(stage: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::FileSystem {
            stage,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error only means the reference name was already present.
    pub fn is_already_patched(&self) -> bool {
        match self {
            Error::AlreadyPatched(_) => true,
            Error::Inject { source, .. } => source.is_already_patched(),
            _ => false,
        }
    }
}
