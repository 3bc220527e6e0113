//! Libraries copied into patched bundles.

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the library injected when none is supplied.
pub const DEFAULT_LIBRARY_NAME: &str = "zxPluginsInject.dylib";

/// Install-name prefix of every injected reference.
pub const RPATH_PREFIX: &str = "@rpath/";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A dylib to inject: its bundle file name and where its bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedLibrary {
    file_name: String,
    source: Source,
}

impl InjectedLibrary {
    /// Library read from `path` when it is copied; named after its file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Config(format!("invalid dylib path: {}", path.display())))?
            .to_string();

        Ok(Self {
            file_name,
            source: Source::Path(path),
        })
    }

    /// Library held in memory.
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            source: Source::Bytes(bytes),
        }
    }

    /// The default library, read from `path` but always named
    /// [`DEFAULT_LIBRARY_NAME`] inside the bundle.
    pub fn default_from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file_name: DEFAULT_LIBRARY_NAME.to_string(),
            source: Source::Path(path.into()),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Source path, for libraries read from disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::Path(path) => Some(path),
            Source::Bytes(_) => None,
        }
    }

    /// Install name the patched binaries load: `@rpath/<file name>`.
    pub fn reference_name(&self) -> String {
        format!("{}{}", RPATH_PREFIX, self.file_name)
    }

    /// The library contents.
    pub fn read(&self) -> Result<Vec<u8>> {
        match &self.source {
            Source::Path(path) => fs::read(path).map_err(|e| Error::fs("reading dylib", path, e)),
            Source::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Writes the library into `dir`, returning the written path.
    pub fn copy_into(&self, dir: &Path) -> Result<PathBuf> {
        let dest = dir.join(&self.file_name);
        match &self.source {
            Source::Path(path) => fs::copy(path, &dest)
                .map(|_| ())
                .map_err(|e| Error::fs("copying dylib to", &dest, e))?,
            Source::Bytes(bytes) => {
                fs::write(&dest, bytes).map_err(|e| Error::fs("writing dylib", &dest, e))?
            }
        }
        Ok(dest)
    }
}

/// Drops libraries whose file name was already seen, keeping the first.
pub fn dedup_libraries(libraries: Vec<InjectedLibrary>) -> Vec<InjectedLibrary> {
    let mut unique: Vec<InjectedLibrary> = Vec::with_capacity(libraries.len());
    for library in libraries {
        if !unique.iter().any(|seen| seen.file_name == library.file_name) {
            unique.push(library);
        }
    }
    unique
}
