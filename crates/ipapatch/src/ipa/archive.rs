//! Selective reading and rewriting of IPA (zip) archives.
//!
//! Only the entries the pipeline touches are decompressed. Rewriting copies
//! every other entry's stored bytes unchanged.

use crate::library::InjectedLibrary;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Permissions of new entries whose source has none to offer.
const DEFAULT_ENTRY_MODE: u32 = 0o755;

/// Reads a whole entry into memory.
pub fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| Error::fs("reading entry", name, e))?;
    Ok(bytes)
}

/// Decompresses one entry to `dest`.
pub fn extract_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    dest: &Path,
) -> Result<()> {
    let mut entry = archive.by_name(name)?;
    let mut out = File::create(dest).map_err(|e| Error::fs("extracting", dest, e))?;
    io::copy(&mut entry, &mut out).map_err(|e| Error::fs("extracting", dest, e))?;
    Ok(())
}

#[derive(Debug, Clone)]
enum Contents {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// New contents for one archive entry.
#[derive(Debug, Clone)]
pub struct Replacement {
    entry: String,
    contents: Contents,
}

impl Replacement {
    pub fn file(entry: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            entry: entry.into(),
            contents: Contents::File(path.into()),
        }
    }

    /// `library` placed at `<bundle>/Frameworks/<file name>`.
    pub fn library(bundle: &str, library: &InjectedLibrary) -> Result<Self> {
        let entry = format!("{}/Frameworks/{}", bundle, library.file_name());
        Ok(match library.path() {
            Some(path) => Self::file(entry, path),
            None => Self {
                entry,
                contents: Contents::Bytes(library.read()?),
            },
        })
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    fn write_to<W: Write + Seek>(&self, zip: &mut ZipWriter<W>, options: SimpleFileOptions) -> Result<()> {
        match &self.contents {
            Contents::File(path) => {
                let mut file = File::open(path).map_err(|e| Error::fs("reading", path, e))?;
                let size = file
                    .metadata()
                    .map_err(|e| Error::fs("reading", path, e))?
                    .len();
                zip.start_file(self.entry.as_str(), options.large_file(size > u32::MAX as u64))?;
                io::copy(&mut file, zip).map_err(|e| Error::fs("adding to archive", path, e))?;
            }
            Contents::Bytes(bytes) => {
                zip.start_file(self.entry.as_str(), options)?;
                zip.write_all(bytes)?;
            }
        }
        Ok(())
    }

    /// Options for an entry that did not exist before.
    fn fresh_options(&self) -> SimpleFileOptions {
        let options = deflated();

        #[cfg(unix)]
        if let Contents::File(path) = &self.contents {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = fs::metadata(path) {
                return options.unix_permissions(metadata.permissions().mode());
            }
        }

        options.unix_permissions(DEFAULT_ENTRY_MODE)
    }
}

fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Options for an entry replacing one with the given permissions and
/// modification time: both kept, deflated.
fn replacing_options(mode: Option<u32>, modified: Option<zip::DateTime>) -> SimpleFileOptions {
    let mut options = deflated();
    if let Some(mode) = mode {
        options = options.unix_permissions(mode);
    }
    if let Some(modified) = modified {
        options = options.last_modified_time(modified);
    }
    options
}

/// Writes `input` to `output` with `replacements` applied.
///
/// A replaced entry keeps its position; replacements naming entries the
/// input lacks are appended in order. The archive is assembled in a
/// temporary file next to `output` that only replaces it once complete, so
/// `output` may be `input`.
pub fn rewrite_archive(input: &Path, output: &Path, replacements: &[Replacement]) -> Result<()> {
    let file = File::open(input).map_err(|e| Error::fs("opening", input, e))?;
    let mut archive = ZipArchive::new(io::BufReader::new(file))?;

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staging = NamedTempFile::new_in(dir).map_err(|e| Error::fs("creating temporary file in", dir, e))?;
    let mut zip = ZipWriter::new(staging);

    let mut written = vec![false; replacements.len()];
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let Some(slot) = replacements.iter().position(|r| r.entry == entry.name()) else {
            zip.raw_copy_file(entry)?;
            continue;
        };
        if written[slot] {
            continue;
        }

        let options = replacing_options(entry.unix_mode(), entry.last_modified());
        drop(entry);
        replacements[slot].write_to(&mut zip, options)?;
        written[slot] = true;
    }

    for (replacement, _) in replacements.iter().zip(&written).filter(|(_, done)| !**done) {
        replacement.write_to(&mut zip, replacement.fresh_options())?;
    }

    let staging = zip.finish()?;
    drop(archive);
    staging
        .persist(output)
        .map_err(|e| Error::fs("writing", output, e.error))?;

    tracing::debug!(
        output = %output.display(),
        replaced = replacements.len(),
        "rewrote archive"
    );
    Ok(())
}
