//! Bundle manifest (`Info.plist`) decoding.

use crate::{Error, Result};
use std::path::{Component, Path};

/// The two manifest keys the patcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleManifest {
    /// `CFBundleExecutable`
    pub executable_name: String,
    /// `CFBundleIdentifier`, empty if absent
    pub bundle_identifier: String,
}

impl BundleManifest {
    /// Fails unless the executable name is a single plain file name.
    ///
    /// Names with separators, `..` or a root would resolve outside the
    /// bundle directory.
    pub fn check_executable(&self, path: &str) -> Result<()> {
        if is_plain_file_name(&self.executable_name) {
            return Ok(());
        }
        Err(Error::Manifest {
            path: path.to_string(),
            reason: format!(
                "CFBundleExecutable {:?} is not a plain file name",
                self.executable_name
            ),
        })
    }
}

/// Whether `name` is exactly one normal path component.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Decodes raw manifest bytes.
pub trait ManifestDecoder {
    /// `path` names the manifest in error messages only.
    fn decode(&self, path: &str, bytes: &[u8]) -> Result<BundleManifest>;
}

/// Reads XML or binary property lists with the `plist` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlistManifestDecoder;

impl ManifestDecoder for PlistManifestDecoder {
    fn decode(&self, path: &str, bytes: &[u8]) -> Result<BundleManifest> {
        let value: plist::Value = plist::from_bytes(bytes)?;
        let dict = value.as_dictionary().ok_or_else(|| Error::Manifest {
            path: path.to_string(),
            reason: "top level is not a dictionary".into(),
        })?;

        let executable_name = dict
            .get("CFBundleExecutable")
            .and_then(|v| v.as_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Manifest {
                path: path.to_string(),
                reason: "missing CFBundleExecutable".into(),
            })?
            .to_string();

        let bundle_identifier = dict
            .get("CFBundleIdentifier")
            .and_then(|v| v.as_string())
            .unwrap_or_default()
            .to_string();

        Ok(BundleManifest {
            executable_name,
            bundle_identifier,
        })
    }
}
