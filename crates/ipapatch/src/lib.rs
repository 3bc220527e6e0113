pub mod builder;
pub mod bundle;
pub mod codesign;
pub mod error;
pub mod ipa;
pub mod library;
pub mod macho;
pub mod manifest;
pub mod report;
pub mod session;

pub use builder::{AssumeYes, Confirm, IpaPatch, PatchOptions};
pub use bundle::BundlePatcher;
pub use error::Error;
pub use ipa::IpaPatcher;
pub use library::{InjectedLibrary, DEFAULT_LIBRARY_NAME};
pub use macho::{FatCoordinator, MachOImage, SliceRequest};
pub use manifest::{BundleManifest, ManifestDecoder, PlistManifestDecoder};
pub use report::{Event, MemoryReporter, Reporter, TracingReporter};
pub use session::{InjectionTarget, PatchReport, PatchSession, TargetLocation};

pub type Result<T> = std::result::Result<T, Error>;
