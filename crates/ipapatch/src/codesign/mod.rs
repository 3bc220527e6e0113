//! Code signature parsing and ad-hoc re-signing for iOS/macOS binaries

pub mod blob;
pub mod code_directory;
pub mod constants;
pub mod resign;
pub mod superblob;

pub use blob::CodeSignatureBlob;
pub use code_directory::{CodeDirectory, CodeDirectoryBuilder, HashType};
pub use resign::{resign, FALLBACK_IDENTIFIER};
