//! Apple code signing constants and magic numbers
//!
//! These constants define the binary format of embedded signatures: SuperBlob
//! and blob magics, slot indices, hash types and the CodeDirectory fields the
//! re-signer reads and writes.

// =============================================================================
// Blob Magic Numbers
// =============================================================================

/// SuperBlob containing all signature components (embedded signature)
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;

/// CodeDirectory blob magic
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade0c02;

/// Requirements blob magic
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade0c01;

/// Embedded entitlements (XML plist format)
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade7171;

/// Embedded DER entitlements (ASN.1 DER format)
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade7172;

/// CMS signature wrapper blob
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xfade0b01;

// =============================================================================
// Slot Types (for SuperBlob index)
// =============================================================================

/// Primary code directory slot
pub const CSSLOT_CODEDIRECTORY: u32 = 0x0000;

/// Code requirements slot
pub const CSSLOT_REQUIREMENTS: u32 = 0x0002;

/// Entitlements slot (XML format)
pub const CSSLOT_ENTITLEMENTS: u32 = 0x0005;

/// DER entitlements slot
pub const CSSLOT_DER_ENTITLEMENTS: u32 = 0x0007;

/// Alternate code directories start (SHA-256, SHA-384, etc.)
pub const CSSLOT_ALTERNATE_CODEDIRECTORIES: u32 = 0x1000;

/// Maximum number of alternate code directories
pub const CSSLOT_ALTERNATE_CODEDIRECTORY_MAX: u32 = 5;

/// Limit for alternate code directory slots
pub const CSSLOT_ALTERNATE_CODEDIRECTORY_LIMIT: u32 =
    CSSLOT_ALTERNATE_CODEDIRECTORIES + CSSLOT_ALTERNATE_CODEDIRECTORY_MAX;

/// CMS signature slot
pub const CSSLOT_SIGNATURESLOT: u32 = 0x10000;

// =============================================================================
// Hash Types
// =============================================================================

/// SHA-1 hash (160-bit / 20 bytes)
pub const CS_HASHTYPE_SHA1: u8 = 1;

/// SHA-256 hash (256-bit / 32 bytes)
pub const CS_HASHTYPE_SHA256: u8 = 2;

/// SHA-1 hash size in bytes
pub const CS_SHA1_LEN: usize = 20;

/// SHA-256 hash size in bytes
pub const CS_SHA256_LEN: usize = 32;

// =============================================================================
// Flags
// =============================================================================

/// Ad-hoc signed (no identity)
pub const CS_ADHOC: u32 = 0x00000002;

/// Executable segment is main binary
pub const CS_EXECSEG_MAIN_BINARY: u64 = 0x0001;

// =============================================================================
// CodeDirectory Layout
// =============================================================================

/// Version with exec segment support, the one we generate
pub const CODEDIRECTORY_VERSION: u32 = 0x20400;

/// Version that introduced the team ID offset
pub const CODEDIRECTORY_VERSION_TEAMID: u32 = 0x20200;

/// Standard code signing page size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Log2 of page size (for CodeDirectory header)
pub const PAGE_SIZE_LOG2: u8 = 12;

/// SuperBlob header: magic, length, count
pub const SUPERBLOB_HEADER_SIZE: usize = 12;

/// SuperBlob index entry: type, offset
pub const BLOB_INDEX_SIZE: usize = 8;
