//! Container codec for versioned update artifacts.
//!
//! An artifact is an uncompressed tar stream holding a version record, a
//! manifest of checksums (version 2, optionally signed), a header archive
//! describing the payloads, and one data archive per payload. This crate
//! reads, verifies, writes and repacks such streams sequentially without
//! holding payload bytes in memory.

pub mod archive;
pub mod checksum;
pub mod error;
pub mod handlers;
pub mod header;
pub mod layout;
pub mod manifest;
pub mod reader;
pub mod repack;
pub mod scripts;
pub mod signature;
pub mod version;
pub mod writer;

pub use archive::Compression;
pub use error::{ArtifactError, BoxError, Result, SignatureError};
pub use handlers::{
    discarding_installer, rootfs_composer, Composer, DataFile, DataSink, HandlerRegistry,
    Installer, RootfsInstaller, RootfsV1, RootfsV2, UpdateFile, ROOTFS_IMAGE_TYPE,
};
pub use manifest::Manifest;
pub use reader::{ArtifactInfo, ArtifactReader, ReadOutcome, ReadState, UpdateInfo};
pub use repack::{repack, RepackOptions, RepackReport};
pub use scripts::{validate_script_name, Script, Scripts};
pub use signature::{
    AcceptAll, Ed25519Signer, Ed25519Verifier, SignatureStatus, SignatureVerifier, Signer,
};
pub use version::{FormatInfo, FORMAT_NAME, LATEST_FORMAT_VERSION, SUPPORTED_VERSIONS};
pub use writer::{ArtifactWriter, WriteReport, WriteRequest};
