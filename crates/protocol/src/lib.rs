//! Wire-level types for the tus resumable upload protocol and the
//! read-only listing API.

pub mod constants;
pub mod metadata;
pub mod types;

// Re-export primary types for convenience.
pub use metadata::{Metadata, MetadataError, decode_metadata, encode_metadata, metadata_for_path};
pub use types::{ListedObject, UploadStatus, find_listing};
