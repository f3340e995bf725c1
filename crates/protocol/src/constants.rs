use std::time::Duration;

/// Protocol version sent in every `Tus-Resumable` header.
pub const TUS_VERSION: &str = "1.0.0";

/// Header carrying the protocol version.
pub const TUS_RESUMABLE_HEADER: &str = "Tus-Resumable";

/// Total length of the upload, sent on creation.
pub const UPLOAD_LENGTH_HEADER: &str = "Upload-Length";

/// Byte offset of the upload, sent on PATCH and returned by PATCH/HEAD.
pub const UPLOAD_OFFSET_HEADER: &str = "Upload-Offset";

/// Encoded key/value metadata, sent on creation.
pub const UPLOAD_METADATA_HEADER: &str = "Upload-Metadata";

/// Content type required for PATCH request bodies.
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Fallback content type for files with an unknown extension.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata key holding the original file name.
pub const METADATA_FILENAME: &str = "filename";

/// Metadata key holding the file's content type.
pub const METADATA_FILETYPE: &str = "filetype";

/// Default tus endpoint of the upload server.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:1080/files/";

/// Default base URL of the read-only listing API.
pub const DEFAULT_LISTING_URL: &str = "http://localhost:8080";

/// Timeout applied to every transport request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry delays used by the web uploader, in milliseconds.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 5] = [0, 3_000, 5_000, 10_000, 20_000];
