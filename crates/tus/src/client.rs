//! tus transport.
//!
//! The absolute upload URL returned on creation is used as the remote
//! session id, so a remembered session can be resumed without the endpoint.

use std::time::Duration;

use chunkup_protocol::constants::{
    OFFSET_OCTET_STREAM, TUS_RESUMABLE_HEADER, TUS_VERSION, UPLOAD_LENGTH_HEADER,
    UPLOAD_METADATA_HEADER, UPLOAD_OFFSET_HEADER,
};
use chunkup_protocol::{Metadata, encode_metadata};
use chunkup_transfer::{ChunkTransport, TransportError, TransportFuture};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Method, RequestBuilder, Response, Url};
use tracing::{debug, trace};

/// Errors from building clients and from the listing API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Client for one tus creation endpoint.
pub struct TusClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl TusClient {
    /// Creates a client for `endpoint` (e.g. `http://localhost:1080/files/`).
    ///
    /// `timeout` bounds every request; an expired request counts as a
    /// network failure.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ClientError> {
        let endpoint = Url::parse(endpoint).map_err(|e| ClientError::InvalidUrl {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Starts a request carrying the protocol version header.
    fn request<U: reqwest::IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(TUS_RESUMABLE_HEADER, TUS_VERSION)
    }

    async fn create(&self, metadata: &Metadata, total_size: u64) -> Result<String, TransportError> {
        let encoded = encode_metadata(metadata).map_err(|e| TransportError::ServerRejected {
            status: 0,
            message: format!("invalid metadata: {e}"),
        })?;

        let mut req = self
            .request(Method::POST, self.endpoint.clone())
            .header(UPLOAD_LENGTH_HEADER, total_size.to_string());
        if !encoded.is_empty() {
            req = req.header(UPLOAD_METADATA_HEADER, encoded);
        }

        let resp = check_status(req.send().await.map_err(network)?).await?;
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| missing_header(resp.status().as_u16(), "Location"))?;
        let url = self
            .endpoint
            .join(location)
            .map_err(|e| TransportError::ServerRejected {
                status: resp.status().as_u16(),
                message: format!("bad Location {location:?}: {e}"),
            })?;

        debug!(url = %url, size = total_size, "tus upload created");
        Ok(url.to_string())
    }

    async fn patch(&self, upload_url: &str, offset: u64, data: &[u8]) -> Result<u64, TransportError> {
        trace!(url = upload_url, offset, len = data.len(), "PATCH");
        let resp = self
            .request(Method::PATCH, upload_url)
            .header(UPLOAD_OFFSET_HEADER, offset.to_string())
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .body(data.to_vec())
            .send()
            .await
            .map_err(network)?;
        upload_offset(&check_status(resp).await?)
    }

    async fn head(&self, upload_url: &str) -> Result<u64, TransportError> {
        trace!(url = upload_url, "HEAD");
        let resp = self
            .request(Method::HEAD, upload_url)
            .send()
            .await
            .map_err(network)?;
        upload_offset(&check_status(resp).await?)
    }
}

impl ChunkTransport for TusClient {
    fn create_session<'a>(
        &'a self,
        metadata: &'a Metadata,
        total_size: u64,
    ) -> TransportFuture<'a, String> {
        Box::pin(self.create(metadata, total_size))
    }

    fn send_chunk<'a>(
        &'a self,
        session_id: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> TransportFuture<'a, u64> {
        Box::pin(self.patch(session_id, offset, data))
    }

    fn probe_offset<'a>(&'a self, session_id: &'a str) -> TransportFuture<'a, u64> {
        Box::pin(self.head(session_id))
    }
}

/// Maps a non-success HTTP status to a transport error.
///
/// `5xx`, `423 Locked` and `429 Too Many Requests` are temporary; every
/// other status is a permanent rejection.
pub fn classify_status(status: u16, message: String) -> TransportError {
    if status >= 500 || status == 423 || status == 429 {
        TransportError::ServerUnavailable { status, message }
    } else {
        TransportError::ServerRejected { status, message }
    }
}

async fn check_status(resp: Response) -> Result<Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("error").to_string()
    } else {
        body.trim().to_string()
    };
    Err(classify_status(status.as_u16(), message))
}

fn upload_offset(resp: &Response) -> Result<u64, TransportError> {
    resp.headers()
        .get(UPLOAD_OFFSET_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| missing_header(resp.status().as_u16(), UPLOAD_OFFSET_HEADER))
}

fn missing_header(status: u16, name: &str) -> TransportError {
    TransportError::ServerRejected {
        status,
        message: format!("response has no valid {name} header"),
    }
}

fn network(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        return TransportError::ServerRejected {
            status: 0,
            message: err.to_string(),
        };
    }
    TransportError::Network(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockServer, response};
    use chunkup_protocol::constants::METADATA_FILENAME;

    fn client(base: &str) -> TusClient {
        TusClient::new(&format!("{base}/files/"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn create_sends_tus_headers() {
        let server = MockServer::start(vec![response(
            201,
            &[("Location", "/files/abc123")],
            "",
        )])
        .await;

        let mut md = Metadata::new();
        md.insert(METADATA_FILENAME.into(), "video.mp4".into());
        let url = client(&server.url)
            .create_session(&md, 10)
            .await
            .unwrap();
        assert_eq!(url, format!("{}/files/abc123", server.url));

        let req = server.request(0);
        let lower = req.to_ascii_lowercase();
        assert!(lower.starts_with("post /files/ http/1.1"), "{req}");
        assert!(lower.contains("tus-resumable: 1.0.0"));
        assert!(lower.contains("upload-length: 10"));
        assert!(req.contains("filename dmlkZW8ubXA0"));
    }

    #[tokio::test]
    async fn create_keeps_absolute_location() {
        let server = MockServer::start(vec![response(
            201,
            &[("Location", "http://storage.example/files/xyz")],
            "",
        )])
        .await;

        let url = client(&server.url)
            .create_session(&Metadata::new(), 0)
            .await
            .unwrap();
        assert_eq!(url, "http://storage.example/files/xyz");
        // No metadata header for empty metadata.
        assert!(!server.request(0).to_ascii_lowercase().contains("upload-metadata"));
    }

    #[tokio::test]
    async fn create_without_location_is_rejected() {
        let server = MockServer::start(vec![response(201, &[], "")]).await;
        let err = client(&server.url)
            .create_session(&Metadata::new(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ServerRejected { status: 201, .. }));
    }

    #[tokio::test]
    async fn patch_sends_chunk_and_reads_offset() {
        let server =
            MockServer::start(vec![response(204, &[("Upload-Offset", "14")], "")]).await;
        let upload = format!("{}/files/abc", server.url);

        let offset = client(&server.url)
            .send_chunk(&upload, 10, b"data")
            .await
            .unwrap();
        assert_eq!(offset, 14);

        let req = server.request(0);
        let lower = req.to_ascii_lowercase();
        assert!(lower.starts_with("patch /files/abc http/1.1"));
        assert!(lower.contains("upload-offset: 10"));
        assert!(lower.contains("content-type: application/offset+octet-stream"));
        assert!(lower.contains("tus-resumable: 1.0.0"));
        assert!(req.ends_with("\r\n\r\ndata"));
    }

    #[tokio::test]
    async fn head_probes_offset() {
        let server = MockServer::start(vec![response(
            200,
            &[("Upload-Offset", "7"), ("Upload-Length", "20")],
            "",
        )])
        .await;
        let upload = format!("{}/files/abc", server.url);

        let offset = client(&server.url).probe_offset(&upload).await.unwrap();
        assert_eq!(offset, 7);
        assert!(server.request(0).to_ascii_lowercase().starts_with("head /files/abc"));
    }

    #[tokio::test]
    async fn missing_offset_is_rejected() {
        let server = MockServer::start(vec![response(204, &[], "")]).await;
        let upload = format!("{}/files/abc", server.url);
        let err = client(&server.url)
            .send_chunk(&upload, 0, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ServerRejected { .. }));
    }

    #[tokio::test]
    async fn error_statuses_are_classified() {
        let server = MockServer::start(vec![
            response(404, &[], "upload not found"),
            response(503, &[], ""),
            response(409, &[], "offset conflict"),
        ])
        .await;
        let c = client(&server.url);
        let upload = format!("{}/files/abc", server.url);

        assert_eq!(
            c.probe_offset(&upload).await.unwrap_err(),
            TransportError::ServerRejected {
                status: 404,
                message: "upload not found".into()
            }
        );
        assert_eq!(
            c.send_chunk(&upload, 0, b"x").await.unwrap_err(),
            TransportError::ServerUnavailable {
                status: 503,
                message: "Service Unavailable".into()
            }
        );
        assert!(matches!(
            c.send_chunk(&upload, 0, b"x").await.unwrap_err(),
            TransportError::ServerRejected { status: 409, .. }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client(&base)
            .create_session(&Metadata::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }

    #[tokio::test]
    async fn timeout_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            // Accept and never answer.
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let c = TusClient::new(&format!("{base}/files/"), Duration::from_millis(200)).unwrap();
        let err = c.probe_offset(&format!("{base}/files/a")).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
        handle.abort();
    }

    #[test]
    fn status_classification() {
        for status in [500, 502, 503, 423, 429] {
            assert!(matches!(
                classify_status(status, String::new()),
                TransportError::ServerUnavailable { .. }
            ));
        }
        for status in [400, 403, 404, 409, 410, 412, 413] {
            assert!(matches!(
                classify_status(status, String::new()),
                TransportError::ServerRejected { .. }
            ));
        }
    }

    #[test]
    fn invalid_endpoint_is_refused() {
        assert!(matches!(
            TusClient::new("not a url", Duration::from_secs(1)),
            Err(ClientError::InvalidUrl { .. })
        ));
    }
}
