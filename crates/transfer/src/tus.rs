//! tus 1.0 resumable upload client over HTTP.
//!
//! - create: `POST endpoint` with `Upload-Length` and `Upload-Metadata`;
//!   the `Location` response header (resolved against the endpoint) becomes
//!   the remote upload id.
//! - resume: `HEAD upload` for `Upload-Offset`, then sequential `PATCH`
//!   requests from that offset in a background task.
//! - abort: cancels the background task. The remote upload is not deleted.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use filmup_protocol::constants::{
    DEFAULT_REQUEST_TIMEOUT, HEADER_TUS_RESUMABLE, HEADER_UPLOAD_CHECKSUM, HEADER_UPLOAD_LENGTH,
    HEADER_UPLOAD_METADATA, HEADER_UPLOAD_OFFSET, OFFSET_OCTET_STREAM, TUS_VERSION,
};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunked::{ChunkReader, checksum_bytes};
use crate::{
    Completion, DEFAULT_CHUNK_SIZE, EventSink, Transport, TransportError, TransportFuture,
    UploadRequest, validate_request,
};

/// Settings for [`TusTransport`].
#[derive(Debug, Clone)]
pub struct TusConfig {
    /// Bytes per `PATCH` request.
    pub chunk_size: usize,
    /// Maximum uploads streaming at once; 0 means unbounded.
    pub max_concurrent: usize,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    /// Send an `Upload-Checksum: sha256 ...` header with every chunk.
    pub checksum: bool,
}

impl Default for TusConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            checksum: false,
        }
    }
}

/// [`Transport`] speaking tus 1.0 via `reqwest`.
pub struct TusTransport {
    http: reqwest::Client,
    config: TusConfig,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
    permits: Option<Arc<Semaphore>>,
}

impl TusTransport {
    pub fn new(config: TusConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let permits = (config.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent)));

        Ok(Self {
            http,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
            permits,
        })
    }

    pub fn config(&self) -> &TusConfig {
        &self.config
    }

    /// Number of uploads with a running chunk stream.
    pub fn active_streams(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn create(&self, request: &UploadRequest) -> Result<String, TransportError> {
        validate_request(request)?;

        let mut headers = request_headers(&request.options.headers)?;
        headers.insert(
            HeaderName::from_static(HEADER_UPLOAD_LENGTH),
            HeaderValue::from(request.file.size),
        );

        let mut metadata = request.file.metadata();
        metadata.extend(
            request
                .options
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if !metadata.is_empty() {
            headers.insert(
                HeaderName::from_static(HEADER_UPLOAD_METADATA),
                header_value(&encode_metadata(&metadata))?,
            );
        }

        let resp = self
            .http
            .post(&request.options.endpoint)
            .headers(headers)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TransportError::Protocol("create response has no Location".into()))?;
        let url = resp
            .url()
            .join(location)
            .map_err(|e| TransportError::Protocol(format!("bad Location {location:?}: {e}")))?;

        info!(upload = %url, size = request.file.size, "tus upload created");
        Ok(url.to_string())
    }

    async fn start_stream(
        &self,
        upload_id: &str,
        request: &UploadRequest,
        sink: EventSink,
    ) -> Result<bool, TransportError> {
        let headers = request_headers(&request.options.headers)?;
        let resp = self
            .http
            .head(upload_id)
            .headers(headers.clone())
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(TransportError::SessionExpired(upload_id.to_string()));
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let offset = header_u64(resp.headers(), HEADER_UPLOAD_OFFSET)?.ok_or_else(|| {
            TransportError::Protocol("HEAD response has no Upload-Offset".into())
        })?;
        let total = header_u64(resp.headers(), HEADER_UPLOAD_LENGTH)?.unwrap_or(request.file.size);
        debug!(upload = %upload_id, offset, total, "resuming tus upload");

        let token = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(upload_id.to_string(), token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let stream = ChunkStream {
            http: self.http.clone(),
            url: upload_id.to_string(),
            path: request.file.path.clone(),
            headers,
            offset,
            total,
            chunk_size: self.config.chunk_size,
            checksum: self.config.checksum,
            token,
            sink,
            permits: self.permits.clone(),
            active: Arc::clone(&self.active),
        };
        tokio::spawn(stream.run());
        Ok(true)
    }
}

impl Transport for TusTransport {
    fn create_upload<'a>(&'a self, request: &'a UploadRequest) -> TransportFuture<'a, String> {
        Box::pin(self.create(request))
    }

    fn resume<'a>(
        &'a self,
        upload_id: &'a str,
        request: &'a UploadRequest,
        sink: EventSink,
    ) -> TransportFuture<'a, bool> {
        Box::pin(self.start_stream(upload_id, request, sink))
    }

    fn abort<'a>(&'a self, upload_id: &'a str) -> TransportFuture<'a, bool> {
        Box::pin(async move {
            let token = self
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(upload_id);
            match token {
                Some(token) => {
                    token.cancel();
                    debug!(upload = %upload_id, "tus stream cancelled");
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}

/// Background `PATCH` loop for one resume cycle.
struct ChunkStream {
    http: reqwest::Client,
    url: String,
    path: PathBuf,
    headers: HeaderMap,
    offset: u64,
    total: u64,
    chunk_size: usize,
    checksum: bool,
    token: CancellationToken,
    sink: EventSink,
    permits: Option<Arc<Semaphore>>,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ChunkStream {
    async fn run(self) {
        let _permit = match &self.permits {
            Some(permits) => tokio::select! {
                permit = Arc::clone(permits).acquire_owned() => permit.ok(),
                _ = self.token.cancelled() => return,
            },
            None => None,
        };

        let result = self.send_chunks().await;

        if !self.token.is_cancelled() {
            self.active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.url);
        }

        match result {
            Ok(Some(completion)) => self.sink.success(completion),
            Ok(None) => debug!(upload = %self.url, "tus stream stopped"),
            Err(e) if self.token.is_cancelled() => {
                debug!(upload = %self.url, error = %e, "error after cancel ignored");
            }
            Err(e) => {
                warn!(upload = %self.url, error = %e, "tus stream failed");
                self.sink.error(e);
            }
        }
    }

    /// Returns `Ok(None)` if the stream was stopped before completion.
    async fn send_chunks(&self) -> Result<Option<Completion>, TransportError> {
        self.sink.progress(self.offset, self.total);
        if self.offset >= self.total {
            return Ok(Some(Completion {
                location: self.url.clone(),
                status: StatusCode::OK.as_u16(),
                body: None,
            }));
        }

        let path = self.path.clone();
        let (chunk_size, start) = (self.chunk_size, self.offset);
        let mut reader = blocking(move || {
            let mut reader = ChunkReader::new(&path, chunk_size)?;
            reader.seek_to(start)?;
            Ok(reader)
        })
        .await?;
        let mut next_offset = self.offset;

        loop {
            if self.token.is_cancelled() || !self.sink.is_current() {
                return Ok(None);
            }

            let (returned, chunk) = blocking(move || {
                if reader.offset() != next_offset {
                    reader.seek_to(next_offset)?;
                }
                let chunk = reader.next_chunk()?;
                Ok((reader, chunk))
            })
            .await?;
            reader = returned;
            let Some(chunk) = chunk else {
                return Err(TransportError::Protocol(format!(
                    "file ended at {next_offset} of {} bytes",
                    self.total
                )));
            };

            let mut headers = self.headers.clone();
            headers.insert(
                HeaderName::from_static(HEADER_UPLOAD_OFFSET),
                HeaderValue::from(chunk.offset),
            );
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(OFFSET_OCTET_STREAM));
            if self.checksum {
                headers.insert(
                    HeaderName::from_static(HEADER_UPLOAD_CHECKSUM),
                    header_value(&format!("sha256 {}", checksum_bytes(&chunk.data)))?,
                );
            }

            let send = self.http.patch(&self.url).headers(headers).body(chunk.data).send();
            let resp = tokio::select! {
                resp = send => resp?,
                _ = self.token.cancelled() => return Ok(None),
            };

            let status = resp.status();
            if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                return Err(TransportError::SessionExpired(self.url.clone()));
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(TransportError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            next_offset = header_u64(resp.headers(), HEADER_UPLOAD_OFFSET)?.ok_or_else(|| {
                TransportError::Protocol("PATCH response has no Upload-Offset".into())
            })?;
            let body = resp.bytes().await?;

            self.sink.progress(next_offset, self.total);
            if next_offset >= self.total {
                return Ok(Some(Completion {
                    location: self.url.clone(),
                    status: status.as_u16(),
                    body: serde_json::from_slice(&body).ok(),
                }));
            }
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Protocol(format!("file reader task failed: {e}")))?
}

/// Encodes tus metadata: comma-separated `key base64(value)` pairs.
fn encode_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{k} {}", STANDARD.encode(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn request_headers(extra: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HEADER_TUS_RESUMABLE),
        HeaderValue::from_static(TUS_VERSION),
    );
    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
        headers.insert(name, header_value(value)?);
    }
    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(value.to_string()))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Result<Option<u64>, TransportError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| TransportError::InvalidHeader(format!("{name}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvent;
    use crate::transport::testing::RecordingTarget;
    use crate::CreateOptions;
    use filmup_protocol::FileRef;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct MockRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    impl MockRequest {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }
    }

    struct MockResponse {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: String,
    }

    impl MockResponse {
        fn new(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: String::new(),
            }
        }

        fn header(mut self, name: &'static str, value: impl ToString) -> Self {
            self.headers.push((name, value.to_string()));
            self
        }

        fn body(mut self, body: &str) -> Self {
            self.body = body.to_string();
            self
        }
    }

    type Handler = Arc<dyn Fn(&MockRequest, &mut u64) -> MockResponse + Send + Sync>;

    /// Starts a mock tus server. The handler sees every request plus the
    /// server-side offset it may update; all requests are recorded.
    async fn mock_server(handler: Handler) -> (String, Arc<Mutex<Vec<MockRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let log = Arc::new(Mutex::new(Vec::new()));
        let offset = Arc::new(Mutex::new(0u64));

        let requests = Arc::clone(&log);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);

                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    continue;
                }
                let mut parts = line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();

                let mut headers = HashMap::new();
                loop {
                    let mut h = String::new();
                    reader.read_line(&mut h).await.unwrap();
                    let h = h.trim_end();
                    if h.is_empty() {
                        break;
                    }
                    if let Some((k, v)) = h.split_once(':') {
                        headers.insert(k.trim().to_lowercase(), v.trim().to_string());
                    }
                }
                let len: usize = headers
                    .get("content-length")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let mut body = vec![0u8; len];
                reader.read_exact(&mut body).await.unwrap();

                let req = MockRequest {
                    method,
                    path,
                    headers,
                    body,
                };
                let resp = {
                    let mut offset = offset.lock().unwrap();
                    handler(&req, &mut *offset)
                };
                requests.lock().unwrap().push(req);

                let mut out = format!("HTTP/1.1 {} Mock\r\n", resp.status);
                for (k, v) in &resp.headers {
                    out.push_str(&format!("{k}: {v}\r\n"));
                }
                out.push_str(&format!(
                    "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    resp.body.len(),
                    resp.body
                ));
                let _ = write.write_all(out.as_bytes()).await;
                let _ = write.shutdown().await;
            }
        });

        (url, log)
    }

    /// Server that accepts PATCH bodies at the current offset.
    fn tus_handler(total: u64, final_body: &'static str) -> Handler {
        Arc::new(move |req: &MockRequest, offset: &mut u64| match req.method.as_str() {
            "POST" => MockResponse::new(201).header("Location", "/files/abc"),
            "HEAD" => MockResponse::new(200)
                .header("Upload-Offset", *offset)
                .header("Upload-Length", total),
            "PATCH" => {
                *offset += req.body.len() as u64;
                let resp = MockResponse::new(if *offset >= total { 200 } else { 204 })
                    .header("Upload-Offset", *offset);
                if *offset >= total {
                    resp.header("Content-Type", "application/json")
                        .body(final_body)
                } else {
                    resp
                }
            }
            _ => MockResponse::new(405),
        })
    }

    fn request_for(dir: &std::path::Path, data: &[u8], endpoint: &str) -> UploadRequest {
        let path = dir.join("clip.mp4");
        std::fs::write(&path, data).unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert("film_id".to_string(), "42".to_string());
        let mut headers = BTreeMap::new();
        headers.insert("x-upload-id".to_string(), "task-1".to_string());
        UploadRequest::new(
            FileRef::new(path, "video/mp4", "clip.mp4", data.len() as u64),
            CreateOptions {
                endpoint: endpoint.to_string(),
                metadata,
                headers,
            },
        )
    }

    fn transport(chunk_size: usize, checksum: bool) -> TusTransport {
        TusTransport::new(TusConfig {
            chunk_size,
            checksum,
            ..Default::default()
        })
        .unwrap()
    }

    async fn wait_for_terminal(target: &RecordingTarget) {
        for _ in 0..200 {
            let done = target.events.lock().unwrap().iter().any(|e| {
                matches!(e, TransportEvent::Success(_) | TransportEvent::Error(_))
            });
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transport never reported a terminal event");
    }

    #[test]
    fn metadata_values_are_base64() {
        let mut meta = BTreeMap::new();
        meta.insert("filename".to_string(), "clip.mp4".to_string());
        meta.insert("film_id".to_string(), "42".to_string());
        assert_eq!(encode_metadata(&meta), "film_id NDI=,filename Y2xpcC5tcDQ=");
    }

    #[test]
    fn rejects_invalid_custom_header() {
        let mut extra = BTreeMap::new();
        extra.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            request_headers(&extra),
            Err(TransportError::InvalidHeader(_))
        ));
    }

    #[tokio::test]
    async fn create_posts_length_and_metadata() {
        let (url, log) = mock_server(tus_handler(10, "")).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123456789", &format!("{url}/tus"));

        let upload_id = transport(4, false).create_upload(&req).await.unwrap();
        assert_eq!(upload_id, format!("{url}/files/abc"));

        let log = log.lock().unwrap();
        let post = &log[0];
        assert_eq!(post.method, "POST");
        assert_eq!(post.path, "/tus");
        assert_eq!(post.header("upload-length"), Some("10"));
        assert_eq!(post.header("tus-resumable"), Some("1.0.0"));
        assert_eq!(post.header("x-upload-id"), Some("task-1"));
        let meta = post.header("upload-metadata").unwrap();
        assert!(meta.contains("filename Y2xpcC5tcDQ="));
        assert!(meta.contains("film_id NDI="));
    }

    #[tokio::test]
    async fn create_surfaces_http_status() {
        let handler: Handler =
            Arc::new(|_: &MockRequest, _: &mut u64| MockResponse::new(413).body("too large"));
        let (url, _log) = mock_server(handler).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123", &format!("{url}/tus"));

        let err = transport(4, false).create_upload(&req).await.unwrap_err();
        assert!(matches!(err, TransportError::Http { status: 413, .. }));
    }

    #[tokio::test]
    async fn create_without_endpoint_is_rejected_locally() {
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123", "");
        let err = transport(4, false).create_upload(&req).await.unwrap_err();
        assert!(matches!(err, TransportError::EndpointMissing));
    }

    #[tokio::test]
    async fn resume_on_unknown_upload_reports_expired() {
        let handler: Handler = Arc::new(|_: &MockRequest, _: &mut u64| MockResponse::new(404));
        let (url, _log) = mock_server(handler).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123", &format!("{url}/tus"));
        let target = Arc::new(RecordingTarget::default());

        let upload_id = format!("{url}/files/gone");
        let err = transport(4, false)
            .resume(&upload_id, &req, target.sink())
            .await
            .unwrap_err();
        assert!(err.is_expired());
    }

    #[tokio::test]
    async fn resume_streams_all_chunks_in_order() {
        let (url, log) = mock_server(tus_handler(10, r#"{"success":true,"data":{"id":7}}"#)).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123456789", &format!("{url}/tus"));
        let tus = transport(4, true);
        let target = Arc::new(RecordingTarget::default());

        let upload_id = tus.create_upload(&req).await.unwrap();
        assert!(tus.resume(&upload_id, &req, target.sink()).await.unwrap());
        wait_for_terminal(&target).await;

        let events = target.events.lock().unwrap();
        let offsets: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Progress { written, .. } => Some(*written),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 4, 8, 10]);

        let Some(TransportEvent::Success(completion)) = events.last() else {
            panic!("expected success, got {events:?}");
        };
        assert_eq!(completion.location, upload_id);
        assert_eq!(completion.status, 200);
        assert_eq!(
            completion.body,
            Some(serde_json::json!({"success": true, "data": {"id": 7}}))
        );

        let log = log.lock().unwrap();
        let patches: Vec<_> = log.iter().filter(|r| r.method == "PATCH").collect();
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].header("upload-offset"), Some("0"));
        assert_eq!(patches[2].body, b"89");
        assert_eq!(
            patches[0].header("content-type"),
            Some("application/offset+octet-stream")
        );
        let expected = format!("sha256 {}", checksum_bytes(b"0123"));
        assert_eq!(patches[0].header("upload-checksum"), Some(expected.as_str()));
        assert_eq!(tus.active_streams(), 0);
    }

    #[tokio::test]
    async fn resume_continues_from_server_offset() {
        let handler: Handler = Arc::new(|req: &MockRequest, offset: &mut u64| {
            if *offset == 0 {
                *offset = 6;
            }
            match req.method.as_str() {
                "HEAD" => MockResponse::new(200).header("Upload-Offset", *offset),
                "PATCH" => {
                    *offset += req.body.len() as u64;
                    MockResponse::new(204).header("Upload-Offset", *offset)
                }
                _ => MockResponse::new(405),
            }
        });
        let (url, log) = mock_server(handler).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123456789", &format!("{url}/tus"));
        let target = Arc::new(RecordingTarget::default());

        let upload_id = format!("{url}/files/abc");
        transport(8, false)
            .resume(&upload_id, &req, target.sink())
            .await
            .unwrap();
        wait_for_terminal(&target).await;

        let log = log.lock().unwrap();
        let patch = log.iter().find(|r| r.method == "PATCH").unwrap();
        assert_eq!(patch.header("upload-offset"), Some("6"));
        assert_eq!(patch.body, b"6789");

        let events = target.events.lock().unwrap();
        let Some(TransportEvent::Success(completion)) = events.last() else {
            panic!("expected success, got {events:?}");
        };
        // 204 carries no body.
        assert!(completion.body.is_none());
    }

    #[tokio::test]
    async fn patch_gone_reports_expired() {
        let handler: Handler = Arc::new(|req: &MockRequest, _: &mut u64| match req.method.as_str() {
            "HEAD" => MockResponse::new(200).header("Upload-Offset", 0),
            "PATCH" => MockResponse::new(410),
            _ => MockResponse::new(405),
        });
        let (url, _log) = mock_server(handler).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123456789", &format!("{url}/tus"));
        let tus = transport(4, false);
        let target = Arc::new(RecordingTarget::default());

        let upload_id = format!("{url}/files/abc");
        assert!(tus.resume(&upload_id, &req, target.sink()).await.unwrap());
        wait_for_terminal(&target).await;

        let events = target.events.lock().unwrap();
        let Some(TransportEvent::Error(err)) = events.last() else {
            panic!("expected error, got {events:?}");
        };
        assert!(err.is_expired(), "got {err:?}");
        assert!(matches!(err, TransportError::SessionExpired(id) if *id == upload_id));
        assert_eq!(tus.active_streams(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abort_stops_stream_mid_upload() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        // Holds the first PATCH open until the test has aborted.
        let handler: Handler = Arc::new(move |req: &MockRequest, offset: &mut u64| {
            match req.method.as_str() {
                "HEAD" => MockResponse::new(200).header("Upload-Offset", *offset),
                "PATCH" => {
                    if *offset == 0 {
                        let _ = entered_tx.send(());
                        let _ = release_rx
                            .lock()
                            .unwrap()
                            .recv_timeout(Duration::from_secs(5));
                    }
                    *offset += req.body.len() as u64;
                    MockResponse::new(204).header("Upload-Offset", *offset)
                }
                _ => MockResponse::new(405),
            }
        });
        let (url, log) = mock_server(handler).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123456789", &format!("{url}/tus"));
        let tus = transport(4, false);
        let target = Arc::new(RecordingTarget::default());

        let upload_id = format!("{url}/files/abc");
        assert!(tus.resume(&upload_id, &req, target.sink()).await.unwrap());
        assert_eq!(tus.active_streams(), 1);

        tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .expect("first PATCH never arrived");
        assert!(tus.abort(&upload_id).await.unwrap());
        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let log = log.lock().unwrap();
        let patches = log.iter().filter(|r| r.method == "PATCH").count();
        assert_eq!(patches, 1);
        assert_eq!(tus.active_streams(), 0);

        let events = target.events.lock().unwrap();
        assert!(
            events.iter().all(|e| matches!(e, TransportEvent::Progress { .. })),
            "no terminal event after abort, got {events:?}"
        );
    }

    #[tokio::test]
    async fn single_permit_serializes_streams() {
        let offsets = Mutex::new(HashMap::<String, u64>::new());
        let handler: Handler = Arc::new(move |req: &MockRequest, _: &mut u64| {
            let mut offsets = offsets.lock().unwrap();
            let offset = offsets.entry(req.path.clone()).or_default();
            match req.method.as_str() {
                "HEAD" => MockResponse::new(200).header("Upload-Offset", *offset),
                "PATCH" => {
                    *offset += req.body.len() as u64;
                    MockResponse::new(204).header("Upload-Offset", *offset)
                }
                _ => MockResponse::new(405),
            }
        });
        let (url, log) = mock_server(handler).await;
        let dir = tempfile::tempdir().unwrap();
        let req = request_for(dir.path(), b"0123456789", &format!("{url}/tus"));
        let tus = TusTransport::new(TusConfig {
            chunk_size: 2,
            max_concurrent: 1,
            ..Default::default()
        })
        .unwrap();

        let first = Arc::new(RecordingTarget::default());
        let second = Arc::new(RecordingTarget::default());
        tus.resume(&format!("{url}/files/a"), &req, first.sink())
            .await
            .unwrap();
        tus.resume(&format!("{url}/files/b"), &req, second.sink())
            .await
            .unwrap();
        wait_for_terminal(&first).await;
        wait_for_terminal(&second).await;

        for target in [&first, &second] {
            let events = target.events.lock().unwrap();
            assert!(matches!(events.last(), Some(TransportEvent::Success(_))));
        }

        // One upload's PATCHes all land before the other's begin.
        let log = log.lock().unwrap();
        let order: Vec<&str> = log
            .iter()
            .filter(|r| r.method == "PATCH")
            .map(|r| r.path.as_str())
            .collect();
        assert_eq!(order.len(), 10);
        let switches = order.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1, "streams interleaved: {order:?}");
        assert_eq!(tus.active_streams(), 0);
    }

    #[tokio::test]
    async fn abort_unknown_upload_is_not_acknowledged() {
        let tus = transport(4, false);
        assert!(!tus.abort("http://127.0.0.1:1/files/none").await.unwrap());
    }

    #[test]
    fn default_config_is_unbounded() {
        let config = TusConfig::default();
        assert_eq!(config.max_concurrent, 0);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!config.checksum);
    }
}
