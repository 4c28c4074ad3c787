//! HTTP chunk uploader.
//!
//! Worker-thread sink: the encoder enqueues chunks without ever touching the
//! network; the worker POSTs them one at a time to the front of a FIFO of
//! target URLs. A URL is only retired once an upload to it succeeds (and the
//! last URL is never retired), so a failed upload is retried by the next
//! chunk. Stats are updated from inside the request body as bytes go out,
//! and a stop request aborts the in-flight transfer.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Body, Client, RequestBuilder};

use crate::error::UploadError;
use crate::sink::{DataSink, SinkChunk};

const FORM_FILE_FIELD: &str = "webm_file";
const WEBM_MIME_TYPE: &str = "video/webm";
const CONTENT_ID_HEADER: &str = "X-Content-Id";

/// How chunk bytes are carried in the POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostMode {
    /// Chunk bytes as the request body, `Content-Type: video/webm`.
    #[default]
    Post,
    /// Multipart form upload (RFC 1867 style) with the chunk as file data.
    FormPost,
}

/// Uploader configuration.
#[derive(Debug, Clone, Default)]
pub struct UploaderSettings {
    /// Target for HTTP POSTs; validated non-empty at init. The actual
    /// request target comes from the URL queue.
    pub target_url: String,
    pub post_mode: PostMode,
    /// Extra headers added to every request.
    pub headers: Vec<(String, String)>,
    /// Form fields added in `FormPost` mode.
    pub form_variables: Vec<(String, String)>,
    /// File name reported inside the form data; nothing is read from disk.
    pub local_file: String,
}

/// Upload statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadStats {
    /// `(total_uploaded + in_flight) / seconds_since_init`.
    pub bytes_per_second: f64,
    /// Bytes sent of the current upload.
    pub bytes_sent_current: u64,
    /// Bytes of all completed uploads.
    pub total_bytes_uploaded: u64,
}

struct UploaderState {
    stop: bool,
    pending: VecDeque<SinkChunk>,
    urls: VecDeque<String>,
    stats: UploadStats,
    upload_in_flight: bool,
}

struct Shared {
    state: Mutex<UploaderState>,
    wake: Condvar,
    start: Instant,
}

impl Shared {
    /// Try-lock stop check, callable from the request hot path without
    /// stalling on the state mutex.
    fn stop_requested(&self) -> bool {
        self.state.try_lock().map(|state| state.stop).unwrap_or(false)
    }
}

/// HTTP uploading data sink.
pub struct HttpUploader {
    shared: Arc<Shared>,
    settings: UploaderSettings,
    client: Client,
    worker: Option<JoinHandle<()>>,
}

impl HttpUploader {
    /// Validates settings and prepares the HTTP client. The worker thread is
    /// not started until [`Self::run`].
    pub fn init(settings: UploaderSettings) -> Result<Self, UploadError> {
        if settings.target_url.is_empty() {
            return Err(UploadError::EmptyTargetUrl);
        }
        // Uploads are long-lived streaming POSTs; disable the default
        // request timeout.
        let client = Client::builder().timeout(None).build()?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(UploaderState {
                    stop: false,
                    pending: VecDeque::new(),
                    urls: VecDeque::new(),
                    stats: UploadStats::default(),
                    upload_in_flight: false,
                }),
                wake: Condvar::new(),
                start: Instant::now(),
            }),
            settings,
            client,
            worker: None,
        })
    }

    /// Queues a target URL. URLs are consumed in FIFO order; the front URL
    /// is retired after the first successful upload to it, except the last
    /// URL which is reused for all remaining chunks.
    pub fn enqueue_target_url(&self, url: String) {
        self.shared.state.lock().urls.push_back(url);
    }

    /// Starts the worker thread; it idles until chunks arrive.
    pub fn run(&mut self) {
        if self.worker.is_some() {
            log::error!("[Uploader] run called twice");
            return;
        }
        let worker = UploadWorker {
            shared: Arc::clone(&self.shared),
            settings: self.settings.clone(),
            client: self.client.clone(),
        };
        self.worker = Some(std::thread::spawn(move || worker.run()));
    }

    /// Returns a chunk-accepting handle that can be moved to the encoder
    /// thread.
    pub fn sink(&self) -> UploaderSink {
        UploaderSink { shared: Arc::clone(&self.shared) }
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> UploadStats {
        self.shared.state.lock().stats
    }

    /// Signals stop, aborts any in-flight transfer, and joins the worker.
    /// The worker attempts every still-queued chunk before exiting. Safe to
    /// call twice.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
        }
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[Uploader] worker thread panicked");
            }
        }
    }
}

impl Drop for HttpUploader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lightweight [`DataSink`] handle for the encoder thread. The uploader
/// itself stays with the caller for control and stats.
pub struct UploaderSink {
    shared: Arc<Shared>,
}

impl DataSink for UploaderSink {
    fn name(&self) -> &'static str {
        "HttpUploader"
    }

    fn ready(&self) -> bool {
        let state = self.shared.state.lock();
        state.pending.is_empty() && !state.upload_in_flight
    }

    fn write_chunk(&mut self, chunk: &SinkChunk) -> bool {
        {
            let mut state = self.shared.state.lock();
            state.pending.push_back(chunk.clone());
        }
        log::debug!("[Uploader] queued chunk {} ({} bytes)", chunk.id, chunk.data.len());
        self.shared.wake.notify_one();
        true
    }
}

struct UploadWorker {
    shared: Arc<Shared>,
    settings: UploaderSettings,
    client: Client,
}

impl UploadWorker {
    fn run(self) {
        log::info!("[Uploader] worker started");
        loop {
            let chunk = {
                let mut state = self.shared.state.lock();
                loop {
                    if let Some(chunk) = state.pending.pop_front() {
                        state.upload_in_flight = true;
                        break Some(chunk);
                    }
                    if state.stop {
                        break None;
                    }
                    self.shared.wake.wait(&mut state);
                }
            };
            let Some(chunk) = chunk else { break };

            let url = self.shared.state.lock().urls.front().cloned();
            let Some(url) = url else {
                log::error!("[Uploader] no target URL queued, dropping chunk {}", chunk.id);
                self.finish_upload(0, false);
                continue;
            };

            match self.upload(&url, &chunk) {
                Ok(response_code) => {
                    log::info!(
                        "[Uploader] chunk {} uploaded ({} bytes), server response {}",
                        chunk.id,
                        chunk.data.len(),
                        response_code
                    );
                    let mut state = self.shared.state.lock();
                    if state.urls.len() > 1 {
                        state.urls.pop_front();
                    }
                    drop(state);
                    self.finish_upload(chunk.data.len() as u64, true);
                }
                Err(err) => {
                    // Log and continue; the URL stays queued so the next
                    // chunk retries the same endpoint.
                    log::error!("[Uploader] chunk {} upload failed: {}", chunk.id, err);
                    self.finish_upload(0, false);
                }
            }
        }
        log::info!("[Uploader] worker finished");
    }

    fn finish_upload(&self, bytes_uploaded: u64, success: bool) {
        let mut state = self.shared.state.lock();
        state.upload_in_flight = false;
        state.stats.bytes_sent_current = 0;
        if success {
            state.stats.total_bytes_uploaded += bytes_uploaded;
        }
    }

    fn upload(&self, url: &str, chunk: &SinkChunk) -> Result<u16, UploadError> {
        let body = ProgressBody::new(chunk.data.clone(), Arc::clone(&self.shared));
        let length = chunk.data.len() as u64;

        let mut request = match self.settings.post_mode {
            PostMode::Post => self
                .client
                .post(url)
                .header("Content-Type", WEBM_MIME_TYPE)
                .body(Body::sized(body, length)),
            PostMode::FormPost => {
                let mut form = Form::new();
                for (name, value) in &self.settings.form_variables {
                    form = form.text(name.clone(), value.clone());
                }
                let part = Part::reader_with_length(body, length)
                    .mime_str(WEBM_MIME_TYPE)?
                    .file_name(self.settings.local_file.clone());
                form = form.part(FORM_FILE_FIELD, part);
                self.client.post(url).multipart(form)
            }
        };

        request = self.apply_headers(request, &chunk.id);
        let response = request.send()?;
        let status = response.status().as_u16();
        match response.text() {
            Ok(text) if !text.is_empty() => log::debug!("[Uploader] server says: {}", text),
            Ok(_) => {}
            Err(err) => log::debug!("[Uploader] could not read response body: {}", err),
        }
        Ok(status)
    }

    /// Disables 100-continue handling, attaches the content id, and adds
    /// user headers.
    fn apply_headers(&self, mut request: RequestBuilder, content_id: &str) -> RequestBuilder {
        request = request.header("Expect", "").header(CONTENT_ID_HEADER, content_id);
        for (name, value) in &self.settings.headers {
            request = request.header(name, value);
        }
        request
    }
}

/// Request body that tracks progress into the shared stats and aborts the
/// transfer when stop has been requested.
struct ProgressBody {
    data: Bytes,
    position: usize,
    shared: Arc<Shared>,
}

impl ProgressBody {
    fn new(data: Bytes, shared: Arc<Shared>) -> Self {
        Self { data, position: 0, shared }
    }
}

impl Read for ProgressBody {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.shared.stop_requested() {
            // Not ErrorKind::Interrupted: that would invite a retry instead
            // of tearing the transfer down.
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionAborted,
                "upload aborted by stop request",
            ));
        }

        let remaining = self.data.len() - self.position;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;

        let elapsed = self.shared.start.elapsed().as_secs_f64();
        let mut state = self.shared.state.lock();
        state.stats.bytes_sent_current = self.position as u64;
        if elapsed > 0.0 {
            state.stats.bytes_per_second =
                (state.stats.total_bytes_uploaded + self.position as u64) as f64 / elapsed;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Minimal HTTP server: accepts `count` requests, replies 200, and
    /// returns the raw request heads and bodies.
    fn spawn_test_server(count: usize) -> (String, std::thread::JoinHandle<Vec<(String, Vec<u8>)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for _ in 0..count {
                let (stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream);
                let mut head = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("read header line");
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:")
                    {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                    let done = line == "\r\n";
                    head.push_str(&line);
                    if done {
                        break;
                    }
                }
                let mut body = vec![0u8; content_length];
                std::io::Read::read_exact(&mut reader, &mut body).expect("read body");
                let mut stream = reader.into_inner();
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                    .expect("write response");
                requests.push((head, body));
            }
            requests
        });
        (format!("http://{}", addr), handle)
    }

    fn settings(url: &str) -> UploaderSettings {
        UploaderSettings {
            target_url: url.to_string(),
            post_mode: PostMode::Post,
            headers: vec![("X-Test".into(), "1".into())],
            form_variables: Vec::new(),
            local_file: "live.webm".into(),
        }
    }

    /// Stop aborts in-flight transfers by design, so tests wait for the
    /// expected byte total before stopping.
    fn wait_for_uploaded(uploader: &HttpUploader, expected_total: u64) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while uploader.stats().total_bytes_uploaded < expected_total {
            assert!(std::time::Instant::now() < deadline, "timed out waiting for uploads");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
    }

    #[test]
    fn empty_target_url_rejected() {
        let result = HttpUploader::init(UploaderSettings::default());
        assert!(matches!(result, Err(UploadError::EmptyTargetUrl)));
    }

    #[test]
    fn uploads_chunk_with_content_id_and_headers() {
        let (url, server) = spawn_test_server(1);
        let mut uploader = HttpUploader::init(settings(&url)).expect("init");
        uploader.enqueue_target_url(url.clone());
        uploader.run();

        uploader.sink().write_chunk(&SinkChunk {
            id: "chunk_0".into(),
            data: Bytes::from_static(b"\x1a\x45\xdf\xa3test"),
        });
        wait_for_uploaded(&uploader, 8);
        uploader.stop();

        let requests = server.join().expect("server join");
        let (head, body) = &requests[0];
        assert!(head.starts_with("POST"));
        assert!(head.to_ascii_lowercase().contains("x-content-id: chunk_0"));
        assert!(head.to_ascii_lowercase().contains("content-type: video/webm"));
        assert!(head.to_ascii_lowercase().contains("x-test: 1"));
        assert_eq!(body.as_slice(), b"\x1a\x45\xdf\xa3test");

        let stats = uploader.stats();
        assert_eq!(stats.total_bytes_uploaded, 8);
        assert_eq!(stats.bytes_sent_current, 0);
        assert!(stats.bytes_per_second > 0.0);
    }

    #[test]
    fn metadata_url_retired_after_first_success() {
        let (url, server) = spawn_test_server(3);
        let mut uploader = HttpUploader::init(settings(&url)).expect("init");
        uploader.enqueue_target_url(format!("{}/?metadata=1", url));
        uploader.enqueue_target_url(format!("{}/", url));
        uploader.run();

        let mut sink = uploader.sink();
        for i in 0..3 {
            sink.write_chunk(&SinkChunk {
                id: format!("chunk_{}", i),
                data: Bytes::from_static(b"data"),
            });
        }
        wait_for_uploaded(&uploader, 12);
        uploader.stop();

        let requests = server.join().expect("server join");
        assert!(requests[0].0.contains("metadata=1"));
        assert!(!requests[1].0.contains("metadata=1"));
        assert!(!requests[2].0.contains("metadata=1"));
    }

    #[test]
    fn form_post_carries_file_and_variables() {
        let (url, server) = spawn_test_server(1);
        let mut config = settings(&url);
        config.post_mode = PostMode::FormPost;
        config.form_variables = vec![("session".into(), "abc".into())];
        let mut uploader = HttpUploader::init(config).expect("init");
        uploader.enqueue_target_url(url);
        uploader.run();

        uploader
            .sink()
            .write_chunk(&SinkChunk { id: "chunk_0".into(), data: Bytes::from_static(b"xyz") });
        wait_for_uploaded(&uploader, 3);
        uploader.stop();

        let requests = server.join().expect("server join");
        let body = String::from_utf8_lossy(&requests[0].1);
        assert!(requests[0].0.to_ascii_lowercase().contains("multipart/form-data"));
        assert!(body.contains("name=\"session\""));
        assert!(body.contains("abc"));
        assert!(body.contains("name=\"webm_file\""));
        assert!(body.contains("filename=\"live.webm\""));
        assert!(body.contains("xyz"));
    }

    #[test]
    fn uploads_every_queued_chunk_in_order() {
        let (url, server) = spawn_test_server(4);
        let mut uploader = HttpUploader::init(settings(&url)).expect("init");
        uploader.enqueue_target_url(url);
        uploader.run();

        let mut sink = uploader.sink();
        for i in 0..4 {
            sink.write_chunk(&SinkChunk {
                id: format!("chunk_{}", i),
                data: Bytes::from_static(b"d"),
            });
        }
        wait_for_uploaded(&uploader, 4);
        uploader.stop();
        let requests = server.join().expect("server join");
        assert_eq!(requests.len(), 4);
    }

    #[test]
    fn stop_twice_is_safe() {
        let (url, _server) = spawn_test_server(0);
        let mut uploader = HttpUploader::init(settings(&url)).expect("init");
        uploader.run();
        uploader.stop();
        uploader.stop();
    }
}
