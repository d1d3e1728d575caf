use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use quarry_manifest::checksum;

use crate::{DownloadTask, Error, ExpectedIntegrity, HttpTransport, Result, Transport};

/// Attempt delays double from [`DownloadConfig::retry_delay_ms`] up to this.
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Upper bound on simultaneous downloads.
    pub max_concurrent: usize,
    /// Attempts per download before giving up.
    pub max_retry: u32,
    /// Base delay between attempts.
    pub retry_delay_ms: u64,
    /// Server-pressure backoff never lowers concurrency below this.
    pub concurrency_floor: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retry: 5,
            retry_delay_ms: 1000,
            concurrency_floor: 2,
        }
    }
}

fn sanitized(mut config: DownloadConfig) -> DownloadConfig {
    config.max_concurrent = config.max_concurrent.max(1);
    config.concurrency_floor = config.concurrency_floor.clamp(1, config.max_concurrent);
    config.max_retry = config.max_retry.max(1);
    config
}

/// Schedules downloads onto a bounded pool of slots.
///
/// Requests for the same url/destination pair join the task already in
/// flight. Payloads are staged into a `.temp` sibling, resumed from whatever
/// the sibling already holds, validated against their expected integrity and
/// only then renamed over the destination. Repeated server errors shrink the
/// slot pool down to [`DownloadConfig::concurrency_floor`].
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<DownloaderInner>,
}

struct DownloaderInner {
    transport: Arc<dyn Transport>,
    config: DownloadConfig,
    semaphore: Arc<Semaphore>,
    current_cap: AtomicUsize,
    tasks: Mutex<HashMap<(String, PathBuf), Arc<DownloadTask>>>,
}

impl Downloader {
    /// Downloader over HTTP.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        Ok(Self::with_transport(
            Arc::new(HttpTransport::new()?),
            config,
        ))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: DownloadConfig) -> Self {
        let config = sanitized(config);
        let capacity = config.max_concurrent;
        Self {
            inner: Arc::new(DownloaderInner {
                transport,
                config,
                semaphore: Arc::new(Semaphore::new(capacity)),
                current_cap: AtomicUsize::new(capacity),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.inner.config
    }

    /// Download slots currently allowed; shrinks under server pressure.
    pub fn current_capacity(&self) -> usize {
        self.inner.current_cap.load(Ordering::SeqCst)
    }

    /// Queue a download, or join the identical one already in flight.
    pub fn download(
        &self,
        url: &str,
        local_path: &Path,
        expected: ExpectedIntegrity,
    ) -> Arc<DownloadTask> {
        let key = (url.to_owned(), local_path.to_owned());
        let mut tasks = self.inner.tasks.lock().unwrap();
        if let Some(existing) = tasks.get(&key) {
            debug!("joining in-flight download of '{}'", url);
            return Arc::clone(existing);
        }

        let task = Arc::new(DownloadTask::new(key.0.clone(), key.1.clone(), expected));
        tasks.insert(key, Arc::clone(&task));
        drop(tasks);

        let inner = Arc::clone(&self.inner);
        let driven = Arc::clone(&task);
        tokio::spawn(async move {
            drive(inner, driven).await;
        });
        task
    }
}

async fn drive(inner: Arc<DownloaderInner>, task: Arc<DownloadTask>) {
    let start = Instant::now();
    let Ok(permit) = Arc::clone(&inner.semaphore).acquire_owned().await else {
        task.finish(Err(Error::Transport("downloader is shutting down".to_owned())));
        return;
    };
    let mut permit = Some(permit);

    task.set_processing();
    debug!(
        "Downloading '{}' to '{}'",
        task.url(),
        task.local_path().display()
    );

    let result = run_attempts(&inner, &task, &mut permit).await;
    match &result {
        Ok(()) => info!(
            "Download of '{}' Ended ({} bytes, {}ms)",
            task.url(),
            task.progress().completed_bytes,
            start.elapsed().as_millis()
        ),
        Err(err) => warn!("Download of '{}' failed: {}", task.url(), err),
    }

    task.finish(result);
    let key = (task.url().to_owned(), task.local_path().to_owned());
    inner.tasks.lock().unwrap().remove(&key);
    drop(permit);
}

async fn run_attempts(
    inner: &DownloaderInner,
    task: &DownloadTask,
    permit: &mut Option<OwnedSemaphorePermit>,
) -> Result<()> {
    let max_retry = inner.config.max_retry;
    let mut last_error = Error::Transport("no attempt was made".to_owned());

    for attempt in 1..=max_retry {
        if permit.is_none() {
            match Arc::clone(&inner.semaphore).acquire_owned().await {
                Ok(acquired) => *permit = Some(acquired),
                Err(_) => {
                    return Err(Error::Transport("downloader is shutting down".to_owned()))
                }
            }
        }

        match attempt_once(inner, task).await {
            Ok(()) => return Ok(()),
            Err(err @ Error::NotFound(_)) => return Err(err),
            Err(err) => {
                task.bump_retry();
                warn!(
                    "Download attempt {}/{} for '{}' failed: {}",
                    attempt,
                    max_retry,
                    task.url(),
                    err
                );

                // overloaded server: give a slot back until the floor
                if matches!(&err, Error::Status(code, _) if *code >= 500)
                    && shrink_capacity(inner)
                {
                    if let Some(held) = permit.take() {
                        held.forget();
                    }
                }

                last_error = err;
                if attempt < max_retry {
                    let factor = 1_u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                    let delay = inner
                        .config
                        .retry_delay_ms
                        .saturating_mul(factor)
                        .min(MAX_RETRY_DELAY_MS);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    Err(Error::RetriesExhausted(max_retry, Box::new(last_error)))
}

fn shrink_capacity(inner: &DownloaderInner) -> bool {
    loop {
        let capacity = inner.current_cap.load(Ordering::SeqCst);
        if capacity <= inner.config.concurrency_floor {
            return false;
        }
        if inner
            .current_cap
            .compare_exchange(capacity, capacity - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(
                "server pressure, lowering concurrent downloads to {}",
                capacity - 1
            );
            return true;
        }
    }
}

async fn attempt_once(inner: &DownloaderInner, task: &DownloadTask) -> Result<()> {
    if let Some(parent) = task.local_path().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let offset = match tokio::fs::metadata(task.temp_path()).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let response = inner
        .transport
        .fetch(task.url(), (offset > 0).then_some(offset))
        .await?;

    match response.status {
        404 => {
            let _ = tokio::fs::remove_file(task.temp_path()).await;
            return Err(Error::NotFound(task.url().to_owned()));
        }
        416 => {
            // the partial file is longer than the resource: start over
            let _ = tokio::fs::remove_file(task.temp_path()).await;
            return Err(Error::Status(416, task.url().to_owned()));
        }
        status if status >= 500 => {
            return Err(Error::Status(status, task.url().to_owned()));
        }
        // some CDNs answer with nonstandard codes and a valid payload;
        // take the body and let validation decide
        _ => {}
    }

    // a 200 despite a range request means the server restarted the payload
    let resumed = response.status == 206 && offset > 0;
    let mut file = if resumed {
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(task.temp_path())
            .await?
    } else {
        tokio::fs::File::create(task.temp_path()).await?
    };
    let mut written = if resumed { offset } else { 0 };

    let total = response
        .total_bytes
        .map(|len| if resumed { offset + len } else { len });
    if let Some(total) = total.or(task.expected().size) {
        task.record_total(total);
    }

    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        task.record_progress(written);
    }
    file.flush().await?;
    drop(file);

    if let Err(err) = validate(task).await {
        let _ = tokio::fs::remove_file(task.temp_path()).await;
        return Err(err);
    }

    if tokio::fs::metadata(task.local_path()).await.is_ok() {
        tokio::fs::remove_file(task.local_path()).await?;
    }
    tokio::fs::rename(task.temp_path(), task.local_path()).await?;

    Ok(())
}

async fn validate(task: &DownloadTask) -> Result<()> {
    let expected = task.expected().clone();
    if expected.size.is_none() && expected.crc32.is_none() && expected.md5.is_none() {
        return Ok(());
    }

    let path = task.temp_path().to_owned();
    tokio::task::spawn_blocking(move || validate_file(&path, &expected))
        .await
        .map_err(|err| Error::Io(err.to_string()))?
}

fn validate_file(path: &Path, expected: &ExpectedIntegrity) -> Result<()> {
    let name = || path.display().to_string();

    if let Some(size) = expected.size {
        let actual = std::fs::metadata(path)?.len();
        if actual != size {
            return Err(Error::Integrity(
                name(),
                format!("size mismatch: expected {} bytes, got {}", size, actual),
            ));
        }
    }
    if let Some(crc32) = expected.crc32 {
        let actual = checksum::crc32_file(path).map_err(|err| Error::Io(err.to_string()))?;
        if actual != crc32 {
            return Err(Error::Integrity(
                name(),
                format!("crc32 mismatch: expected {:08x}, got {:08x}", crc32, actual),
            ));
        }
    }
    if let Some(md5) = &expected.md5 {
        let actual = checksum::md5_file(path).map_err(|err| Error::Io(err.to_string()))?;
        if !actual.eq_ignore_ascii_case(md5) {
            return Err(Error::Integrity(
                name(),
                format!("md5 mismatch: expected {}, got {}", md5, actual),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::{ByteStream, DownloadStatus, FetchResponse};

    use super::*;

    enum Scripted {
        Body {
            status: u16,
            bytes: Vec<u8>,
            total: Option<u64>,
        },
        Fail(Error),
    }

    fn ok(bytes: &[u8]) -> Scripted {
        Scripted::Body {
            status: 200,
            bytes: bytes.to_vec(),
            total: Some(bytes.len() as u64),
        }
    }

    fn status(code: u16) -> Scripted {
        Scripted::Body {
            status: code,
            bytes: Vec::new(),
            total: None,
        }
    }

    struct FakeTransport {
        script: Mutex<VecDeque<Scripted>>,
        offsets: Mutex<Vec<Option<u64>>>,
        gate: Option<Arc<Semaphore>>,
        delay_ms: u64,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeTransport {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Self::with_parts(script, None, 0)
        }

        fn with_parts(
            script: Vec<Scripted>,
            gate: Option<Arc<Semaphore>>,
            delay_ms: u64,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                offsets: Mutex::new(Vec::new()),
                gate,
                delay_ms,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn request_count(&self) -> usize {
            self.offsets.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn fetch(&self, _url: &str, offset: Option<u64>) -> Result<FetchResponse> {
            self.offsets.lock().unwrap().push(offset);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.script.lock().unwrap().pop_front() {
                Some(Scripted::Body {
                    status,
                    bytes,
                    total,
                }) => {
                    let body: ByteStream =
                        Box::pin(futures::stream::iter(vec![Ok(Bytes::from(bytes))]));
                    Ok(FetchResponse {
                        status,
                        total_bytes: total,
                        body,
                    })
                }
                Some(Scripted::Fail(err)) => Err(err),
                None => Err(Error::Transport("script exhausted".to_owned())),
            }
        }
    }

    fn test_config() -> DownloadConfig {
        DownloadConfig {
            retry_delay_ms: 1,
            ..DownloadConfig::default()
        }
    }

    #[tokio::test]
    async fn test_download_writes_and_validates_payload() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"hello bundle";
        let transport = FakeTransport::new(vec![ok(payload)]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let local = dir.path().join("bundles/level1.bundle");
        let expected = ExpectedIntegrity {
            md5: Some(checksum::md5_bytes(payload)),
            crc32: Some(checksum::crc32_bytes(payload)),
            size: Some(payload.len() as u64),
        };
        let task = downloader.download("http://cdn.local/level1.bundle", &local, expected);
        task.wait().await.unwrap();

        assert!(task.succeeded());
        assert_eq!(DownloadStatus::Finish, task.status());
        assert_eq!(payload.to_vec(), std::fs::read(&local).unwrap());
        assert!(!task.temp_path().exists());
    }

    #[tokio::test]
    async fn test_partial_temp_file_resumes_with_range() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("big.bundle");
        std::fs::write(format!("{}.temp", local.display()), b"hello").unwrap();

        let transport = FakeTransport::new(vec![Scripted::Body {
            status: 206,
            bytes: b" world".to_vec(),
            total: Some(6),
        }]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let task = downloader.download(
            "http://cdn.local/big.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        task.wait().await.unwrap();

        assert_eq!(b"hello world".to_vec(), std::fs::read(&local).unwrap());
        assert_eq!(vec![Some(5)], *transport.offsets.lock().unwrap());

        let progress = task.progress();
        assert_eq!(11, progress.completed_bytes);
        assert!((progress.percent - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_full_response_to_range_request_restarts_payload() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("asset.bundle");
        std::fs::write(format!("{}.temp", local.display()), b"stale").unwrap();

        // server ignores the range and replays the whole payload
        let transport = FakeTransport::new(vec![ok(b"fresh data")]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let task = downloader.download(
            "http://cdn.local/asset.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        task.wait().await.unwrap();

        assert_eq!(b"fresh data".to_vec(), std::fs::read(&local).unwrap());
        assert_eq!(vec![Some(5)], *transport.offsets.lock().unwrap());
    }

    #[tokio::test]
    async fn test_transient_failure_retries_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(vec![
            Scripted::Fail(Error::Transport("connection reset".to_owned())),
            ok(b"payload"),
        ]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let local = dir.path().join("flaky.bundle");
        let task = downloader.download(
            "http://cdn.local/flaky.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        task.wait().await.unwrap();

        assert_eq!(2, transport.request_count());
        assert_eq!(1, task.retry_count());
        assert_eq!(b"payload".to_vec(), std::fs::read(&local).unwrap());
    }

    #[tokio::test]
    async fn test_not_found_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("missing.bundle");
        std::fs::write(format!("{}.temp", local.display()), b"partial").unwrap();

        let transport = FakeTransport::new(vec![status(404)]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let task = downloader.download(
            "http://cdn.local/missing.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        let result = task.wait().await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(1, transport.request_count());
        assert!(!task.temp_path().exists());
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_server_errors_shrink_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(vec![status(503), ok(b"recovered")]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());
        assert_eq!(3, downloader.current_capacity());

        let local = dir.path().join("pressured.bundle");
        let task = downloader.download(
            "http://cdn.local/pressured.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        task.wait().await.unwrap();

        assert_eq!(2, downloader.current_capacity());
        assert_eq!(b"recovered".to_vec(), std::fs::read(&local).unwrap());
    }

    #[tokio::test]
    async fn test_concurrency_never_drops_below_floor() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new(vec![status(500), status(500), status(500)]);
        let config = DownloadConfig {
            max_retry: 3,
            retry_delay_ms: 1,
            ..DownloadConfig::default()
        };
        let downloader = Downloader::with_transport(transport.clone(), config);

        let local = dir.path().join("down.bundle");
        let task = downloader.download(
            "http://cdn.local/down.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        let result = task.wait().await;

        assert_eq!(2, downloader.current_capacity());
        match result {
            Err(Error::RetriesExhausted(attempts, last)) => {
                assert_eq!(3, attempts);
                assert!(matches!(*last, Error::Status(500, _)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_refetched_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let good = b"good data";
        let transport = FakeTransport::new(vec![ok(b"bad data!"), ok(good)]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let local = dir.path().join("checked.bundle");
        let expected = ExpectedIntegrity {
            md5: Some(checksum::md5_bytes(good)),
            ..ExpectedIntegrity::default()
        };
        let task = downloader.download("http://cdn.local/checked.bundle", &local, expected);
        task.wait().await.unwrap();

        // the corrupt staging file was dropped, not resumed
        assert_eq!(vec![None, None], *transport.offsets.lock().unwrap());
        assert_eq!(good.to_vec(), std::fs::read(&local).unwrap());
        assert_eq!(1, task.retry_count());
    }

    #[tokio::test]
    async fn test_unusual_status_with_valid_payload_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let payload = b"cdn quirk";
        let transport = FakeTransport::new(vec![Scripted::Body {
            status: 250,
            bytes: payload.to_vec(),
            total: Some(payload.len() as u64),
        }]);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let local = dir.path().join("odd.bundle");
        let expected = ExpectedIntegrity {
            md5: Some(checksum::md5_bytes(payload)),
            ..ExpectedIntegrity::default()
        };
        let task = downloader.download("http://cdn.local/odd.bundle", &local, expected);
        task.wait().await.unwrap();

        assert!(task.succeeded());
        assert_eq!(1, transport.request_count());
        assert_eq!(payload.to_vec(), std::fs::read(&local).unwrap());
    }

    #[tokio::test]
    async fn test_always_corrupt_payload_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            FakeTransport::new((0..5).map(|_| ok(b"corrupted bytes")).collect());
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let local = dir.path().join("level1.bundle");
        let expected = ExpectedIntegrity {
            crc32: Some(checksum::crc32_bytes(b"the real level1 payload")),
            ..ExpectedIntegrity::default()
        };
        let task = downloader.download("http://cdn.local/level1.bundle", &local, expected);
        let result = task.wait().await;

        match result {
            Err(Error::RetriesExhausted(attempts, last)) => {
                assert_eq!(5, attempts);
                assert!(matches!(*last, Error::Integrity(_, _)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!task.succeeded());
        assert_eq!(DownloadStatus::Finish, task.status());
        assert_eq!(5, transport.request_count());
        assert_eq!(5, task.retry_count());
        assert!(!task.temp_path().exists());
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn test_inflight_download_is_shared_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let transport =
            FakeTransport::with_parts(vec![ok(b"shared"), ok(b"shared")], Some(gate.clone()), 0);
        let downloader = Downloader::with_transport(transport.clone(), test_config());

        let local = dir.path().join("shared.bundle");
        let first = downloader.download(
            "http://cdn.local/shared.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        let second = downloader.download(
            "http://cdn.local/shared.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        assert!(Arc::ptr_eq(&first, &second));

        gate.add_permits(2);
        first.wait().await.unwrap();
        assert_eq!(1, transport.request_count());

        // a finished download is no longer joinable
        let third = downloader.download(
            "http://cdn.local/shared.bundle",
            &local,
            ExpectedIntegrity::default(),
        );
        assert!(!Arc::ptr_eq(&first, &third));
        third.wait().await.unwrap();
        assert_eq!(2, transport.request_count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_downloads_respect_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let script = (0..6).map(|_| ok(b"data")).collect();
        let transport = FakeTransport::with_parts(script, None, 25);
        let config = DownloadConfig {
            max_concurrent: 2,
            concurrency_floor: 1,
            retry_delay_ms: 1,
            ..DownloadConfig::default()
        };
        let downloader = Downloader::with_transport(transport.clone(), config);

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                downloader.download(
                    &format!("http://cdn.local/part{}.bundle", i),
                    &dir.path().join(format!("part{}.bundle", i)),
                    ExpectedIntegrity::default(),
                )
            })
            .collect();
        for task in &tasks {
            task.wait().await.unwrap();
        }

        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(6, transport.request_count());
    }
}
