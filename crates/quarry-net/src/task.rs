use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::Notify;

use quarry_manifest::BundleInfo;

use crate::{ProgressStatus, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Queued, waiting for a download slot.
    Pending,
    Processing,
    Finish,
}

/// What the payload must look like to be accepted. Empty fields are not
/// checked.
#[derive(Debug, Clone, Default)]
pub struct ExpectedIntegrity {
    pub md5: Option<String>,
    pub crc32: Option<u32>,
    pub size: Option<u64>,
}

impl ExpectedIntegrity {
    /// Expectations from a manifest row. Fields the manifest left unset stay
    /// unchecked.
    pub fn from_bundle(info: &BundleInfo) -> Self {
        Self {
            md5: (!info.md5.is_empty()).then(|| info.md5.clone()),
            crc32: (info.crc32 != 0).then_some(info.crc32),
            size: (info.size != 0).then_some(info.size),
        }
    }
}

#[derive(Debug)]
struct TaskState {
    status: DownloadStatus,
    retry: u32,
    downloaded_bytes: u64,
    total_bytes: u64,
    result: Option<Result<()>>,
}

/// Handle to one download. Cheap to share behind an `Arc`; the same task is
/// returned to every caller asking for the same url/destination pair while
/// it is in flight.
#[derive(Debug)]
pub struct DownloadTask {
    url: String,
    local_path: PathBuf,
    temp_path: PathBuf,
    expected: ExpectedIntegrity,
    state: Mutex<TaskState>,
    done: Notify,
}

impl DownloadTask {
    pub(crate) fn new(url: String, local_path: PathBuf, expected: ExpectedIntegrity) -> Self {
        // staged next to the destination so the final rename stays on one
        // filesystem
        let mut temp: OsString = local_path.clone().into_os_string();
        temp.push(".temp");
        Self {
            url,
            local_path,
            temp_path: PathBuf::from(temp),
            expected,
            state: Mutex::new(TaskState {
                status: DownloadStatus::Pending,
                retry: 0,
                downloaded_bytes: 0,
                total_bytes: 0,
                result: None,
            }),
            done: Notify::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn expected(&self) -> &ExpectedIntegrity {
        &self.expected
    }

    pub fn status(&self) -> DownloadStatus {
        self.state.lock().unwrap().status
    }

    /// Attempts consumed so far.
    pub fn retry_count(&self) -> u32 {
        self.state.lock().unwrap().retry
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().result.is_some()
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.state.lock().unwrap().result, Some(Ok(())))
    }

    /// Outcome, if the task has finished.
    pub fn result(&self) -> Option<Result<()>> {
        self.state.lock().unwrap().result.clone()
    }

    pub fn progress(&self) -> ProgressStatus {
        let state = self.state.lock().unwrap();
        match &state.result {
            Some(Ok(())) => {
                ProgressStatus::completed(0, state.downloaded_bytes.max(state.total_bytes))
            }
            _ => ProgressStatus::from_counts(0, state.downloaded_bytes, state.total_bytes),
        }
    }

    /// Wait until the download has finished, returning its outcome.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(result) = self.result() {
                return result;
            }
            notified.await;
        }
    }

    pub(crate) fn set_processing(&self) {
        self.state.lock().unwrap().status = DownloadStatus::Processing;
    }

    pub(crate) fn record_total(&self, total_bytes: u64) {
        self.state.lock().unwrap().total_bytes = total_bytes;
    }

    pub(crate) fn record_progress(&self, downloaded_bytes: u64) {
        self.state.lock().unwrap().downloaded_bytes = downloaded_bytes;
    }

    pub(crate) fn bump_retry(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.retry += 1;
        state.retry
    }

    pub(crate) fn finish(&self, result: Result<()>) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = DownloadStatus::Finish;
            state.result = Some(result);
        }
        self.done.notify_waiters();
    }
}
