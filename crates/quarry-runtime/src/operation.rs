//! Asynchronous load operations.
//!
//! Every load the runtime performs is an [`AsyncOperation`]: a node in a
//! directed acyclic graph that resolves exactly once, to a payload or an
//! error, after all of its dependencies resolved. Operations behave like
//! shared futures: they can be awaited, observed through callbacks (invoked
//! immediately when subscribing to an already-resolved operation), polled
//! for aggregate progress, and reference-counted for the advisory unload
//! protocol.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};

use quarry_net::ProgressStatus;

use crate::{BundleHandle, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// What an operation resolved to.
#[derive(Clone)]
pub enum LoadedResource {
    Bundle(BundleHandle),
    Asset(Arc<dyn Any + Send + Sync>),
    Assets(Vec<Arc<dyn Any + Send + Sync>>),
    Scene,
    /// Name of a package that finished registering.
    Package(String),
}

impl fmt::Debug for LoadedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundle(handle) => f.debug_tuple("Bundle").field(&handle.name).finish(),
            Self::Asset(_) => f.write_str("Asset"),
            Self::Assets(list) => f.debug_tuple("Assets").field(&list.len()).finish(),
            Self::Scene => f.write_str("Scene"),
            Self::Package(name) => f.debug_tuple("Package").field(name).finish(),
        }
    }
}

/// The work behind an operation: produces the payload once every
/// dependency has succeeded.
#[async_trait]
pub trait Provider: Send + Sync {
    /// What this operation loads, for logs and errors.
    fn label(&self) -> &str;

    async fn provide(&self, dependencies: &[AsyncOperation]) -> Result<LoadedResource>;

    /// Live transfer progress, when the provider downloads something.
    fn progress(&self) -> Option<ProgressStatus> {
        None
    }
}

type Callback = Box<dyn FnOnce(&AsyncOperation) + Send>;

struct OperationState {
    status: OperationStatus,
    payload: Option<LoadedResource>,
    error: Option<Error>,
    callbacks: Vec<Callback>,
    ref_count: i64,
    can_unload: bool,
    started: bool,
}

struct OperationInner {
    id: u64,
    provider: Box<dyn Provider>,
    dependencies: Vec<AsyncOperation>,
    state: Mutex<OperationState>,
    done: Notify,
}

/// Shared handle to one node of the load graph. Clones observe the same
/// underlying operation.
#[derive(Clone)]
pub struct AsyncOperation {
    inner: Arc<OperationInner>,
}

impl fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("status", &self.status())
            .finish()
    }
}

impl AsyncOperation {
    pub fn new(id: u64, provider: Box<dyn Provider>, dependencies: Vec<AsyncOperation>) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                id,
                provider,
                dependencies,
                state: Mutex::new(OperationState {
                    status: OperationStatus::Pending,
                    payload: None,
                    error: None,
                    callbacks: Vec::new(),
                    ref_count: 0,
                    can_unload: false,
                    started: false,
                }),
                done: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        self.inner.provider.label()
    }

    pub fn status(&self) -> OperationStatus {
        self.inner.state.lock().unwrap().status
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    pub fn succeeded(&self) -> bool {
        self.status() == OperationStatus::Succeeded
    }

    pub fn error(&self) -> Option<Error> {
        self.inner.state.lock().unwrap().error.clone()
    }

    pub fn payload(&self) -> Option<LoadedResource> {
        self.inner.state.lock().unwrap().payload.clone()
    }

    pub fn dependencies(&self) -> &[AsyncOperation] {
        &self.inner.dependencies
    }

    /// Begin driving this operation and everything it depends on.
    /// Idempotent; the graph must be acyclic.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.started {
                return;
            }
            state.started = true;
            state.status = OperationStatus::Processing;
        }
        for dependency in &self.inner.dependencies {
            dependency.start();
        }
        let op = self.clone();
        tokio::spawn(async move {
            op.drive().await;
        });
    }

    async fn drive(self) {
        let started_at = Instant::now();

        for dependency in &self.inner.dependencies {
            dependency.wait_done().await;
            if !dependency.succeeded() {
                let cause = dependency.error().unwrap_or(Error::Abandoned);
                self.complete(Err(Error::DependencyFailed(
                    dependency.label().to_owned(),
                    Box::new(cause),
                )));
                return;
            }
        }

        let result = self.inner.provider.provide(&self.inner.dependencies).await;
        match &result {
            Ok(_) => debug!(
                "Loading {} Ended ({}ms)",
                self.label(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!("Loading {} failed: {}", self.label(), err),
        }
        self.complete(result);
    }

    /// Resolve the operation. Only the first resolution sticks; callbacks
    /// run in subscription order, before waiters are released.
    fn complete(&self, result: Result<LoadedResource>) {
        let callbacks = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status.is_done() {
                return;
            }
            match result {
                Ok(payload) => {
                    state.status = OperationStatus::Succeeded;
                    state.payload = Some(payload);
                }
                Err(err) => {
                    state.status = OperationStatus::Failed;
                    state.error = Some(err);
                }
            }
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback(self);
        }
        self.inner.done.notify_waiters();
    }

    /// Run `callback` once the operation resolves; immediately if it already
    /// has.
    pub fn on_completed(&self, callback: impl FnOnce(&AsyncOperation) + Send + 'static) {
        let mut state = self.inner.state.lock().unwrap();
        if state.status.is_done() {
            drop(state);
            callback(self);
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Wait until the operation resolved, without starting it.
    pub async fn wait_done(&self) {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Start if needed, wait for resolution and return the outcome.
    pub async fn await_result(&self) -> Result<LoadedResource> {
        self.start();
        self.wait_done().await;
        self.outcome()
    }

    /// Block the current thread until the operation resolved.
    ///
    /// For engine threads that cannot await. Must not be called from the
    /// async runtime's worker threads.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn wait_for_completed(&self) -> Result<LoadedResource> {
        self.start();
        let mut visited = HashSet::new();
        self.spin_until_done(&mut visited);
        self.outcome()
    }

    #[cfg(target_arch = "wasm32")]
    pub fn wait_for_completed(&self) -> Result<LoadedResource> {
        Err(Error::BlockingWaitUnsupported)
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn spin_until_done(&self, visited: &mut HashSet<u64>) {
        if !visited.insert(self.id()) {
            return;
        }
        for dependency in &self.inner.dependencies {
            dependency.spin_until_done(visited);
        }
        while !self.is_done() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    fn outcome(&self) -> Result<LoadedResource> {
        let state = self.inner.state.lock().unwrap();
        match state.status {
            OperationStatus::Succeeded => state.payload.clone().ok_or(Error::Abandoned),
            OperationStatus::Failed => Err(state.error.clone().unwrap_or(Error::Abandoned)),
            OperationStatus::Pending | OperationStatus::Processing => Err(Error::Abandoned),
        }
    }

    /// Take a reference on this operation and everything it depends on.
    /// Clears the unload flag, resurrecting operations already marked.
    pub fn add_ref(&self) {
        let mut visited = HashSet::new();
        self.add_ref_inner(&mut visited);
    }

    fn add_ref_inner(&self, visited: &mut HashSet<u64>) {
        if !visited.insert(self.id()) {
            return;
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            state.ref_count += 1;
            state.can_unload = false;
        }
        for dependency in &self.inner.dependencies {
            dependency.add_ref_inner(visited);
        }
    }

    /// Give back a reference taken with [`Self::add_ref`].
    pub fn release(&self) {
        let mut visited = HashSet::new();
        self.release_inner(&mut visited);
    }

    fn release_inner(&self, visited: &mut HashSet<u64>) {
        if !visited.insert(self.id()) {
            return;
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            state.ref_count -= 1;
            if state.ref_count < 0 {
                warn!(
                    "'{}' released more times than referenced",
                    self.inner.provider.label()
                );
                state.ref_count = 0;
            }
        }
        for dependency in &self.inner.dependencies {
            dependency.release_inner(visited);
        }
    }

    pub fn ref_count(&self) -> i64 {
        self.inner.state.lock().unwrap().ref_count
    }

    /// Flag the operation unloadable if it resolved and nothing references
    /// it. Returns the resulting flag.
    pub fn mark_unloadable(&self) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        if state.ref_count <= 0 && state.status.is_done() {
            state.can_unload = true;
        }
        state.can_unload
    }

    pub fn can_unload(&self) -> bool {
        self.inner.state.lock().unwrap().can_unload
    }

    /// Aggregate transfer progress over this operation's graph.
    ///
    /// When nothing in the graph transfers bytes, resolution is the only
    /// signal: the result is complete once the operation is done and
    /// invalid before that.
    pub fn progress(&self) -> ProgressStatus {
        let mut total = ProgressStatus {
            id: self.id(),
            percent: 0.0,
            completed_bytes: 0,
            total_bytes: 0,
            is_valid: true,
        };
        let mut any = false;
        let mut visited = HashSet::new();
        self.collect_progress(&mut visited, &mut total, &mut any);

        if !any {
            if self.is_done() {
                return ProgressStatus::completed(self.id(), 0);
            }
            return ProgressStatus::invalid(self.id());
        }
        total
    }

    fn collect_progress(
        &self,
        visited: &mut HashSet<u64>,
        total: &mut ProgressStatus,
        any: &mut bool,
    ) {
        if !visited.insert(self.id()) {
            return;
        }
        if let Some(progress) = self.inner.provider.progress() {
            total.merge(&progress);
            *any = true;
        }
        for dependency in &self.inner.dependencies {
            dependency.collect_progress(visited, total, any);
        }
    }
}
