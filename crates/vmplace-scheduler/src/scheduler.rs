//! The orchestrator: synchronous selection entry points and the queued
//! create path served by a single background worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::TryFutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;
use vmplace_backend::{ComputeBackend, VmId};

use crate::error::{Result, SchedulerError};
use crate::framework::node_info::snapshot;
use crate::framework::{guarded, CycleState, Registry, SchedulerResult, VmRequest};
use crate::node_scheduler::NodeScheduler;
use crate::queue::SchedulingQueue;
use crate::vmid_scheduler::VmIdScheduler;

/// Lifecycle of a [`Scheduler`]'s worker.
///
/// Transitions only move forward: `Idle` → `Running` → `Stopped`, or
/// `Idle` → `Stopped` when stopped before it ever ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, worker not started.
    Idle,
    /// Worker is draining the queue.
    Running,
    /// Queue shut down and worker exited.
    Stopped,
}

/// Optional settings applied when a [`Scheduler`] is built.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    timeout: Option<Duration>,
}

impl SchedulerOptions {
    /// Options with every setting at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the worker once `timeout` has elapsed since it started,
    /// whatever is left in the queue.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The configured worker lifetime, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// A queued create request together with the channel its result goes back on.
#[derive(Debug)]
pub struct PlacementRequest {
    id: Uuid,
    request: VmRequest,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<SchedulerResult>>,
}

struct Lifecycle {
    state: SchedulerState,
    worker: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn ComputeBackend>,
    registry: Arc<Registry>,
    queue: SchedulingQueue<PlacementRequest>,
    options: SchedulerOptions,
    span: Span,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    /// Set once no worker can be running any more.
    exited: watch::Sender<bool>,
}

/// Places virtual machines on one compute backend.
///
/// Cloning is cheap and every clone drives the same worker. Created by
/// [`Manager::scheduler`](crate::Manager::scheduler).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("queued", &self.inner.queue.len())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub(crate) fn new(
        backend: Arc<dyn ComputeBackend>,
        registry: Arc<Registry>,
        options: SchedulerOptions,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                registry,
                queue: SchedulingQueue::new(),
                options,
                span,
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle {
                    state: SchedulerState::Idle,
                    worker: None,
                    timer: None,
                }),
                exited: watch::Sender::new(false),
            }),
        }
    }

    /// Run the filter and score phases against a fresh snapshot and return
    /// the chosen node. Bypasses the queue.
    ///
    /// # Errors
    ///
    /// Returns `NoNodesAvailable`, `PluginExecution`, `Backend` or
    /// `Cancelled`.
    pub async fn select_node(
        &self,
        cancel: &CancellationToken,
        request: &VmRequest,
    ) -> Result<String> {
        let inner = &self.inner;
        async {
            let nodes = snapshot(inner.backend.as_ref(), cancel).await?;
            NodeScheduler::new(&inner.registry).schedule(&mut CycleState::new(), request, &nodes)
        }
        .instrument(inner.span.clone())
        .await
    }

    /// Run the VMID phase against a fresh snapshot and return the chosen id.
    /// Bypasses the queue.
    ///
    /// # Errors
    ///
    /// Returns `NoVmIdAvailable`, `PluginExecution`, `Backend` or
    /// `Cancelled`.
    pub async fn select_vmid(
        &self,
        cancel: &CancellationToken,
        request: &VmRequest,
    ) -> Result<VmId> {
        let inner = &self.inner;
        async {
            let nodes = snapshot(inner.backend.as_ref(), cancel).await?;
            VmIdScheduler::new(&inner.registry, inner.backend.as_ref())
                .schedule(&mut CycleState::new(), cancel, request, &nodes)
                .await
        }
        .instrument(inner.span.clone())
        .await
    }

    /// Start the background worker, and the timeout timer if one is
    /// configured. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLifecycle` unless the scheduler is `Idle`, or
    /// `Internal` when called outside a Tokio runtime.
    pub fn run_async(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != SchedulerState::Idle {
            return Err(SchedulerError::InvalidLifecycle {
                state: lifecycle.state,
            });
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Internal(format!("cannot start worker: {e}")))?;

        let inner = Arc::clone(&self.inner);
        lifecycle.worker = Some(runtime.spawn(
            inner.run_worker().instrument(self.inner.span.clone()),
        ));

        if let Some(timeout) = self.inner.options.timeout {
            let inner = Arc::clone(&self.inner);
            lifecycle.timer = Some(runtime.spawn(
                async move {
                    tokio::time::sleep(timeout).await;
                    let discarded = inner.queue.shut_down();
                    warn!(?timeout, discarded, "Scheduler timeout elapsed, stopping worker");
                }
                .instrument(self.inner.span.clone()),
            ));
        }

        lifecycle.state = SchedulerState::Running;
        self.inner.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Check if the worker is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.inner.lifecycle.lock().state
    }

    /// Number of create requests waiting for the worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Shut the queue down and wait for the worker to exit.
    ///
    /// A request already being processed runs to completion; requests still
    /// queued fail with `Stopped`. Every concurrent caller waits for the
    /// same exit. Calling it again is a no-op.
    pub async fn stop(&self) {
        let discarded = self.inner.queue.shut_down();
        if discarded > 0 {
            info!(parent: &self.inner.span, discarded, "Dropped queued requests on stop");
        }

        let mut exited = self.inner.exited.subscribe();
        let (worker, timer) = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == SchedulerState::Idle {
                lifecycle.state = SchedulerState::Stopped;
                self.inner.exited.send_replace(true);
            }
            (lifecycle.worker.take(), lifecycle.timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(parent: &self.inner.span, error = %e, "Scheduling worker ended abnormally");
            }
            self.inner.running.store(false, Ordering::SeqCst);
            self.inner.lifecycle.lock().state = SchedulerState::Stopped;
            self.inner.exited.send_replace(true);
        }

        // The sender lives in `inner`, so this only returns once the flag is set.
        let _ = exited.wait_for(|done| *done).await;
    }

    /// Queue a create request and wait for the worker to process it.
    ///
    /// Requests are processed one at a time in submission order. Each
    /// caller receives the result of its own request.
    ///
    /// # Errors
    ///
    /// Returns any scheduling or backend error for this request, `Stopped`
    /// if the worker is gone before the request is processed, or
    /// `Cancelled` if `cancel` fires first.
    pub async fn create_qemu(
        &self,
        cancel: CancellationToken,
        request: VmRequest,
    ) -> Result<SchedulerResult> {
        let (reply, result) = oneshot::channel();
        let id = Uuid::new_v4();

        self.inner
            .queue
            .add(PlacementRequest {
                id,
                request,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| SchedulerError::Stopped)?;
        debug!(parent: &self.inner.span, request_id = %id, queued = self.inner.queue.len(), "Queued placement request");

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SchedulerError::Cancelled),
            reply = result => reply.unwrap_or(Err(SchedulerError::Stopped)),
        }
    }
}

impl Inner {
    async fn run_worker(self: Arc<Self>) {
        info!("Scheduling worker started");

        while let Some(item) = self.queue.get().await {
            self.process(item).await;
        }

        self.running.store(false, Ordering::SeqCst);
        let timer = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = SchedulerState::Stopped;
            lifecycle.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        info!("Scheduling worker stopped");
    }

    /// Handle one request. Failures, panics included, go back to the caller
    /// and never end the loop.
    async fn process(self: &Arc<Self>, item: PlacementRequest) {
        let PlacementRequest {
            id,
            request,
            cancel,
            reply,
        } = item;

        let result = if cancel.is_cancelled() {
            debug!(request_id = %id, "Request cancelled while queued");
            Err(SchedulerError::Cancelled)
        } else {
            let inner = Arc::clone(self);
            let span = info_span!("placement", request_id = %id, vm = %request.spec.name);
            let attempt =
                tokio::spawn(async move { inner.attempt(&cancel, &request).await }.instrument(span));

            match attempt.await {
                Ok(result) => result,
                Err(e) => {
                    error!(request_id = %id, error = %e, "Scheduling attempt panicked");
                    Err(SchedulerError::Internal(format!("scheduling attempt failed: {e}")))
                }
            }
        };

        if reply.send(result).is_err() {
            debug!(request_id = %id, "Caller went away before the result was ready");
        }
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        request: &VmRequest,
    ) -> Result<SchedulerResult> {
        let mut state = CycleState::new();
        let outcome = self.place(&mut state, cancel, request).await;

        match &outcome {
            Ok(result) => state.complete(result.clone()),
            Err(e) => {
                warn!(error = %e, "Placement failed");
                state.fail(e);
            }
        }
        for (plugin, message) in state.messages() {
            debug!(plugin = %plugin, message = %message, "Plugin note");
        }

        outcome
    }

    async fn place(
        &self,
        state: &mut CycleState,
        cancel: &CancellationToken,
        request: &VmRequest,
    ) -> Result<SchedulerResult> {
        let nodes = snapshot(self.backend.as_ref(), cancel).await?;

        let node = NodeScheduler::new(&self.registry).schedule(state, request, &nodes)?;
        let vmid = VmIdScheduler::new(&self.registry, self.backend.as_ref())
            .schedule(state, cancel, request, &nodes)
            .await?;

        let instance = guarded(
            cancel,
            self.backend
                .create_instance(&node, vmid, &request.spec)
                .map_err(|e| {
                    SchedulerError::backend(format!("creating vm {vmid} on node {node}"), e)
                }),
        )
        .await?;

        info!(
            node = %instance.node,
            vmid = %instance.vmid,
            task = ?instance.task,
            "Created virtual machine"
        );

        Ok(SchedulerResult::new(
            instance.node,
            instance.vmid,
            request.spec.storage.clone(),
        ))
    }
}
