//! The background compute service.
//!
//! Callers submit typed requests through a cloneable [`ComputeService`]
//! handle. A single dispatcher task owns every piece of scheduling state (the
//! waiter table, the low-priority FIFO and its in-flight counter) and is the
//! only place they are mutated. Work itself runs on the [`WorkerContext`]
//! pool; each finished task is routed back to its waiter by id.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use reelkit_core::config::{ComputeConfig, ReelkitConfig};
use reelkit_core::diagnostics::{self, DiagnosticEvent, DiagnosticsSink, Severity};
use reelkit_core::{Bitmap, ReelkitError, ReelkitResult};

use crate::decode::{BitmapDecoder, ImageCrateDecoder};
use crate::graph::{calculate_synapses, GraphNode, GraphParams, SynapseEdge};
use crate::protocol::{ComputeTask, Priority, TaskCompletion, TaskId, TaskRequest, TaskResponse};
use crate::worker::{run_caught, WorkerContext};

type Reply = oneshot::Sender<ReelkitResult<TaskResponse>>;

enum Command {
    Submit { task: ComputeTask, reply: Reply },
    Shutdown,
}

/// Handle to the compute service. Clones share one dispatcher.
#[derive(Clone)]
pub struct ComputeService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    next_id: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
    degraded: Option<String>,
}

/// Configures and starts a [`ComputeService`].
pub struct ComputeServiceBuilder {
    compute: ComputeConfig,
    graph: GraphParams,
    decoder: Arc<dyn BitmapDecoder>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
}

impl ComputeServiceBuilder {
    pub fn decoder(mut self, decoder: Arc<dyn BitmapDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Create the worker context and spawn the dispatcher. Must be called
    /// from within a tokio runtime.
    ///
    /// If the worker cannot be created the service still starts, degraded:
    /// decodes run in-process and graph requests resolve to no edges.
    pub fn start(self) -> ComputeService {
        let worker = if self.compute.worker_enabled {
            WorkerContext::new(&self.compute)
        } else {
            Err(ReelkitError::ComputeUnavailable(
                "worker disabled by configuration".to_string(),
            ))
        };

        let (executor, degraded) = match worker {
            Ok(worker) => {
                info!(
                    threads = worker.threads(),
                    decoder = self.decoder.name(),
                    "compute worker started"
                );
                (Executor::Pool(worker), None)
            }
            Err(e) => {
                error!("compute worker unavailable, running degraded: {}", e);
                diagnostics::report(
                    self.diagnostics.as_ref(),
                    DiagnosticEvent::new("compute", Severity::Error, e.to_string()),
                );
                (Executor::Inline, Some(e.to_string()))
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            executor,
            decoder: self.decoder,
            graph: Arc::new(self.graph),
            max_low: self.compute.max_concurrent_low_priority.max(1),
            low_active: 0,
            low_queue: VecDeque::new(),
            waiters: HashMap::new(),
            done_tx,
        };
        tokio::spawn(dispatcher.run(cmd_rx, done_rx));

        ComputeService {
            inner: Arc::new(ServiceInner {
                next_id: AtomicU64::new(1),
                commands: cmd_tx,
                degraded,
            }),
        }
    }
}

impl ComputeService {
    pub fn builder(config: &ReelkitConfig) -> ComputeServiceBuilder {
        ComputeServiceBuilder {
            compute: config.compute.clone(),
            graph: GraphParams::from_config(&config.graph),
            decoder: Arc::new(ImageCrateDecoder),
            diagnostics: None,
        }
    }

    /// Start a service with the default decoder. Must be called from within a tokio runtime.
    pub fn new(config: &ReelkitConfig) -> Self {
        Self::builder(config).start()
    }

    /// Whether the worker could not be created.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.is_some()
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.inner.degraded.as_deref()
    }

    /// Submit one task and wait for the response carrying its id.
    ///
    /// High-priority work is dispatched immediately. Low-priority decodes run
    /// one at a time in submission order. Graph work is never gated.
    pub async fn submit(
        &self,
        request: TaskRequest,
        priority: Priority,
    ) -> ReelkitResult<TaskResponse> {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, response) = oneshot::channel();
        debug!(task = %id, kind = %request.kind(), ?priority, "submitting compute task");
        self.inner
            .commands
            .send(Command::Submit {
                task: ComputeTask {
                    id,
                    priority,
                    request,
                },
                reply,
            })
            .map_err(|_| ReelkitError::ServiceStopped)?;
        response.await.map_err(|_| ReelkitError::ServiceStopped)?
    }

    /// Decode encoded image bytes into a bitmap.
    pub async fn decode_bitmap(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        priority: Priority,
    ) -> ReelkitResult<Bitmap> {
        let request = TaskRequest::Decode {
            bytes: bytes.into(),
        };
        match self.submit(request, priority).await? {
            TaskResponse::Bitmap(bitmap) => Ok(bitmap),
            other => Err(unexpected_response("decode", &other)),
        }
    }

    /// Compute synapse edges. Resolves to an empty list when degraded.
    pub async fn calculate_synapses(
        &self,
        nodes: Vec<GraphNode>,
        focused: Option<String>,
    ) -> ReelkitResult<Vec<SynapseEdge>> {
        match self
            .submit(TaskRequest::Graph { nodes, focused }, Priority::High)
            .await?
        {
            TaskResponse::Synapses(edges) => Ok(edges),
            other => Err(unexpected_response("graph", &other)),
        }
    }

    /// Stop the dispatcher. Tasks that have not been answered yet, and any
    /// later submissions, fail with [`ReelkitError::ServiceStopped`].
    pub fn shutdown(&self) {
        let _ = self.inner.commands.send(Command::Shutdown);
    }
}

impl std::fmt::Debug for ComputeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeService")
            .field("degraded", &self.inner.degraded)
            .finish()
    }
}

fn unexpected_response(asked: &str, got: &TaskResponse) -> ReelkitError {
    ReelkitError::Other(format!(
        "{} request answered with a {} response",
        asked,
        got.kind()
    ))
}

enum Executor {
    Pool(WorkerContext),
    /// No worker: decode on the blocking pool, graph work yields nothing.
    Inline,
}

struct Dispatcher {
    executor: Executor,
    decoder: Arc<dyn BitmapDecoder>,
    graph: Arc<GraphParams>,
    max_low: usize,
    low_active: usize,
    low_queue: VecDeque<ComputeTask>,
    waiters: HashMap<TaskId, Reply>,
    done_tx: mpsc::UnboundedSender<TaskCompletion>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<TaskCompletion>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Submit { task, reply }) => self.accept(task, reply),
                    Some(Command::Shutdown) | None => break,
                },
                Some(done) = completions.recv() => self.complete(done),
            }
        }
        debug!(
            unanswered = self.waiters.len(),
            queued = self.low_queue.len(),
            "compute dispatcher stopped"
        );
    }

    fn accept(&mut self, task: ComputeTask, reply: Reply) {
        self.waiters.insert(task.id, reply);
        if !task.request.is_gated(task.priority) {
            self.dispatch(task, false);
        } else if self.low_active < self.max_low {
            self.low_active += 1;
            self.dispatch(task, true);
        } else {
            debug!(task = %task.id, depth = self.low_queue.len() + 1, "queued low-priority task");
            self.low_queue.push_back(task);
        }
    }

    fn complete(&mut self, done: TaskCompletion) {
        if done.gated {
            self.low_active = self.low_active.saturating_sub(1);
        }
        if let Err(e) = &done.result {
            warn!(task = %done.id, "compute task failed: {}", e);
        }
        match self.waiters.remove(&done.id) {
            Some(reply) => {
                // the caller may have stopped waiting
                let _ = reply.send(done.result);
            }
            None => debug!(task = %done.id, "completion without a waiter"),
        }
        self.pump_low_queue();
    }

    fn pump_low_queue(&mut self) {
        while self.low_active < self.max_low {
            let Some(task) = self.low_queue.pop_front() else {
                break;
            };
            self.low_active += 1;
            self.dispatch(task, true);
        }
    }

    fn dispatch(&self, task: ComputeTask, gated: bool) {
        let id = task.id;
        let done = self.done_tx.clone();
        let finish = move |outcome: Result<ReelkitResult<TaskResponse>, String>| {
            let result =
                outcome.unwrap_or_else(|panic| Err(ReelkitError::task_failed(id.0, panic)));
            let _ = done.send(TaskCompletion { id, gated, result });
        };

        match (&self.executor, task.request) {
            (Executor::Pool(worker), request) => {
                let decoder = Arc::clone(&self.decoder);
                let graph = Arc::clone(&self.graph);
                worker.execute(move || run_request(request, decoder.as_ref(), &graph), finish);
            }
            (Executor::Inline, TaskRequest::Decode { bytes }) => {
                let decoder = Arc::clone(&self.decoder);
                tokio::task::spawn_blocking(move || {
                    finish(run_caught(|| {
                        decoder.decode(&bytes).map(TaskResponse::Bitmap)
                    }))
                });
            }
            (Executor::Inline, TaskRequest::Graph { .. }) => {
                finish(Ok(Ok(TaskResponse::Synapses(Vec::new()))));
            }
        }
    }
}

fn run_request(
    request: TaskRequest,
    decoder: &dyn BitmapDecoder,
    graph: &GraphParams,
) -> ReelkitResult<TaskResponse> {
    match request {
        TaskRequest::Decode { bytes } => decoder.decode(&bytes).map(TaskResponse::Bitmap),
        TaskRequest::Graph { nodes, focused } => Ok(TaskResponse::Synapses(calculate_synapses(
            &nodes,
            focused.as_deref(),
            graph,
        ))),
    }
}
