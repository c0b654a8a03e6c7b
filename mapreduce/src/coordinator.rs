use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::prelude::*;
use log::{debug, info, trace, warn};
use tarpc::{
    context,
    server::{self, Channel},
    serde_transport,
    tokio_serde::formats::Json,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::endpoint::{framed, Listener};
use crate::pool::TaskPool;
use crate::tracker::Tracker;
use crate::{aggregate, CoordinatorConfig, Endpoint, JobReply, Result, Service, Task, TaskType};

/// Scheduling state for one job.
///
/// Map tasks are queued at construction. Reduce tasks are queued by a
/// background task once the last map task is reported.
#[derive(Debug)]
pub struct Coordinator {
    nmap: usize,
    nreduce: usize,
    output: PathBuf,

    /// Tasks never handed out yet.
    primary: TaskPool,
    /// Every handed-out task that was not known to be finished when it was last
    /// handed out. Finished entries are dropped when they reach the head.
    redelivery: TaskPool,

    tracker: Mutex<Tracker>,
    gate: Notify,
    done: watch::Sender<bool>,
    next_worker: AtomicU64,
    aggregator: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create the coordinator and queue one map task per input file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &CoordinatorConfig) -> Result<Arc<Self>> {
        let files = config.resolve_inputs()?;
        let maps: Vec<Task> = files.into_iter().map(Task::map).collect();
        let capacity = maps.len() + config.nreduce;

        let c = Arc::new(Self {
            nmap: maps.len(),
            nreduce: config.nreduce,
            output: config.output.clone(),
            primary: TaskPool::new(capacity),
            redelivery: TaskPool::new(capacity),
            tracker: Mutex::new(Tracker::new(&maps, config.nreduce)),
            gate: Notify::new(),
            done: watch::channel(false).0,
            next_worker: AtomicU64::new(1),
            aggregator: Mutex::new(None),
        });
        for t in maps {
            c.primary.push(t);
        }
        info!("{} map tasks, {} reduce tasks", c.nmap, c.nreduce);

        let this = c.clone();
        tokio::spawn(async move {
            this.gate.notified().await;
            info!("map phase finished, queueing {} reduce tasks", this.nreduce);
            for i in 0..this.nreduce {
                this.primary.push(Task::reduce(i));
            }
        });

        // Nothing to map: go straight to the reduce phase.
        if c.tracker().try_open_gate() {
            c.gate.notify_one();
        }
        Ok(c)
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once every map and reduce task has been reported.
    pub fn done(&self) -> bool {
        self.tracker().is_done()
    }

    pub fn pending(&self) -> usize {
        self.tracker().pending()
    }

    /// Hand out a task. `worker_id` of `None` asks for a fresh worker id.
    pub async fn get_job(&self, worker_id: Option<u64>) -> JobReply {
        let worker_id =
            worker_id.unwrap_or_else(|| self.next_worker.fetch_add(1, Ordering::SeqCst));
        let mut task = self.dispatch().await;
        let mut owners = BTreeMap::new();
        if let Some(t) = &mut task {
            debug!(
                "worker {} <- {:?} {} (sent {})",
                worker_id, t.task, t.id, t.sent
            );
            t.worker = Some(worker_id);
            // Every map is reported before any reduce task is queued.
            if t.task == TaskType::Reduce {
                owners = self.tracker().owners();
            }
        }
        JobReply {
            worker_id,
            finished: task.is_none(),
            task,
            nreduce: self.nreduce,
            owners,
        }
    }

    /// `None` means the job is finished.
    ///
    /// No `.await` separates taking a task from a pool and re-queueing it, so a
    /// call dropped at its deadline never loses a task.
    async fn dispatch(&self) -> Option<Task> {
        if self.done() {
            return None;
        }
        if let Some(t) = self.primary.try_pop() {
            return Some(self.deliver(t));
        }

        let mut done = self.done.subscribe();
        loop {
            tokio::select! {
                Some(t) = self.primary.pop() => return Some(self.deliver(t)),
                Some(t) = self.redelivery.pop() => {
                    if self.tracker().is_completed(&t.key()) {
                        trace!("dropping finished {:?} {} from redelivery", t.task, t.id);
                        continue;
                    }
                    return Some(self.deliver(t));
                }
                _ = done.wait_for(|d| *d) => return None,
            }
        }
    }

    /// Count the hand-out and queue a copy for redelivery.
    ///
    /// The redelivery pool holds at most one entry per task, so it has room.
    fn deliver(&self, mut t: Task) -> Task {
        t.sent = t.sent.saturating_add(1);
        let queued = self.redelivery.push(t.clone());
        debug_assert!(queued, "redelivery pool overflow on {:?} {}", t.task, t.id);
        t
    }

    /// Record a finished task. Safe to call any number of times per task.
    pub fn finish(&self, task: Task) {
        let (kind, id, sent) = (task.task, task.id.clone(), task.sent);

        let mut tracker = self.tracker();
        let outcome = tracker.record(task);
        if !outcome.recorded {
            return;
        }
        debug!(
            "finished {:?} {} (sent {}), {} pending",
            kind,
            id,
            sent,
            tracker.pending()
        );

        if outcome.open_gate {
            self.gate.notify_one();
        }
        if let Some(results) = outcome.finalize {
            info!("all tasks finished");
            self.done.send_replace(true);
            let output = self.output.clone();
            let handle = tokio::task::spawn_blocking(move || {
                aggregate::finalize(&output, results.into_values())
            });
            *self
                .aggregator
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }

    /// Wait until the final output has been written. Returns immediately if the
    /// job is not done yet.
    pub async fn wait_output(&self) {
        let handle = self
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("output task failed: {}", e);
            }
        }
    }

    /// Bind `endpoint` and serve RPCs on a background task.
    pub async fn launch(self: &Arc<Self>, endpoint: &Endpoint) -> Result<JoinHandle<()>> {
        let listener = endpoint.bind().await?;
        info!("coordinator listening on {}", endpoint);
        let server = CoordinatorServer(self.clone());
        Ok(tokio::spawn(async move {
            loop {
                let accepted = match &listener {
                    Listener::Tcp(l) => l.accept().await.map(|(s, _)| server.serve_stream(s)),
                    #[cfg(unix)]
                    Listener::Unix(l) => l.accept().await.map(|(s, _)| server.serve_stream(s)),
                };
                // Ignore accept errors.
                if let Err(e) = accepted {
                    warn!("accept failed: {}", e);
                }
            }
        }))
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

// This is the type that implements the generated Service trait.
#[derive(Clone)]
struct CoordinatorServer(Arc<Coordinator>);

impl CoordinatorServer {
    /// Serve one connection; each request runs on its own task.
    fn serve_stream<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let transport = serde_transport::new(framed(stream), Json::default());
        let channel = server::BaseChannel::with_defaults(transport);
        tokio::spawn(channel.execute(self.clone().serve()).for_each(spawn));
    }
}

impl Service for CoordinatorServer {
    async fn get_job(self, _: context::Context, worker_id: Option<u64>) -> JobReply {
        self.0.get_job(worker_id).await
    }

    async fn finish(self, _: context::Context, task: Task) {
        self.0.finish(task)
    }
}
