use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod app;
pub mod config;
mod coordinator;
pub mod endpoint;
mod error;
mod pool;
pub mod sequential;
mod tracker;
mod worker;

pub use config::{CoordinatorConfig, WorkerConfig};
pub use coordinator::Coordinator;
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use worker::{MapFn, ReduceFn, Worker};

/// RPC interface between the coordinator and its workers.
#[tarpc::service]
pub trait Service {
    /// Ask for a task. `None` asks the coordinator to assign a worker id.
    async fn get_job(worker_id: Option<u64>) -> JobReply;
    /// Report a task as done. Repeated reports of the same task are ignored.
    async fn finish(task: Task);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskType {
    Map,
    Reduce,
}

/// One unit of work.
///
/// `id` is the input path of a map task or the partition index of a reduce task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub task: TaskType,
    /// How many times the coordinator has handed this task out.
    pub sent: u32,
    /// Output of a reduce task, filled in by the worker before reporting.
    pub result: Option<String>,
    /// Worker this copy was handed to; echoed back in `finish`.
    pub worker: Option<u64>,
}

impl Task {
    pub fn map(path: impl Into<String>) -> Self {
        Self {
            id: path.into(),
            task: TaskType::Map,
            sent: 0,
            result: None,
            worker: None,
        }
    }

    pub fn reduce(partition: usize) -> Self {
        Self {
            id: partition.to_string(),
            task: TaskType::Reduce,
            sent: 0,
            result: None,
            worker: None,
        }
    }

    pub fn key(&self) -> CompletionKey {
        CompletionKey {
            task: self.task,
            id: self.id.clone(),
        }
    }
}

/// Stage-qualified task identity used to deduplicate completion reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompletionKey {
    pub task: TaskType,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReply {
    pub worker_id: u64,
    pub task: Option<Task>,
    pub nreduce: usize,
    /// For reduce tasks: input path -> worker whose map output was accepted.
    /// Reducers read only that worker's records for each input.
    pub owners: BTreeMap<String, u64>,
    /// Every task has been reported; the worker should exit.
    pub finished: bool,
}
