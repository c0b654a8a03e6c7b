use std::collections::{BTreeMap, HashSet};
use std::mem;

use log::{trace, warn};

use crate::{CompletionKey, Task, TaskType};

/// What a newly recorded completion unlocked.
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    /// First report for this key.
    pub recorded: bool,
    /// Every map task is done; reduce tasks may now be created.
    pub open_gate: bool,
    /// Every task is done; carries the reduce outputs keyed by partition.
    pub finalize: Option<BTreeMap<String, String>>,
}

/// Completion bookkeeping. Callers serialize access with a single lock.
#[derive(Debug)]
pub struct Tracker {
    nreduce: usize,
    pending: usize,
    expected: HashSet<CompletionKey>,
    completed: HashSet<CompletionKey>,
    results: BTreeMap<String, String>,
    /// Map input -> worker whose report was accepted.
    owners: BTreeMap<String, u64>,
    gate_fired: bool,
    finalized: bool,
}

impl Tracker {
    pub fn new(maps: &[Task], nreduce: usize) -> Self {
        let expected: HashSet<_> = maps
            .iter()
            .map(Task::key)
            .chain((0..nreduce).map(|i| Task::reduce(i).key()))
            .collect();
        Self {
            nreduce,
            pending: expected.len(),
            expected,
            completed: HashSet::new(),
            results: BTreeMap::new(),
            owners: BTreeMap::new(),
            gate_fired: false,
            finalized: false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_done(&self) -> bool {
        self.pending == 0
    }

    pub fn is_completed(&self, key: &CompletionKey) -> bool {
        self.completed.contains(key)
    }

    /// Which worker's intermediate output counts for each finished map input.
    pub fn owners(&self) -> BTreeMap<String, u64> {
        self.owners.clone()
    }

    /// Fire the phase gate if no map task is outstanding and it has not fired yet.
    pub fn try_open_gate(&mut self) -> bool {
        if !self.gate_fired && self.pending == self.nreduce {
            self.gate_fired = true;
            true
        } else {
            false
        }
    }

    /// Record a completion report. Repeated reports for one key are no-ops.
    pub fn record(&mut self, task: Task) -> Outcome {
        let key = task.key();
        if !self.expected.contains(&key) {
            warn!("ignoring report for unknown task {:?}", key);
            return Outcome::default();
        }
        if key.task == TaskType::Reduce && !self.gate_fired {
            warn!("ignoring reduce report before map phase ended: {:?}", key);
            return Outcome::default();
        }
        if self.completed.contains(&key) {
            trace!("duplicate report for {:?} (sent {})", key, task.sent);
            return Outcome::default();
        }

        self.completed.insert(key);
        self.pending -= 1;
        match task.task {
            TaskType::Map => match task.worker {
                Some(w) => {
                    self.owners.insert(task.id, w);
                }
                None => warn!("map {} reported without a worker id", task.id),
            },
            TaskType::Reduce => {
                self.results.insert(task.id, task.result.unwrap_or_default());
            }
        }

        let open_gate = self.try_open_gate();
        let finalize = if self.pending == 0 && !self.finalized {
            self.finalized = true;
            Some(mem::take(&mut self.results))
        } else {
            None
        };
        Outcome {
            recorded: true,
            open_gate,
            finalize,
        }
    }
}
