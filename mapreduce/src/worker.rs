use std::collections::BTreeMap;
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fnv::FnvHasher;
use futures::future::try_join_all;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use tarpc::context;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::{Endpoint, Result, Task, TaskType, WorkerConfig};

/// User map function: `(input path, contents) -> [(key, value)]`.
pub type MapFn = fn(&Path, &str) -> Vec<(String, String)>;
/// User reduce function: `(key, values) -> value`.
pub type ReduceFn = fn(&str, &[String]) -> String;

/// One line of an intermediate file.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    /// Input file of the map task that emitted this pair.
    source: String,
    key: String,
    value: String,
}

pub struct Worker {
    endpoint: Endpoint,
    dir: PathBuf,
    timeout: Duration,
    map: MapFn,
    reduce: ReduceFn,
}

impl Worker {
    pub fn new(config: WorkerConfig, map: MapFn, reduce: ReduceFn) -> Self {
        Self {
            endpoint: config.endpoint,
            dir: config.dir,
            timeout: config.timeout,
            map,
            reduce,
        }
    }

    fn context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = SystemTime::now() + self.timeout;
        ctx
    }

    /// Ask for and run tasks until the coordinator says the job is finished.
    ///
    /// Losing the coordinator is fatal; there is no reconnect.
    pub async fn launch(&self) -> Result<()> {
        let client = self.endpoint.connect().await?;
        let mut id = None;
        loop {
            let reply = client.get_job(self.context(), id).await?;
            let worker = reply.worker_id;
            id = Some(worker);
            if reply.finished {
                info!("worker {}: job finished", worker);
                return Ok(());
            }
            let mut task = match reply.task {
                Some(t) => t,
                None => continue,
            };
            trace!("worker {} got {:?}", worker, task);

            match task.task {
                TaskType::Map => {
                    if !self.run_map(worker, &task, reply.nreduce).await? {
                        continue;
                    }
                }
                TaskType::Reduce => {
                    let dir = self.dir.clone();
                    let (partition, reduce) = (task.id.clone(), self.reduce);
                    let owners = reply.owners;
                    let out = tokio::task::spawn_blocking(move || {
                        reduce_partition(&dir, &partition, &owners, reduce)
                    })
                    .await
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    match out {
                        Ok(s) => task.result = Some(s),
                        Err(e) => {
                            warn!("worker {}: abandoning reduce {}: {}", worker, task.id, e);
                            continue;
                        }
                    }
                }
            }
            debug!("worker {} finished {:?} {}", worker, task.task, task.id);
            client.finish(self.context(), task).await?;
        }
    }

    /// Returns `false` if the input could not be read; the task will be
    /// handed out again.
    async fn run_map(&self, worker: u64, task: &Task, nreduce: usize) -> Result<bool> {
        let path = Path::new(&task.id);
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                debug!("worker {}: cannot read {}: {}", worker, task.id, e);
                return Ok(false);
            }
        };
        let kvs = (self.map)(path, &contents);
        let writes = partition(&task.id, kvs, nreduce)?
            .into_iter()
            .map(|(r, data)| append(self.dir.join(intermediate_name(worker, r)), data));
        try_join_all(writes).await?;
        Ok(true)
    }
}

/// Partition index of `key`.
pub fn ihash(key: &str, nreduce: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() % nreduce as u64) as usize
}

fn intermediate_name(worker: u64, partition: usize) -> String {
    format!("mr-{}-{}", worker, partition)
}

/// Worker number of an intermediate file written for `partition`.
fn intermediate_worker(path: &Path, partition: &str) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("mr-")?
        .strip_suffix(partition)?
        .strip_suffix('-')?
        .parse()
        .ok()
}

/// Serialize map output into one buffer per non-empty partition.
fn partition(
    source: &str,
    kvs: Vec<(String, String)>,
    nreduce: usize,
) -> Result<BTreeMap<usize, String>> {
    let mut buckets = BTreeMap::<usize, String>::new();
    for (key, value) in kvs {
        let buf = buckets.entry(ihash(&key, nreduce)).or_default();
        let record = Record {
            source: source.to_owned(),
            key,
            value,
        };
        buf.push_str(&serde_json::to_string(&record)?);
        buf.push('\n');
    }
    Ok(buckets)
}

/// One append per partition file per map attempt.
async fn append(path: PathBuf, data: String) -> io::Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    f.write_all(data.as_bytes()).await?;
    f.flush().await
}

/// Run `reduce` over every intermediate record for `partition`.
///
/// A map task may have been executed by more than one worker, and a worker
/// that was cut off may have left a partial copy behind. For each input file
/// only the records of the worker in `owners` are used; sources without an
/// owner are skipped.
fn reduce_partition(
    dir: &Path,
    partition: &str,
    owners: &BTreeMap<String, u64>,
    reduce: ReduceFn,
) -> Result<String> {
    let pattern = format!(
        "{}/mr-*-{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        partition
    );

    let mut groups = BTreeMap::<String, Vec<String>>::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        let worker = match intermediate_worker(&path, partition) {
            Some(w) => w,
            None => continue,
        };
        let contents = std::fs::read_to_string(&path)?;
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let r = match serde_json::from_str::<Record>(line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("{}:{}: skipping malformed record: {}", path.display(), n + 1, e);
                    continue;
                }
            };
            match owners.get(&r.source) {
                Some(&w) if w == worker => groups.entry(r.key).or_default().push(r.value),
                Some(_) => {}
                None => trace!("{}: no accepted map for {}", path.display(), r.source),
            }
        }
    }

    let mut s = String::new();
    for (k, vs) in groups.iter() {
        s.push_str(&format!("{}\t{}\n", k, reduce(k, vs)));
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::wc;
    use std::fs;

    #[test]
    fn test_ihash_in_range_and_stable() {
        for key in ["a", "the", "zebra", ""] {
            let r = ihash(key, 7);
            assert!(r < 7);
            assert_eq!(r, ihash(key, 7));
        }
        // FNV-1a 64 of "a" is 0xaf63dc4c8601ec8c.
        assert_eq!(ihash("a", 1 << 16), 0xec8c);
    }

    #[test]
    fn test_intermediate_worker() {
        let p = Path::new("/tmp/x/mr-12-3");
        assert_eq!(intermediate_worker(p, "3"), Some(12));
        assert_eq!(intermediate_worker(p, "13"), None);
        assert_eq!(intermediate_worker(Path::new("/tmp/x/mr-12-13"), "3"), None);
        assert_eq!(intermediate_worker(Path::new("/tmp/x/mr-out"), "3"), None);
    }

    fn write_map_output(dir: &Path, worker: u64, source: &str, contents: &str, nreduce: usize) {
        let kvs = wc::map(Path::new(source), contents);
        for (r, data) in partition(source, kvs, nreduce).unwrap() {
            let path = dir.join(intermediate_name(worker, r));
            let mut prev = fs::read_to_string(&path).unwrap_or_default();
            prev.push_str(&data);
            fs::write(path, prev).unwrap();
        }
    }

    fn owners(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(s, w)| (s.to_string(), *w)).collect()
    }

    fn reduce_all(dir: &Path, nreduce: usize, owners: &BTreeMap<String, u64>) -> String {
        let mut out: Vec<String> = (0..nreduce)
            .map(|r| reduce_partition(dir, &r.to_string(), owners, wc::reduce).unwrap())
            .flat_map(|s| s.lines().map(str::to_owned).collect::<Vec<_>>())
            .collect();
        out.sort();
        out.join("\n")
    }

    #[test]
    fn test_partitions_cover_all_pairs() {
        let kvs = wc::map(Path::new("in.txt"), "a b c a d e f g");
        let buckets = partition("in.txt", kvs, 3).unwrap();
        assert!(buckets.keys().all(|r| *r < 3));
        let lines: usize = buckets.values().map(|b| b.lines().count()).sum();
        assert_eq!(lines, 8);
    }

    #[test]
    fn test_reduce_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_map_output(dir.path(), 1, "a.txt", "x y x", 2);
        write_map_output(dir.path(), 2, "b.txt", "y z", 2);
        let own = owners(&[("a.txt", 1), ("b.txt", 2)]);
        assert_eq!(reduce_all(dir.path(), 2, &own), "x\t2\ny\t2\nz\t1");
    }

    #[test]
    fn test_duplicate_map_execution_counted_once() {
        let dir = tempfile::tempdir().unwrap();
        write_map_output(dir.path(), 1, "a.txt", "x y x", 2);
        write_map_output(dir.path(), 2, "b.txt", "y z", 2);
        // a.txt was redelivered and run again by worker 3.
        write_map_output(dir.path(), 3, "a.txt", "x y x", 2);
        let own = owners(&[("a.txt", 1), ("b.txt", 2)]);
        assert_eq!(reduce_all(dir.path(), 2, &own), "x\t2\ny\t2\nz\t1");
        let own = owners(&[("a.txt", 3), ("b.txt", 2)]);
        assert_eq!(reduce_all(dir.path(), 2, &own), "x\t2\ny\t2\nz\t1");
    }

    #[test]
    fn test_partial_copy_from_lower_worker_ignored() {
        let dir = tempfile::tempdir().unwrap();
        // Worker 1 stalled halfway through its append; worker 2 ran a.txt
        // again and its report was the one accepted.
        write_map_output(dir.path(), 2, "a.txt", "x x x x", 1);
        let full = fs::read_to_string(dir.path().join(intermediate_name(2, 0))).unwrap();
        let partial: String = full.lines().take(2).map(|l| format!("{}\n", l)).collect();
        fs::write(dir.path().join(intermediate_name(1, 0)), partial).unwrap();

        let own = owners(&[("a.txt", 2)]);
        assert_eq!(
            reduce_partition(dir.path(), "0", &own, wc::reduce).unwrap(),
            "x\t4\n"
        );
    }

    #[test]
    fn test_unowned_source_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_map_output(dir.path(), 1, "a.txt", "x", 1);
        write_map_output(dir.path(), 1, "stray.txt", "y", 1);
        let own = owners(&[("a.txt", 1)]);
        assert_eq!(
            reduce_partition(dir.path(), "0", &own, wc::reduce).unwrap(),
            "x\t1\n"
        );
    }

    #[test]
    fn test_malformed_records_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_map_output(dir.path(), 1, "a.txt", "x x", 1);
        let path = dir.path().join(intermediate_name(1, 0));
        let mut s = fs::read_to_string(&path).unwrap();
        s.push_str("this is not json\n{\"source\":\"a.txt\"}\n");
        fs::write(&path, s).unwrap();
        assert_eq!(
            reduce_partition(dir.path(), "0", &owners(&[("a.txt", 1)]), wc::reduce).unwrap(),
            "x\t2\n"
        );
    }

    #[test]
    fn test_empty_partition() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(reduce_partition(dir.path(), "4", &BTreeMap::new(), wc::reduce).unwrap(), "");
    }

    #[tokio::test]
    async fn test_append_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mr-1-0");
        append(path.clone(), "one\n".into()).await.unwrap();
        append(path.clone(), "two\n".into()).await.unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "one\ntwo\n");
    }
}
