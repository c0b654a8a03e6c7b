use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;

use crate::{Endpoint, Error, Result};

/// Settings for one coordinator run.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Glob patterns naming the input files, one map task per match.
    pub inputs: Vec<String>,
    /// Number of reduce partitions.
    pub nreduce: usize,
    /// Combined, line-sorted final output.
    pub output: PathBuf,
    pub endpoint: Endpoint,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            nreduce: 10,
            output: PathBuf::from("mr-out"),
            endpoint: Endpoint::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Expand the input patterns in order, dropping repeated matches.
    pub fn resolve_inputs(&self) -> Result<Vec<String>> {
        if self.nreduce == 0 {
            return Err(Error::NoReducers);
        }
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for pattern in self.inputs.iter() {
            let mut matched = false;
            for path in glob::glob(pattern)? {
                matched = true;
                let path = path?.to_string_lossy().into_owned();
                if seen.insert(path.clone()) {
                    files.push(path);
                }
            }
            if !matched {
                warn!("input pattern {:?} matched nothing", pattern);
            }
        }
        Ok(files)
    }
}

/// Settings for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub endpoint: Endpoint,
    /// Directory holding intermediate files; shared by all workers of a job.
    pub dir: PathBuf,
    /// Deadline for each call to the coordinator.
    pub timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            dir: PathBuf::from("."),
            timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_inputs() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["pg-a.txt", "pg-b.txt", "other.md"] {
            fs::write(dir.path().join(f), "x").unwrap();
        }
        let root = dir.path().to_string_lossy();
        let config = CoordinatorConfig {
            inputs: vec![
                format!("{}/pg-*.txt", root),
                format!("{}/pg-a.txt", root),
                format!("{}/missing-*", root),
            ],
            ..Default::default()
        };
        let files = config.resolve_inputs().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("pg-a.txt"));
        assert!(files[1].ends_with("pg-b.txt"));
    }

    #[test]
    fn test_zero_reducers_rejected() {
        let config = CoordinatorConfig {
            nreduce: 0,
            ..Default::default()
        };
        assert!(matches!(config.resolve_inputs(), Err(Error::NoReducers)));
    }

    #[test]
    fn test_bad_pattern() {
        let config = CoordinatorConfig {
            inputs: vec!["[".into()],
            ..Default::default()
        };
        assert!(matches!(config.resolve_inputs(), Err(Error::Pattern(_))));
    }
}
