//! Single-process reference run, used to check distributed output.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::{MapFn, ReduceFn};

/// Map every file, reduce every key and return the output in the same
/// line-sorted `key\tvalue` form the coordinator writes.
pub fn run(files: &[PathBuf], map: MapFn, reduce: ReduceFn) -> io::Result<String> {
    let mut cnt = HashMap::<String, Vec<String>>::new();
    for fname in files.iter() {
        let contents = fs::read_to_string(fname)?;
        for (k, v) in map(fname, &contents) {
            cnt.entry(k).or_default().push(v);
        }
    }

    let mut lines: Vec<String> = cnt
        .iter()
        .map(|(k, vs)| format!("{}\t{}", k, reduce(k, vs)))
        .collect();
    lines.sort();

    let mut s = String::new();
    for l in lines {
        s.push_str(&l);
        s.push('\n');
    }
    Ok(s)
}
