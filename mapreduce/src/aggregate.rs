//! Merging of reduce outputs into the final result file.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use atomicwrites::{AllowOverwrite, AtomicFile};
use log::{error, info};

/// Concatenate every reduce output into `path`, then sort its lines.
///
/// Each output is a run of `key\tvalue\n` records; the order they arrive in
/// does not affect the final bytes.
pub fn write_output<I>(path: &Path, results: I) -> io::Result<()>
where
    I: IntoIterator<Item = String>,
{
    let merged: String = results.into_iter().collect();
    fs::write(path, merged)?;
    sort_lines(path)
}

/// Rewrite `path` with its non-empty lines in lexicographic order.
pub fn sort_lines(path: &Path) -> io::Result<()> {
    let contents = fs::read_to_string(path)?;
    let mut lines: Vec<&str> = contents.lines().filter(|l| !l.is_empty()).collect();
    lines.sort();

    let mut s = String::with_capacity(contents.len());
    for line in lines {
        s.push_str(line);
        s.push('\n');
    }
    AtomicFile::new(path, AllowOverwrite)
        .write(|f| f.write_all(s.as_bytes()))
        .map_err(|e| match e {
            atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => e,
        })
}

/// Produce the final output, logging instead of returning failures.
pub fn finalize<I>(path: &Path, results: I)
where
    I: IntoIterator<Item = String>,
{
    match write_output(path, results) {
        Ok(()) => info!("output written to {}", path.display()),
        Err(e) => error!("failed to write output {}: {}", path.display(), e),
    }
}
