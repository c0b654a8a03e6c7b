//! Word count.

use std::path::Path;

pub fn map(_filename: &Path, contents: &str) -> Vec<(String, String)> {
    contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(|w| (w.to_owned(), "1".to_owned()))
        .collect()
}

pub fn reduce(_key: &str, values: &[String]) -> String {
    values.len().to_string()
}
