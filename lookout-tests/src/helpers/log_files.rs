//! Helpers for laying out function log files

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Write `contents` to `path`, creating parent directories
pub fn write_log(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

/// Append `contents` the way a function writer would
pub fn append_log(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()
}

/// `count` lines of exactly 50 bytes: a zero-padded line number, `|` and `\n`
pub fn numbered_lines(count: usize) -> String {
    (0..count).map(|i| format!("{:048}|\n", i)).collect()
}
