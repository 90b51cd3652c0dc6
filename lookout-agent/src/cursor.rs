//! Positional, line-safe reads over a single log file.
//!
//! A `LogCursor` is built per request from the caller's byte offsets and
//! dropped afterwards; nothing is kept between requests. Every page it
//! returns ends on a newline and starts at a line boundary, so callers can
//! render pages directly without ever showing half a line.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use lookout_protocol::protocol::DEFAULT_PAGE_BYTES;

use crate::errors::CursorError;

/// Initial read window and the amount it grows by on each retry
pub const READ_STEP: u64 = DEFAULT_PAGE_BYTES as u64;

pub type Result<T> = std::result::Result<T, CursorError>;

/// Text read by one cursor call and the cursor position after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub position: u64,
}

impl Chunk {
    fn empty(position: u64) -> Self {
        Self {
            text: String::new(),
            position,
        }
    }
}

/// Forward/backward byte cursor over one open log file.
pub struct LogCursor {
    path: PathBuf,
    file: File,
    forward_pos: u64,
    backward_pos: u64,
}

impl LogCursor {
    /// Open `path` with the caller's cursor.
    ///
    /// A position `<= 0` starts at the current end of the file, snapped back
    /// to the end of the last complete line if the writer is mid-line.
    /// Positions past the end of the file are clamped to that same boundary.
    pub fn open(path: impl AsRef<Path>, forward_init: i64, backward_init: i64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|source| CursorError::Open {
            path: path.clone(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| CursorError::Open {
                path: path.clone(),
                source,
            })?
            .len();

        let in_file = |init: i64| init > 0 && init as u64 <= size;
        let tail = if in_file(forward_init) && in_file(backward_init) {
            size
        } else {
            last_line_boundary(&mut file, &path, size)?
        };
        let resolve = |init: i64| if in_file(init) { init as u64 } else { tail };

        Ok(Self {
            forward_pos: resolve(forward_init),
            backward_pos: resolve(backward_init),
            path,
            file,
        })
    }

    pub fn forward_position(&self) -> u64 {
        self.forward_pos
    }

    pub fn backward_position(&self) -> u64 {
        self.backward_pos
    }

    /// Read whole lines appended after the forward position.
    ///
    /// Returns an empty chunk at the unchanged position when nothing new has
    /// been written. Fails with [`CursorError::IncompleteLine`] when all new
    /// data so far belongs to one unfinished line.
    pub fn read_forward(&mut self, max_bytes: i64) -> Result<Chunk> {
        let eof = self
            .file
            .seek(SeekFrom::End(0))
            .map_err(|source| self.io_error(source))?;
        if eof <= self.forward_pos {
            return Ok(Chunk::empty(self.forward_pos));
        }

        let (text, end) = self.scan_forward(self.forward_pos, eof, initial_window(max_bytes))?;
        self.forward_pos = end;
        Ok(Chunk {
            text,
            position: end,
        })
    }

    /// Read whole lines that end at the backward position.
    ///
    /// The window grows until it holds at least two newlines, so the possibly
    /// partial leading line can be dropped, or until it reaches the start of
    /// the file. Once the start is reached the returned position is 0.
    pub fn read_backward(&mut self, max_bytes: i64) -> Result<Chunk> {
        let mut window = initial_window(max_bytes);
        loop {
            if window >= self.backward_pos {
                return self.read_from_start();
            }

            let start = self.backward_pos - window;
            let buf = self.read_at(start, window)?;
            let mut newlines = memchr::memchr_iter(b'\n', &buf);
            if let (Some(first), Some(_)) = (newlines.next(), newlines.next()) {
                let position = start + first as u64 + 1;
                self.backward_pos = position;
                return Ok(Chunk {
                    text: decode(&buf[first + 1..]),
                    position,
                });
            }

            window += READ_STEP;
        }
    }

    /// Everything before the backward position; there is no earlier line
    /// left to skip.
    fn read_from_start(&mut self) -> Result<Chunk> {
        if self.backward_pos == 0 {
            return Ok(Chunk::empty(0));
        }
        let (text, _) = self.scan_forward(0, self.backward_pos, self.backward_pos)?;
        self.backward_pos = 0;
        Ok(Chunk { text, position: 0 })
    }

    /// Read from `start` towards `limit` until the window contains a
    /// newline, and return the text up to and including the last one.
    fn scan_forward(&mut self, start: u64, limit: u64, mut window: u64) -> Result<(String, u64)> {
        let available = limit - start;
        loop {
            let len = window.min(available);
            let buf = self.read_at(start, len)?;
            if let Some(last) = memchr::memrchr(b'\n', &buf) {
                return Ok((decode(&buf[..=last]), start + last as u64 + 1));
            }
            if len == available {
                return Err(CursorError::IncompleteLine {
                    path: self.path.clone(),
                    offset: start,
                    scanned: len,
                });
            }
            window += READ_STEP;
        }
    }

    fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| self.io_error(source))?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf).map_err(|source| {
            if source.kind() == std::io::ErrorKind::UnexpectedEof {
                CursorError::Truncated {
                    path: self.path.clone(),
                    offset,
                }
            } else {
                self.io_error(source)
            }
        })?;
        Ok(buf)
    }

    fn io_error(&self, source: std::io::Error) -> CursorError {
        CursorError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn initial_window(max_bytes: i64) -> u64 {
    if max_bytes > READ_STEP as i64 {
        max_bytes as u64
    } else {
        READ_STEP
    }
}

/// Newlines never occur inside a multi-byte UTF-8 sequence, so line-aligned
/// slices never split a character; invalid bytes are replaced.
fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Offset just past the last newline in the first `size` bytes, or 0.
fn last_line_boundary(file: &mut File, path: &Path, size: u64) -> Result<u64> {
    let io_error = |source: std::io::Error| CursorError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut end = size;
    let mut buf = Vec::with_capacity(READ_STEP as usize);
    while end > 0 {
        let start = end.saturating_sub(READ_STEP);
        buf.resize((end - start) as usize, 0);
        file.seek(SeekFrom::Start(start)).map_err(io_error)?;
        file.read_exact(&mut buf).map_err(|source| {
            if source.kind() == std::io::ErrorKind::UnexpectedEof {
                CursorError::Truncated {
                    path: path.to_path_buf(),
                    offset: start,
                }
            } else {
                io_error(source)
            }
        })?;
        if let Some(last) = memchr::memrchr(b'\n', &buf) {
            return Ok(start + last as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

#[cfg(test)]
mod tests;
