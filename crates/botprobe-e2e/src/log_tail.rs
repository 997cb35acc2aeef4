//! Incremental reads of the bot's log file.
//!
//! The observer only cares about lines written after a probe was sent, so the
//! tail remembers a byte offset (a [`LogCursor`]) captured right before the
//! send and later reads everything appended since. A missing or unreadable file
//! is reported as degraded observation, never as an error.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

/// A byte position in the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    pub offset: u64,
}

/// Lines read from the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailRead {
    /// At most `max_lines` most recent lines, oldest first.
    pub lines: Vec<String>,

    /// True when the file could not be read at all.
    pub missing: bool,
}

/// Reader for the tail of one log file.
#[derive(Debug, Clone)]
pub struct LogTail {
    path: PathBuf,
    max_lines: usize,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            path: path.into(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Captures the current end of the file.
    ///
    /// A missing file yields offset zero, so a log created later is read from
    /// its start.
    pub fn cursor(&self) -> LogCursor {
        let offset = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        trace!(path = %self.path.display(), offset, "captured log cursor");
        LogCursor { offset }
    }

    /// Reads the lines appended after `cursor`.
    ///
    /// If the file shrank below the cursor (rotation or truncation) it is read
    /// from the beginning.
    pub fn read_since(&self, cursor: &LogCursor) -> TailRead {
        match self.read_from(cursor.offset) {
            Ok(lines) => TailRead {
                lines,
                missing: false,
            },
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "log file unavailable");
                TailRead {
                    lines: Vec::new(),
                    missing: true,
                }
            }
        }
    }

    /// Reads the last `max_lines` lines of the whole file.
    pub fn read_tail(&self) -> TailRead {
        self.read_since(&LogCursor::default())
    }

    fn read_from(&self, offset: u64) -> io::Result<Vec<String>> {
        let mut file = std::fs::File::open(&self.path)?;
        let len = file.metadata()?.len();
        let start = if len < offset {
            debug!(path = %self.path.display(), len, offset, "log file shrank, rereading from start");
            0
        } else {
            offset
        };

        file.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let skip = lines.len().saturating_sub(self.max_lines);
        Ok(lines[skip..].iter().map(|l| (*l).to_string()).collect())
    }
}
