//! Append-only record of the output chunks of the current run

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ordered output chunks of one run.
///
/// Appends and snapshots take the same lock, so a snapshot never observes a
/// partially appended chunk. Rendering paths hold a [`LogReader`] instead of
/// the log itself and cannot mutate it.
#[derive(Debug, Default)]
pub struct OutputLog {
    chunks: Arc<RwLock<Vec<String>>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: impl Into<String>) {
        write(&self.chunks).push(chunk.into());
    }

    pub fn clear(&self) {
        write(&self.chunks).clear();
    }

    pub fn snapshot(&self) -> Vec<String> {
        read(&self.chunks).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.chunks).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.chunks).is_empty()
    }

    /// The log as displayed: every chunk followed by a line separator.
    pub fn render(&self) -> String {
        render(&read(&self.chunks))
    }

    /// Read-only handle sharing this log
    pub fn reader(&self) -> LogReader {
        LogReader {
            chunks: Arc::clone(&self.chunks),
        }
    }
}

/// Read-only view of an [`OutputLog`]
#[derive(Debug, Clone)]
pub struct LogReader {
    chunks: Arc<RwLock<Vec<String>>>,
}

impl LogReader {
    pub fn snapshot(&self) -> Vec<String> {
        read(&self.chunks).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.chunks).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.chunks).is_empty()
    }

    /// Chunks from index `from` onwards, for incremental rendering
    pub fn since(&self, from: usize) -> Vec<String> {
        read(&self.chunks).iter().skip(from).cloned().collect()
    }

    pub fn render(&self) -> String {
        render(&read(&self.chunks))
    }
}

// A panic while holding the lock cannot leave a half-pushed String behind,
// so a poisoned log is still consistent.
fn read(lock: &RwLock<Vec<String>>) -> RwLockReadGuard<'_, Vec<String>> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(lock: &RwLock<Vec<String>>) -> RwLockWriteGuard<'_, Vec<String>> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn render(chunks: &[String]) -> String {
    let mut out = String::with_capacity(chunks.iter().map(|c| c.len() + 1).sum());
    for chunk in chunks {
        out.push_str(chunk);
        out.push('\n');
    }
    out
}
