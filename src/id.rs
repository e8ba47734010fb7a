use std::sync::Mutex;

use ulid::{Generator, Ulid};

/// Identifier used for data, changelog and manifest files and for sorted runs.
pub type FileId = Ulid;

/// Thread-safe ULID generator shared by everything one table handle writes.
pub struct FileIdGenerator {
    inner: Mutex<Generator>,
}

impl FileIdGenerator {
    /// Create a new generator seeded with the current time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next [`FileId`] in a monotonic, time-ordered sequence.
    ///
    /// Falls back to a fresh random ULID if the random component of the
    /// current millisecond overflows.
    pub fn generate(&self) -> FileId {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.generate().unwrap_or_else(|_| Ulid::new())
    }
}

impl Default for FileIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
