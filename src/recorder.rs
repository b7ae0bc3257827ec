//! Append-only latency results log.
//!
//! One file per dispatcher run, one `<task_id> <latency_seconds>` line per received
//! task, in arrival order. The recorder never aggregates; raw samples only.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Elapsed time between a task's send stamp and its receive stamp, keyed by
/// task id. Negative under cross-process clock skew; recorded as-is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub task_id: i32,
    pub latency_secs: f64,
}

/// Line-level atomic appender for one run's samples.
///
/// Safe to call from the dispatcher and any number of concurrent workers; the
/// sink mutex guarantees a record is never interleaved with another.
pub struct LatencyRecorder {
    path: PathBuf,
    sink: Mutex<BufWriter<File>>,
}

impl LatencyRecorder {
    /// Create (truncating) the results file for one run.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            sink: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one sample as a whole line and flush it to the file.
    pub fn record(&self, sample: &LatencySample) -> io::Result<()> {
        let mut sink = self.sink.lock();
        writeln!(sink, "{} {:.9}", sample.task_id, sample.latency_secs)?;
        sink.flush()
    }
}
