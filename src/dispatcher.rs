//! Task-dispatching side of the pipeline.
//!
//! The dispatcher loops on the channel: stamp the receive time, record the latency
//! sample, then hand the task to a freshly spawned worker thread so the next receive
//! is never blocked by encoding. Workers may finish out of order; the sample was
//! already captured at receive time, so completion order does not matter. The loop
//! ends on end-of-stream or when the sample limit is reached, leaving any further
//! messages pending in the channel.

use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::channel::{ChannelError, ReadHandle};
use crate::recorder::{LatencyRecorder, LatencySample};
use crate::task::{epoch_nanos, Task};
use crate::worker::{self, EncodeOptions, Encoder, ImageGeometry};

pub struct TaskDispatcher {
    geometry: ImageGeometry,
    options: EncodeOptions,
    encoder: Arc<dyn Encoder>,
    recorder: Arc<LatencyRecorder>,
}

impl TaskDispatcher {
    pub fn new(
        geometry: ImageGeometry,
        options: EncodeOptions,
        encoder: Arc<dyn Encoder>,
        recorder: Arc<LatencyRecorder>,
    ) -> Self {
        Self {
            geometry,
            options,
            encoder,
            recorder,
        }
    }

    /// Receive and dispatch up to `sample_limit` tasks (unbounded when `None`).
    ///
    /// Returns the recorded samples in arrival order, which matches producer
    /// send order because the channel is FIFO. All spawned workers are joined
    /// before returning. A negative latency (cross-process clock skew) is
    /// recorded as-is, never clamped or dropped.
    pub fn run(
        &self,
        channel: &ReadHandle,
        sample_limit: Option<u64>,
    ) -> Vec<LatencySample> {
        let mut samples = Vec::new();
        let mut workers = Vec::new();

        while sample_limit.map_or(true, |limit| (samples.len() as u64) < limit) {
            let record = match channel.receive() {
                Ok(record) => record,
                Err(ChannelError::EndOfStream) => {
                    debug!(source = "dispatcher", "end of stream");
                    break;
                }
                Err(err) => {
                    warn!(source = "dispatcher", %err, "receive failed, retrying");
                    continue;
                }
            };
            let receive_time_ns = epoch_nanos();

            let task = match Task::decode(&record) {
                Ok(task) => task,
                Err(err) => {
                    warn!(source = "dispatcher", %err, "undecodable record dropped");
                    continue;
                }
            };

            let sample = LatencySample {
                task_id: task.id,
                latency_secs: (receive_time_ns - task.send_time_ns) as f64 / 1e9,
            };
            debug!(
                source = "dispatcher",
                task_id = task.id,
                latency_secs = sample.latency_secs,
                "task received"
            );
            if let Err(err) = self.recorder.record(&sample) {
                warn!(source = "dispatcher", task_id = task.id, %err, "sample not persisted");
            }
            samples.push(sample);

            workers.push(self.spawn_worker(task));
        }

        for handle in workers {
            if handle.join().is_err() {
                warn!(source = "dispatcher", "worker panicked");
            }
        }
        samples
    }

    /// Dispatch one task to its own worker thread; encode failures stay local
    /// to that worker.
    fn spawn_worker(&self, task: Task) -> thread::JoinHandle<()> {
        let geometry = self.geometry;
        let options = self.options;
        let encoder = Arc::clone(&self.encoder);
        thread::spawn(move || {
            if let Err(err) = worker::process(&task, &geometry, &options, encoder.as_ref()) {
                warn!(source = "worker", task_id = task.id, %err, "encode failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Namespace, SendMode};
    use crate::task::{PAYLOAD_SIZE, WIRE_SIZE};
    use crate::worker::{EncodeError, NullEncoder};
    use parking_lot::Mutex;

    fn dispatcher_with(encoder: Arc<dyn Encoder>) -> (TaskDispatcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let recorder =
            Arc::new(LatencyRecorder::create(dir.path().join("samples.log")).unwrap());
        let dispatcher = TaskDispatcher::new(
            ImageGeometry::default(),
            EncodeOptions::default(),
            encoder,
            recorder,
        );
        (dispatcher, dir)
    }

    fn send_task(writer: &crate::channel::WriteHandle, id: i32, send_time_ns: i64) {
        let task = Task {
            id,
            send_time_ns,
            max_interval: 30,
            payload: vec![0u8; PAYLOAD_SIZE],
        };
        writer
            .send(&task.encode().unwrap(), SendMode::Blocking)
            .unwrap();
    }

    #[test]
    fn negative_latency_is_preserved() {
        let ns = Namespace::new();
        let writer = ns.open_writer("/skew", 4, WIRE_SIZE, true).unwrap();
        let reader = ns.open_reader("/skew", 4, WIRE_SIZE, false).unwrap();

        // A send stamp one hour in the future, as a skewed peer clock would produce.
        send_task(&writer, 7, epoch_nanos() + 3_600_000_000_000);
        drop(writer);

        let (dispatcher, _dir) = dispatcher_with(Arc::new(NullEncoder));
        let samples = dispatcher.run(&reader, None);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].task_id, 7);
        assert!(samples[0].latency_secs < 0.0);
    }

    #[test]
    fn undecodable_record_is_skipped_without_a_sample() {
        let ns = Namespace::new();
        let writer = ns.open_writer("/garbled", 4, WIRE_SIZE, true).unwrap();
        let reader = ns.open_reader("/garbled", 4, WIRE_SIZE, false).unwrap();

        writer.send(&[0xff; WIRE_SIZE], SendMode::Blocking).unwrap();
        send_task(&writer, 1, epoch_nanos());
        drop(writer);

        let (dispatcher, _dir) = dispatcher_with(Arc::new(NullEncoder));
        let samples = dispatcher.run(&reader, None);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].task_id, 1);
    }

    #[test]
    fn one_failing_worker_does_not_stop_the_loop() {
        struct FailOnTask3 {
            seen: Mutex<Vec<i32>>,
        }

        impl Encoder for FailOnTask3 {
            fn encode(
                &self,
                payload: &[u8],
                _width: u32,
                _height: u32,
                _options: &EncodeOptions,
            ) -> Result<(), EncodeError> {
                // Task id is smuggled in the first payload byte by the test sender.
                self.seen.lock().push(i32::from(payload[0]));
                if payload[0] == 3 {
                    Err(EncodeError::Codec("boom".into()))
                } else {
                    Ok(())
                }
            }
        }

        let ns = Namespace::new();
        let writer = ns.open_writer("/isolated", 8, WIRE_SIZE, true).unwrap();
        let reader = ns.open_reader("/isolated", 8, WIRE_SIZE, false).unwrap();

        for id in 0..5i32 {
            let mut payload = vec![0u8; PAYLOAD_SIZE];
            payload[0] = id as u8;
            let task = Task {
                id,
                send_time_ns: epoch_nanos(),
                max_interval: 30,
                payload,
            };
            writer
                .send(&task.encode().unwrap(), SendMode::Blocking)
                .unwrap();
        }
        drop(writer);

        let encoder = Arc::new(FailOnTask3 {
            seen: Mutex::new(Vec::new()),
        });
        let (dispatcher, _dir) = dispatcher_with(encoder.clone());
        let samples = dispatcher.run(&reader, None);

        assert_eq!(samples.len(), 5);
        let mut seen = encoder.seen.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
