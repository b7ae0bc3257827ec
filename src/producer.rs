//! Task-producing side of the pipeline.
//!
//! The producer acquires its CPU reservation once, then emits tasks on the cadence the
//! reservation grants: build a frame, stamp the send time, push the record into the
//! channel, and yield the rest of the quantum back to the OS scheduler. A refused
//! reservation is fatal; send failures are logged and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{ChannelError, SendMode, WriteHandle};
use crate::sched::{yield_quantum, SchedulingController, SchedulingError, SchedulingReservation};
use crate::task::{epoch_nanos, Task};
use crate::worker::{ImageGeometry, PayloadGenerator};

/// Producer lifecycle. `Error` is absorbing: once the reservation is refused
/// the producer never emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Unscheduled,
    Scheduled,
    Emitting,
    Done,
    Error,
}

pub struct TaskProducer {
    controller: SchedulingController,
    generator: Arc<dyn PayloadGenerator>,
    geometry: ImageGeometry,
    stop: Arc<AtomicBool>,
    state: ProducerState,
    /// Base for task ids, derived from the process id so ids stay unique
    /// across concurrent producers.
    id_base: i32,
}

impl TaskProducer {
    pub fn new(
        controller: SchedulingController,
        generator: Arc<dyn PayloadGenerator>,
        geometry: ImageGeometry,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            controller,
            generator,
            geometry,
            stop,
            state: ProducerState::Unscheduled,
            id_base: (std::process::id() as i32).wrapping_shl(16),
        }
    }

    /// Override the pid-derived id base (tests rely on predictable ids).
    pub fn with_id_base(mut self, id_base: i32) -> Self {
        self.id_base = id_base;
        self
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Emit up to `sample_count` tasks into the channel (unbounded when `None`,
    /// until the stop flag is raised).
    ///
    /// Consumes the write endpoint; dropping it on return closes the stream so
    /// the dispatcher terminates on end-of-stream. Returns the number of tasks
    /// actually sent.
    pub fn run(
        &mut self,
        channel: WriteHandle,
        reservation: &SchedulingReservation,
        sample_count: Option<u64>,
    ) -> Result<u64, SchedulingError> {
        if let Err(err) = self.controller.apply(reservation) {
            self.state = ProducerState::Error;
            warn!(source = "producer", %err, "reservation refused, not emitting");
            return Err(err);
        }
        self.state = ProducerState::Scheduled;
        if let Ok(attr) = self.controller.current() {
            debug!(
                source = "producer",
                policy = attr.sched_policy,
                runtime_ns = attr.sched_runtime,
                deadline_ns = attr.sched_deadline,
                period_ns = attr.sched_period,
                "reservation active"
            );
        }

        self.state = ProducerState::Emitting;
        let max_interval = reservation.max_interval_ms();
        let mut sent = 0u64;
        let mut iteration = 0u64;
        while sample_count.map_or(true, |count| iteration < count) {
            if self.stop.load(Ordering::Relaxed) {
                info!(source = "producer", sent, "stop signal, closing stream");
                break;
            }
            let id = self.id_base.wrapping_add(iteration as i32);
            let payload = self.generator.generate(&self.geometry);
            iteration += 1;

            // Stamp immediately before transmission.
            let task = Task {
                id,
                send_time_ns: epoch_nanos(),
                max_interval,
                payload,
            };
            let record = match task.encode() {
                Ok(record) => record,
                Err(err) => {
                    warn!(source = "producer", task_id = id, %err, "frame skipped");
                    continue;
                }
            };
            match channel.send(&record, SendMode::Blocking) {
                Ok(()) => {
                    sent += 1;
                    debug!(source = "producer", task_id = id, "task sent");
                }
                Err(ChannelError::Closed) => {
                    warn!(source = "producer", task_id = id, "peer closed, stopping early");
                    break;
                }
                Err(err) => {
                    warn!(source = "producer", task_id = id, %err, "send failed");
                }
            }

            // Hand the rest of the quantum back so the reservation sets the cadence.
            yield_quantum();
        }

        self.state = ProducerState::Done;
        info!(source = "producer", sent, "emission finished");
        Ok(sent)
    }
}
