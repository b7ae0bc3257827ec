// Integration tests running the full pipeline: producer thread, bounded channel,
// dispatcher with per-task workers, and the results log.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskpipe::pipeline::{Pipeline, PipelineConfig, PipelineError};
use taskpipe::sched::{SchedAttr, SchedBackend, SchedulingError, SchedulingReservation};
use taskpipe::worker::{EncodeError, EncodeOptions, Encoder};

/// Scheduler backend that grants every reservation without touching the OS.
#[derive(Default)]
struct GrantingSched {
    applied: Mutex<Option<SchedAttr>>,
}

impl SchedBackend for GrantingSched {
    fn set_attr(&self, attr: &SchedAttr) -> Result<(), i32> {
        *self.applied.lock() = Some(*attr);
        Ok(())
    }

    fn get_attr(&self) -> Result<SchedAttr, i32> {
        (*self.applied.lock()).ok_or(libc::ESRCH)
    }
}

/// Encoder counting the frames it was handed.
#[derive(Default)]
struct CountingEncoder {
    frames: AtomicUsize,
}

impl Encoder for CountingEncoder {
    fn encode(
        &self,
        payload: &[u8],
        width: u32,
        height: u32,
        _options: &EncodeOptions,
    ) -> Result<(), EncodeError> {
        assert_eq!(payload.len(), (width * height * 3) as usize);
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(scenario: &str, samples: u64, results_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        sample_count: Some(samples),
        scenario: scenario.to_string(),
        results_dir: results_dir.to_path_buf(),
        ..PipelineConfig::default()
    }
}

#[test]
fn full_run_measures_every_emitted_task() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = Arc::new(CountingEncoder::default());
    let pipeline = Pipeline::new(config("full-run", 5, dir.path()))
        .unwrap()
        .with_sched_backend(Arc::new(GrantingSched::default()))
        .with_encoder(encoder.clone());

    let report = pipeline.run().unwrap();

    assert_eq!(report.sent, 5);
    assert_eq!(report.samples.len(), 5);
    // Samples arrive in send order with consecutive producer-assigned ids.
    let base = report.samples[0].task_id;
    for (offset, sample) in report.samples.iter().enumerate() {
        assert_eq!(sample.task_id, base + offset as i32);
    }
    // Every task went through a worker exactly once.
    assert_eq!(encoder.frames.load(Ordering::SeqCst), 5);

    let contents = std::fs::read_to_string(&report.results_path).unwrap();
    assert_eq!(contents.lines().count(), 5);
    for (line, sample) in contents.lines().zip(&report.samples) {
        let mut fields = line.split_whitespace();
        let id: i32 = fields.next().unwrap().parse().unwrap();
        let latency: f64 = fields.next().unwrap().parse().unwrap();
        assert_eq!(id, sample.task_id);
        assert!((latency - sample.latency_secs).abs() < 1e-9);
    }
}

#[test]
fn round_robin_policy_runs_the_same_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("rr-run", 3, dir.path());
    config.reservation = SchedulingReservation::FixedPriorityRoundRobin { priority: None };

    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_sched_backend(Arc::new(GrantingSched::default()));

    let report = pipeline.run().unwrap();
    assert_eq!(report.sent, 3);
    assert_eq!(report.samples.len(), 3);
}

#[test]
fn invalid_reservation_aborts_with_zero_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config("invalid-run", 5, dir.path());
    // runtime=10ms, deadline=5ms, period=30ms violates runtime <= deadline <= period.
    config.reservation = SchedulingReservation::Deadline {
        runtime: Duration::from_millis(10),
        deadline: Duration::from_millis(5),
        period: Duration::from_millis(30),
    };

    let encoder = Arc::new(CountingEncoder::default());
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_sched_backend(Arc::new(GrantingSched::default()))
        .with_encoder(encoder.clone());

    let err = pipeline.run().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Scheduling(SchedulingError::InvalidReservation(_))
    ));
    // Zero tasks were ever sent or dispatched.
    assert_eq!(encoder.frames.load(Ordering::SeqCst), 0);
    let contents = std::fs::read_to_string(dir.path().join("invalid-run.log")).unwrap();
    assert_eq!(contents.lines().count(), 0);
}

#[test]
fn slow_dispatcher_throttles_the_producer_through_backpressure() {
    struct SlowEncoder;

    impl Encoder for SlowEncoder {
        fn encode(
            &self,
            _payload: &[u8],
            _width: u32,
            _height: u32,
            _options: &EncodeOptions,
        ) -> Result<(), EncodeError> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = config("throttled", 30, dir.path());
    config.capacity = 2;

    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_sched_backend(Arc::new(GrantingSched::default()))
        .with_encoder(Arc::new(SlowEncoder));

    // With capacity 2 the producer can never run ahead; the run still
    // completes its full budget.
    let report = pipeline.run().unwrap();
    assert_eq!(report.sent, 30);
    assert_eq!(report.samples.len(), 30);
}
