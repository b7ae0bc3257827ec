//! Pipeline orchestration.
//!
//! One configurable pipeline replaces the per-experiment variants: scheduling policy,
//! sample budget, channel capacity, and instrumentation are all configuration inputs.
//! The producing and dispatching sides run as independent execution contexts joined
//! only by the named bounded channel; the pipeline owns the channel's namespace entry
//! and unlinks it after both sides have terminated.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::channel::{ChannelError, Namespace};
use crate::dispatcher::TaskDispatcher;
use crate::producer::TaskProducer;
use crate::recorder::{LatencyRecorder, LatencySample};
use crate::sched::{
    OsSched, SchedBackend, SchedulingController, SchedulingError, SchedulingReservation,
};
use crate::task::WIRE_SIZE;
use crate::worker::{
    EncodeOptions, Encoder, GradientGenerator, ImageGeometry, NullEncoder, PayloadGenerator,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fatal by policy: the run terminates and the process exits non-zero.
    #[error("scheduling setup failed: {0}")]
    Scheduling(#[from] SchedulingError),
    #[error("channel setup failed: {0}")]
    Channel(#[from] ChannelError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("results log: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline thread panicked: {0}")]
    Internal(String),
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub reservation: SchedulingReservation,
    /// Tasks to emit and measure; `None` runs until the stop flag is raised.
    pub sample_count: Option<u64>,
    /// Channel capacity in undelivered messages.
    pub capacity: usize,
    pub geometry: ImageGeometry,
    pub encode_options: EncodeOptions,
    /// Names both the channel and the results file of this run.
    pub scenario: String,
    pub results_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // 10ms runtime / 30ms deadline / 30ms period reservation.
            reservation: SchedulingReservation::Deadline {
                runtime: Duration::from_millis(10),
                deadline: Duration::from_millis(30),
                period: Duration::from_millis(30),
            },
            sample_count: Some(100),
            capacity: 10,
            geometry: ImageGeometry::default(),
            encode_options: EncodeOptions::default(),
            scenario: "deadline".to_string(),
            results_dir: PathBuf::from("."),
        }
    }
}

/// Outcome of one completed run.
#[derive(Debug)]
pub struct RunReport {
    /// Tasks the producer pushed into the channel.
    pub sent: u64,
    /// Latency samples in dispatcher arrival order.
    pub samples: Vec<LatencySample>,
    /// Results log written for this run.
    pub results_path: PathBuf,
}

pub struct Pipeline {
    config: PipelineConfig,
    namespace: Arc<Namespace>,
    sched_backend: Arc<dyn SchedBackend>,
    generator: Arc<dyn PayloadGenerator>,
    encoder: Arc<dyn Encoder>,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    /// Build a pipeline with the default collaborators: OS scheduler backend,
    /// gradient frames, byte-swallowing encoder.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.geometry.validate().map_err(PipelineError::Config)?;
        Ok(Self {
            config,
            namespace: Namespace::new(),
            sched_backend: Arc::new(OsSched),
            generator: Arc::new(GradientGenerator),
            encoder: Arc::new(NullEncoder),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_sched_backend(mut self, backend: Arc<dyn SchedBackend>) -> Self {
        self.sched_backend = backend;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn PayloadGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Flag observed by the producer between iterations; raising it ends an
    /// unbounded run.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run producer and dispatcher to completion and return the measured run.
    ///
    /// The producing context runs on its own thread under the configured
    /// reservation; the dispatcher runs on the calling thread. A refused
    /// reservation surfaces as [`PipelineError::Scheduling`] after the
    /// dispatcher has drained the (empty) stream.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        // Pid-suffixed name: concurrent runs of the same scenario never collide.
        let channel_name = format!("/tasks-{}-{}", self.config.scenario, std::process::id());
        let writer =
            self.namespace
                .open_writer(&channel_name, self.config.capacity, WIRE_SIZE, true)?;
        let reader =
            self.namespace
                .open_reader(&channel_name, self.config.capacity, WIRE_SIZE, false)?;

        let results_path = self
            .config
            .results_dir
            .join(format!("{}.log", self.config.scenario));
        let recorder = Arc::new(LatencyRecorder::create(&results_path)?);

        info!(
            source = "main",
            scenario = %self.config.scenario,
            channel = %channel_name,
            samples = ?self.config.sample_count,
            "starting pipeline run"
        );

        let mut producer = TaskProducer::new(
            SchedulingController::new(Arc::clone(&self.sched_backend)),
            Arc::clone(&self.generator),
            self.config.geometry,
            Arc::clone(&self.stop),
        );
        let reservation = self.config.reservation.clone();
        let sample_count = self.config.sample_count;
        let producer_thread = thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || producer.run(writer, &reservation, sample_count))
            .map_err(PipelineError::Io)?;

        let dispatcher = TaskDispatcher::new(
            self.config.geometry,
            self.config.encode_options,
            Arc::clone(&self.encoder),
            Arc::clone(&recorder),
        );
        let samples = dispatcher.run(&reader, sample_count);

        // Dropping the read endpoint unblocks a producer stuck on a full
        // channel; it then observes Closed and finishes.
        drop(reader);
        let sent = producer_thread
            .join()
            .map_err(|_| PipelineError::Internal("producer thread panicked".to_string()))?;

        // Both endpoints are closed now; the creating side removes the name.
        self.namespace.unlink(&channel_name)?;

        let sent = sent?;
        info!(
            source = "main",
            sent,
            received = samples.len(),
            results = %results_path.display(),
            "pipeline run complete"
        );
        Ok(RunReport {
            sent,
            samples,
            results_path,
        })
    }
}
