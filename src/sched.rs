//! Real-time CPU reservation for the producing side.
//!
//! [`SchedulingController`] validates a [`SchedulingReservation`] and applies it to the
//! calling process with exactly one `sched_setattr` call. It never schedules in user
//! space; a rejected reservation is fatal to the caller by contract. The raw syscall
//! sits behind [`SchedBackend`] so tests can assert on the exact attributes issued
//! (or that none were issued at all).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Kernel policy codes as fixed by the Linux scheduler ABI.
pub const SCHED_NORMAL: u32 = 0;
pub const SCHED_FIFO: u32 = 1;
pub const SCHED_RR: u32 = 2;
pub const SCHED_DEADLINE: u32 = 6;

/// Lowest valid priority for the round-robin class; used when the caller
/// leaves the priority unspecified.
pub const MIN_RR_PRIORITY: u32 = 1;

/// Requested CPU-time contract for one process, created once at startup and
/// applied exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingReservation {
    /// EDF-style reservation: `runtime` of guaranteed CPU time per `period`,
    /// completed no later than `deadline` within that period.
    Deadline {
        runtime: Duration,
        deadline: Duration,
        period: Duration,
    },
    /// Fixed-priority round-robin; `None` asks for the scheduler minimum.
    FixedPriorityRoundRobin { priority: Option<u32> },
}

impl SchedulingReservation {
    /// Latency the reservation implies for one task, as a millisecond SLA hint
    /// carried on the wire. Zero when the policy has no deadline.
    pub fn max_interval_ms(&self) -> i32 {
        match self {
            SchedulingReservation::Deadline { deadline, .. } => deadline.as_millis() as i32,
            SchedulingReservation::FixedPriorityRoundRobin { .. } => 0,
        }
    }
}

/// Mirror of the kernel's `struct sched_attr` passed to `sched_setattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct SchedAttr {
    pub size: u32,
    pub sched_policy: u32,
    pub sched_flags: u64,
    pub sched_nice: i32,
    pub sched_priority: u32,
    pub sched_runtime: u64,
    pub sched_deadline: u64,
    pub sched_period: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulingError {
    /// The reservation violates its numeric invariants; no OS call was made.
    #[error("invalid reservation: {0}")]
    InvalidReservation(String),
    /// The OS scheduler refused the reservation (privilege, policy support,
    /// admission control).
    #[error("scheduler rejected reservation (errno {0})")]
    Rejected(i32),
}

/// Raw scheduler access, one call per operation. Errors carry the OS errno.
pub trait SchedBackend: Send + Sync {
    fn set_attr(&self, attr: &SchedAttr) -> Result<(), i32>;
    fn get_attr(&self) -> Result<SchedAttr, i32>;
}

/// Backend issuing the real `sched_setattr`/`sched_getattr` syscalls for the
/// calling process. Only functional on Linux; elsewhere every call reports
/// `ENOSYS` so the caller's fatal-rejection policy still applies.
#[derive(Debug, Default)]
pub struct OsSched;

impl SchedBackend for OsSched {
    #[cfg(target_os = "linux")]
    fn set_attr(&self, attr: &SchedAttr) -> Result<(), i32> {
        let ret = unsafe {
            libc::syscall(libc::SYS_sched_setattr, 0, attr as *const SchedAttr, 0u32)
        };
        if ret < 0 {
            Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
        } else {
            Ok(())
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn set_attr(&self, _attr: &SchedAttr) -> Result<(), i32> {
        Err(libc::ENOSYS)
    }

    #[cfg(target_os = "linux")]
    fn get_attr(&self) -> Result<SchedAttr, i32> {
        let mut attr = SchedAttr::default();
        let ret = unsafe {
            libc::syscall(
                libc::SYS_sched_getattr,
                0,
                &mut attr as *mut SchedAttr,
                std::mem::size_of::<SchedAttr>() as u32,
                0u32,
            )
        };
        if ret < 0 {
            Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
        } else {
            Ok(attr)
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn get_attr(&self) -> Result<SchedAttr, i32> {
        Err(libc::ENOSYS)
    }
}

/// Yield the remainder of the current scheduling quantum back to the OS.
///
/// The producer calls this between task emissions so the configured cadence is
/// respected instead of busy-looping through the reservation.
pub fn yield_quantum() {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::sched_yield();
    }
    #[cfg(not(target_os = "linux"))]
    std::thread::yield_now();
}

/// Applies a reservation to the calling process via one scheduler syscall.
#[derive(Clone)]
pub struct SchedulingController {
    backend: Arc<dyn SchedBackend>,
}

impl Default for SchedulingController {
    fn default() -> Self {
        Self::new(Arc::new(OsSched))
    }
}

impl SchedulingController {
    pub fn new(backend: Arc<dyn SchedBackend>) -> Self {
        Self { backend }
    }

    /// Validate the reservation and issue exactly one `sched_setattr` call.
    ///
    /// Deadline reservations must satisfy `runtime <= deadline <= period` with
    /// all three non-zero, or this fails with
    /// [`SchedulingError::InvalidReservation`] without touching OS state.
    pub fn apply(&self, reservation: &SchedulingReservation) -> Result<(), SchedulingError> {
        let attr = Self::to_attr(reservation)?;
        self.backend
            .set_attr(&attr)
            .map_err(SchedulingError::Rejected)
    }

    /// Read back the attributes currently in force for the calling process.
    pub fn current(&self) -> Result<SchedAttr, SchedulingError> {
        self.backend.get_attr().map_err(SchedulingError::Rejected)
    }

    fn to_attr(reservation: &SchedulingReservation) -> Result<SchedAttr, SchedulingError> {
        let mut attr = SchedAttr {
            size: std::mem::size_of::<SchedAttr>() as u32,
            ..SchedAttr::default()
        };
        match reservation {
            SchedulingReservation::Deadline {
                runtime,
                deadline,
                period,
            } => {
                if runtime.is_zero() {
                    return Err(SchedulingError::InvalidReservation(
                        "runtime must be non-zero".into(),
                    ));
                }
                if runtime > deadline || deadline > period {
                    return Err(SchedulingError::InvalidReservation(format!(
                        "runtime <= deadline <= period violated: {:?} / {:?} / {:?}",
                        runtime, deadline, period
                    )));
                }
                attr.sched_policy = SCHED_DEADLINE;
                attr.sched_runtime = runtime.as_nanos() as u64;
                attr.sched_deadline = deadline.as_nanos() as u64;
                attr.sched_period = period.as_nanos() as u64;
            }
            SchedulingReservation::FixedPriorityRoundRobin { priority } => {
                attr.sched_policy = SCHED_RR;
                attr.sched_priority = priority.unwrap_or(MIN_RR_PRIORITY);
            }
        }
        Ok(attr)
    }
}
