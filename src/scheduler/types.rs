//! Scheduler type definitions
//!
//! Time, CPU, priority and parameter types shared by every part of the
//! scheduler subsystem.

use core::fmt;

use super::config::MAX_CPUS;
use super::fixed::Fixed;

/// Monotonic time in nanoseconds.
pub type SchedTime = i64;

/// Signed duration in nanoseconds.
pub type SchedDuration = i64;

/// Time value meaning "never".
pub const SCHED_TIME_INFINITE: SchedTime = i64::MAX;

/// Relative share of a fair thread, value / 65536.
pub type SchedWeight = Fixed<16>;

/// Fraction of a CPU requested by a deadline thread.
pub type SchedUtilization = Fixed<20>;

/// Fraction of the last time slice that was left when a thread was preempted.
pub type SchedRemainder = Fixed<20>;

/// Relative CPU capacity in (0, 1].
pub type SchedPerformanceScale = Fixed<20>;

/// Address space identifier handed to the context switch collaborator.
pub type AspaceId = u64;

// ============================================================================
// CPU numbering
// ============================================================================

/// Logical CPU number.
pub type CpuNum = usize;

/// Sentinel for "no CPU".
pub const INVALID_CPU: CpuNum = usize::MAX;

/// Bitmap of logical CPUs, bit N = CPU N.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CpuMask(u32);

impl CpuMask {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask containing only `cpu`. An invalid CPU yields an empty mask.
    #[inline]
    pub const fn of(cpu: CpuNum) -> Self {
        if cpu < MAX_CPUS {
            Self(1 << cpu)
        } else {
            Self(0)
        }
    }

    /// Mask of CPUs `0..count`.
    pub const fn first(count: usize) -> Self {
        if count >= MAX_CPUS {
            Self(u32::MAX)
        } else {
            Self((1u32 << count) - 1)
        }
    }

    #[inline]
    pub const fn contains(self, cpu: CpuNum) -> bool {
        cpu < MAX_CPUS && self.0 & (1 << cpu) != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, cpu: CpuNum) {
        self.0 |= Self::of(cpu).0;
    }

    pub fn remove(&mut self, cpu: CpuNum) {
        self.0 &= !Self::of(cpu).0;
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest numbered CPU in the mask.
    pub const fn lowest(self) -> Option<CpuNum> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as CpuNum)
        }
    }

    pub fn iter(self) -> impl Iterator<Item = CpuNum> {
        (0..MAX_CPUS).filter(move |&cpu| self.contains(cpu))
    }
}

impl core::ops::BitAnd for CpuMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl core::ops::BitOr for CpuMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for CpuMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAndAssign for CpuMask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl core::ops::Not for CpuMask {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuMask({:#x})", self.0)
    }
}

// ============================================================================
// Threads
// ============================================================================

/// Stable thread identifier, an index into the thread arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u32);

impl Tid {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread lifecycle state as seen by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    Initial,
    Ready,
    Running,
    Suspended,
    Blocked,
    BlockedReadLock,
    Sleeping,
    Death,
}

impl ThreadState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ThreadState::Initial => "initial",
            ThreadState::Ready => "ready",
            ThreadState::Running => "running",
            ThreadState::Suspended => "suspended",
            ThreadState::Blocked => "blocked",
            ThreadState::BlockedReadLock => "blocked_read_lock",
            ThreadState::Sleeping => "sleeping",
            ThreadState::Death => "death",
        }
    }

    /// States a thread may be unblocked from.
    pub const fn is_blocked(self) -> bool {
        matches!(
            self,
            ThreadState::Initial
                | ThreadState::Suspended
                | ThreadState::Blocked
                | ThreadState::BlockedReadLock
                | ThreadState::Sleeping
        )
    }
}

/// Why the current thread stops running in `block()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockReason {
    Blocked,
    BlockedReadLock,
    Sleeping,
    Suspended,
}

impl From<BlockReason> for ThreadState {
    fn from(reason: BlockReason) -> Self {
        match reason {
            BlockReason::Blocked => ThreadState::Blocked,
            BlockReason::BlockedReadLock => ThreadState::BlockedReadLock,
            BlockReason::Sleeping => ThreadState::Sleeping,
            BlockReason::Suspended => ThreadState::Suspended,
        }
    }
}

// ============================================================================
// Disciplines and parameters
// ============================================================================

/// Scheduling discipline of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    Fair,
    Deadline,
}

impl Discipline {
    pub const fn as_str(self) -> &'static str {
        match self {
            Discipline::Fair => "fair",
            Discipline::Deadline => "deadline",
        }
    }
}

/// Parameters of a deadline thread: `capacity` of CPU time within
/// `deadline` of every arrival, arrivals `period` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeadlineParams {
    pub capacity_ns: SchedDuration,
    pub deadline_ns: SchedDuration,
    pub period_ns: SchedDuration,
    pub utilization: SchedUtilization,
}

impl DeadlineParams {
    /// Validate and build deadline parameters.
    pub fn new(
        capacity_ns: SchedDuration,
        deadline_ns: SchedDuration,
        period_ns: SchedDuration,
    ) -> Result<Self, &'static str> {
        if capacity_ns <= 0 {
            return Err("deadline capacity must be positive");
        }
        if capacity_ns > deadline_ns {
            return Err("deadline capacity exceeds relative deadline");
        }
        if deadline_ns > period_ns {
            return Err("relative deadline exceeds period");
        }
        Ok(Self {
            capacity_ns,
            deadline_ns,
            period_ns,
            utilization: SchedUtilization::from_ratio(capacity_ns, period_ns),
        })
    }
}

/// Initial discipline requested at thread creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedParams {
    Fair { priority: i32 },
    Deadline(DeadlineParams),
}

/// How a thread enters a run queue. Controls whether its virtual timeline
/// is reset or kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Newly runnable: fresh start time and time slice.
    Insertion,
    /// Preempted with time left: keep the start time and the remainder.
    Preemption,
    /// Parameters changed while queued: keep timeline and remainder.
    Adjustment,
    /// Accounted to the CPU but not queued (about to run there).
    Association,
}

/// Stage passed to a thread's migrate function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrateStage {
    /// Called on the origin CPU before the thread leaves it.
    Before,
    /// Called on the destination CPU before the thread first runs there.
    After,
    /// Called when the thread exits.
    Exiting,
}

/// Whether a blocked thread's priority change should propagate through the
/// owner chain of the wait queue it is blocked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropagatePi {
    No,
    Yes,
}
