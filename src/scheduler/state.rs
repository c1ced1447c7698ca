//! Per-thread scheduler state
//!
//! Everything the scheduler tracks about a thread: discipline parameters,
//! position on the virtual timeline, CPU placement, affinity and the
//! run-queue tree links. One `SchedulerState` is embedded in every
//! `Thread` record of the thread arena.

use bitflags::bitflags;

use super::priority::{priority_to_weight, HIGHEST_PRIORITY};
use super::types::{
    CpuMask, CpuNum, DeadlineParams, Discipline, SchedDuration, SchedParams, SchedRemainder,
    SchedTime, SchedWeight, Tid, INVALID_CPU,
};

bitflags! {
    /// Queue membership of a thread.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct QueueFlags: u8 {
        /// Accounted in some CPU's aggregates (between insert and remove).
        const ACTIVE = 1 << 0;
        /// Linked into a run-queue tree.
        const IN_QUEUE = 1 << 1;
    }
}

/// Links of a node in an eligibility tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeLinks {
    pub left: Option<Tid>,
    pub right: Option<Tid>,
    pub height: u8,
    /// Minimum finish time over this node's subtree.
    pub min_finish_time: SchedTime,
}

impl TreeLinks {
    pub const fn new() -> Self {
        Self {
            left: None,
            right: None,
            height: 0,
            min_finish_time: 0,
        }
    }
}

impl Default for TreeLinks {
    fn default() -> Self {
        Self::new()
    }
}

/// Discipline-specific parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisciplineState {
    Fair {
        weight: SchedWeight,
        /// Time slice computed at the last dispatch.
        initial_time_slice_ns: SchedDuration,
        /// Fraction of the slice left when last preempted.
        normalized_timeslice_remainder: SchedRemainder,
    },
    Deadline(DeadlineParams),
}

/// Scheduler bookkeeping for one thread.
#[derive(Clone, Debug)]
pub struct SchedulerState {
    pub(crate) discipline: DisciplineState,

    // Priority bookkeeping
    pub(crate) base_priority: i32,
    pub(crate) inherited_priority: i32,
    pub(crate) effective_priority: i32,

    // Virtual timeline
    pub(crate) start_time: SchedTime,
    pub(crate) finish_time: SchedTime,
    pub(crate) time_slice_ns: SchedDuration,
    pub(crate) generation: u64,
    pub(crate) flow_id: u64,

    // Placement
    pub(crate) curr_cpu: CpuNum,
    pub(crate) last_cpu: CpuNum,
    pub(crate) next_cpu: CpuNum,
    pub(crate) hard_affinity: CpuMask,
    pub(crate) soft_affinity: CpuMask,

    // Accounting
    pub(crate) last_started_running: SchedTime,
    pub(crate) expected_runtime_ns: SchedDuration,
    /// Runtime accumulated since the expected runtime was last updated.
    pub(crate) banked_runtime_ns: SchedDuration,
    pub(crate) runtime_ns: SchedDuration,

    pub(crate) flags: QueueFlags,
    pub(crate) links: TreeLinks,
}

impl SchedulerState {
    pub fn new(params: SchedParams) -> Self {
        let (discipline, priority, expected_runtime_ns) = match params {
            SchedParams::Fair { priority } => (
                DisciplineState::Fair {
                    weight: priority_to_weight(priority),
                    initial_time_slice_ns: 0,
                    normalized_timeslice_remainder: SchedRemainder::ONE,
                },
                priority,
                0,
            ),
            SchedParams::Deadline(params) => (
                DisciplineState::Deadline(params),
                HIGHEST_PRIORITY,
                params.capacity_ns,
            ),
        };
        Self {
            discipline,
            base_priority: priority,
            inherited_priority: -1,
            effective_priority: priority,
            start_time: 0,
            finish_time: 0,
            time_slice_ns: 0,
            generation: 0,
            flow_id: 0,
            curr_cpu: INVALID_CPU,
            last_cpu: INVALID_CPU,
            next_cpu: INVALID_CPU,
            hard_affinity: CpuMask::ALL,
            soft_affinity: CpuMask::ALL,
            last_started_running: 0,
            expected_runtime_ns,
            banked_runtime_ns: 0,
            runtime_ns: 0,
            flags: QueueFlags::empty(),
            links: TreeLinks::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn discipline(&self) -> Discipline {
        match self.discipline {
            DisciplineState::Fair { .. } => Discipline::Fair,
            DisciplineState::Deadline(_) => Discipline::Deadline,
        }
    }

    #[inline]
    pub fn is_fair(&self) -> bool {
        matches!(self.discipline, DisciplineState::Fair { .. })
    }

    #[inline]
    pub fn is_deadline(&self) -> bool {
        matches!(self.discipline, DisciplineState::Deadline(_))
    }

    /// Fair weight. Deadline threads report zero.
    pub fn weight(&self) -> SchedWeight {
        match self.discipline {
            DisciplineState::Fair { weight, .. } => weight,
            DisciplineState::Deadline(_) => SchedWeight::ZERO,
        }
    }

    pub fn deadline_params(&self) -> Option<DeadlineParams> {
        match self.discipline {
            DisciplineState::Deadline(params) => Some(params),
            DisciplineState::Fair { .. } => None,
        }
    }

    pub fn initial_time_slice_ns(&self) -> SchedDuration {
        match self.discipline {
            DisciplineState::Fair {
                initial_time_slice_ns,
                ..
            } => initial_time_slice_ns,
            DisciplineState::Deadline(_) => 0,
        }
    }

    pub fn normalized_timeslice_remainder(&self) -> SchedRemainder {
        match self.discipline {
            DisciplineState::Fair {
                normalized_timeslice_remainder,
                ..
            } => normalized_timeslice_remainder,
            DisciplineState::Deadline(_) => SchedRemainder::ZERO,
        }
    }

    pub(crate) fn set_initial_time_slice(&mut self, value: SchedDuration) {
        if let DisciplineState::Fair {
            initial_time_slice_ns,
            ..
        } = &mut self.discipline
        {
            *initial_time_slice_ns = value;
        }
    }

    pub(crate) fn set_timeslice_remainder(&mut self, value: SchedRemainder) {
        if let DisciplineState::Fair {
            normalized_timeslice_remainder,
            ..
        } = &mut self.discipline
        {
            *normalized_timeslice_remainder = value;
        }
    }

    /// Switch to (or stay in) the fair discipline with `weight`. A thread
    /// leaving the deadline discipline starts with a fresh slice.
    pub(crate) fn set_fair_weight(&mut self, new_weight: SchedWeight) {
        match &mut self.discipline {
            DisciplineState::Fair { weight, .. } => *weight = new_weight,
            DisciplineState::Deadline(_) => {
                self.discipline = DisciplineState::Fair {
                    weight: new_weight,
                    initial_time_slice_ns: 0,
                    normalized_timeslice_remainder: SchedRemainder::ONE,
                };
            }
        }
    }

    pub(crate) fn set_deadline_params(&mut self, params: DeadlineParams) {
        self.discipline = DisciplineState::Deadline(params);
    }

    pub fn start_time(&self) -> SchedTime {
        self.start_time
    }

    pub fn finish_time(&self) -> SchedTime {
        self.finish_time
    }

    pub fn time_slice_ns(&self) -> SchedDuration {
        self.time_slice_ns
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn flow_id(&self) -> u64 {
        self.flow_id
    }

    pub fn curr_cpu(&self) -> CpuNum {
        self.curr_cpu
    }

    pub fn last_cpu(&self) -> CpuNum {
        self.last_cpu
    }

    pub fn next_cpu(&self) -> CpuNum {
        self.next_cpu
    }

    pub fn hard_affinity(&self) -> CpuMask {
        self.hard_affinity
    }

    pub fn soft_affinity(&self) -> CpuMask {
        self.soft_affinity
    }

    pub fn base_priority(&self) -> i32 {
        self.base_priority
    }

    pub fn inherited_priority(&self) -> i32 {
        self.inherited_priority
    }

    pub fn effective_priority(&self) -> i32 {
        self.effective_priority
    }

    pub fn expected_runtime_ns(&self) -> SchedDuration {
        self.expected_runtime_ns
    }

    pub fn runtime_ns(&self) -> SchedDuration {
        self.runtime_ns
    }

    /// Accounted to some CPU.
    #[inline]
    pub fn active(&self) -> bool {
        self.flags.contains(QueueFlags::ACTIVE)
    }

    /// Linked into a run queue.
    #[inline]
    pub fn in_queue(&self) -> bool {
        self.flags.contains(QueueFlags::IN_QUEUE)
    }

    pub fn set_hard_affinity(&mut self, mask: CpuMask) {
        self.hard_affinity = mask;
    }

    pub fn set_soft_affinity(&mut self, mask: CpuMask) {
        self.soft_affinity = mask;
    }

    /// CPUs this thread may run on given the active set. Soft affinity is
    /// honored when it leaves at least one CPU, otherwise ignored.
    pub fn effective_cpu_mask(&self, active_mask: CpuMask) -> CpuMask {
        let available = active_mask & self.soft_affinity & self.hard_affinity;
        if available.is_empty() {
            active_mask & self.hard_affinity
        } else {
            available
        }
    }

    // ========================================================================
    // Aggregate transitions
    // ========================================================================

    /// Mark the thread accounted to a CPU. Returns false if it already was.
    pub(crate) fn on_insert(&mut self) -> bool {
        let transition = !self.active();
        self.flags.insert(QueueFlags::ACTIVE);
        transition
    }

    /// Mark the thread no longer accounted. Returns false if it was not.
    pub(crate) fn on_remove(&mut self) -> bool {
        let transition = self.active();
        self.flags.remove(QueueFlags::ACTIVE);
        transition
    }

    /// Tree ordering key. The thread id breaks ties between equal
    /// (start, generation) pairs.
    #[inline]
    pub(crate) fn key(&self, tid: Tid) -> (SchedTime, u64, Tid) {
        (self.start_time, self.generation, tid)
    }
}
