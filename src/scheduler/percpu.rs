//! Per-CPU Scheduler State and Run Queues
//!
//! Each CPU owns two eligibility trees (fair and deadline), a virtual
//! timeline for its fair threads and the aggregates other CPUs read when
//! placing or stealing work.
//!
//! ## Architecture
//!
//! Each CPU maintains:
//! - Fair and deadline run queues of READY threads
//! - Virtual time, total fair weight and the scheduling period
//! - Total expected runtime and deadline utilization (predictions exported
//!   to other CPUs, scaled by this CPU's performance)
//! - The active thread, its time slice boundaries and preemption state
//! - Per-CPU statistics (reschedules, context switches, idle time)
//!
//! ## Locking
//!
//! All per-CPU state is protected by the single scheduler lock held in
//! `Scheduler`. Cross-CPU reads (predicted queue time, utilization) happen
//! under the same lock.

use super::config::{CpuDescriptor, SchedConfig};
use super::run_queue::RunQueue;
use super::stats::PerCpuStats;
use super::state::DisciplineState;
use super::thread::ThreadTable;
use super::types::{
    CpuMask, CpuNum, Placement, SchedDuration, SchedPerformanceScale, SchedTime, SchedUtilization,
    SchedWeight, ThreadState, Tid, INVALID_CPU, SCHED_TIME_INFINITE,
};

/// Scheduler state of one CPU.
pub struct PerCpuScheduler {
    pub(crate) cpu: CpuNum,
    pub(crate) cluster: u32,

    // Relative capacity of this CPU and its reciprocal.
    pub(crate) performance_scale: SchedPerformanceScale,
    pub(crate) performance_scale_reciprocal: SchedPerformanceScale,

    pub(crate) fair_run_queue: RunQueue,
    pub(crate) deadline_run_queue: RunQueue,

    // Fair timeline.
    pub(crate) virtual_time: SchedTime,
    pub(crate) last_update_time_ns: SchedTime,
    pub(crate) weight_total: SchedWeight,
    /// Weight total when the active thread's slice was computed.
    pub(crate) scheduled_weight_total: SchedWeight,
    pub(crate) scheduling_period_grans: i64,
    pub(crate) minimum_granularity_ns: SchedDuration,
    pub(crate) target_latency_grans: i64,

    // Accounting of threads associated with this CPU.
    pub(crate) runnable_fair_task_count: i64,
    pub(crate) runnable_deadline_task_count: i64,
    pub(crate) total_expected_runtime_ns: SchedDuration,
    pub(crate) total_deadline_utilization: SchedUtilization,
    pub(crate) exported_total_expected_runtime_ns: SchedDuration,
    pub(crate) exported_total_deadline_utilization: SchedUtilization,

    // Active thread and its time slice.
    pub(crate) active_thread: Tid,
    pub(crate) idle_thread: Tid,
    pub(crate) start_of_current_time_slice_ns: SchedTime,
    pub(crate) target_preemption_time_ns: SchedTime,

    pub(crate) generation_count: u64,
    pub(crate) flow_count: u64,

    // Preemption control.
    pub(crate) preempt_disable_count: u32,
    pub(crate) preempts_pending: CpuMask,

    pub(crate) stats: PerCpuStats,
}

impl PerCpuScheduler {
    pub fn new(cpu: CpuNum, descriptor: &CpuDescriptor, config: &SchedConfig, idle_thread: Tid) -> Self {
        let target_latency_grans = config.target_latency_grans();
        Self {
            cpu,
            cluster: descriptor.cluster,
            performance_scale: descriptor.performance_scale,
            performance_scale_reciprocal: descriptor.performance_scale.reciprocal(),
            fair_run_queue: RunQueue::new(),
            deadline_run_queue: RunQueue::new(),
            virtual_time: 0,
            last_update_time_ns: 0,
            weight_total: SchedWeight::ZERO,
            scheduled_weight_total: SchedWeight::ZERO,
            scheduling_period_grans: target_latency_grans,
            minimum_granularity_ns: config.minimum_granularity_ns,
            target_latency_grans,
            runnable_fair_task_count: 0,
            runnable_deadline_task_count: 0,
            total_expected_runtime_ns: 0,
            total_deadline_utilization: SchedUtilization::ZERO,
            exported_total_expected_runtime_ns: 0,
            exported_total_deadline_utilization: SchedUtilization::ZERO,
            active_thread: idle_thread,
            idle_thread,
            start_of_current_time_slice_ns: 0,
            target_preemption_time_ns: SCHED_TIME_INFINITE,
            generation_count: 0,
            flow_count: 0,
            preempt_disable_count: 0,
            preempts_pending: CpuMask::EMPTY,
            stats: PerCpuStats::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn cpu(&self) -> CpuNum {
        self.cpu
    }

    pub fn cluster(&self) -> u32 {
        self.cluster
    }

    pub fn active_thread(&self) -> Tid {
        self.active_thread
    }

    pub fn idle_thread(&self) -> Tid {
        self.idle_thread
    }

    pub fn virtual_time(&self) -> SchedTime {
        self.virtual_time
    }

    pub fn weight_total(&self) -> SchedWeight {
        self.weight_total
    }

    pub fn runnable_fair_task_count(&self) -> i64 {
        self.runnable_fair_task_count
    }

    pub fn runnable_deadline_task_count(&self) -> i64 {
        self.runnable_deadline_task_count
    }

    pub fn scheduling_period_grans(&self) -> i64 {
        self.scheduling_period_grans
    }

    pub fn total_deadline_utilization(&self) -> SchedUtilization {
        self.total_deadline_utilization
    }

    pub fn target_preemption_time(&self) -> SchedTime {
        self.target_preemption_time_ns
    }

    pub fn fair_queue(&self) -> &RunQueue {
        &self.fair_run_queue
    }

    pub fn deadline_queue(&self) -> &RunQueue {
        &self.deadline_run_queue
    }

    pub fn stats(&self) -> &PerCpuStats {
        &self.stats
    }

    /// Predicted time a newly queued thread waits before running here.
    #[inline]
    pub fn predicted_queue_time_ns(&self) -> SchedDuration {
        self.exported_total_expected_runtime_ns
    }

    /// Deadline utilization of this CPU, scaled to a full-speed CPU.
    #[inline]
    pub fn predicted_deadline_utilization(&self) -> SchedUtilization {
        self.exported_total_deadline_utilization
    }

    #[inline]
    pub fn preemption_enabled(&self) -> bool {
        self.preempt_disable_count == 0
    }

    // ========================================================================
    // Performance scaling
    // ========================================================================

    /// Convert work measured on this CPU to full-speed work.
    #[inline]
    pub fn scale_down(&self, duration: SchedDuration) -> SchedDuration {
        self.performance_scale.scale(duration)
    }

    /// Convert full-speed work to wall time on this CPU.
    #[inline]
    pub fn scale_up(&self, duration: SchedDuration) -> SchedDuration {
        self.performance_scale_reciprocal.scale(duration)
    }

    #[inline]
    pub fn scale_up_utilization(&self, utilization: SchedUtilization) -> SchedUtilization {
        utilization.mul(self.performance_scale_reciprocal)
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    pub(crate) fn update_total_expected_runtime(&mut self, delta_ns: SchedDuration) {
        self.total_expected_runtime_ns += delta_ns;
        crate::kassert!(
            self.total_expected_runtime_ns >= 0,
            "cpu {} negative expected runtime {}",
            self.cpu,
            self.total_expected_runtime_ns
        );
        self.exported_total_expected_runtime_ns = self.scale_up(self.total_expected_runtime_ns);
    }

    pub(crate) fn update_total_deadline_utilization(&mut self, delta: SchedUtilization) {
        self.total_deadline_utilization += delta;
        crate::kassert!(
            self.total_deadline_utilization >= SchedUtilization::ZERO,
            "cpu {} negative deadline utilization",
            self.cpu
        );
        self.exported_total_deadline_utilization =
            self.scale_up_utilization(self.total_deadline_utilization);
    }

    fn next_flow_id(&mut self) -> u64 {
        self.flow_count += 1;
        ((self.cpu as u64) << 48) | self.flow_count
    }

    /// Whether any READY thread is queued here.
    pub fn has_queued_threads(&self) -> bool {
        !self.fair_run_queue.is_empty() || !self.deadline_run_queue.is_empty()
    }

    // ========================================================================
    // Insert / Remove
    // ========================================================================

    /// Account a READY thread to this CPU and, unless `placement` is
    /// `Association`, queue it. Accounting happens at most once; a second
    /// insert of an already-accounted thread is ignored.
    pub(crate) fn insert(&mut self, threads: &mut ThreadTable, now: SchedTime, tid: Tid, placement: Placement) {
        let thread = &mut threads[tid];
        crate::kassert!(thread.state == ThreadState::Ready, "insert of non-ready thread {}", tid);
        crate::kassert!(!thread.idle, "insert of idle thread {}", tid);

        let state = &mut thread.sched;
        if !state.on_insert() {
            return;
        }
        state.curr_cpu = self.cpu;
        let expected_runtime_ns = state.expected_runtime_ns;
        let discipline = state.discipline;

        self.update_total_expected_runtime(expected_runtime_ns);
        match discipline {
            DisciplineState::Fair { weight, .. } => {
                self.runnable_fair_task_count += 1;
                self.update_timeline(now);
                self.update_period();
                self.weight_total += weight;
                crate::kassert!(self.weight_total > SchedWeight::ZERO);
            }
            DisciplineState::Deadline(params) => {
                self.update_total_deadline_utilization(params.utilization);
                self.runnable_deadline_task_count += 1;
            }
        }
        self.trace_queue_event("activate", tid);

        if placement != Placement::Association {
            self.queue_thread(threads, tid, placement, now, 0);
        }
    }

    /// Undo the accounting of `insert`. The thread must already be out of
    /// the run queue.
    pub(crate) fn remove(&mut self, threads: &mut ThreadTable, tid: Tid) {
        let state = &mut threads[tid].sched;
        crate::kassert!(!state.in_queue(), "remove of queued thread {}", tid);
        if !state.on_remove() {
            return;
        }
        state.curr_cpu = INVALID_CPU;
        let expected_runtime_ns = state.expected_runtime_ns;

        match state.discipline {
            DisciplineState::Fair { weight, .. } => {
                state.start_time = 0;
                state.finish_time = 0;
                self.runnable_fair_task_count -= 1;
                crate::kassert!(self.runnable_fair_task_count >= 0);
                self.update_period();
                self.weight_total -= weight;
                crate::kassert!(self.weight_total >= SchedWeight::ZERO);
            }
            DisciplineState::Deadline(params) => {
                self.update_total_deadline_utilization(-params.utilization);
                self.runnable_deadline_task_count -= 1;
                crate::kassert!(self.runnable_deadline_task_count >= 0);
            }
        }
        self.update_total_expected_runtime(-expected_runtime_ns);
        self.trace_queue_event("deactivate", tid);
    }

    /// Place a thread on its run queue, updating its timeline according to
    /// `placement`. `consumed_runtime_ns` is the time it used since its
    /// slice started, scaled to full speed for deadline threads.
    pub(crate) fn queue_thread(
        &mut self,
        threads: &mut ThreadTable,
        tid: Tid,
        placement: Placement,
        now: SchedTime,
        consumed_runtime_ns: SchedDuration,
    ) {
        crate::kassert!(placement != Placement::Association);
        let state = &mut threads[tid].sched;
        crate::kassert!(!state.in_queue(), "thread {} already queued", tid);

        // Zero when unblocking, migrating or adjusting. May go negative from
        // scheduling overhead.
        state.time_slice_ns -= consumed_runtime_ns;

        match state.discipline {
            DisciplineState::Fair { .. } => self.place_fair(state, placement),
            DisciplineState::Deadline(params) => {
                if matches!(placement, Placement::Insertion | Placement::Preemption) {
                    Self::place_deadline(state, &params, now);
                }
            }
        }

        if placement != Placement::Adjustment {
            state.last_started_running = now;
            state.flow_id = self.next_flow_id();
        }
        self.generation_count += 1;
        state.generation = self.generation_count;

        if state.is_fair() {
            self.fair_run_queue.insert(threads, tid);
        } else {
            self.deadline_run_queue.insert(threads, tid);
        }
        self.trace_queue_event("enqueue", tid);
    }

    /// Unlink a READY thread from whichever run queue holds it. Accounting
    /// is left in place.
    pub(crate) fn dequeue(&mut self, threads: &mut ThreadTable, tid: Tid) {
        crate::kassert!(threads[tid].sched.in_queue(), "dequeue of unqueued thread {}", tid);
        if threads[tid].sched.is_deadline() {
            self.deadline_run_queue.erase(threads, tid);
        } else {
            self.fair_run_queue.erase(threads, tid);
        }
        self.trace_queue_event("dequeue", tid);
    }

    /// Program the slice of the thread about to run and set the target
    /// preemption time.
    pub(crate) fn next_thread_timeslice(&mut self, threads: &mut ThreadTable, tid: Tid, now: SchedTime) {
        let thread = &mut threads[tid];
        if thread.idle {
            self.target_preemption_time_ns = SCHED_TIME_INFINITE;
            return;
        }
        let state = &mut thread.sched;
        match state.discipline {
            DisciplineState::Fair {
                weight,
                normalized_timeslice_remainder,
                ..
            } => {
                let time_slice_ns = self.calculate_timeslice(weight);
                let remaining_ns = normalized_timeslice_remainder.scale(time_slice_ns).max(1);
                state.set_initial_time_slice(time_slice_ns);
                state.time_slice_ns = remaining_ns;
                self.target_preemption_time_ns = now + remaining_ns;
            }
            DisciplineState::Deadline(_) => {
                let scaled_ns = self.scale_up(state.time_slice_ns);
                self.target_preemption_time_ns = (now + scaled_ns).min(state.finish_time);
            }
        }
    }

    /// Emit a queue event when queue tracing is enabled.
    #[inline]
    pub(crate) fn trace_queue_event(&self, event: &str, tid: Tid) {
        if cfg!(feature = "queue_tracing") {
            crate::ktrace!(
                "[sched] cpu {} {} tid {} fair={} deadline={}",
                self.cpu,
                event,
                tid,
                self.runnable_fair_task_count,
                self.runnable_deadline_task_count
            );
        }
    }
}
