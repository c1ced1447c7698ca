//! Weighted fair discipline
//!
//! Fair threads share a CPU in proportion to their weights. Each CPU keeps
//! a virtual timeline that advances with wall time whenever any fair
//! weight is present; a thread's request spans
//! `[start_time, finish_time)` on that timeline, where the span length is
//! the scheduling period scaled down by its relative weight.
//!
//! ## Selection
//! 1. A fair thread is eligible once `start_time <= virtual_time`
//! 2. Among eligible threads, the one with the earliest finish time runs
//! 3. If nothing is eligible, virtual time jumps to the earliest start

use super::percpu::PerCpuScheduler;
use super::priority::normalized_duration;
use super::state::SchedulerState;
use super::thread::ThreadTable;
use super::types::{Placement, SchedDuration, SchedRemainder, SchedTime, SchedWeight, Tid};

impl PerCpuScheduler {
    /// Advance virtual time to `now`. Virtual time only moves while fair
    /// weight is present on this CPU.
    pub(crate) fn update_timeline(&mut self, now: SchedTime) {
        let runtime_ns = now - self.last_update_time_ns;
        self.last_update_time_ns = now;
        if self.weight_total > SchedWeight::ZERO {
            self.virtual_time += runtime_ns;
        }
    }

    /// Stretch the scheduling period once there are more runnable fair
    /// threads than granules in the target latency.
    pub(crate) fn update_period(&mut self) {
        let num_tasks = self.runnable_fair_task_count;
        crate::kassert!(num_tasks >= 0, "cpu {} negative fair task count", self.cpu);
        self.scheduling_period_grans = num_tasks.max(self.target_latency_grans);
    }

    /// Time slice of a thread with `weight`: its share of the scheduling
    /// period, rounded to whole granules and never less than one.
    pub fn calculate_timeslice(&self, weight: SchedWeight) -> SchedDuration {
        if self.weight_total <= SchedWeight::ZERO {
            return self.minimum_granularity_ns;
        }
        let proportional_grans = SchedWeight::from_int(self.scheduling_period_grans)
            .mul(weight)
            .div(self.weight_total);
        let grans = proportional_grans.round().max(1);
        grans * self.minimum_granularity_ns
    }

    /// Scheduling period in nanoseconds.
    #[inline]
    pub fn scheduling_period_ns(&self) -> SchedDuration {
        self.scheduling_period_grans * self.minimum_granularity_ns
    }

    /// Fair part of queueing: pick a start time and derive the finish time.
    pub(crate) fn place_fair(&self, state: &mut SchedulerState, placement: Placement) {
        let initial_time_slice_ns = state.initial_time_slice_ns().max(1);
        let remainder = SchedRemainder::from_ratio(state.time_slice_ns, initial_time_slice_ns);
        crate::kassert!(
            remainder <= SchedRemainder::ONE,
            "timeslice remainder {} exceeds one",
            remainder
        );

        if placement == Placement::Insertion || remainder <= SchedRemainder::ZERO {
            state.start_time = state.finish_time.max(self.virtual_time);
            state.set_timeslice_remainder(SchedRemainder::ONE);
        } else if placement == Placement::Preemption {
            crate::kassert!(state.time_slice_ns > 0);
            state.set_timeslice_remainder(remainder);
        }

        let delta_norm = normalized_duration(self.scheduling_period_ns(), state.weight());
        state.finish_time = state.start_time + delta_norm;
        crate::kassert!(
            state.start_time < state.finish_time,
            "start {} not before finish {}",
            state.start_time,
            state.finish_time
        );
    }

    /// Take the next fair thread, snapping virtual time forward to the
    /// earliest start if nothing is eligible yet.
    pub(crate) fn dequeue_fair_thread(&mut self, threads: &mut ThreadTable) -> Option<Tid> {
        let front = self.fair_run_queue.front(threads)?;
        let eligible_time = self.virtual_time.max(threads[front].sched.start_time);
        if eligible_time > self.virtual_time {
            self.virtual_time = eligible_time;
        }

        let tid = self
            .fair_run_queue
            .find_earliest_eligible(threads, eligible_time, |_| true);
        crate::kassert!(tid.is_some(), "cpu {} fair queue has no eligible thread", self.cpu);
        let tid = tid?;
        self.fair_run_queue.erase(threads, tid);
        self.trace_queue_event("dequeue_fair", tid);
        Some(tid)
    }
}
