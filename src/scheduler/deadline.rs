//! Deadline (EDF) discipline
//!
//! A deadline thread asks for `capacity` of CPU time within `deadline` of
//! each arrival, arrivals `period` apart. Eligible deadline threads always
//! run before fair threads; among them the earliest absolute deadline
//! (`finish_time`) wins.

use super::percpu::PerCpuScheduler;
use super::state::SchedulerState;
use super::thread::ThreadTable;
use super::types::{DeadlineParams, SchedTime, Tid, SCHED_TIME_INFINITE};

impl PerCpuScheduler {
    /// Deadline part of queueing. Starts a new period when the previous
    /// deadline passed or the capacity is used up, otherwise clamps the
    /// remaining slice to the time left before the deadline.
    pub(crate) fn place_deadline(state: &mut SchedulerState, params: &DeadlineParams, now: SchedTime) {
        let time_until_deadline_ns = state.finish_time - now;
        if time_until_deadline_ns <= 0 || state.time_slice_ns <= 0 {
            let period_finish_ns = state.start_time + params.period_ns;
            state.start_time = if now >= period_finish_ns {
                now
            } else {
                period_finish_ns
            };
            state.finish_time = state.start_time + params.deadline_ns;
            state.time_slice_ns = params.capacity_ns;
        } else if state.time_slice_ns >= time_until_deadline_ns {
            state.time_slice_ns = time_until_deadline_ns;
        }
        crate::kassert!(
            state.start_time < state.finish_time,
            "deadline start {} not before finish {}",
            state.start_time,
            state.finish_time
        );
    }

    /// Whether a queued deadline thread has arrived by `now`.
    pub fn is_deadline_thread_eligible(&self, threads: &ThreadTable, now: SchedTime) -> bool {
        self.deadline_run_queue
            .front(threads)
            .is_some_and(|front| threads[front].sched.start_time <= now)
    }

    /// Start time of the next deadline arrival, or infinity.
    pub fn next_eligible_time(&self, threads: &ThreadTable) -> SchedTime {
        self.deadline_run_queue
            .front(threads)
            .map_or(SCHED_TIME_INFINITE, |front| threads[front].sched.start_time)
    }

    /// Take the eligible deadline thread with the earliest deadline.
    pub(crate) fn dequeue_deadline_thread(&mut self, threads: &mut ThreadTable, eligible_time: SchedTime) -> Option<Tid> {
        let tid = self
            .deadline_run_queue
            .find_earliest_eligible(threads, eligible_time, |_| true);
        crate::kassert!(tid.is_some(), "cpu {} no eligible deadline thread", self.cpu);
        let tid = tid?;
        self.deadline_run_queue.erase(threads, tid);
        self.trace_queue_event("dequeue_deadline", tid);
        Some(tid)
    }

    /// Eligible deadline thread whose deadline is strictly before
    /// `finish_time`, if any.
    pub fn find_earlier_deadline_thread(
        &self,
        threads: &ThreadTable,
        eligible_time: SchedTime,
        finish_time: SchedTime,
    ) -> Option<Tid> {
        let tid = self
            .deadline_run_queue
            .find_earliest_eligible(threads, eligible_time, |_| true)?;
        (threads[tid].sched.finish_time < finish_time).then_some(tid)
    }

    /// Dequeue the thread `find_earlier_deadline_thread` would return.
    pub(crate) fn dequeue_earlier_deadline_thread(
        &mut self,
        threads: &mut ThreadTable,
        eligible_time: SchedTime,
        finish_time: SchedTime,
    ) -> Option<Tid> {
        let tid = self.find_earlier_deadline_thread(threads, eligible_time, finish_time)?;
        self.deadline_run_queue.erase(threads, tid);
        self.trace_queue_event("dequeue_deadline", tid);
        Some(tid)
    }

    /// Preempt no later than the next deadline arrival.
    pub fn clamp_to_deadline(&self, threads: &ThreadTable, completion_time: SchedTime) -> SchedTime {
        completion_time.min(self.next_eligible_time(threads))
    }

    /// Preempt no later than the arrival of a deadline thread that would
    /// finish before `finish_time`.
    pub fn clamp_to_earlier_deadline(
        &self,
        threads: &ThreadTable,
        completion_time: SchedTime,
        finish_time: SchedTime,
    ) -> SchedTime {
        match self.find_earlier_deadline_thread(threads, completion_time, finish_time) {
            Some(tid) => completion_time.min(threads[tid].sched.start_time),
            None => completion_time,
        }
    }
}
