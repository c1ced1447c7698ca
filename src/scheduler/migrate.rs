//! Migration and priority inheritance
//!
//! Threads move between CPUs in three ways:
//! - passively, when `unblock` places them on a different CPU
//! - actively, when their affinity (or a pending `next_cpu`) excludes the
//!   CPU they are associated with; see `migrate` and the reschedule path
//! - in bulk, when a CPU goes offline (`migrate_unpinned_threads`)
//!
//! Priority changes are applied according to the thread's state: stored
//! for later when it is not runnable, applied in place (with a requeue)
//! when it is READY or RUNNING, and handed to the wait queue when blocked.

use alloc::vec::Vec;

use crate::{kdebug, kwarn};

use super::core::SchedulerSet;
use super::platform::Platform;
use super::priority::{is_valid_priority, priority_to_weight, HIGHEST_PRIORITY};
use super::state::DisciplineState;
use super::thread::MigrateFn;
use super::types::{
    AspaceId, CpuMask, CpuNum, DeadlineParams, MigrateStage, Placement, PropagatePi, SchedTime,
    SchedUtilization, SchedWeight, ThreadState, Tid, INVALID_CPU,
};

impl SchedulerSet {
    // ========================================================================
    // Migration
    // ========================================================================

    /// Move `tid` off a CPU it may no longer use.
    pub fn migrate<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid) {
        let mut cpus_to_reschedule = CpuMask::EMPTY;
        self.migrate_locked(p, cpu, tid, p.now(), &mut cpus_to_reschedule);
        self.reschedule_mask(p, cpu, cpus_to_reschedule);
    }

    pub(crate) fn migrate_locked<P: Platform>(
        &mut self,
        p: &P,
        cpu: CpuNum,
        tid: Tid,
        now: SchedTime,
        cpus_to_reschedule: &mut CpuMask,
    ) {
        let active_mask = p.active_cpu_mask();
        let thread = &mut self.threads[tid];
        let state = &mut thread.sched;
        let effective_mask = state.effective_cpu_mask(active_mask);
        let curr_cpu = state.curr_cpu;
        let thread_state = thread.state;

        let stale_curr_cpu = !effective_mask.contains(curr_cpu);
        let stale_next_cpu = state.next_cpu != INVALID_CPU && !effective_mask.contains(state.next_cpu);
        if stale_next_cpu {
            state.next_cpu = INVALID_CPU;
        }

        match thread_state {
            // The CPU running it migrates it on its next reschedule.
            ThreadState::Running if stale_curr_cpu => cpus_to_reschedule.insert(curr_cpu),
            ThreadState::Ready if stale_curr_cpu || stale_next_cpu => {
                let target_cpu = self.find_target_cpu(p, cpu, tid);
                if target_cpu == curr_cpu {
                    // Held back for its migrate function; the origin CPU
                    // moves it once the function has run there.
                    cpus_to_reschedule.insert(curr_cpu);
                    return;
                }
                kdebug!("[migrate] tid {} cpu {} -> {}", tid, curr_cpu, target_cpu);
                let current = &mut self.cpus[curr_cpu];
                current.dequeue(&mut self.threads, tid);
                current.remove(&mut self.threads, tid);
                self.cpus[target_cpu].insert(&mut self.threads, now, tid, Placement::Insertion);

                cpus_to_reschedule.insert(target_cpu);
                cpus_to_reschedule.insert(curr_cpu);
            }
            _ => {}
        }
    }

    /// Drain `cpu` before it goes offline: every queued thread not pinned to
    /// it moves elsewhere, and threads last run here get their migrate
    /// function called.
    pub fn migrate_unpinned_threads<P: Platform>(&mut self, p: &P, cpu: CpuNum) {
        let pinned_mask = CpuMask::of(cpu);
        p.set_cpu_active(cpu, false);
        let now = p.now();

        let mut drained = Vec::new();
        while let Some(tid) = self.cpus[cpu].fair_run_queue.pop_front(&mut self.threads) {
            drained.push(tid);
        }
        while let Some(tid) = self.cpus[cpu].deadline_run_queue.pop_front(&mut self.threads) {
            drained.push(tid);
        }

        let mut cpus_to_reschedule = CpuMask::EMPTY;
        for tid in drained {
            let current = &mut self.cpus[cpu];
            if self.threads[tid].sched.hard_affinity == pinned_mask {
                // Pinned threads keep their timeline position.
                if self.threads[tid].sched.is_deadline() {
                    current.deadline_run_queue.insert(&mut self.threads, tid);
                } else {
                    current.fair_run_queue.insert(&mut self.threads, tid);
                }
                continue;
            }

            current.trace_queue_event("migrate_unpinned", tid);
            current.remove(&mut self.threads, tid);
            let thread = &mut self.threads[tid];
            thread.call_migrate_fn(MigrateStage::Before);
            thread.sched.next_cpu = INVALID_CPU;

            let target_cpu = self.find_target_cpu(p, cpu, tid);
            crate::kassert!(target_cpu != cpu, "tid {} drained back onto offline cpu {}", tid, cpu);
            self.cpus[target_cpu].insert(&mut self.threads, now, tid, Placement::Insertion);
            cpus_to_reschedule.insert(target_cpu);
        }

        // Threads that last ran here but are not queued anywhere.
        for thread in self.threads.iter_mut() {
            if thread.state.is_blocked() && thread.sched.last_cpu == cpu {
                thread.call_migrate_fn(MigrateStage::Before);
            }
        }

        kdebug!("[migrate_unpinned_threads] cpu {} drained, rescheduling {:?}", cpu, cpus_to_reschedule);
        self.reschedule_mask(p, cpu, cpus_to_reschedule);
    }

    // ========================================================================
    // Thread parameters
    // ========================================================================

    /// Restrict `tid` to `mask`, migrating it if needed.
    pub fn set_cpu_affinity<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid, mask: CpuMask) {
        if mask.is_empty() {
            kwarn!("[set_cpu_affinity] tid {} empty mask ignored", tid);
            return;
        }
        self.threads[tid].sched.set_hard_affinity(mask);
        self.migrate(p, cpu, tid);
    }

    /// Set the preferred CPUs of `tid`, migrating it if needed.
    pub fn set_soft_cpu_affinity<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid, mask: CpuMask) {
        self.threads[tid].sched.set_soft_affinity(mask);
        self.migrate(p, cpu, tid);
    }

    pub fn set_migrate_fn(&mut self, tid: Tid, migrate_fn: Option<MigrateFn>) {
        let thread = &mut self.threads[tid];
        if migrate_fn.is_none() {
            thread.migrate_pending = false;
        }
        thread.migrate_fn = migrate_fn;
    }

    pub fn set_address_space(&mut self, tid: Tid, aspace: AspaceId) {
        self.threads[tid].aspace = aspace;
    }

    // ========================================================================
    // Priority inheritance
    // ========================================================================

    /// Set the base priority of `tid`.
    pub fn change_priority<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid, priority: i32) {
        let mut cpus_to_reschedule = CpuMask::EMPTY;
        self.change_weight(p, cpu, tid, priority, &mut cpus_to_reschedule);
        self.reschedule_mask(p, cpu, cpus_to_reschedule);
    }

    /// Set the priority `tid` inherits from the threads it blocks. `-1`
    /// clears the inheritance.
    pub fn inherit_priority<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid, priority: i32) {
        let mut cpus_to_reschedule = CpuMask::EMPTY;
        self.inherit_weight(p, tid, priority, &mut cpus_to_reschedule);
        self.reschedule_mask(p, cpu, cpus_to_reschedule);
    }

    /// Switch `tid` to the deadline discipline, or change its parameters.
    pub fn change_deadline<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid, params: DeadlineParams) {
        let mut cpus_to_reschedule = CpuMask::EMPTY;
        let thread = &mut self.threads[tid];
        if !(thread.idle || thread.state == ThreadState::Death) {
            let changed = thread.sched.deadline_params() != Some(params);

            // TODO: deadline-aware priority inheritance; until then deadline
            // threads count as the highest fair priority.
            let state = &mut thread.sched;
            let original_priority = state.effective_priority;
            state.base_priority = HIGHEST_PRIORITY;
            state.inherited_priority = -1;
            state.effective_priority = state.base_priority;

            if changed {
                kdebug!("[change_deadline] tid {} {:?}", tid, params);
                self.update_deadline_common(p, tid, original_priority, params, &mut cpus_to_reschedule, PropagatePi::Yes);
            }
        }
        self.reschedule_mask(p, cpu, cpus_to_reschedule);
    }

    fn change_weight<P: Platform>(
        &mut self,
        p: &P,
        cpu: CpuNum,
        tid: Tid,
        priority: i32,
        cpus_to_reschedule: &mut CpuMask,
    ) {
        crate::kassert!(is_valid_priority(priority), "invalid priority {}", priority);
        let thread = &mut self.threads[tid];
        if thread.idle || thread.state == ThreadState::Death {
            return;
        }

        let state = &mut thread.sched;
        let original_priority = state.effective_priority;
        state.base_priority = priority;
        state.effective_priority = state.base_priority.max(state.inherited_priority);

        if state.is_deadline() || state.effective_priority != original_priority {
            let weight = priority_to_weight(state.effective_priority);
            kdebug!(
                "[change_priority] tid {} priority {} -> {}",
                tid,
                original_priority,
                state.effective_priority
            );
            self.update_weight_common(p, tid, original_priority, weight, cpus_to_reschedule, PropagatePi::Yes);
        }

        // A READY thread may have been left on a CPU outside its affinity.
        if self.threads[tid].state == ThreadState::Ready {
            let now = p.now();
            self.migrate_locked(p, cpu, tid, now, cpus_to_reschedule);
        }
    }

    fn inherit_weight<P: Platform>(
        &mut self,
        p: &P,
        tid: Tid,
        priority: i32,
        cpus_to_reschedule: &mut CpuMask,
    ) {
        let state = &mut self.threads[tid].sched;
        // Deadline threads are treated as maximum weight for inheritance.
        if state.is_deadline() {
            return;
        }

        let original_priority = state.effective_priority;
        state.inherited_priority = priority;
        state.effective_priority = state.base_priority.max(state.inherited_priority);

        if state.effective_priority != original_priority {
            let weight = priority_to_weight(state.effective_priority);
            self.update_weight_common(p, tid, original_priority, weight, cpus_to_reschedule, PropagatePi::No);
        }
    }

    fn update_weight_common<P: Platform>(
        &mut self,
        p: &P,
        tid: Tid,
        original_priority: i32,
        weight: SchedWeight,
        cpus_to_reschedule: &mut CpuMask,
        propagate: PropagatePi,
    ) {
        let thread_state = self.threads[tid].state;
        match thread_state {
            ThreadState::Initial | ThreadState::Sleeping | ThreadState::Suspended => {
                self.threads[tid].sched.set_fair_weight(weight);
            }
            ThreadState::Running | ThreadState::Ready => {
                let is_ready = thread_state == ThreadState::Ready;
                let curr_cpu = self.threads[tid].sched.curr_cpu;
                crate::kassert!(curr_cpu < self.cpus.len(), "tid {} has no cpu", tid);

                // Leave the queue before the discipline changes under it.
                if is_ready {
                    crate::kassert!(self.threads[tid].sched.active());
                    self.cpus[curr_cpu].dequeue(&mut self.threads, tid);
                }

                let current = &mut self.cpus[curr_cpu];
                let state = &mut self.threads[tid].sched;
                match state.discipline {
                    DisciplineState::Deadline(params) => {
                        // Leaving the deadline discipline behaves like a yield.
                        current.update_total_deadline_utilization(-params.utilization);
                        state.set_fair_weight(weight);
                        state.start_time = current.virtual_time;
                        state.finish_time = current.virtual_time;
                        state.time_slice_ns = 0;
                        current.runnable_deadline_task_count -= 1;
                        current.runnable_fair_task_count += 1;
                        current.update_period();
                    }
                    DisciplineState::Fair { weight: old_weight, .. } => {
                        current.weight_total -= old_weight;
                        state.set_fair_weight(weight);
                    }
                }
                // A running thread's slice follows on its next reschedule.
                current.weight_total += weight;

                if is_ready {
                    current.queue_thread(&mut self.threads, tid, Placement::Adjustment, p.now(), 0);
                }
                cpus_to_reschedule.insert(curr_cpu);
            }
            ThreadState::Blocked | ThreadState::BlockedReadLock => {
                self.threads[tid].sched.set_fair_weight(weight);
                p.update_priority_if_blocked(tid, original_priority, propagate);
            }
            ThreadState::Death => {}
        }
    }

    fn update_deadline_common<P: Platform>(
        &mut self,
        p: &P,
        tid: Tid,
        original_priority: i32,
        params: DeadlineParams,
        cpus_to_reschedule: &mut CpuMask,
        propagate: PropagatePi,
    ) {
        let thread_state = self.threads[tid].state;
        match thread_state {
            ThreadState::Initial | ThreadState::Sleeping | ThreadState::Suspended => {
                self.threads[tid].sched.set_deadline_params(params);
            }
            ThreadState::Running | ThreadState::Ready => {
                let is_ready = thread_state == ThreadState::Ready;
                let now = p.now();
                let curr_cpu = self.threads[tid].sched.curr_cpu;
                crate::kassert!(curr_cpu < self.cpus.len(), "tid {} has no cpu", tid);

                // Deadline threads keep their arrival; fair threads arrive at
                // the start of their running slice, or now.
                let state = &self.threads[tid].sched;
                let effective_start_time = if state.is_deadline() {
                    state.start_time
                } else if !is_ready {
                    self.cpus[curr_cpu].start_of_current_time_slice_ns
                } else {
                    now
                };

                if is_ready {
                    crate::kassert!(self.threads[tid].sched.active());
                    self.cpus[curr_cpu].dequeue(&mut self.threads, tid);
                }

                let current = &mut self.cpus[curr_cpu];
                let state = &mut self.threads[tid].sched;
                match state.discipline {
                    DisciplineState::Fair { weight, .. } => {
                        current.weight_total -= weight;
                        current.runnable_fair_task_count -= 1;
                        current.runnable_deadline_task_count += 1;
                        current.update_period();
                        if state.time_slice_ns <= 0 {
                            state.time_slice_ns = params.capacity_ns;
                        }
                    }
                    DisciplineState::Deadline(old) => {
                        current.total_deadline_utilization -= old.utilization;
                        crate::kassert!(current.total_deadline_utilization >= SchedUtilization::ZERO);
                    }
                }

                state.set_deadline_params(params);
                state.start_time = effective_start_time;
                state.finish_time = effective_start_time + params.deadline_ns;
                state.time_slice_ns = state.time_slice_ns.min(params.capacity_ns);
                current.update_total_deadline_utilization(params.utilization);

                if is_ready {
                    current.queue_thread(&mut self.threads, tid, Placement::Adjustment, now, 0);
                } else {
                    // The running slice was programmed without performance
                    // scaling.
                    let scaled_ns = current.scale_up(state.time_slice_ns);
                    current.target_preemption_time_ns =
                        (current.start_of_current_time_slice_ns + scaled_ns).min(state.finish_time);
                }
                cpus_to_reschedule.insert(curr_cpu);
            }
            ThreadState::Blocked | ThreadState::BlockedReadLock => {
                self.threads[tid].sched.set_deadline_params(params);
                p.update_priority_if_blocked(tid, original_priority, propagate);
            }
            ThreadState::Death => {}
        }
    }
}
