//! Core scheduling path
//!
//! `SchedulerSet` owns the per-CPU schedulers and the thread arena. It is
//! the state protected by the global scheduler lock; every method here
//! assumes that lock is held and takes the calling CPU explicitly.
//!
//! ## Reschedule Steps:
//! 1. Advance the virtual timeline and charge the outgoing thread
//! 2. Adjust the outgoing thread's slice if fair demand changed
//! 3. Decide whether its slice (or deadline) expired
//! 4. Evaluate the next thread: requeue, dequeue, steal or idle, then
//!    actively migrate anything that may no longer run here
//! 5. Update the expected-runtime estimate, program the preemption timer
//! 6. Context switch if the thread changed

use alloc::format;
use alloc::vec::Vec;

use crate::{kdebug, kinfo, ktrace};

use super::config::{SchedConfig, Topology};
use super::percpu::PerCpuScheduler;
use super::platform::Platform;
use super::priority::{peak_decay_delta, IDLE_PRIORITY};
use super::thread::{Thread, ThreadTable};
use super::types::{
    BlockReason, CpuMask, CpuNum, MigrateStage, Placement, SchedDuration, SchedParams,
    SchedRemainder, SchedTime, ThreadState, Tid, INVALID_CPU, SCHED_TIME_INFINITE,
};

/// All scheduler state guarded by the global scheduler lock.
pub struct SchedulerSet {
    pub(crate) cpus: Vec<PerCpuScheduler>,
    pub(crate) threads: ThreadTable,
    pub(crate) topology: Topology,
    pub(crate) config: SchedConfig,
}

impl SchedulerSet {
    /// Build per-CPU schedulers and their idle threads.
    pub fn new(topology: Topology, config: SchedConfig) -> Result<Self, &'static str> {
        config.validate()?;

        let mut threads = ThreadTable::new();
        let mut cpus = Vec::with_capacity(topology.cpu_count());
        for cpu in 0..topology.cpu_count() {
            let idle = threads.create(
                &format!("idle/{}", cpu),
                SchedParams::Fair {
                    priority: IDLE_PRIORITY,
                },
            );
            let thread = &mut threads[idle];
            thread.idle = true;
            thread.state = ThreadState::Running;
            thread.sched.hard_affinity = CpuMask::of(cpu);
            thread.sched.soft_affinity = CpuMask::of(cpu);
            thread.sched.curr_cpu = cpu;
            thread.sched.last_cpu = cpu;
            cpus.push(PerCpuScheduler::new(cpu, topology.cpu(cpu), &config, idle));
        }

        kinfo!(
            "Scheduler initialized ({} CPUs, {}us granularity, {}ms target latency)",
            cpus.len(),
            config.minimum_granularity_ns / 1_000,
            config.target_latency_ns / 1_000_000
        );

        Ok(Self {
            cpus,
            threads,
            topology,
            config,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, cpu: CpuNum) -> &PerCpuScheduler {
        &self.cpus[cpu]
    }

    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(tid)
    }

    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.get_mut(tid)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    /// Thread currently running on `cpu`.
    pub fn current_thread(&self, cpu: CpuNum) -> Tid {
        self.cpus[cpu].active_thread
    }

    // ========================================================================
    // Thread lifecycle
    // ========================================================================

    /// Create a thread in the `Initial` state.
    pub fn create_thread(&mut self, name: &str, params: SchedParams) -> Tid {
        let tid = self.threads.create(name, params);
        let state = &mut self.threads[tid].sched;
        if state.is_fair() {
            state.expected_runtime_ns = self.config.minimum_granularity_ns;
        }
        ktrace!("[create_thread] tid {} '{}' {:?}", tid, name, params);
        tid
    }

    /// Drop a dead thread that no CPU references any more.
    pub fn destroy_thread(&mut self, tid: Tid) -> Result<(), &'static str> {
        let thread = self.threads.get(tid).ok_or("unknown thread")?;
        if thread.idle {
            return Err("idle threads cannot be destroyed");
        }
        if thread.state != ThreadState::Death {
            return Err("thread has not exited");
        }
        if thread.sched.active() || self.cpus.iter().any(|cpu| cpu.active_thread == tid) {
            return Err("thread still associated with a CPU");
        }
        self.threads.destroy(tid);
        Ok(())
    }

    /// Make a blocked (or new) thread runnable on the best CPU.
    pub fn unblock<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid) {
        let now = p.now();
        let target = self.unblock_one(p, cpu, tid, now);
        self.reschedule_mask(p, cpu, CpuMask::of(target));
    }

    /// Unblock a batch of threads, last element first.
    pub fn unblock_list<P: Platform>(&mut self, p: &P, cpu: CpuNum, mut tids: Vec<Tid>) {
        let now = p.now();
        let mut mask = CpuMask::EMPTY;
        while let Some(tid) = tids.pop() {
            mask.insert(self.unblock_one(p, cpu, tid, now));
        }
        self.reschedule_mask(p, cpu, mask);
    }

    fn unblock_one<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid, now: SchedTime) -> CpuNum {
        let thread = &self.threads[tid];
        crate::kassert!(!thread.idle, "unblock of idle thread {}", tid);
        crate::kassert!(
            thread.state.is_blocked(),
            "unblock of thread {} in state {}",
            tid,
            thread.state.as_str()
        );

        let target = self.find_target_cpu(p, cpu, tid);
        self.threads[tid].set_ready();
        self.cpus[target].insert(&mut self.threads, now, tid, Placement::Insertion);
        target
    }

    /// Block the current thread of `cpu` and switch away from it.
    pub fn block<P: Platform>(&mut self, p: &P, cpu: CpuNum, reason: BlockReason) {
        let current = self.cpus[cpu].active_thread;
        crate::kassert!(!self.threads[current].idle, "cpu {} idle thread cannot block", cpu);
        self.threads[current].state = reason.into();
        let now = p.now();
        self.reschedule_common(p, cpu, now);
    }

    /// Give up the rest of the current slice.
    pub fn yield_now<P: Platform>(&mut self, p: &P, cpu: CpuNum) {
        let current = self.cpus[cpu].active_thread;
        crate::kassert!(!self.threads[current].idle, "cpu {} idle thread cannot yield", cpu);
        let now = p.now();

        let start_of_slice = self.cpus[cpu].start_of_current_time_slice_ns;
        let thread = &mut self.threads[current];
        thread.set_ready();
        let state = &mut thread.sched;
        state.time_slice_ns = now - start_of_slice;
        crate::kassert!(state.time_slice_ns >= 0);

        if state.is_fair() {
            // Re-enter with zero lag against competing threads.
            self.cpus[cpu].update_timeline(now);
            let state = &mut self.threads[current].sched;
            state.finish_time = self.cpus[cpu].virtual_time;
            let consumed = state.time_slice_ns;
            state.set_initial_time_slice(consumed);
            state.set_timeslice_remainder(SchedRemainder::ONE);
        }
        self.reschedule_common(p, cpu, now);
    }

    /// Return the current thread to the run queue and pick again.
    pub fn preempt<P: Platform>(&mut self, p: &P, cpu: CpuNum) {
        let current = self.cpus[cpu].active_thread;
        let thread = &mut self.threads[current];
        crate::kassert!(thread.sched.curr_cpu == cpu, "cpu {} preempting foreign thread {}", cpu, current);
        crate::kassert!(thread.sched.last_cpu == thread.sched.curr_cpu);
        thread.set_ready();
        let now = p.now();
        self.reschedule_common(p, cpu, now);
    }

    /// Preempt unless preemption is disabled on `cpu`, in which case the
    /// request is remembered until it is enabled again.
    pub fn reschedule<P: Platform>(&mut self, p: &P, cpu: CpuNum) {
        if !self.cpus[cpu].preemption_enabled() {
            self.cpus[cpu].preempts_pending.insert(cpu);
            return;
        }
        self.preempt(p, cpu);
    }

    /// Preemption timer expiry on `cpu`.
    pub fn timer_tick<P: Platform>(&mut self, p: &P, cpu: CpuNum) {
        self.reschedule(p, cpu);
    }

    /// Terminate the current thread of `cpu`.
    pub fn exit<P: Platform>(&mut self, p: &P, cpu: CpuNum) {
        let current = self.cpus[cpu].active_thread;
        let thread = &mut self.threads[current];
        crate::kassert!(!thread.idle, "cpu {} idle thread cannot exit", cpu);
        thread.state = ThreadState::Death;
        thread.call_migrate_fn(MigrateStage::Exiting);
        let now = p.now();
        self.reschedule_common(p, cpu, now);
    }

    pub fn preempt_disable(&mut self, cpu: CpuNum) {
        self.cpus[cpu].preempt_disable_count += 1;
    }

    /// Re-enable preemption, running any reschedule that was pended.
    pub fn preempt_enable<P: Platform>(&mut self, p: &P, cpu: CpuNum) {
        let sched = &mut self.cpus[cpu];
        crate::kassert!(sched.preempt_disable_count > 0, "cpu {} unbalanced preempt_enable", cpu);
        sched.preempt_disable_count = sched.preempt_disable_count.saturating_sub(1);
        if sched.preempt_disable_count > 0 {
            return;
        }
        let pending = core::mem::take(&mut sched.preempts_pending);
        let remote = pending & !CpuMask::of(cpu);
        if !remote.is_empty() {
            p.reschedule_ipi(remote);
        }
        if pending.contains(cpu) {
            self.preempt(p, cpu);
        }
    }

    /// Reschedule every CPU in `mask`: remote CPUs by IPI, the local CPU
    /// directly when preemption is enabled there.
    pub fn reschedule_mask<P: Platform>(&mut self, p: &P, cpu: CpuNum, mask: CpuMask) {
        let local = CpuMask::of(cpu);
        let remote = mask & !local;
        if !remote.is_empty() {
            p.reschedule_ipi(remote);
        }
        if mask.contains(cpu) {
            self.reschedule(p, cpu);
        }
    }

    // ========================================================================
    // Reschedule
    // ========================================================================

    /// Core of every switch decision on `cpu`. The current thread must
    /// already have left the `Running` state.
    pub(crate) fn reschedule_common<P: Platform>(&mut self, p: &P, cpu: CpuNum, now: SchedTime) {
        let current = self.cpus[cpu].active_thread;
        crate::kassert!(
            self.threads[current].state != ThreadState::Running,
            "cpu {} reschedule with running current thread {}",
            cpu,
            current
        );

        // Pending remote reschedules ride along with this one.
        let pending = core::mem::take(&mut self.cpus[cpu].preempts_pending);
        let remote = pending & !CpuMask::of(cpu);
        if !remote.is_empty() {
            p.reschedule_ipi(remote);
        }

        let sched = &mut self.cpus[cpu];
        sched.stats.reschedules += 1;
        sched.update_timeline(now);
        let total_runtime_ns = now - sched.start_of_current_time_slice_ns;

        let thread = &mut self.threads[current];
        let current_is_idle = thread.idle;
        let state = &mut thread.sched;
        let actual_runtime_ns = now - state.last_started_running;
        state.last_started_running = now;
        state.runtime_ns += actual_runtime_ns;

        self.adjust_rate(p, cpu, current, total_runtime_ns);

        // Deadline capacity stretches with CPU performance; fair slices do not.
        let state = &self.threads[current].sched;
        let scaled_runtime_ns = if state.is_deadline() {
            self.cpus[cpu].scale_down(total_runtime_ns)
        } else {
            total_runtime_ns
        };
        // A late wakeup can pass the deadline with slice left.
        let deadline_expired = state.is_deadline() && now >= state.finish_time;
        let timeslice_expired = deadline_expired || scaled_runtime_ns >= state.time_slice_ns;

        let next = self.evaluate_next_thread(p, cpu, now, current, timeslice_expired, scaled_runtime_ns);

        let next_thread = &mut self.threads[next];
        next_thread.set_running();
        next_thread.sched.last_cpu = cpu;
        next_thread.sched.curr_cpu = cpu;
        let next_is_idle = next_thread.idle;
        self.cpus[cpu].active_thread = next;
        if next != current {
            self.cpus[cpu].trace_queue_event("activate", next);
        }
        self.threads[next].call_migrate_fn(MigrateStage::After);

        let adjusted_runtime_ns = self.cpus[cpu].scale_down(total_runtime_ns);
        self.update_expected_runtime(cpu, current, next, timeslice_expired, adjusted_runtime_ns);

        if next_is_idle {
            p.set_cpu_idle(cpu);
        } else {
            p.set_cpu_busy(cpu);
        }
        if current_is_idle {
            self.cpus[cpu].stats.idle_time_ns += actual_runtime_ns;
        }

        let mut queue_time_ns: SchedDuration = 0;
        if next_is_idle {
            // No slice while idle; wake for the next deadline arrival.
            let target = self.cpus[cpu].clamp_to_deadline(&self.threads, SCHED_TIME_INFINITE);
            self.cpus[cpu].target_preemption_time_ns = target;
            p.preempt_reset(cpu, target);
        } else if timeslice_expired || next != current {
            self.cpus[cpu].next_thread_timeslice(&mut self.threads, next, now);

            let state = &mut self.threads[next].sched;
            queue_time_ns = now - state.last_started_running;
            state.last_started_running = now;

            let sched = &mut self.cpus[cpu];
            sched.start_of_current_time_slice_ns = now;
            sched.scheduled_weight_total = sched.weight_total;
            p.preempt_reset(cpu, self.preemption_time(cpu, next));
        } else {
            // Same thread continues; a deadline arrival may still cut it short.
            p.preempt_reset(cpu, self.preemption_time(cpu, next));
        }
        crate::kassert!(
            next_is_idle || p.preempt_armed(cpu),
            "cpu {} left preemption timer disarmed for tid {}",
            cpu,
            next
        );

        ktrace!(
            "[reschedule] cpu {} {} -> {} expired={} target={}",
            cpu,
            current,
            next,
            timeslice_expired,
            self.cpus[cpu].target_preemption_time_ns
        );

        if next != current {
            let sched = &mut self.cpus[cpu];
            sched.stats.context_switches += 1;
            let runnable = sched.runnable_fair_task_count + sched.runnable_deadline_task_count;
            let demand = sched.weight_total;
            sched.stats.record_sample(demand, runnable, queue_time_ns);

            let from = self.threads[current].aspace;
            let to = self.threads[next].aspace;
            if from != to {
                p.switch_address_space(cpu, from, to);
            }
            p.switch_context(cpu, current, next);
        }
    }

    /// Recompute the current fair thread's slice when the CPU's total weight
    /// changed since the slice was handed out.
    fn adjust_rate<P: Platform>(&mut self, p: &P, cpu: CpuNum, current: Tid, total_runtime_ns: SchedDuration) {
        let thread = &self.threads[current];
        let adjustable = !thread.idle && thread.sched.is_fair() && thread.state == ThreadState::Ready;
        let sched = &self.cpus[cpu];
        if !adjustable
            || sched.weight_total == sched.scheduled_weight_total
            || total_runtime_ns >= thread.sched.time_slice_ns
        {
            return;
        }

        let next_eligible = sched.next_eligible_time(&self.threads);
        let sched = &mut self.cpus[cpu];
        let state = &mut self.threads[current].sched;
        sched.scheduled_weight_total = sched.weight_total;

        let time_slice_ns = sched.calculate_timeslice(state.weight());
        let remaining_time_slice_ns = state.normalized_timeslice_remainder().scale(time_slice_ns);
        let timeslice_changed = time_slice_ns != state.initial_time_slice_ns();
        let timeslice_remaining = total_runtime_ns < remaining_time_slice_ns;

        if timeslice_changed && timeslice_remaining {
            sched.target_preemption_time_ns = sched.start_of_current_time_slice_ns + remaining_time_slice_ns;
            p.preempt_reset(cpu, sched.target_preemption_time_ns.min(next_eligible));
        }
        state.set_initial_time_slice(time_slice_ns);
        state.time_slice_ns = remaining_time_slice_ns;
    }

    /// Feed the outgoing thread's runtime into its expected-runtime
    /// estimate and the CPU's aggregate.
    fn update_expected_runtime(
        &mut self,
        cpu: CpuNum,
        current: Tid,
        next: Tid,
        timeslice_expired: bool,
        scaled_runtime_ns: SchedDuration,
    ) {
        let thread = &mut self.threads[current];
        let state = &mut thread.sched;
        let associated = !state.active() || state.curr_cpu == cpu;
        if thread.idle || !associated || !(timeslice_expired || current != next) {
            return;
        }

        state.banked_runtime_ns += scaled_runtime_ns;
        if timeslice_expired || !state.active() {
            let delta_ns = peak_decay_delta(state.expected_runtime_ns, state.banked_runtime_ns);
            state.expected_runtime_ns += delta_ns;
            state.banked_runtime_ns = 0;
            if state.active() {
                self.cpus[cpu].update_total_expected_runtime(delta_ns);
            }
        }
    }

    /// Preemption deadline for `tid` given the arrivals queued on `cpu`.
    fn preemption_time(&self, cpu: CpuNum, tid: Tid) -> SchedTime {
        let sched = &self.cpus[cpu];
        let target = sched.target_preemption_time_ns;
        let state = &self.threads[tid].sched;
        let preemption_time_ns = if state.is_fair() {
            sched.clamp_to_deadline(&self.threads, target)
        } else {
            sched.clamp_to_earlier_deadline(&self.threads, target, state.finish_time)
        };
        crate::kassert!(preemption_time_ns <= target);
        preemption_time_ns
    }

    /// Whether `tid` may not run on `cpu` (or is scheduled to move).
    fn needs_migration(&self, active_mask: CpuMask, cpu: CpuNum, tid: Tid) -> bool {
        let thread = &self.threads[tid];
        if thread.idle || active_mask.is_empty() {
            return false;
        }
        let available = thread.sched.effective_cpu_mask(active_mask);
        !available.is_empty() && (!available.contains(cpu) || thread.sched.next_cpu != INVALID_CPU)
    }

    /// Decide what runs next on `cpu`, requeueing or retiring the current
    /// thread and actively migrating threads that must leave.
    fn evaluate_next_thread<P: Platform>(
        &mut self,
        p: &P,
        cpu: CpuNum,
        now: SchedTime,
        current: Tid,
        timeslice_expired: bool,
        scaled_runtime_ns: SchedDuration,
    ) -> Tid {
        let active_mask = p.active_cpu_mask();
        let thread = &self.threads[current];
        let is_idle = thread.idle;
        let is_active = thread.state == ThreadState::Ready;
        let is_deadline = thread.sched.is_deadline();
        let is_new_deadline_eligible = self.cpus[cpu].is_deadline_thread_eligible(&self.threads, now);

        let mut next: Option<Tid> = None;
        if is_active && self.needs_migration(active_mask, cpu, current) {
            // Migration takes precedence over slice expiration.
            next = Some(current);
        } else if is_active && !is_idle {
            if timeslice_expired {
                self.cpus[cpu].queue_thread(&mut self.threads, current, Placement::Insertion, now, scaled_runtime_ns);
            } else if is_new_deadline_eligible && is_deadline {
                let finish_time = self.threads[current].sched.finish_time;
                match self.cpus[cpu].dequeue_earlier_deadline_thread(&mut self.threads, now, finish_time) {
                    Some(earlier) => {
                        self.cpus[cpu].queue_thread(
                            &mut self.threads,
                            current,
                            Placement::Preemption,
                            now,
                            scaled_runtime_ns,
                        );
                        next = Some(earlier);
                    }
                    None => next = Some(current),
                }
            } else if is_new_deadline_eligible {
                self.cpus[cpu].queue_thread(&mut self.threads, current, Placement::Preemption, now, scaled_runtime_ns);
            } else {
                next = Some(current);
            }
        } else if !is_active && !is_idle {
            self.cpus[cpu].remove(&mut self.threads, current);
        }

        let mut next = match next {
            Some(tid) => tid,
            None => self.dequeue_thread(p, cpu, now),
        };

        let mut cpus_to_reschedule = CpuMask::EMPTY;
        while self.needs_migration(active_mask, cpu, next) {
            let mut target_cpu = INVALID_CPU;
            if self.threads[next].sched.next_cpu == INVALID_CPU {
                target_cpu = self.find_target_cpu(p, cpu, next);
            }
            let thread = &mut self.threads[next];
            if thread.sched.next_cpu != INVALID_CPU {
                target_cpu = thread.sched.next_cpu;
                thread.call_migrate_fn(MigrateStage::Before);
                thread.sched.next_cpu = INVALID_CPU;
            }

            crate::kassert!(
                target_cpu != cpu && target_cpu != INVALID_CPU,
                "cpu {} active migration of tid {} has no target",
                cpu,
                next
            );
            if target_cpu == cpu || target_cpu == INVALID_CPU {
                break;
            }

            kdebug!("[migrate] cpu {} moves tid {} to cpu {}", cpu, next, target_cpu);
            self.cpus[cpu].remove(&mut self.threads, next);
            self.cpus[target_cpu].insert(&mut self.threads, now, next, Placement::Insertion);
            cpus_to_reschedule.insert(target_cpu);
            next = self.dequeue_thread(p, cpu, now);
        }

        if !cpus_to_reschedule.is_empty() {
            p.reschedule_ipi(cpus_to_reschedule);
        }
        next
    }

    /// Next thread from the local queues, else stolen work, else idle.
    fn dequeue_thread<P: Platform>(&mut self, p: &P, cpu: CpuNum, now: SchedTime) -> Tid {
        if self.cpus[cpu].is_deadline_thread_eligible(&self.threads, now) {
            if let Some(tid) = self.cpus[cpu].dequeue_deadline_thread(&mut self.threads, now) {
                return tid;
            }
        }
        if !self.cpus[cpu].fair_run_queue.is_empty() {
            if let Some(tid) = self.cpus[cpu].dequeue_fair_thread(&mut self.threads) {
                return tid;
            }
        }
        if let Some(tid) = self.steal_work(p, cpu, now) {
            return tid;
        }
        self.cpus[cpu].idle_thread
    }
}
