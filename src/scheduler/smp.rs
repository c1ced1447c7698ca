//! SMP placement and work stealing
//!
//! Placement walks the search set of the thread's last CPU (cache-warm
//! first, then the rest of its cluster, then other clusters) and stops at
//! the first CPU that is "good enough". A CPU with nothing to run steals
//! the earliest-eligible thread it is allowed to run from a peer.

use crate::{kdebug, kwarn};

use super::config::{
    CPU_UTILIZATION_LIMIT, INTER_CLUSTER_THRESHOLD_NS, INTRA_CLUSTER_THRESHOLD_NS,
    THREAD_UTILIZATION_MAX,
};
use super::core::SchedulerSet;
use super::percpu::PerCpuScheduler;
use super::platform::Platform;
use super::thread::ThreadTable;
use super::types::{
    CpuMask, CpuNum, Placement, SchedPerformanceScale, SchedTime, SchedUtilization, Tid, INVALID_CPU,
};

/// Placement criteria for one thread.
#[derive(Clone, Copy, Debug)]
enum PlacementGoal {
    Fair,
    Deadline(SchedUtilization),
}

impl PlacementGoal {
    /// Whether `a` is a better home than `b`.
    fn is_better(self, a: &PerCpuScheduler, b: &PerCpuScheduler) -> bool {
        let a_queue_time_ns = a.predicted_queue_time_ns();
        let b_queue_time_ns = b.predicted_queue_time_ns();
        match self {
            // CPUs of one cluster share caches: take the least loaded.
            PlacementGoal::Fair if a.cluster() == b.cluster() => {
                (a_queue_time_ns, a.predicted_deadline_utilization())
                    < (b_queue_time_ns, b.predicted_deadline_utilization())
            }
            // Across clusters, only move off a CPU past the threshold.
            PlacementGoal::Fair => {
                a_queue_time_ns <= INTER_CLUSTER_THRESHOLD_NS
                    && b_queue_time_ns > INTER_CLUSTER_THRESHOLD_NS
            }
            PlacementGoal::Deadline(utilization) => {
                let a_key = (
                    a.predicted_deadline_utilization(),
                    a.scale_up_utilization(utilization),
                    a_queue_time_ns,
                );
                let b_key = (
                    b.predicted_deadline_utilization(),
                    b.scale_up_utilization(utilization),
                    b_queue_time_ns,
                );
                a_key < b_key
            }
        }
    }

    /// Whether `queue` is good enough to stop searching.
    fn is_sufficient(self, queue: &PerCpuScheduler) -> bool {
        let queue_time_ok = queue.predicted_queue_time_ns() <= INTRA_CLUSTER_THRESHOLD_NS;
        match self {
            PlacementGoal::Fair => queue_time_ok,
            PlacementGoal::Deadline(utilization) => {
                let scaled = queue.scale_up_utilization(utilization);
                let total = queue.predicted_deadline_utilization() + scaled;
                queue_time_ok && scaled <= THREAD_UTILIZATION_MAX && total <= CPU_UTILIZATION_LIMIT
            }
        }
    }
}

impl SchedulerSet {
    /// Pick the CPU `tid` should be queued on.
    ///
    /// Threads with a migrate function are not moved directly: if a
    /// different CPU wins while their last CPU is still active, the winner is
    /// recorded in `next_cpu` and the last CPU is returned so the migrate
    /// function runs there first.
    pub fn find_target_cpu<P: Platform>(&mut self, p: &P, cpu: CpuNum, tid: Tid) -> CpuNum {
        let active_mask = p.active_cpu_mask();
        let thread = &self.threads[tid];
        let state = &thread.sched;
        let last_cpu = state.last_cpu;

        let mut available = if active_mask.is_empty() {
            CpuMask::of(cpu)
        } else {
            state.effective_cpu_mask(active_mask)
        };
        if available.is_empty() {
            kwarn!(
                "[find_target_cpu] tid {} has no active CPU in affinity {:?}, active {:?}",
                tid,
                state.hard_affinity,
                active_mask
            );
            available = CpuMask::of(cpu);
        }

        let goal = match state.deadline_params() {
            Some(params) => PlacementGoal::Deadline(params.utilization),
            None => PlacementGoal::Fair,
        };
        let starting_cpu = if last_cpu != INVALID_CPU { last_cpu } else { cpu };

        let mut target: Option<CpuNum> = None;
        for entry in self.topology.search_set(starting_cpu).iter() {
            if !available.contains(entry.cpu) {
                continue;
            }
            let candidate = &self.cpus[entry.cpu];
            let better = match target {
                None => true,
                Some(current) => goal.is_better(candidate, &self.cpus[current]),
            };
            if cfg!(feature = "debug_verbose") {
                kdebug!(
                    "[find_target_cpu] tid {} candidate cpu {} queue={}ns util={} better={}",
                    tid,
                    entry.cpu,
                    candidate.predicted_queue_time_ns(),
                    candidate.predicted_deadline_utilization(),
                    better
                );
            }
            if better {
                target = Some(entry.cpu);
                if goal.is_sufficient(candidate) {
                    break;
                }
            }
        }
        crate::kassert!(target.is_some(), "no target CPU for tid {}", tid);
        let target_cpu = target.unwrap_or(cpu);

        let delay_migration = last_cpu != INVALID_CPU
            && last_cpu != target_cpu
            && thread.has_migrate_fn()
            && active_mask.contains(last_cpu);
        if delay_migration {
            self.threads[tid].sched.next_cpu = target_cpu;
            return last_cpu;
        }
        target_cpu
    }

    /// Take a thread from a peer of `cpu` that may run here. The thread is
    /// associated with `cpu` but not queued: it runs next.
    pub(crate) fn steal_work<P: Platform>(
        &mut self,
        p: &P,
        cpu: CpuNum,
        now: SchedTime,
    ) -> Option<Tid> {
        let active_mask = p.active_cpu_mask();
        let Self {
            cpus,
            threads,
            topology,
            ..
        } = self;
        let cluster = cpus[cpu].cluster;
        let thief_scale = cpus[cpu].performance_scale_reciprocal;

        for entry in topology.search_set(cpu).iter() {
            if entry.cpu == cpu || !active_mask.contains(entry.cpu) {
                continue;
            }
            // Only cross clusters when the peer is clearly overloaded.
            if entry.cluster != cluster
                && cpus[entry.cpu].predicted_queue_time_ns() <= INTER_CLUSTER_THRESHOLD_NS
            {
                continue;
            }

            let stolen = find_stealable(cpu, thief_scale, &mut cpus[entry.cpu], threads, active_mask, now);
            let Some(tid) = stolen else {
                continue;
            };

            let victim = &mut cpus[entry.cpu];
            victim.dequeue(threads, tid);
            victim.remove(threads, tid);
            victim.trace_queue_event("steal", tid);

            let thief = &mut cpus[cpu];
            thief.insert(threads, now, tid, Placement::Association);
            thief.stats.steals += 1;
            kdebug!("[steal_work] cpu {} stole tid {} from cpu {}", cpu, tid, entry.cpu);
            return Some(tid);
        }
        None
    }
}

/// Search one peer for a thread the thief may run: eligible deadline
/// threads first, then fair threads. Threads with a migrate function are
/// never stolen.
fn find_stealable(
    thief_cpu: CpuNum,
    thief_scale: SchedPerformanceScale,
    victim: &mut PerCpuScheduler,
    threads: &ThreadTable,
    active_mask: CpuMask,
    now: SchedTime,
) -> Option<Tid> {
    let can_run_here = |tid: Tid| {
        let thread = &threads[tid];
        !thread.has_migrate_fn() && thread.sched.effective_cpu_mask(active_mask).contains(thief_cpu)
    };

    let deadline = victim.deadline_run_queue.find_earliest_eligible(threads, now, |tid| {
        let utilization = threads[tid]
            .sched
            .deadline_params()
            .map_or(SchedUtilization::ZERO, |params| params.utilization);
        can_run_here(tid) && utilization.mul(thief_scale) <= THREAD_UTILIZATION_MAX
    });
    if deadline.is_some() {
        return deadline;
    }

    victim.update_timeline(now);
    let eligible_time = match victim.fair_run_queue.front(threads) {
        Some(front) => victim.virtual_time.max(threads[front].sched.start_time),
        None => victim.virtual_time,
    };
    victim
        .fair_run_queue
        .find_earliest_eligible(threads, eligible_time, can_run_here)
}
