//! Scheduler statistics and debugging functions
//!
//! Per-CPU counters, thread snapshots and the textual dump used by kernel
//! debug shells.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use super::core::SchedulerSet;
use super::percpu::PerCpuScheduler;
use super::types::{
    CpuNum, Discipline, SchedDuration, SchedTime, SchedWeight, ThreadState, Tid,
};

/// Per-CPU statistics for monitoring
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerCpuStats {
    pub reschedules: u64,
    pub context_switches: u64,
    pub idle_time_ns: SchedDuration,
    /// Threads this CPU took from its peers.
    pub steals: u64,

    // Load samples taken at every context switch.
    pub demand_total: i64,
    pub runnable_total: i64,
    pub latency_total_ns: SchedDuration,
    pub samples: u64,
}

impl PerCpuStats {
    pub const fn new() -> Self {
        Self {
            reschedules: 0,
            context_switches: 0,
            idle_time_ns: 0,
            steals: 0,
            demand_total: 0,
            runnable_total: 0,
            latency_total_ns: 0,
            samples: 0,
        }
    }

    /// Record the fair demand, runnable count and queue latency seen when a
    /// new thread is switched in.
    pub fn record_sample(&mut self, demand: SchedWeight, runnable: i64, queue_time_ns: SchedDuration) {
        self.demand_total += demand.raw();
        self.runnable_total += runnable;
        self.latency_total_ns += queue_time_ns;
        self.samples += 1;
    }

    /// Mean queue latency over all samples.
    pub fn average_latency_ns(&self) -> SchedDuration {
        if self.samples == 0 {
            0
        } else {
            self.latency_total_ns / self.samples as i64
        }
    }
}

/// Point-in-time view of one thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    pub discipline: Discipline,
    pub base_priority: i32,
    pub inherited_priority: i32,
    pub effective_priority: i32,
    pub weight: SchedWeight,
    pub start_time: SchedTime,
    pub finish_time: SchedTime,
    pub time_slice_ns: SchedDuration,
    pub curr_cpu: CpuNum,
    pub last_cpu: CpuNum,
    pub next_cpu: CpuNum,
    pub expected_runtime_ns: SchedDuration,
    pub runtime_ns: SchedDuration,
    pub migrate_pending: bool,
    pub active: bool,
    pub in_queue: bool,
}

impl SchedulerSet {
    pub fn thread_info(&self, tid: Tid) -> Option<ThreadInfo> {
        let thread = self.threads.get(tid)?;
        let state = &thread.sched;
        Some(ThreadInfo {
            tid,
            name: String::from(thread.name()),
            state: thread.state,
            discipline: state.discipline(),
            base_priority: state.base_priority,
            inherited_priority: state.inherited_priority,
            effective_priority: state.effective_priority,
            weight: state.weight(),
            start_time: state.start_time,
            finish_time: state.finish_time,
            time_slice_ns: state.time_slice_ns,
            curr_cpu: state.curr_cpu,
            last_cpu: state.last_cpu,
            next_cpu: state.next_cpu,
            expected_runtime_ns: state.expected_runtime_ns,
            runtime_ns: state.runtime_ns,
            migrate_pending: thread.migrate_pending,
            active: state.active(),
            in_queue: state.in_queue(),
        })
    }

    /// Runnable threads associated with `cpu`, fair and deadline.
    pub fn get_runnable_tasks(&self, cpu: CpuNum) -> i64 {
        let sched = &self.cpus[cpu];
        sched.runnable_fair_task_count + sched.runnable_deadline_task_count
    }

    /// Total fair weight associated with `cpu`.
    pub fn get_total_weight(&self, cpu: CpuNum) -> SchedWeight {
        self.cpus[cpu].weight_total
    }

    pub fn target_preemption_time(&self, cpu: CpuNum) -> SchedTime {
        self.cpus[cpu].target_preemption_time_ns
    }

    /// Render the state of one CPU: aggregates, the active thread and both
    /// run queues in tree order.
    pub fn dump(&self, cpu: CpuNum) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.dump_into(&mut out, &self.cpus[cpu]);
        out
    }

    /// `dump` for every CPU.
    pub fn dump_all(&self) -> String {
        let mut out = String::new();
        for sched in &self.cpus {
            let _ = self.dump_into(&mut out, sched);
        }
        out
    }

    fn dump_into(&self, out: &mut String, sched: &PerCpuScheduler) -> core::fmt::Result {
        writeln!(
            out,
            "cpu {} cluster {}: weight_total={} fair={} deadline={} vtime={} period={} grans",
            sched.cpu,
            sched.cluster,
            sched.weight_total,
            sched.runnable_fair_task_count,
            sched.runnable_deadline_task_count,
            sched.virtual_time,
            sched.scheduling_period_grans
        )?;
        writeln!(
            out,
            "  utilization={} expected_runtime={}ns target_preemption={} switches={} steals={}",
            sched.total_deadline_utilization,
            sched.total_expected_runtime_ns,
            sched.target_preemption_time_ns,
            sched.stats.context_switches,
            sched.stats.steals
        )?;

        let active = &self.threads[sched.active_thread];
        if active.idle {
            writeln!(out, "  active: idle")?;
        } else {
            self.dump_thread(out, "active", sched.active_thread)?;
        }

        let fair: Vec<Tid> = sched.fair_run_queue.iter_ids(&self.threads);
        for tid in fair {
            self.dump_thread(out, "fair", tid)?;
        }
        let deadline: Vec<Tid> = sched.deadline_run_queue.iter_ids(&self.threads);
        for tid in deadline {
            self.dump_thread(out, "deadline", tid)?;
        }
        Ok(())
    }

    fn dump_thread(&self, out: &mut String, label: &str, tid: Tid) -> core::fmt::Result {
        let thread = &self.threads[tid];
        let state = &thread.sched;
        match state.deadline_params() {
            Some(params) => writeln!(
                out,
                "  {}: tid={} '{}' {} cap={} deadline={} period={} start={} finish={} slice={}",
                label,
                tid,
                thread.name(),
                state.discipline().as_str(),
                params.capacity_ns,
                params.deadline_ns,
                params.period_ns,
                state.start_time,
                state.finish_time,
                state.time_slice_ns
            ),
            None => writeln!(
                out,
                "  {}: tid={} '{}' {} prio={} weight={} start={} finish={} slice={}",
                label,
                tid,
                thread.name(),
                state.discipline().as_str(),
                state.effective_priority,
                state.weight(),
                state.start_time,
                state.finish_time,
                state.time_slice_ns
            ),
        }
    }

    /// Print per-CPU statistics for all CPUs
    pub fn list_percpu_stats(&self) {
        crate::kinfo!("=== Per-CPU Scheduler Statistics ({} CPUs) ===", self.cpus.len());
        for sched in &self.cpus {
            let stats = &sched.stats;
            crate::kinfo!(
                "cpu {:<3} resched={:<8} switches={:<8} steals={:<6} idle={}ms latency={}us",
                sched.cpu,
                stats.reschedules,
                stats.context_switches,
                stats.steals,
                stats.idle_time_ns / 1_000_000,
                stats.average_latency_ns() / 1_000
            );
        }
    }
}
