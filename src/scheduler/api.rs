//! Locked scheduler front end
//!
//! `Scheduler` pairs the platform with the `SchedulerSet` behind the global
//! scheduler lock. Each operation takes the lock, runs to completion and
//! releases it; remote CPUs learn about the outcome through reschedule
//! IPIs issued by the platform.

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use super::config::{SchedConfig, Topology};
use super::core::SchedulerSet;
use super::platform::Platform;
use super::stats::ThreadInfo;
use super::thread::MigrateFn;
use super::types::{
    AspaceId, BlockReason, CpuMask, CpuNum, DeadlineParams, SchedParams, SchedTime, SchedWeight,
    Tid,
};

/// The scheduler of one machine.
pub struct Scheduler<P: Platform> {
    platform: P,
    inner: Mutex<SchedulerSet>,
}

impl<P: Platform> Scheduler<P> {
    pub fn new(platform: P, topology: Topology, config: SchedConfig) -> Result<Self, &'static str> {
        let set = SchedulerSet::new(topology, config)?;
        Ok(Self {
            platform,
            inner: Mutex::new(set),
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Run `f` with the scheduler lock held.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut SchedulerSet) -> R) -> R {
        f(&mut self.inner.lock())
    }

    // ========================================================================
    // Thread lifecycle
    // ========================================================================

    pub fn create_thread(&self, name: &str, params: SchedParams) -> Tid {
        self.inner.lock().create_thread(name, params)
    }

    pub fn destroy_thread(&self, tid: Tid) -> Result<(), &'static str> {
        self.inner.lock().destroy_thread(tid)
    }

    pub fn unblock(&self, cpu: CpuNum, tid: Tid) {
        self.inner.lock().unblock(&self.platform, cpu, tid);
    }

    pub fn unblock_list(&self, cpu: CpuNum, tids: Vec<Tid>) {
        self.inner.lock().unblock_list(&self.platform, cpu, tids);
    }

    pub fn block(&self, cpu: CpuNum, reason: BlockReason) {
        self.inner.lock().block(&self.platform, cpu, reason);
    }

    pub fn yield_now(&self, cpu: CpuNum) {
        self.inner.lock().yield_now(&self.platform, cpu);
    }

    pub fn preempt(&self, cpu: CpuNum) {
        self.inner.lock().preempt(&self.platform, cpu);
    }

    pub fn reschedule(&self, cpu: CpuNum) {
        self.inner.lock().reschedule(&self.platform, cpu);
    }

    pub fn timer_tick(&self, cpu: CpuNum) {
        self.inner.lock().timer_tick(&self.platform, cpu);
    }

    pub fn exit(&self, cpu: CpuNum) {
        self.inner.lock().exit(&self.platform, cpu);
    }

    pub fn preempt_disable(&self, cpu: CpuNum) {
        self.inner.lock().preempt_disable(cpu);
    }

    pub fn preempt_enable(&self, cpu: CpuNum) {
        self.inner.lock().preempt_enable(&self.platform, cpu);
    }

    // ========================================================================
    // Placement and parameters
    // ========================================================================

    pub fn migrate(&self, cpu: CpuNum, tid: Tid) {
        self.inner.lock().migrate(&self.platform, cpu, tid);
    }

    pub fn migrate_unpinned_threads(&self, cpu: CpuNum) {
        self.inner.lock().migrate_unpinned_threads(&self.platform, cpu);
    }

    pub fn set_cpu_affinity(&self, cpu: CpuNum, tid: Tid, mask: CpuMask) {
        self.inner.lock().set_cpu_affinity(&self.platform, cpu, tid, mask);
    }

    pub fn set_soft_cpu_affinity(&self, cpu: CpuNum, tid: Tid, mask: CpuMask) {
        self.inner.lock().set_soft_cpu_affinity(&self.platform, cpu, tid, mask);
    }

    pub fn set_migrate_fn(&self, tid: Tid, migrate_fn: Option<MigrateFn>) {
        self.inner.lock().set_migrate_fn(tid, migrate_fn);
    }

    pub fn set_address_space(&self, tid: Tid, aspace: AspaceId) {
        self.inner.lock().set_address_space(tid, aspace);
    }

    pub fn change_priority(&self, cpu: CpuNum, tid: Tid, priority: i32) {
        self.inner.lock().change_priority(&self.platform, cpu, tid, priority);
    }

    pub fn inherit_priority(&self, cpu: CpuNum, tid: Tid, priority: i32) {
        self.inner.lock().inherit_priority(&self.platform, cpu, tid, priority);
    }

    pub fn change_deadline(&self, cpu: CpuNum, tid: Tid, params: DeadlineParams) {
        self.inner.lock().change_deadline(&self.platform, cpu, tid, params);
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn current_thread(&self, cpu: CpuNum) -> Tid {
        self.inner.lock().current_thread(cpu)
    }

    pub fn thread_info(&self, tid: Tid) -> Option<ThreadInfo> {
        self.inner.lock().thread_info(tid)
    }

    pub fn get_runnable_tasks(&self, cpu: CpuNum) -> i64 {
        self.inner.lock().get_runnable_tasks(cpu)
    }

    pub fn get_total_weight(&self, cpu: CpuNum) -> SchedWeight {
        self.inner.lock().get_total_weight(cpu)
    }

    pub fn target_preemption_time(&self, cpu: CpuNum) -> SchedTime {
        self.inner.lock().target_preemption_time(cpu)
    }

    pub fn dump(&self, cpu: CpuNum) -> String {
        self.inner.lock().dump(cpu)
    }

    pub fn dump_all(&self) -> String {
        self.inner.lock().dump_all()
    }
}
