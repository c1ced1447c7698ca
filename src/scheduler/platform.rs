//! Platform collaborators
//!
//! The scheduler decides; the platform acts. Clock reads, per-CPU
//! preemption timers, inter-processor reschedule requests, the idle/busy
//! bookkeeping of the MP layer, the actual context switch and the
//! wait-queue priority propagation are all supplied by the embedding
//! kernel through these traits.
//!
//! All methods are called with the global scheduler lock held and must not
//! call back into the scheduler.

use super::types::{AspaceId, CpuMask, CpuNum, PropagatePi, SchedTime, Tid};

/// Monotonic time source.
pub trait Clock {
    fn now(&self) -> SchedTime;
}

/// Per-CPU one-shot preemption timer.
pub trait PreemptTimer {
    /// Arm (or re-arm) the preemption timer of `cpu` for `deadline`.
    /// `SCHED_TIME_INFINITE` disarms it.
    fn preempt_reset(&self, cpu: CpuNum, deadline: SchedTime);

    /// Whether the preemption timer of `cpu` is armed.
    fn preempt_armed(&self, cpu: CpuNum) -> bool;
}

/// Multiprocessor state.
pub trait Mp {
    /// CPUs currently accepting threads.
    fn active_cpu_mask(&self) -> CpuMask;

    fn set_cpu_active(&self, cpu: CpuNum, active: bool);

    /// Ask every CPU in `mask` to reschedule.
    fn reschedule_ipi(&self, mask: CpuMask);

    fn set_cpu_busy(&self, cpu: CpuNum);

    fn set_cpu_idle(&self, cpu: CpuNum);
}

/// Low-level switch between threads on one CPU.
pub trait ContextSwitch {
    fn switch_address_space(&self, cpu: CpuNum, from: AspaceId, to: AspaceId);

    fn switch_context(&self, cpu: CpuNum, prev: Tid, next: Tid);
}

/// Wait-queue side of priority inheritance.
pub trait WaitQueueHook {
    /// A thread blocked in a wait queue changed priority.
    fn update_priority_if_blocked(&self, tid: Tid, original_priority: i32, propagate: PropagatePi);
}

/// Everything the scheduler needs from the platform.
pub trait Platform: Clock + PreemptTimer + Mp + ContextSwitch + WaitQueueHook {}

impl<T> Platform for T where T: Clock + PreemptTimer + Mp + ContextSwitch + WaitQueueHook {}
