//! Scheduler subsystem
//!
//! Per-CPU thread scheduler with two cooperating disciplines:
//! weighted-fair scheduling on a per-CPU virtual timeline, and
//! earliest-deadline-first scheduling for threads with
//! (capacity, deadline, period) reservations.
//!
//! ## Key Features:
//! - **Eligibility trees**: balanced trees ordered by start time and
//!   augmented with the minimum finish time of each subtree, giving an
//!   O(log n) "earliest eligible" lookup for both disciplines
//! - **Deadline first**: an eligible deadline thread always runs before
//!   any fair thread
//! - **Cluster-aware placement**: threads are placed by predicted queue
//!   time (fair) or utilization (deadline), preferring cache-warm CPUs
//! - **Work stealing**: a CPU with nothing to run pulls work from its peers
//! - **Migration**: affinity changes, CPU offlining and per-thread migrate
//!   functions with paired Before/After callbacks
//! - **Priority inheritance**: effective priority = max(base, inherited)
//!
//! ## Per-CPU Architecture
//!
//! Every CPU owns a `PerCpuScheduler`; all of them, together with the
//! thread arena, live in one `SchedulerSet` behind the global scheduler
//! lock. Every operation names the CPU it runs on. Remote CPUs are told
//! to reschedule with IPIs through the `Platform`.
//!
//! ## Module Organization
//!
//! - `types`: Time, CPU mask, thread state and parameter types
//! - `fixed`: Fixed-point arithmetic for weights and utilizations
//! - `priority`: Priority to weight table and runtime estimation
//! - `config`: Policy constants, runtime configuration and CPU topology
//! - `state`: Per-thread scheduler state
//! - `thread`: Thread records and the thread arena
//! - `run_queue`: Augmented eligibility trees
//! - `percpu`: Per-CPU scheduler state, insert/remove and queueing
//! - `fair`: Weighted fair discipline
//! - `deadline`: Deadline (EDF) discipline
//! - `core`: Thread lifecycle and the reschedule path
//! - `smp`: CPU selection and work stealing
//! - `migrate`: Migration and priority inheritance
//! - `stats`: Statistics and debugging functions
//! - `platform`: Collaborator traits supplied by the kernel
//! - `api`: The locked `Scheduler` front end

mod api;
pub mod config;
mod core;
mod deadline;
mod fair;
pub mod fixed;
mod migrate;
pub mod percpu;
pub mod platform;
pub mod priority;
pub mod run_queue;
mod smp;
pub mod state;
mod stats;
pub mod thread;
pub mod types;

// Re-export the front end and the lock-held state
pub use self::api::Scheduler;
pub use self::core::SchedulerSet;

// Re-export configuration
pub use config::{
    SchedConfig, Topology, CPU_UTILIZATION_LIMIT, DEFAULT_MINIMUM_GRANULARITY_NS,
    DEFAULT_TARGET_LATENCY_NS, INTER_CLUSTER_THRESHOLD_NS, INTRA_CLUSTER_THRESHOLD_NS, MAX_CPUS,
    THREAD_UTILIZATION_MAX,
};

// Re-export types
pub use fixed::Fixed;
pub use types::{
    AspaceId, BlockReason, CpuMask, CpuNum, DeadlineParams, Discipline, MigrateStage, Placement,
    PropagatePi, SchedDuration, SchedParams, SchedPerformanceScale, SchedRemainder, SchedTime,
    SchedUtilization, SchedWeight, ThreadState, Tid, INVALID_CPU, SCHED_TIME_INFINITE,
};

// Re-export priorities
pub use priority::{
    priority_to_weight, DEFAULT_PRIORITY, HIGHEST_PRIORITY, IDLE_PRIORITY, LOWEST_PRIORITY,
};

// Re-export thread and per-CPU views
pub use percpu::PerCpuScheduler;
pub use run_queue::{QueueArena, RunQueue};
pub use state::SchedulerState;
pub use thread::{MigrateFn, Thread, ThreadTable};

// Re-export platform traits
pub use platform::{Clock, ContextSwitch, Mp, Platform, PreemptTimer, WaitQueueHook};

// Re-export statistics
pub use stats::{PerCpuStats, ThreadInfo};
