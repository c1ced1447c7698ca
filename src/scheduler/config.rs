//! Scheduler configuration
//!
//! Compile-time policy constants plus the runtime tunables and CPU
//! topology handed to `Scheduler::new`.

use alloc::vec::Vec;

use super::types::{CpuNum, SchedDuration, SchedPerformanceScale, SchedUtilization};

/// Maximum number of logical CPUs (width of `CpuMask`).
pub const MAX_CPUS: usize = 32;

/// Default minimum time slice granule.
pub const DEFAULT_MINIMUM_GRANULARITY_NS: SchedDuration = 1_000_000; // 1ms

/// Default target scheduling latency.
pub const DEFAULT_TARGET_LATENCY_NS: SchedDuration = 16_000_000; // 16ms

/// Predicted queue time below which a CPU in the same cluster is good enough.
pub const INTRA_CLUSTER_THRESHOLD_NS: SchedDuration = 25_000; // 25us

/// Predicted queue time a CPU in another cluster must exceed before it is stolen from.
pub const INTER_CLUSTER_THRESHOLD_NS: SchedDuration = 2_000_000; // 2ms

/// Maximum utilization a single deadline thread may have on a CPU.
pub const THREAD_UTILIZATION_MAX: SchedUtilization = SchedUtilization::ONE;

/// Maximum deadline utilization a CPU accepts.
pub const CPU_UTILIZATION_LIMIT: SchedUtilization = SchedUtilization::ONE;

/// Expected runtime decay rate when a thread runs less than predicted.
pub const EXPECTED_RUNTIME_ALPHA: SchedUtilization = SchedUtilization::from_ratio(1, 4);

/// Expected runtime growth rate when a thread runs more than predicted.
pub const EXPECTED_RUNTIME_BETA: SchedUtilization = SchedUtilization::from_ratio(1, 2);

/// Runtime tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedConfig {
    /// Smallest time slice a fair thread receives.
    pub minimum_granularity_ns: SchedDuration,
    /// Period within which every runnable fair thread should run once.
    pub target_latency_ns: SchedDuration,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            minimum_granularity_ns: DEFAULT_MINIMUM_GRANULARITY_NS,
            target_latency_ns: DEFAULT_TARGET_LATENCY_NS,
        }
    }
}

impl SchedConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.minimum_granularity_ns <= 0 {
            return Err("minimum granularity must be positive");
        }
        if self.target_latency_ns < self.minimum_granularity_ns {
            return Err("target latency shorter than minimum granularity");
        }
        Ok(())
    }

    /// Target latency expressed in minimum granules.
    pub fn target_latency_grans(&self) -> i64 {
        self.target_latency_ns / self.minimum_granularity_ns
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Static description of one logical CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuDescriptor {
    pub cluster: u32,
    pub performance_scale: SchedPerformanceScale,
}

/// One step of a CPU search order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchEntry {
    pub cpu: CpuNum,
    pub cluster: u32,
}

/// Order in which CPUs are considered when placing or stealing from the
/// point of view of one CPU: itself, its cluster, then the rest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuSearchSet {
    entries: Vec<SearchEntry>,
}

impl CpuSearchSet {
    pub fn iter(&self) -> impl Iterator<Item = &SearchEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn build(origin: CpuNum, cpus: &[CpuDescriptor]) -> Self {
        let count = cpus.len();
        let home = cpus[origin].cluster;
        let rotation = (0..count).map(|distance| (origin + distance) % count);

        let mut entries: Vec<SearchEntry> = rotation
            .clone()
            .filter(|&cpu| cpus[cpu].cluster == home)
            .map(|cpu| SearchEntry { cpu, cluster: home })
            .collect();
        entries.extend(
            rotation
                .filter(|&cpu| cpus[cpu].cluster != home)
                .map(|cpu| SearchEntry { cpu, cluster: cpus[cpu].cluster }),
        );
        Self { entries }
    }
}

/// CPU topology: clusters, relative performance and search orders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    cpus: Vec<CpuDescriptor>,
    search_sets: Vec<CpuSearchSet>,
}

impl Topology {
    /// `count` identical CPUs in one cluster.
    pub fn uniform(count: usize) -> Result<Self, &'static str> {
        let clusters: Vec<u32> = (0..count).map(|_| 0).collect();
        Self::clustered(&clusters)
    }

    /// One CPU per entry, each tagged with its cluster id.
    pub fn clustered(clusters: &[u32]) -> Result<Self, &'static str> {
        if clusters.is_empty() {
            return Err("topology has no CPUs");
        }
        if clusters.len() > MAX_CPUS {
            return Err("topology exceeds MAX_CPUS");
        }
        let cpus = clusters
            .iter()
            .map(|&cluster| CpuDescriptor {
                cluster,
                performance_scale: SchedPerformanceScale::ONE,
            })
            .collect();
        let mut topology = Self {
            cpus,
            search_sets: Vec::new(),
        };
        topology.rebuild_search_sets();
        Ok(topology)
    }

    /// Set the relative performance of one CPU.
    pub fn with_performance_scale(
        mut self,
        cpu: CpuNum,
        scale: SchedPerformanceScale,
    ) -> Result<Self, &'static str> {
        if cpu >= self.cpus.len() {
            return Err("performance scale for unknown CPU");
        }
        if scale <= SchedPerformanceScale::ZERO || scale > SchedPerformanceScale::ONE {
            return Err("performance scale must be in (0, 1]");
        }
        self.cpus[cpu].performance_scale = scale;
        Ok(self)
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, cpu: CpuNum) -> &CpuDescriptor {
        &self.cpus[cpu]
    }

    pub fn search_set(&self, cpu: CpuNum) -> &CpuSearchSet {
        &self.search_sets[cpu]
    }

    fn rebuild_search_sets(&mut self) {
        self.search_sets = (0..self.cpus.len())
            .map(|cpu| CpuSearchSet::build(cpu, &self.cpus))
            .collect();
    }
}
