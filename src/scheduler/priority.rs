//! Priority to weight mapping and runtime estimation
//!
//! Fair threads get a share of the CPU proportional to a weight derived
//! from their effective priority. Adjacent priorities differ by roughly
//! 22%, so raising a thread by one level gives it about 1.22x the share of
//! a thread one level below.
//!
//! ## Key Values:
//! - **weight**: `PRIORITY_TO_WEIGHT[p] / 65536`, in (0, 1]
//! - **MIN_WEIGHT**: weight of the lowest priority, the unit of the
//!   virtual timeline
//! - **expected runtime**: per-thread estimate of how long it runs per
//!   activation, used for predicted queue times

use super::config::{EXPECTED_RUNTIME_ALPHA, EXPECTED_RUNTIME_BETA};
use super::types::{SchedDuration, SchedWeight};

/// Lowest thread priority.
pub const LOWEST_PRIORITY: i32 = 0;

/// Highest thread priority.
pub const HIGHEST_PRIORITY: i32 = 31;

/// Priority of newly created threads unless told otherwise.
pub const DEFAULT_PRIORITY: i32 = 16;

/// Priority of per-CPU idle threads.
pub const IDLE_PRIORITY: i32 = LOWEST_PRIORITY;

/// Number of priority levels.
pub const NUM_PRIORITIES: usize = (HIGHEST_PRIORITY - LOWEST_PRIORITY + 1) as usize;

/// Raw weights (16 fractional bits) indexed by priority.
pub const PRIORITY_TO_WEIGHT: [i64; NUM_PRIORITIES] = [
    // 0 to 7
    121, 149, 182, 223, 273, 335, 410, 503,
    // 8 to 15
    616, 754, 924, 1132, 1386, 1698, 2080, 2549,
    // 16 to 23
    3122, 3825, 4685, 5739, 7030, 8612, 10550, 12924,
    // 24 to 31
    15832, 19394, 23757, 29103, 35651, 43672, 53499, 65536,
];

/// Weight of the lowest priority.
pub const MIN_WEIGHT: SchedWeight = SchedWeight::from_raw(PRIORITY_TO_WEIGHT[LOWEST_PRIORITY as usize]);

/// Whether `priority` is a valid level.
#[inline]
pub const fn is_valid_priority(priority: i32) -> bool {
    priority >= LOWEST_PRIORITY && priority <= HIGHEST_PRIORITY
}

/// Map a priority to its fair share weight.
#[inline]
pub fn priority_to_weight(priority: i32) -> SchedWeight {
    crate::kassert!(is_valid_priority(priority), "priority {} out of range", priority);
    SchedWeight::from_raw(PRIORITY_TO_WEIGHT[priority as usize])
}

/// Virtual time a fair thread's request spans: `period / (weight / MIN_WEIGHT)`.
///
/// Equivalent to dividing by `RECIPROCAL_MIN_WEIGHT * weight`, done in
/// integer form to avoid rounding the rate first.
#[inline]
pub fn normalized_duration(period_ns: SchedDuration, weight: SchedWeight) -> SchedDuration {
    crate::kassert!(weight > SchedWeight::ZERO, "non-positive weight {}", weight);
    ((period_ns as i128 * MIN_WEIGHT.raw() as i128) / weight.raw() as i128) as SchedDuration
}

/// Asymmetric exponential update: grow toward a larger sample at rate
/// beta, decay toward a smaller one at rate alpha, never below zero.
#[inline]
pub fn peak_decay_delta(value: SchedDuration, sample: SchedDuration) -> SchedDuration {
    let delta = sample - value;
    let step = if delta >= 0 {
        EXPECTED_RUNTIME_BETA.scale(delta)
    } else {
        EXPECTED_RUNTIME_ALPHA.scale(delta)
    };
    step.max(-value)
}
