#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod logger;
pub mod scheduler;

pub use scheduler::{
    CpuMask, DeadlineParams, Platform, SchedConfig, SchedParams, Scheduler, SchedulerSet, Tid,
    Topology,
};
