//! Migration Tests
//!
//! Tests for affinity-driven migration of running and ready threads,
//! the Before/After/Exiting stages of migrate functions and the CPU
//! offline drain.

#[cfg(test)]
mod tests {
    use crate::mock::*;
    use nexa_sched::scheduler::{
        priority_to_weight, BlockReason, CpuMask, MigrateStage, Mp, SchedParams, SchedWeight,
        DEFAULT_PRIORITY,
    };

    // =========================================================================
    // Affinity Changes
    // =========================================================================

    #[test]
    fn test_ready_thread_moves_when_affinity_excludes_cpu() {
        let sched = make_scheduler(2);
        sched.platform().set_cpu_active(1, false);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let b = spawn_fair(&sched, 0, "b", DEFAULT_PRIORITY);
        sched.platform().set_cpu_active(1, true);
        assert!(is_queued_on(&sched, 0, b));
        sched.platform().take_ipis();

        sched.set_cpu_affinity(0, b, CpuMask::of(1));

        assert!(!is_queued_on(&sched, 0, b));
        assert!(is_queued_on(&sched, 1, b));
        assert_eq!(info(&sched, b).curr_cpu, 1);
        assert!(sched.platform().take_ipis().contains(1));
        assert_eq!(sched.current_thread(0), a);
        assert_eq!(sched.get_total_weight(0), priority_to_weight(DEFAULT_PRIORITY));
        assert_eq!(sched.get_total_weight(1), priority_to_weight(DEFAULT_PRIORITY));
    }

    #[test]
    fn test_running_thread_moves_on_next_reschedule() {
        let sched = make_scheduler(2);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let idle0 = sched.with_locked(|set| set.cpu(0).idle_thread());

        sched.set_cpu_affinity(0, a, CpuMask::of(1));

        assert_eq!(sched.current_thread(0), idle0);
        assert!(is_queued_on(&sched, 1, a));
        assert_eq!(sched.get_total_weight(0), SchedWeight::ZERO);

        sched.reschedule(1);
        assert_eq!(sched.current_thread(1), a);
        assert_eq!(info(&sched, a).last_cpu, 1);
    }

    #[test]
    fn test_affinity_change_within_mask_is_noop() {
        let sched = make_scheduler(2);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        sched.platform().take_ipis();

        sched.set_cpu_affinity(0, a, CpuMask::of(0) | CpuMask::of(1));
        assert_eq!(sched.current_thread(0), a);
        assert!(sched.platform().take_ipis().is_empty());
    }

    #[test]
    fn test_empty_affinity_is_ignored() {
        let sched = make_scheduler(2);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);

        sched.set_cpu_affinity(0, a, CpuMask::EMPTY);
        let hard = sched.with_locked(|set| set.thread(a).unwrap().sched().hard_affinity());
        assert_eq!(hard, CpuMask::ALL);
        assert_eq!(sched.current_thread(0), a);
    }

    // =========================================================================
    // Migrate Functions
    // =========================================================================

    #[test]
    fn test_migrate_fn_brackets_active_migration() {
        let sched = make_scheduler(2);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let stages = record_migrations(&sched, a);

        sched.set_cpu_affinity(0, a, CpuMask::of(1));
        assert_eq!(*stages.lock().unwrap(), vec![MigrateStage::Before]);
        assert!(info(&sched, a).migrate_pending);
        assert!(is_queued_on(&sched, 1, a));

        sched.reschedule(1);
        assert_eq!(sched.current_thread(1), a);
        assert_eq!(*stages.lock().unwrap(), vec![MigrateStage::Before, MigrateStage::After]);
        assert!(!info(&sched, a).migrate_pending);
    }

    #[test]
    fn test_ready_thread_with_migrate_fn_waits_for_origin_cpu() {
        let sched = make_scheduler(2);
        sched.platform().set_cpu_active(1, false);
        let t = spawn_fair(&sched, 0, "t", DEFAULT_PRIORITY);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        sched.platform().advance(MS);
        sched.yield_now(0);
        assert_eq!(sched.current_thread(0), a);
        sched.platform().set_cpu_active(1, true);

        let stages = record_migrations(&sched, t);
        sched.set_cpu_affinity(0, t, CpuMask::of(1));

        // Held on its last CPU until the migrate function can run there.
        let t_info = info(&sched, t);
        assert_eq!(t_info.curr_cpu, 0);
        assert_eq!(t_info.next_cpu, 1);
        assert!(is_queued_on(&sched, 0, t));
        assert!(stages.lock().unwrap().is_empty());

        // CPU 0 picks it at the end of the current slice and hands it over.
        fire_timer(&sched, 0);
        assert_eq!(sched.current_thread(0), a);
        assert!(is_queued_on(&sched, 1, t));
        assert_eq!(*stages.lock().unwrap(), vec![MigrateStage::Before]);

        sched.reschedule(1);
        assert_eq!(sched.current_thread(1), t);
        assert_eq!(*stages.lock().unwrap(), vec![MigrateStage::Before, MigrateStage::After]);
    }

    #[test]
    fn test_exit_calls_exiting_stage() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let stages = record_migrations(&sched, a);

        sched.exit(0);
        assert_eq!(*stages.lock().unwrap(), vec![MigrateStage::Exiting]);
    }

    #[test]
    fn test_clearing_migrate_fn_clears_pending() {
        let sched = make_scheduler(2);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        record_migrations(&sched, a);
        sched.set_cpu_affinity(0, a, CpuMask::of(1));
        assert!(info(&sched, a).migrate_pending);

        sched.set_migrate_fn(a, None);
        assert!(!info(&sched, a).migrate_pending);
    }

    // =========================================================================
    // CPU Offline
    // =========================================================================

    #[test]
    fn test_migrate_unpinned_threads_drains_cpu() {
        let sched = make_scheduler(2);
        sched.platform().set_cpu_active(1, false);

        let sleeper = spawn_fair(&sched, 0, "sleeper", DEFAULT_PRIORITY);
        sched.block(0, BlockReason::Sleeping);
        let sleeper_stages = record_migrations(&sched, sleeper);

        let runner = spawn_fair(&sched, 0, "runner", DEFAULT_PRIORITY);
        let mover = spawn_fair(&sched, 0, "mover", DEFAULT_PRIORITY);
        let pinned = sched.create_thread("pinned", SchedParams::Fair { priority: DEFAULT_PRIORITY });
        force_hard_affinity(&sched, pinned, CpuMask::of(0));
        sched.unblock(0, pinned);
        let mover_stages = record_migrations(&sched, mover);
        sched.platform().set_cpu_active(1, true);
        sched.platform().take_ipis();

        sched.migrate_unpinned_threads(0);

        assert!(!sched.platform().active_cpu_mask().contains(0));
        assert!(sched.platform().take_ipis().contains(1));
        assert!(is_queued_on(&sched, 1, mover));
        assert!(is_queued_on(&sched, 0, pinned));
        assert_eq!(info(&sched, pinned).curr_cpu, 0);
        assert_eq!(sched.current_thread(0), runner);
        assert_eq!(*mover_stages.lock().unwrap(), vec![MigrateStage::Before]);
        assert_eq!(*sleeper_stages.lock().unwrap(), vec![MigrateStage::Before]);

        sched.reschedule(1);
        assert_eq!(sched.current_thread(1), mover);
        assert_eq!(*mover_stages.lock().unwrap(), vec![MigrateStage::Before, MigrateStage::After]);
    }

    #[test]
    fn test_running_thread_leaves_offline_cpu() {
        let sched = make_scheduler(2);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);

        sched.migrate_unpinned_threads(0);
        sched.reschedule(0);

        assert!(is_queued_on(&sched, 1, a));
        sched.reschedule(1);
        assert_eq!(sched.current_thread(1), a);
    }
}
