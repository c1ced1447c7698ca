//! Per-CPU Scheduler Tests
//!
//! Tests for runnable accounting, blocking, preemption control,
//! context-switch bookkeeping, exit/destroy and the diagnostic dump.

#[cfg(test)]
mod tests {
    use crate::mock::*;
    use nexa_sched::scheduler::{
        priority_to_weight, BlockReason, DeadlineParams, SchedParams, SchedWeight, ThreadState,
        DEFAULT_PRIORITY,
    };

    // =========================================================================
    // Accounting
    // =========================================================================

    #[test]
    fn test_runnable_counts_and_weight() {
        let sched = make_scheduler(1);
        spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        spawn_fair(&sched, 0, "b", 20);
        spawn_fair(&sched, 0, "c", 24);
        let params = DeadlineParams::new(MS, 10 * MS, 10 * MS).unwrap();
        let d = sched.create_thread("d", SchedParams::Deadline(params));
        sched.unblock(0, d);

        assert_eq!(sched.get_runnable_tasks(0), 4);
        let expected = priority_to_weight(DEFAULT_PRIORITY) + priority_to_weight(20) + priority_to_weight(24);
        assert_eq!(sched.get_total_weight(0), expected);
        sched.with_locked(|set| {
            assert_eq!(set.cpu(0).runnable_fair_task_count(), 3);
            assert_eq!(set.cpu(0).runnable_deadline_task_count(), 1);
            assert_eq!(accounted_weight(set, 0), expected.raw());
        });
    }

    #[test]
    fn test_block_releases_accounting() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let b = spawn_fair(&sched, 0, "b", 24);

        sched.platform().advance(MS);
        sched.block(0, BlockReason::Blocked);

        assert_eq!(sched.current_thread(0), b);
        assert_eq!(sched.get_total_weight(0), priority_to_weight(24));
        let a_info = info(&sched, a);
        assert_eq!(a_info.state, ThreadState::Blocked);
        assert!(!a_info.active);
        assert!(!a_info.in_queue);
        assert_eq!(a_info.runtime_ns, MS);
    }

    #[test]
    fn test_unblock_list_wakes_every_thread() {
        let sched = make_scheduler(1);
        let tids: Vec<_> = (0..3)
            .map(|i| sched.create_thread(&format!("t{}", i), SchedParams::Fair { priority: DEFAULT_PRIORITY }))
            .collect();
        sched.unblock_list(0, tids.clone());

        assert_eq!(sched.get_runnable_tasks(0), 3);
        assert!(tids.contains(&sched.current_thread(0)));
        for tid in tids {
            assert!(info(&sched, tid).active);
        }
    }

    // =========================================================================
    // Preemption Control
    // =========================================================================

    #[test]
    fn test_reschedule_pends_while_preemption_disabled() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let params = DeadlineParams::new(MS, 5 * MS, 5 * MS).unwrap();
        let d = sched.create_thread("d", SchedParams::Deadline(params));

        sched.preempt_disable(0);
        sched.unblock(0, d);
        assert_eq!(sched.current_thread(0), a);
        assert!(info(&sched, d).in_queue);

        sched.preempt_enable(0);
        assert_eq!(sched.current_thread(0), d);
    }

    #[test]
    fn test_nested_preempt_disable() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let params = DeadlineParams::new(MS, 5 * MS, 5 * MS).unwrap();
        let d = sched.create_thread("d", SchedParams::Deadline(params));

        sched.preempt_disable(0);
        sched.preempt_disable(0);
        sched.unblock(0, d);
        sched.preempt_enable(0);
        assert_eq!(sched.current_thread(0), a);
        sched.preempt_enable(0);
        assert_eq!(sched.current_thread(0), d);
    }

    // =========================================================================
    // Context Switches
    // =========================================================================

    #[test]
    fn test_context_switch_reaches_platform() {
        let sched = make_scheduler(1);
        let idle = sched.with_locked(|set| set.cpu(0).idle_thread());
        let a = sched.create_thread("a", SchedParams::Fair { priority: DEFAULT_PRIORITY });
        sched.set_address_space(a, 7);
        sched.unblock(0, a);

        assert_eq!(sched.platform().switches(), vec![(0, idle, a)]);
        assert_eq!(sched.platform().aspace_switches(), vec![(0, 0, 7)]);

        let b = sched.create_thread("b", SchedParams::Fair { priority: DEFAULT_PRIORITY });
        sched.set_address_space(b, 7);
        sched.unblock(0, b);
        sched.platform().advance(MS);
        sched.yield_now(0);

        assert_eq!(sched.current_thread(0), b);
        assert_eq!(sched.platform().switches().last(), Some(&(0, a, b)));
        // Same address space: no switch.
        assert_eq!(sched.platform().aspace_switches().len(), 1);

        let stats = sched.with_locked(|set| *set.cpu(0).stats());
        assert_eq!(stats.context_switches, 2);
        assert_eq!(stats.samples, 2);
    }

    #[test]
    fn test_idle_time_is_accounted() {
        let sched = make_scheduler(1);
        sched.platform().advance(4 * MS);
        spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);

        let stats = sched.with_locked(|set| *set.cpu(0).stats());
        // Idle has been current since the epoch.
        assert_eq!(stats.idle_time_ns, START_NS + 4 * MS);
    }

    // =========================================================================
    // Exit and Destroy
    // =========================================================================

    #[test]
    fn test_exit_then_destroy() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        assert_eq!(sched.destroy_thread(a), Err("thread has not exited"));

        sched.exit(0);
        assert_eq!(info(&sched, a).state, ThreadState::Death);
        assert_eq!(sched.get_total_weight(0), SchedWeight::ZERO);

        assert_eq!(sched.destroy_thread(a), Ok(()));
        assert!(sched.thread_info(a).is_none());
        assert_eq!(sched.destroy_thread(a), Err("unknown thread"));
    }

    #[test]
    fn test_destroyed_thread_id_is_reused() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        sched.exit(0);
        sched.destroy_thread(a).unwrap();

        let b = sched.create_thread("b", SchedParams::Fair { priority: 20 });
        assert_eq!(b, a);
        let b_info = info(&sched, b);
        assert_eq!(b_info.name, "b");
        assert_eq!(b_info.state, ThreadState::Initial);
        assert_eq!(b_info.base_priority, 20);
        assert_eq!(b_info.runtime_ns, 0);
        assert!(!b_info.active);
    }

    #[test]
    fn test_idle_thread_cannot_be_destroyed() {
        let sched = make_scheduler(1);
        let idle = sched.with_locked(|set| set.cpu(0).idle_thread());
        assert!(sched.destroy_thread(idle).is_err());
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    #[test]
    fn test_dump_lists_active_and_queued_threads() {
        let sched = make_scheduler(1);
        spawn_fair(&sched, 0, "worker", DEFAULT_PRIORITY);
        spawn_fair(&sched, 0, "waiter", DEFAULT_PRIORITY);

        let text = sched.dump(0);
        assert!(text.starts_with("cpu 0 cluster 0:"));
        assert!(text.contains("active: tid="));
        assert!(text.contains("'worker'"));
        assert!(text.contains("fair: tid="));
        assert!(text.contains("'waiter'"));
        assert_eq!(sched.dump_all(), text);
    }

    #[test]
    fn test_dump_of_idle_cpu() {
        let sched = make_scheduler(2);
        let text = sched.dump(1);
        assert!(text.contains("active: idle"));
        assert!(sched.dump_all().contains("cpu 1 cluster 0:"));
    }
}
