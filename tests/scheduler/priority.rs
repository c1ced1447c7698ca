//! Priority Tests
//!
//! Tests for base and inherited priorities, weight changes in every
//! thread state, the wait-queue hook and switching between disciplines.

#[cfg(test)]
mod tests {
    use crate::mock::*;
    use nexa_sched::scheduler::{
        priority_to_weight, BlockReason, DeadlineParams, Discipline, PropagatePi, SchedParams,
        SchedUtilization, SchedWeight, DEFAULT_PRIORITY, HIGHEST_PRIORITY,
    };

    // =========================================================================
    // Base Priority
    // =========================================================================

    #[test]
    fn test_change_priority_of_running_thread() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);

        sched.change_priority(0, a, 24);

        assert_eq!(sched.current_thread(0), a);
        assert_eq!(sched.get_total_weight(0), priority_to_weight(24));
        let a_info = info(&sched, a);
        assert_eq!(a_info.base_priority, 24);
        assert_eq!(a_info.effective_priority, 24);
        assert_eq!(a_info.weight, priority_to_weight(24));
    }

    #[test]
    fn test_change_priority_requeues_ready_thread() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        let b = spawn_fair(&sched, 0, "b", DEFAULT_PRIORITY);

        sched.change_priority(0, b, 28);

        assert_eq!(sched.current_thread(0), a);
        assert!(info(&sched, b).in_queue);
        let expected = priority_to_weight(DEFAULT_PRIORITY) + priority_to_weight(28);
        assert_eq!(sched.get_total_weight(0), expected);
        sched.with_locked(|set| assert_eq!(accounted_weight(set, 0), expected.raw()));
    }

    #[test]
    fn test_idle_thread_priority_is_fixed() {
        let sched = make_scheduler(1);
        let idle = sched.with_locked(|set| set.cpu(0).idle_thread());

        sched.change_priority(0, idle, 20);
        assert_eq!(info(&sched, idle).effective_priority, 0);
    }

    // =========================================================================
    // Inheritance
    // =========================================================================

    #[test]
    fn test_effective_priority_is_max_of_base_and_inherited() {
        let sched = make_scheduler(1);
        let t = sched.create_thread("t", SchedParams::Fair { priority: DEFAULT_PRIORITY });

        sched.inherit_priority(0, t, 20);
        assert_eq!(info(&sched, t).effective_priority, 20);
        assert_eq!(info(&sched, t).weight, priority_to_weight(20));

        sched.inherit_priority(0, t, 10);
        assert_eq!(info(&sched, t).effective_priority, DEFAULT_PRIORITY);

        sched.inherit_priority(0, t, -1);
        assert_eq!(info(&sched, t).effective_priority, DEFAULT_PRIORITY);

        // A lower base stays masked by the inherited level.
        sched.inherit_priority(0, t, 20);
        sched.change_priority(0, t, 12);
        let t_info = info(&sched, t);
        assert_eq!(t_info.base_priority, 12);
        assert_eq!(t_info.effective_priority, 20);

        sched.inherit_priority(0, t, -1);
        let t_info = info(&sched, t);
        assert_eq!(t_info.effective_priority, 12);
        assert_eq!(t_info.weight, priority_to_weight(12));
    }

    #[test]
    fn test_deadline_threads_ignore_inheritance() {
        let sched = make_scheduler(1);
        let params = DeadlineParams::new(MS, 10 * MS, 10 * MS).unwrap();
        let d = sched.create_thread("d", SchedParams::Deadline(params));

        sched.inherit_priority(0, d, 20);
        let d_info = info(&sched, d);
        assert_eq!(d_info.discipline, Discipline::Deadline);
        assert_eq!(d_info.inherited_priority, -1);
        assert_eq!(d_info.effective_priority, HIGHEST_PRIORITY);
    }

    #[test]
    fn test_inherited_priority_boosts_running_thread() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);

        sched.inherit_priority(0, a, 28);
        assert_eq!(sched.current_thread(0), a);
        assert_eq!(sched.get_total_weight(0), priority_to_weight(28));

        sched.inherit_priority(0, a, -1);
        assert_eq!(sched.get_total_weight(0), priority_to_weight(DEFAULT_PRIORITY));
    }

    // =========================================================================
    // Blocked Threads
    // =========================================================================

    #[test]
    fn test_blocked_thread_notifies_wait_queue() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        sched.block(0, BlockReason::Blocked);

        sched.change_priority(0, a, 20);
        sched.inherit_priority(0, a, 24);

        assert_eq!(
            sched.platform().wait_queue_updates(),
            vec![(a, DEFAULT_PRIORITY, PropagatePi::Yes), (a, 20, PropagatePi::No)]
        );
        assert_eq!(info(&sched, a).weight, priority_to_weight(24));
    }

    #[test]
    fn test_sleeping_thread_has_no_wait_queue() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        sched.block(0, BlockReason::Sleeping);

        sched.change_priority(0, a, 20);
        assert!(sched.platform().wait_queue_updates().is_empty());
        assert_eq!(info(&sched, a).weight, priority_to_weight(20));
    }

    // =========================================================================
    // Discipline Changes
    // =========================================================================

    #[test]
    fn test_change_deadline_of_running_fair_thread() {
        let sched = make_scheduler(1);
        let a = spawn_fair(&sched, 0, "a", DEFAULT_PRIORITY);
        sched.platform().advance(MS);

        let params = DeadlineParams::new(2 * MS, 10 * MS, 10 * MS).unwrap();
        sched.change_deadline(0, a, params);

        let a_info = info(&sched, a);
        assert_eq!(a_info.discipline, Discipline::Deadline);
        assert_eq!(a_info.effective_priority, HIGHEST_PRIORITY);
        // Arrival is the start of the slice it was running.
        assert_eq!(a_info.start_time, START_NS);
        assert_eq!(a_info.finish_time, START_NS + 10 * MS);
        assert_eq!(sched.current_thread(0), a);
        assert_eq!(sched.get_total_weight(0), SchedWeight::ZERO);
        assert_eq!(sched.platform().timer(0), START_NS + 2 * MS);
        sched.with_locked(|set| {
            assert_eq!(set.cpu(0).runnable_fair_task_count(), 0);
            assert_eq!(set.cpu(0).runnable_deadline_task_count(), 1);
            assert_eq!(set.cpu(0).total_deadline_utilization(), params.utilization);
        });
    }

    #[test]
    fn test_change_priority_of_deadline_thread_makes_it_fair() {
        let sched = make_scheduler(1);
        let params = DeadlineParams::new(2 * MS, 10 * MS, 10 * MS).unwrap();
        let d = sched.create_thread("d", SchedParams::Deadline(params));
        sched.unblock(0, d);

        sched.change_priority(0, d, 20);

        let d_info = info(&sched, d);
        assert_eq!(d_info.discipline, Discipline::Fair);
        assert_eq!(d_info.effective_priority, 20);
        assert_eq!(sched.current_thread(0), d);
        assert_eq!(sched.get_total_weight(0), priority_to_weight(20));
        assert_eq!(sched.platform().timer(0), START_NS + 16 * MS);
        let utilization = sched.with_locked(|set| set.cpu(0).total_deadline_utilization());
        assert_eq!(utilization, SchedUtilization::ZERO);
    }

    #[test]
    fn test_change_deadline_of_queued_deadline_thread() {
        let sched = make_scheduler(1);
        let first = DeadlineParams::new(MS, 4 * MS, 10 * MS).unwrap();
        let running = sched.create_thread("running", SchedParams::Deadline(first));
        sched.unblock(0, running);
        let second = DeadlineParams::new(MS, 8 * MS, 10 * MS).unwrap();
        let queued = sched.create_thread("queued", SchedParams::Deadline(second));
        sched.unblock(0, queued);
        assert_eq!(sched.current_thread(0), running);

        let wider = DeadlineParams::new(3 * MS, 8 * MS, 10 * MS).unwrap();
        sched.change_deadline(0, queued, wider);

        assert!(info(&sched, queued).in_queue);
        let utilization = sched.with_locked(|set| set.cpu(0).total_deadline_utilization());
        assert_eq!(utilization, first.utilization + wider.utilization);
    }
}
