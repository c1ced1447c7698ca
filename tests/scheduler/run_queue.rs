//! Eligibility Tree Tests
//!
//! Tests for the augmented run-queue tree driven through a standalone
//! arena: ordering, min-finish augmentation, eligible lookups and the
//! predicate fallback used by work stealing.

#[cfg(test)]
pub(crate) mod tests {
    use nexa_sched::scheduler::state::TreeLinks;
    use nexa_sched::scheduler::{QueueArena, RunQueue, SchedTime, Tid};

    /// Node storage for trees built outside the scheduler.
    #[derive(Default)]
    pub(crate) struct NodeArena {
        pub nodes: Vec<Node>,
    }

    pub(crate) struct Node {
        pub start: SchedTime,
        pub finish: SchedTime,
        pub links: TreeLinks,
        pub queued: bool,
    }

    impl NodeArena {
        pub fn add(&mut self, start: SchedTime, finish: SchedTime) -> Tid {
            self.nodes.push(Node {
                start,
                finish,
                links: TreeLinks::new(),
                queued: false,
            });
            Tid(self.nodes.len() as u32 - 1)
        }
    }

    impl QueueArena for NodeArena {
        fn key(&self, id: Tid) -> (SchedTime, u64, Tid) {
            (self.nodes[id.index()].start, 0, id)
        }
        fn start_time(&self, id: Tid) -> SchedTime {
            self.nodes[id.index()].start
        }
        fn finish_time(&self, id: Tid) -> SchedTime {
            self.nodes[id.index()].finish
        }
        fn links(&self, id: Tid) -> &TreeLinks {
            &self.nodes[id.index()].links
        }
        fn links_mut(&mut self, id: Tid) -> &mut TreeLinks {
            &mut self.nodes[id.index()].links
        }
        fn set_queued(&mut self, id: Tid, queued: bool) {
            self.nodes[id.index()].queued = queued;
        }
    }

    pub(crate) fn make_queue(pairs: &[(SchedTime, SchedTime)]) -> (NodeArena, RunQueue) {
        let mut arena = NodeArena::default();
        let mut queue = RunQueue::new();
        for &(start, finish) in pairs {
            let id = arena.add(start, finish);
            queue.insert(&mut arena, id);
        }
        (arena, queue)
    }

    /// Height and min-finish of every node agree with its children.
    pub(crate) fn check_augmentation(arena: &NodeArena, node: Option<Tid>) -> (u8, SchedTime) {
        let Some(id) = node else {
            return (0, SchedTime::MAX);
        };
        let links = *arena.links(id);
        let (left_height, left_min) = check_augmentation(arena, links.left);
        let (right_height, right_min) = check_augmentation(arena, links.right);
        let min_finish = arena.finish_time(id).min(left_min).min(right_min);
        assert_eq!(links.min_finish_time, min_finish, "stale min finish at {}", id);
        assert!((left_height as i16 - right_height as i16).abs() <= 1, "unbalanced at {}", id);
        assert_eq!(links.height, 1 + left_height.max(right_height));
        (links.height, min_finish)
    }

    // =========================================================================
    // Ordering and Augmentation
    // =========================================================================

    #[test]
    fn test_empty_queue() {
        let (arena, queue) = make_queue(&[]);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.front(&arena), None);
        assert_eq!(queue.min_finish_time(&arena), None);
        assert_eq!(queue.find_earliest_eligible(&arena, SchedTime::MAX, |_| true), None);
    }

    #[test]
    fn test_in_order_by_start_time() {
        let (arena, queue) = make_queue(&[(50, 60), (10, 90), (30, 40), (20, 25), (40, 100)]);
        let starts: Vec<SchedTime> = queue
            .iter_ids(&arena)
            .into_iter()
            .map(|id| arena.start_time(id))
            .collect();
        assert_eq!(starts, vec![10, 20, 30, 40, 50]);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.min_finish_time(&arena), Some(25));
    }

    #[test]
    fn test_stays_balanced_under_sequential_inserts() {
        let pairs: Vec<(SchedTime, SchedTime)> = (0..1024).map(|i| (i, 2048 - i)).collect();
        let (arena, queue) = make_queue(&pairs);
        let root = queue.root().unwrap();
        // AVL height bound: 1.44 * log2(n + 2).
        assert!(arena.links(root).height <= 15);
        assert_eq!(queue.min_finish_time(&arena), Some(1025));
        check_augmentation(&arena, Some(root));
    }

    #[test]
    fn test_erase_and_pop_front() {
        let (mut arena, mut queue) = make_queue(&[(5, 10), (1, 20), (9, 15), (3, 8)]);
        queue.erase(&mut arena, Tid(3));
        assert!(!arena.nodes[3].queued);
        assert_eq!(queue.min_finish_time(&arena), Some(10));
        assert_eq!(queue.pop_front(&mut arena), Some(Tid(1)));
        assert_eq!(queue.pop_front(&mut arena), Some(Tid(0)));
        assert_eq!(queue.pop_front(&mut arena), Some(Tid(2)));
        assert!(queue.pop_front(&mut arena).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_start_times_keep_insertion_ids() {
        let (arena, queue) = make_queue(&[(10, 40), (10, 30), (10, 20)]);
        let ids = queue.iter_ids(&arena);
        assert_eq!(ids, vec![Tid(0), Tid(1), Tid(2)]);
        assert_eq!(queue.find_earliest_eligible(&arena, 10, |_| true), Some(Tid(2)));
    }

    #[test]
    fn test_augmentation_survives_mixed_erase() {
        let pairs: Vec<(SchedTime, SchedTime)> =
            (0..64).map(|i| ((i * 37) % 101, (i * 53) % 97 + 200)).collect();
        let (mut arena, mut queue) = make_queue(&pairs);
        check_augmentation(&arena, queue.root());

        for id in (0..64).step_by(3) {
            queue.erase(&mut arena, Tid(id));
            assert!(!arena.nodes[id as usize].queued);
            check_augmentation(&arena, queue.root());
        }
        assert_eq!(queue.len(), 64 - 22);

        let starts: Vec<SchedTime> = queue
            .iter_ids(&arena)
            .into_iter()
            .map(|id| arena.start_time(id))
            .collect();
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    }

    // =========================================================================
    // Earliest Eligible
    // =========================================================================

    #[test]
    fn test_find_earliest_eligible_basic() {
        let (arena, queue) = make_queue(&[(0, 100), (10, 50), (20, 30), (30, 10)]);
        // Only the first three are eligible at t=25.
        assert_eq!(queue.find_earliest_eligible(&arena, 25, |_| true), Some(Tid(2)));
        assert_eq!(queue.find_earliest_eligible(&arena, 30, |_| true), Some(Tid(3)));
        assert_eq!(queue.find_earliest_eligible(&arena, 5, |_| true), Some(Tid(0)));
        assert_eq!(queue.find_earliest_eligible(&arena, -1, |_| true), None);
    }

    #[test]
    fn test_front_after_eligible_time_is_none() {
        let (arena, queue) = make_queue(&[(100, 110), (200, 210)]);
        assert_eq!(queue.find_earliest_eligible(&arena, 99, |_| true), None);
        assert_eq!(queue.find_earliest_eligible(&arena, 100, |_| true), Some(Tid(0)));
    }

    #[test]
    fn test_min_finish_in_left_subtree() {
        // The smallest finish sits deep in the eligible left part.
        let (arena, queue) = make_queue(&[
            (50, 500),
            (10, 15),
            (20, 400),
            (30, 300),
            (40, 350),
            (60, 20),
            (70, 700),
        ]);
        assert_eq!(queue.find_earliest_eligible(&arena, 55, |_| true), Some(Tid(1)));
        assert_eq!(queue.find_earliest_eligible(&arena, 65, |_| true), Some(Tid(1)));
    }

    #[test]
    fn test_ineligible_min_finish_is_ignored() {
        let (arena, queue) = make_queue(&[(0, 100), (10, 90), (50, 1)]);
        assert_eq!(queue.find_earliest_eligible(&arena, 49, |_| true), Some(Tid(1)));
        assert_eq!(queue.find_earliest_eligible(&arena, 50, |_| true), Some(Tid(2)));
    }

    // =========================================================================
    // Predicate Fallback
    // =========================================================================

    #[test]
    fn test_predicate_rejecting_best_finds_next() {
        let pairs: Vec<(SchedTime, SchedTime)> = (0..32).map(|i| (i, 1_000 - i * 10)).collect();
        let (arena, queue) = make_queue(&pairs);
        // Best eligible at t=20 is id 20; reject the even ids.
        let found = queue.find_earliest_eligible(&arena, 20, |id| id.0 % 2 == 1);
        assert_eq!(found, Some(Tid(19)));
    }

    #[test]
    fn test_predicate_skips_rejected_threads() {
        let (arena, queue) = make_queue(&[(0, 100), (10, 50), (20, 30), (30, 10)]);
        let found = queue.find_earliest_eligible(&arena, 40, |id| id != Tid(3) && id != Tid(2));
        assert_eq!(found, Some(Tid(1)));
        assert_eq!(queue.find_earliest_eligible(&arena, 40, |_| false), None);
    }

    #[test]
    fn test_predicate_only_accepts_worst() {
        let pairs: Vec<(SchedTime, SchedTime)> = (0..16).map(|i| (i * 2, 100 + i)).collect();
        let (arena, queue) = make_queue(&pairs);
        let found = queue.find_earliest_eligible(&arena, 30, |id| id == Tid(15));
        assert_eq!(found, Some(Tid(15)));
        let found = queue.find_earliest_eligible(&arena, 29, |id| id == Tid(15));
        assert_eq!(found, None);
    }

    #[test]
    fn test_predicate_sees_only_eligible_threads() {
        let (arena, queue) = make_queue(&[(0, 10), (5, 20), (100, 1)]);
        let mut seen = Vec::new();
        let found = queue.find_earliest_eligible(&arena, 50, |id| {
            seen.push(id);
            false
        });
        assert_eq!(found, None);
        assert!(!seen.contains(&Tid(2)));
    }
}
