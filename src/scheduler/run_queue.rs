//! Eligibility-ordered run queues
//!
//! A run queue is a balanced (AVL) search tree of threads ordered by
//! `(start_time, generation)`. Each node additionally caches the minimum
//! `finish_time` of its subtree, which answers "among threads whose start
//! time is not after `t`, which finishes first?" in O(log n).
//!
//! ## Layout
//!
//! Nodes are not allocated by the tree. The links live inside each
//! thread's scheduler state and are reached through a `QueueArena`, so a
//! queue is just a root id plus a length.
//!
//! ## Invariants
//! - in-order traversal yields nondecreasing start times
//! - `min_finish_time(n) = min(finish(n), min_finish_time(children))`
//! - the two subtrees of every node differ in height by at most one

use alloc::vec::Vec;

use super::state::TreeLinks;
use super::types::{SchedTime, Tid};

/// Storage for tree nodes, indexed by thread id.
pub trait QueueArena {
    fn key(&self, id: Tid) -> (SchedTime, u64, Tid);
    fn start_time(&self, id: Tid) -> SchedTime;
    fn finish_time(&self, id: Tid) -> SchedTime;
    fn links(&self, id: Tid) -> &TreeLinks;
    fn links_mut(&mut self, id: Tid) -> &mut TreeLinks;
    fn set_queued(&mut self, id: Tid, queued: bool);
}

/// One eligibility tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunQueue {
    root: Option<Tid>,
    len: usize,
}

impl RunQueue {
    pub const fn new() -> Self {
        Self { root: None, len: 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn root(&self) -> Option<Tid> {
        self.root
    }

    /// Link `id` into the tree. Its key must not change while linked.
    pub fn insert<A: QueueArena>(&mut self, arena: &mut A, id: Tid) {
        let root = self.root;
        self.root = Some(insert_at(arena, root, id));
        arena.set_queued(id, true);
        self.len += 1;
    }

    /// Unlink `id`. It must be linked into this tree.
    pub fn erase<A: QueueArena>(&mut self, arena: &mut A, id: Tid) {
        crate::kassert!(self.len > 0, "erase of thread {} from empty queue", id);
        let root = self.root;
        self.root = erase_at(arena, root, id);
        *arena.links_mut(id) = TreeLinks::new();
        arena.set_queued(id, false);
        self.len -= 1;
    }

    /// Thread with the smallest start time.
    pub fn front<A: QueueArena>(&self, arena: &A) -> Option<Tid> {
        let mut node = self.root?;
        while let Some(left) = arena.links(node).left {
            node = left;
        }
        Some(node)
    }

    /// Remove and return the thread with the smallest start time.
    pub fn pop_front<A: QueueArena>(&mut self, arena: &mut A) -> Option<Tid> {
        let front = self.front(arena)?;
        self.erase(arena, front);
        Some(front)
    }

    /// Minimum finish time of all queued threads.
    pub fn min_finish_time<A: QueueArena>(&self, arena: &A) -> Option<SchedTime> {
        self.root.map(|root| arena.links(root).min_finish_time)
    }

    /// In-order (start time) listing.
    pub fn iter_ids<A: QueueArena>(&self, arena: &A) -> Vec<Tid> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack = Vec::new();
        let mut node = self.root;
        while node.is_some() || !stack.is_empty() {
            while let Some(id) = node {
                stack.push(id);
                node = arena.links(id).left;
            }
            if let Some(id) = stack.pop() {
                out.push(id);
                node = arena.links(id).right;
            }
        }
        out
    }

    /// Among threads with `start_time <= eligible_time`, return one with
    /// the smallest finish time that `predicate` accepts.
    ///
    /// The augmented descent finds the minimum-finish eligible thread in
    /// O(log n). When the predicate rejects the candidates on that path the
    /// eligible partition is scanned so a legal candidate is never missed.
    pub fn find_earliest_eligible<A, F>(
        &self,
        arena: &A,
        eligible_time: SchedTime,
        mut predicate: F,
    ) -> Option<Tid>
    where
        A: QueueArena,
        F: FnMut(Tid) -> bool,
    {
        let front = self.front(arena)?;
        if arena.start_time(front) > eligible_time {
            return None;
        }

        // Walk the eligible spine: `path` is the best eligible node seen on
        // the path, `subtree` the fully eligible left subtree with the
        // smallest min finish time.
        let mut path: Option<Tid> = None;
        let mut subtree: Option<Tid> = None;
        let mut node = self.root;
        while let Some(id) = node {
            let links = arena.links(id);
            if arena.start_time(id) <= eligible_time {
                if path.map_or(true, |p| arena.finish_time(p) > arena.finish_time(id)) {
                    path = Some(id);
                }
                if let Some(left) = links.left {
                    let better = subtree.map_or(true, |s| {
                        arena.links(s).min_finish_time > arena.links(left).min_finish_time
                    });
                    if better {
                        subtree = Some(left);
                    }
                }
                node = links.right;
            } else {
                node = links.left;
            }
        }

        if let Some(found) = descend(arena, path, subtree, &mut predicate) {
            return Some(found);
        }
        self.scan_eligible(arena, eligible_time, &mut predicate)
    }

    fn scan_eligible<A, F>(&self, arena: &A, eligible_time: SchedTime, predicate: &mut F) -> Option<Tid>
    where
        A: QueueArena,
        F: FnMut(Tid) -> bool,
    {
        let mut best: Option<Tid> = None;
        for id in self.iter_ids(arena) {
            if arena.start_time(id) > eligible_time {
                break;
            }
            if best.map_or(true, |b| arena.finish_time(b) > arena.finish_time(id)) && predicate(id) {
                best = Some(id);
            }
        }
        best
    }
}

fn descend<A, F>(arena: &A, path: Option<Tid>, subtree: Option<Tid>, predicate: &mut F) -> Option<Tid>
where
    A: QueueArena,
    F: FnMut(Tid) -> bool,
{
    let path = path?;
    let Some(subtree) = subtree else {
        return predicate(path).then_some(path);
    };

    let target = arena.links(subtree).min_finish_time;
    if target >= arena.finish_time(path) {
        // Other spine nodes may beat the subtree once `path` is rejected.
        return predicate(path).then_some(path);
    }

    let mut node = Some(subtree);
    while let Some(id) = node {
        if arena.finish_time(id) == target && predicate(id) {
            return Some(id);
        }
        let links = arena.links(id);
        node = match links.left {
            Some(left) if arena.links(left).min_finish_time == links.min_finish_time => Some(left),
            _ => links.right,
        };
    }
    None
}

// ============================================================================
// AVL maintenance
// ============================================================================

#[inline]
fn height<A: QueueArena>(arena: &A, node: Option<Tid>) -> u8 {
    node.map_or(0, |id| arena.links(id).height)
}

/// Recompute height and min finish time of `id` from its children.
fn update<A: QueueArena>(arena: &mut A, id: Tid) {
    let links = *arena.links(id);
    let mut min_finish = arena.finish_time(id);
    for child in [links.left, links.right].into_iter().flatten() {
        min_finish = min_finish.min(arena.links(child).min_finish_time);
    }
    let height = 1 + height(arena, links.left).max(height(arena, links.right));
    let links = arena.links_mut(id);
    links.height = height;
    links.min_finish_time = min_finish;
}

fn rotate_left<A: QueueArena>(arena: &mut A, id: Tid) -> Tid {
    let Some(pivot) = arena.links(id).right else {
        return id;
    };
    let inner = arena.links(pivot).left;
    arena.links_mut(id).right = inner;
    arena.links_mut(pivot).left = Some(id);
    update(arena, id);
    update(arena, pivot);
    pivot
}

fn rotate_right<A: QueueArena>(arena: &mut A, id: Tid) -> Tid {
    let Some(pivot) = arena.links(id).left else {
        return id;
    };
    let inner = arena.links(pivot).right;
    arena.links_mut(id).left = inner;
    arena.links_mut(pivot).right = Some(id);
    update(arena, id);
    update(arena, pivot);
    pivot
}

fn rebalance<A: QueueArena>(arena: &mut A, id: Tid) -> Tid {
    update(arena, id);
    let links = *arena.links(id);
    let balance = height(arena, links.left) as i16 - height(arena, links.right) as i16;
    if balance > 1 {
        if let Some(left) = links.left {
            let left_links = *arena.links(left);
            if height(arena, left_links.left) < height(arena, left_links.right) {
                let new_left = rotate_left(arena, left);
                arena.links_mut(id).left = Some(new_left);
            }
        }
        rotate_right(arena, id)
    } else if balance < -1 {
        if let Some(right) = links.right {
            let right_links = *arena.links(right);
            if height(arena, right_links.right) < height(arena, right_links.left) {
                let new_right = rotate_right(arena, right);
                arena.links_mut(id).right = Some(new_right);
            }
        }
        rotate_left(arena, id)
    } else {
        id
    }
}

fn insert_at<A: QueueArena>(arena: &mut A, node: Option<Tid>, id: Tid) -> Tid {
    let Some(current) = node else {
        let links = arena.links_mut(id);
        *links = TreeLinks::new();
        update(arena, id);
        return id;
    };
    if arena.key(id) < arena.key(current) {
        let left = arena.links(current).left;
        let new_left = insert_at(arena, left, id);
        arena.links_mut(current).left = Some(new_left);
    } else {
        let right = arena.links(current).right;
        let new_right = insert_at(arena, right, id);
        arena.links_mut(current).right = Some(new_right);
    }
    rebalance(arena, current)
}

fn erase_at<A: QueueArena>(arena: &mut A, node: Option<Tid>, id: Tid) -> Option<Tid> {
    let Some(current) = node else {
        crate::kassert!(false, "thread {} not found in run queue", id);
        return None;
    };
    let links = *arena.links(current);
    if current == id {
        return match (links.left, links.right) {
            (None, right) => right,
            (left, None) => left,
            (Some(left), Some(right)) => {
                let (rest, successor) = take_min(arena, right);
                let successor_links = arena.links_mut(successor);
                successor_links.left = Some(left);
                successor_links.right = rest;
                Some(rebalance(arena, successor))
            }
        };
    }
    if arena.key(id) < arena.key(current) {
        let new_left = erase_at(arena, links.left, id);
        arena.links_mut(current).left = new_left;
    } else {
        let new_right = erase_at(arena, links.right, id);
        arena.links_mut(current).right = new_right;
    }
    Some(rebalance(arena, current))
}

/// Detach the minimum of the subtree at `id`. Returns the new subtree root
/// and the detached node.
fn take_min<A: QueueArena>(arena: &mut A, id: Tid) -> (Option<Tid>, Tid) {
    let links = *arena.links(id);
    match links.left {
        None => (links.right, id),
        Some(left) => {
            let (rest, min) = take_min(arena, left);
            arena.links_mut(id).left = rest;
            (Some(rebalance(arena, id)), min)
        }
    }
}
