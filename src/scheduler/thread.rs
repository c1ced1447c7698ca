//! Thread records and the thread arena
//!
//! The scheduler never holds pointers to threads. Run queues, per-CPU
//! "active thread" slots and the migration paths all refer to threads by
//! `Tid`, an index into the `ThreadTable`.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

use super::run_queue::QueueArena;
use super::state::{SchedulerState, TreeLinks};
use super::types::{AspaceId, MigrateStage, SchedParams, SchedTime, ThreadState, Tid};

/// Per-thread migration hook, e.g. to save and restore per-CPU hardware
/// state. Called with the global scheduler lock held; it must not call
/// back into the scheduler.
pub type MigrateFn = Box<dyn FnMut(Tid, MigrateStage) + Send>;

/// Scheduler view of a thread.
pub struct Thread {
    pub(crate) tid: Tid,
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    pub(crate) idle: bool,
    pub(crate) aspace: AspaceId,
    pub(crate) migrate_fn: Option<MigrateFn>,
    pub(crate) migrate_pending: bool,
    pub(crate) sched: SchedulerState,
}

impl Thread {
    pub(crate) fn new(tid: Tid, name: &str, params: SchedParams) -> Self {
        Self {
            tid,
            name: String::from(name),
            state: ThreadState::Initial,
            idle: false,
            aspace: 0,
            migrate_fn: None,
            migrate_pending: false,
            sched: SchedulerState::new(params),
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn aspace(&self) -> AspaceId {
        self.aspace
    }

    pub fn has_migrate_fn(&self) -> bool {
        self.migrate_fn.is_some()
    }

    pub fn migrate_pending(&self) -> bool {
        self.migrate_pending
    }

    pub fn sched(&self) -> &SchedulerState {
        &self.sched
    }

    pub fn sched_mut(&mut self) -> &mut SchedulerState {
        &mut self.sched
    }

    pub(crate) fn set_ready(&mut self) {
        self.state = ThreadState::Ready;
    }

    pub(crate) fn set_running(&mut self) {
        self.state = ThreadState::Running;
    }

    /// Invoke the migrate function for `stage`. `Before` and `After` are
    /// paired: `Before` fires once and arms `migrate_pending`, `After`
    /// fires only when armed.
    pub(crate) fn call_migrate_fn(&mut self, stage: MigrateStage) {
        let tid = self.tid;
        let Some(migrate_fn) = self.migrate_fn.as_mut() else {
            return;
        };
        match stage {
            MigrateStage::Before => {
                if !self.migrate_pending {
                    self.migrate_pending = true;
                    migrate_fn(tid, stage);
                }
            }
            MigrateStage::After => {
                if self.migrate_pending {
                    self.migrate_pending = false;
                    migrate_fn(tid, stage);
                }
            }
            MigrateStage::Exiting => migrate_fn(tid, stage),
        }
    }
}

/// Arena of all threads known to the scheduler.
#[derive(Default)]
pub struct ThreadTable {
    slots: Vec<Option<Thread>>,
    /// Slots emptied by `destroy`, reused most recent first.
    free: Vec<u32>,
    live: usize,
}

impl ThreadTable {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Allocate a new thread, reusing the slot of a destroyed one if any.
    pub fn create(&mut self, name: &str, params: SchedParams) -> Tid {
        let tid = match self.free.pop() {
            Some(index) => Tid(index),
            None => {
                self.slots.push(None);
                Tid(self.slots.len() as u32 - 1)
            }
        };
        self.slots[tid.index()] = Some(Thread::new(tid, name, params));
        self.live += 1;
        tid
    }

    pub fn destroy(&mut self, tid: Tid) -> Option<Thread> {
        let thread = self.slots.get_mut(tid.index())?.take()?;
        self.free.push(tid.0);
        self.live -= 1;
        Some(thread)
    }

    /// Number of slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, tid: Tid) -> Option<&Thread> {
        self.slots.get(tid.index())?.as_ref()
    }

    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.slots.get_mut(tid.index())?.as_mut()
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.get(tid).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}

impl Index<Tid> for ThreadTable {
    type Output = Thread;

    fn index(&self, tid: Tid) -> &Thread {
        match self.get(tid) {
            Some(thread) => thread,
            None => panic!("sched: unknown thread {}", tid),
        }
    }
}

impl IndexMut<Tid> for ThreadTable {
    fn index_mut(&mut self, tid: Tid) -> &mut Thread {
        match self.get_mut(tid) {
            Some(thread) => thread,
            None => panic!("sched: unknown thread {}", tid),
        }
    }
}

impl QueueArena for ThreadTable {
    fn key(&self, id: Tid) -> (SchedTime, u64, Tid) {
        self[id].sched.key(id)
    }

    fn finish_time(&self, id: Tid) -> SchedTime {
        self[id].sched.finish_time
    }

    fn start_time(&self, id: Tid) -> SchedTime {
        self[id].sched.start_time
    }

    fn links(&self, id: Tid) -> &TreeLinks {
        &self[id].sched.links
    }

    fn links_mut(&mut self, id: Tid) -> &mut TreeLinks {
        &mut self[id].sched.links
    }

    fn set_queued(&mut self, id: Tid, queued: bool) {
        self[id]
            .sched
            .flags
            .set(super::state::QueueFlags::IN_QUEUE, queued);
    }
}
