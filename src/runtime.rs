use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    mem::take,
    rc::{Rc, Weak},
    time::Duration,
};

use derive_ex::Ex;
use slabmap::SlabMap;


/// Grace-period policy for bindings.
#[derive(Debug, Clone, PartialEq, Eq, Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct RuntimeConfig {
    /// How long a binding that was rendered but never committed stays alive.
    pub abandon_grace: Duration,
    /// How long a binding stays alive after `cleanup` before it is disposed.
    pub detach_grace: Duration,
}
impl RuntimeConfig {
    pub const fn new() -> Self {
        Self {
            abandon_grace: Duration::from_millis(100),
            detach_grace: Duration::from_millis(50),
        }
    }
}

type Task = Box<dyn FnOnce()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    deadline: Duration,
    seq: u64,
}

struct TimerEntry {
    key: Key,
    task: Task,
}

struct TimerQueue {
    next_seq: u64,
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<TimerEntry>,
}
impl TimerQueue {
    fn new() -> Self {
        Self {
            next_seq: 0,
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
        }
    }
    fn insert(&mut self, deadline: Duration, task: Task) -> (usize, Key) {
        let key = Key {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let id = self.entries.insert(TimerEntry { key, task });
        self.tasks.insert(key, id);
        (id, key)
    }
    fn contains(&self, id: usize, key: Key) -> bool {
        self.entries.get(id).is_some_and(|e| e.key == key)
    }
    fn remove(&mut self, id: usize, key: Key) -> bool {
        if !self.contains(id, key) {
            return false;
        }
        self.entries.remove(id);
        self.tasks.remove(&key);
        true
    }
    fn pop_due(&mut self, now: Duration) -> Option<TimerEntry> {
        let entry = self.tasks.first_entry()?;
        if entry.key().deadline > now {
            return None;
        }
        let id = entry.remove();
        self.entries.remove(id)
    }
    fn next_deadline(&self) -> Option<Duration> {
        self.tasks.first_key_value().map(|(key, _)| key.deadline)
    }
}

struct RuntimeNode {
    config: RuntimeConfig,
    now: Cell<Duration>,
    microtasks: RefCell<VecDeque<Task>>,
    timers: RefCell<TimerQueue>,
    render_depth: Cell<usize>,
}

/// Execution context shared by a container and its bindings.
///
/// Owns the microtask queue, the grace-period timers, the render-depth counter and a manual clock.
/// Nothing runs on its own: the host calls [`run_microtasks`](Self::run_microtasks),
/// [`advance`](Self::advance) or [`update`](Self::update).
#[derive(Clone, Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime(Rc<RuntimeNode>);

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::new())
    }
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self(Rc::new(RuntimeNode {
            config,
            now: Cell::new(Duration::ZERO),
            microtasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(TimerQueue::new()),
            render_depth: Cell::new(0),
        }))
    }
    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    /// Time elapsed on the manual clock.
    pub fn now(&self) -> Duration {
        self.0.now.get()
    }

    /// Queues `f` to run after the current synchronous work, in queue order.
    pub fn queue_microtask(&self, f: impl FnOnce() + 'static) {
        self.0.microtasks.borrow_mut().push_back(Box::new(f));
    }

    /// Runs queued microtasks, including those queued while running, until the queue is empty.
    ///
    /// Returns `true` if any microtask was run.
    pub fn run_microtasks(&self) -> bool {
        let mut handled = false;
        loop {
            let task = self.0.microtasks.borrow_mut().pop_front();
            let Some(task) = task else {
                return handled;
            };
            task();
            handled = true;
        }
    }

    /// Schedules `f` to run once `delay` has elapsed on the manual clock.
    pub fn set_timeout(&self, delay: Duration, f: impl FnOnce() + 'static) -> TimerHandle {
        let deadline = self.now() + delay;
        let (id, key) = self.0.timers.borrow_mut().insert(deadline, Box::new(f));
        TimerHandle {
            runtime: Rc::downgrade(&self.0),
            id,
            key,
        }
    }
    pub fn pending_timers(&self) -> usize {
        self.0.timers.borrow().tasks.len()
    }
    pub fn next_deadline(&self) -> Option<Duration> {
        self.0.timers.borrow().next_deadline()
    }

    /// Runs the timers that are due at the current time.
    ///
    /// Returns `true` if any timer was run.
    pub fn run_timers(&self) -> bool {
        let mut handled = false;
        while self.fire_next(self.now()) {
            handled = true;
        }
        handled
    }
    fn fire_next(&self, until: Duration) -> bool {
        let entry = self.0.timers.borrow_mut().pop_due(until);
        let Some(entry) = entry else {
            return false;
        };
        if entry.key.deadline > self.now() {
            self.0.now.set(entry.key.deadline);
        }
        (entry.task)();
        self.run_microtasks();
        true
    }

    /// Moves the clock forward by `duration`, firing due timers in deadline order.
    ///
    /// Microtasks queued by a timer run before the next timer fires.
    pub fn advance(&self, duration: Duration) {
        let target = self.now() + duration;
        self.run_microtasks();
        while self.fire_next(target) {}
        self.0.now.set(target);
    }

    /// Repeat [`run_microtasks`](Self::run_microtasks) and [`run_timers`](Self::run_timers)
    /// until there is nothing left to do at the current time.
    pub fn update(&self) {
        loop {
            if self.run_microtasks() {
                continue;
            }
            if self.run_timers() {
                continue;
            }
            break;
        }
    }

    /// Returns true while a binding's selector is running.
    pub fn is_rendering(&self) -> bool {
        self.0.render_depth.get() > 0
    }
    pub(crate) fn enter_render(&self) -> RenderGuard {
        self.0.render_depth.set(self.0.render_depth.get() + 1);
        RenderGuard(self.clone())
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Drops every pending microtask and timer without running them.
    pub fn clear(&self) {
        let microtasks = take(&mut *self.0.microtasks.borrow_mut());
        let entries = {
            let mut timers = self.0.timers.borrow_mut();
            timers.tasks.clear();
            std::mem::replace(&mut timers.entries, SlabMap::new())
        };
        drop(microtasks);
        drop(entries);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("now", &self.now())
            .field("microtasks", &self.0.microtasks.borrow().len())
            .field("timers", &self.pending_timers())
            .finish()
    }
}

pub(crate) struct RenderGuard(Runtime);

impl Drop for RenderGuard {
    fn drop(&mut self) {
        let depth = &self.0 .0.render_depth;
        depth.set(depth.get().saturating_sub(1));
    }
}

/// Cancellable handle to a timer created by [`Runtime::set_timeout`].
///
/// Dropping the handle does not cancel the timer.
pub struct TimerHandle {
    runtime: Weak<RuntimeNode>,
    id: usize,
    key: Key,
}

impl TimerHandle {
    /// Cancels the timer. Returns false if it already fired or was cancelled.
    pub fn cancel(self) -> bool {
        match self.runtime.upgrade() {
            Some(rt) => rt.timers.borrow_mut().remove(self.id, self.key),
            None => false,
        }
    }
    pub fn is_pending(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|rt| rt.timers.borrow().contains(self.id, self.key))
    }
    pub fn deadline(&self) -> Duration {
        self.key.deadline
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("deadline", &self.key.deadline)
            .field("pending", &self.is_pending())
            .finish()
    }
}
