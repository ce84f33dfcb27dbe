use std::{
    collections::{HashMap, HashSet},
    rc::{Rc, Weak},
};

use parse_display::Display;

use crate::{
    Container, Error, Factory, Promise, ReadError, Result, Store, StoreSpec, Subscription, Value,
};


/// Identity of a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("#{0}")]
pub struct StoreId(pub(crate) u64);

impl StoreId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What a read pass touched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum ReadKey {
    #[display("{0}.{1}")]
    Field(StoreId, Rc<str>),
    #[display("{0}!{1}")]
    Action(StoreId, Rc<str>),
    #[display("{0}!*")]
    AnyAction(StoreId),
}
impl ReadKey {
    pub fn store(&self) -> StoreId {
        match self {
            ReadKey::Field(id, _) | ReadKey::Action(id, _) | ReadKey::AnyAction(id) => *id,
        }
    }
}

pub(crate) trait ReadSource {
    fn subscribe_read(self: Rc<Self>, key: &ReadKey, listener: Rc<dyn Fn()>) -> Subscription;
}

/// One field read observed during a read pass.
#[derive(Clone)]
pub struct ReadEvent {
    key: ReadKey,
    source: Weak<dyn ReadSource>,
}
impl ReadEvent {
    pub(crate) fn new(key: ReadKey, source: Weak<dyn ReadSource>) -> Self {
        Self { key, source }
    }
    pub fn key(&self) -> &ReadKey {
        &self.key
    }

    /// Calls `listener` every time the value behind this read changes.
    ///
    /// If the source has already been dropped, the returned subscription is empty.
    pub fn subscribe(&self, listener: impl Fn() + 'static) -> Subscription {
        self.subscribe_rc(Rc::new(listener))
    }
    pub(crate) fn subscribe_rc(&self, listener: Rc<dyn Fn()>) -> Subscription {
        match self.source.upgrade() {
            Some(source) => source.subscribe_read(&self.key, listener),
            None => Subscription::empty(),
        }
    }
}
impl std::fmt::Debug for ReadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadEvent").field(&self.key).finish()
    }
}

/// Side effect deferred until the read pass is kept.
pub type Effect = Box<dyn FnOnce()>;

/// Receiver of the reads made during a read pass.
pub trait Tracker {
    fn on_read(&mut self, event: ReadEvent);
    fn on_effect(&mut self, effect: Effect) {
        effect()
    }
}

/// Access to the binding that owns the current read pass.
pub(crate) trait ReadScope {
    fn container(&self) -> &Container;
    fn scoped(&self, spec: &StoreSpec) -> Result<Store>;
    fn retain(&self, store: &Store);
}

/// Context for reading state and tracking dependencies.
pub struct ReadContext<'a> {
    tracker: Option<&'a mut dyn Tracker>,
    scope: Option<&'a dyn ReadScope>,
}

impl<'a> ReadContext<'a> {
    /// Context that records nothing and has no container.
    pub fn untracked() -> ReadContext<'static> {
        ReadContext {
            tracker: None,
            scope: None,
        }
    }
    pub fn new(tracker: &'a mut dyn Tracker) -> Self {
        Self {
            tracker: Some(tracker),
            scope: None,
        }
    }
    pub(crate) fn with_scope(tracker: &'a mut dyn Tracker, scope: &'a dyn ReadScope) -> Self {
        Self {
            tracker: Some(tracker),
            scope: Some(scope),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }

    /// Call a function with a [`ReadContext`] that does not track dependencies.
    pub fn untrack<T>(&mut self, f: impl FnOnce(&mut ReadContext) -> T) -> T {
        let mut rc = ReadContext {
            tracker: None,
            scope: self.scope,
        };
        f(&mut rc)
    }

    pub(crate) fn record(&mut self, event: impl FnOnce() -> ReadEvent) {
        if let Some(tracker) = &mut self.tracker {
            tracker.on_read(event());
        }
    }

    /// Defers `f` until the read pass is kept.
    ///
    /// Without a tracker, `f` runs immediately.
    pub fn schedule_effect(&mut self, f: impl FnOnce() + 'static) {
        match &mut self.tracker {
            Some(tracker) => tracker.on_effect(Box::new(f)),
            None => f(),
        }
    }

    /// Resolves a singleton store from the container of the current binding.
    pub fn get(&mut self, spec: &StoreSpec) -> Result<Store> {
        let scope = self.scope.ok_or(Error::ProviderMissing)?;
        let store = scope.container().get(spec)?;
        scope.retain(&store);
        Ok(store)
    }

    /// Returns the store of `spec` owned by the current binding, creating it on first use.
    pub fn create(&mut self, spec: &StoreSpec) -> Result<Store> {
        self.scope.ok_or(Error::ScopedOutsideReadPass)?.scoped(spec)
    }

    /// Resolves a service from the container of the current binding.
    pub fn resolve<T: 'static>(&mut self, factory: &Factory<T>) -> Result<Rc<T>> {
        self.scope
            .ok_or(Error::ProviderMissing)?
            .container()
            .resolve(factory)
    }

    /// Returns the settled value of `promise`, or suspends the pass if it is still pending.
    pub fn wait(&mut self, promise: &Promise) -> Result<Value, ReadError> {
        promise
            .peek()
            .ok_or_else(|| ReadError::Pending(promise.clone()))
    }

    /// Like [`wait`](Self::wait), but passes through values that are not promises.
    pub fn wait_value(&mut self, value: &Value) -> Result<Value, ReadError> {
        match Promise::from_value(value) {
            Some(promise) => self.wait(&promise),
            None => Ok(value.clone()),
        }
    }
}

/// Runs `f` while routing every distinct read to `on_read`
/// and every scheduled effect to `on_effect_schedule`.
///
/// A key read several times in one pass is reported once, on its first read.
pub fn run_tracked<T>(
    on_read: impl FnMut(ReadEvent),
    on_effect_schedule: impl FnMut(Effect),
    f: impl FnOnce(&mut ReadContext) -> T,
) -> T {
    let mut tracker = FnTracker {
        seen: HashSet::new(),
        on_read,
        on_effect: on_effect_schedule,
    };
    f(&mut ReadContext::new(&mut tracker))
}

struct FnTracker<R, E> {
    seen: HashSet<ReadKey>,
    on_read: R,
    on_effect: E,
}
impl<R: FnMut(ReadEvent), E: FnMut(Effect)> Tracker for FnTracker<R, E> {
    fn on_read(&mut self, event: ReadEvent) {
        if self.seen.insert(event.key().clone()) {
            (self.on_read)(event)
        }
    }
    fn on_effect(&mut self, effect: Effect) {
        (self.on_effect)(effect)
    }
}

/// Distinct reads of one pass, in first-read order.
///
/// Reading a key again replaces its event; its position stays where it was first read.
#[derive(Default)]
pub struct ReadSet {
    events: Vec<ReadEvent>,
    index: HashMap<ReadKey, usize>,
    effects: Vec<Effect>,
}

impl ReadSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.events.len()
    }
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
    pub fn contains(&self, key: &ReadKey) -> bool {
        self.index.contains_key(key)
    }
    pub fn keys(&self) -> impl Iterator<Item = &ReadKey> {
        self.events.iter().map(|e| e.key())
    }
    pub fn events(&self) -> &[ReadEvent] {
        &self.events
    }

    /// Subscribes `listener` to every recorded read.
    pub fn subscribe(&self, listener: Rc<dyn Fn()>) -> Vec<Subscription> {
        self.events
            .iter()
            .map(|e| e.subscribe_rc(listener.clone()))
            .collect()
    }
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}
impl Tracker for ReadSet {
    fn on_read(&mut self, event: ReadEvent) {
        match self.index.get(event.key()) {
            Some(&i) => self.events[i] = event,
            None => {
                self.index.insert(event.key().clone(), self.events.len());
                self.events.push(event);
            }
        }
    }
    fn on_effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }
}
impl std::fmt::Debug for ReadSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}
