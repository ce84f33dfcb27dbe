use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet},
    mem::take,
    rc::{Rc, Weak},
};

use parse_display::Display;
use tracing::debug;

use crate::{
    error::DisposedTarget,
    focus::{self, FocusNode},
    tracking::{ReadSource, StoreId},
    utils::{next_id, Listeners},
    Error, Focus, FocusOptions, Map, Pool, ReadContext, ReadEvent, ReadKey, Result, Subscription,
    Value,
};

mod spec;

pub use spec::*;

#[cfg(test)]
mod tests;

/// Channel a store listener is registered on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum SubscribeKey {
    #[display("{0}")]
    Field(Rc<str>),
    #[display("{0}()")]
    Action(Rc<str>),
    #[display("*")]
    AnyAction,
}
impl SubscribeKey {
    pub fn field(name: &str) -> Self {
        SubscribeKey::Field(name.into())
    }
    pub fn action(name: &str) -> Self {
        SubscribeKey::Action(name.into())
    }
}

/// A field whose value changed during a mutation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: Rc<str>,
    pub next: Value,
    pub prev: Value,
}

/// One invocation of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub name: Rc<str>,
    pub args: Rc<[Value]>,
    /// 1-based count of invocations of this action, including this one.
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Field(FieldChange),
    Action(ActionCall),
}

type Listener = dyn Fn(&StoreEvent);

struct ActionSlot {
    f: ActionFn,
    count: Cell<u64>,
    last: RefCell<Option<ActionCall>>,
}

struct Pass {
    snapshot: Map,
    dispatches: Vec<ActionCall>,
}

pub(crate) struct StoreNode {
    id: StoreId,
    spec: StoreSpec,
    state: RefCell<Map>,
    initial: RefCell<Map>,
    actions: RefCell<BTreeMap<Rc<str>, ActionSlot>>,
    last_dispatch: RefCell<Option<ActionCall>>,
    listeners: RefCell<BTreeMap<SubscribeKey, Listeners<Listener>>>,
    pass: RefCell<Option<Pass>>,
    disposed: Cell<bool>,
    teardowns: RefCell<Vec<Box<dyn FnOnce()>>>,
    focuses: Pool<Rc<str>, FocusNode>,
}

/// Live instance of a [`StoreSpec`].
///
/// State is only changed through a mutation pass ([`dispatch`](Self::dispatch) or [`mutate`](Self::mutate)).
/// When the outermost pass finishes, every field that differs from its value before the pass
/// (under the field's equality) is reported once to field listeners,
/// then each dispatched action is reported to its own listeners and to wildcard listeners.
#[derive(Clone)]
pub struct Store(pub(crate) Rc<StoreNode>);

impl Store {
    pub(crate) fn new(spec: &StoreSpec) -> Self {
        Store(Rc::new(StoreNode {
            id: StoreId(next_id()),
            spec: spec.clone(),
            state: RefCell::new(spec.initial_state().clone()),
            initial: RefCell::new(Map::new()),
            actions: RefCell::new(BTreeMap::new()),
            last_dispatch: RefCell::new(None),
            listeners: RefCell::new(BTreeMap::new()),
            pass: RefCell::new(None),
            disposed: Cell::new(false),
            teardowns: RefCell::new(Vec::new()),
            focuses: focus::focus_pool(),
        }))
    }

    /// Installs the actions returned from setup and freezes the initial state used by `dirty` and `reset`.
    pub(crate) fn install(&self, actions: Actions) -> Result<()> {
        let table = actions.validate(self.name())?;
        *self.0.actions.borrow_mut() = table
            .into_iter()
            .map(|(name, f)| {
                let slot = ActionSlot {
                    f,
                    count: Cell::new(0),
                    last: RefCell::new(None),
                };
                (name, slot)
            })
            .collect();
        *self.0.initial.borrow_mut() = self.0.state.borrow().clone();
        Ok(())
    }
    pub(crate) fn write_initial(&self, field: &str, value: Value) {
        self.0.state.borrow_mut().insert(field.into(), value);
    }
    pub(crate) fn initial_field(&self, field: &str) -> Value {
        field_of(&self.0.initial.borrow(), field)
    }

    pub fn id(&self) -> StoreId {
        self.0.id
    }
    pub fn name(&self) -> &Rc<str> {
        self.0.spec.name()
    }
    pub fn spec(&self) -> &StoreSpec {
        &self.0.spec
    }
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::disposed(
                DisposedTarget::Store,
                self.name(),
                self.id().get(),
            ))
        } else {
            Ok(())
        }
    }
    fn read_event(&self, key: ReadKey) -> ReadEvent {
        let source: Weak<StoreNode> = Rc::downgrade(&self.0);
        ReadEvent::new(key, source)
    }

    /// Snapshot of the whole state. Does not track.
    pub fn state(&self) -> Map {
        self.0.state.borrow().clone()
    }

    /// Current value of `field`. Does not track.
    ///
    /// Reading a field that is not declared returns `Null`.
    pub fn peek(&self, field: &str) -> Value {
        field_of(&self.0.state.borrow(), field)
    }

    /// Current value of `field`, recorded as a dependency of the read pass.
    pub fn get(&self, field: &str, rc: &mut ReadContext) -> Value {
        rc.record(|| self.read_event(ReadKey::Field(self.id(), field.into())));
        self.peek(field)
    }

    /// Snapshot of the whole state, recording every field present as a dependency.
    pub fn read_all(&self, rc: &mut ReadContext) -> Map {
        let state = self.state();
        for field in state.keys() {
            rc.record(|| self.read_event(ReadKey::Field(self.id(), field.clone())));
        }
        state
    }

    /// Most recent dispatch of any action, recorded as a dependency on the wildcard channel.
    pub fn last_dispatch(&self, rc: &mut ReadContext) -> Option<ActionCall> {
        rc.record(|| self.read_event(ReadKey::AnyAction(self.id())));
        self.0.last_dispatch.borrow().clone()
    }

    pub fn action_names(&self) -> Vec<Rc<str>> {
        self.0.actions.borrow().keys().cloned().collect()
    }
    pub fn action(&self, name: &str) -> Result<ActionHandle> {
        match self.0.actions.borrow().get_key_value(name) {
            Some((name, _)) => Ok(ActionHandle {
                store: self.clone(),
                name: name.clone(),
            }),
            None => Err(self.unknown_action(name)),
        }
    }
    fn unknown_action(&self, name: &str) -> Error {
        Error::UnknownAction {
            store: self.name().clone(),
            action: name.into(),
        }
    }

    /// Invokes the action `name`.
    ///
    /// The invocation is recorded before the action body runs, so [`ActionHandle::last`]
    /// reflects it even if the body fails.
    pub fn dispatch(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.check_disposed()?;
        let (f, call) = {
            let actions = self.0.actions.borrow();
            let Some((name, slot)) = actions.get_key_value(name) else {
                return Err(self.unknown_action(name));
            };
            let index = slot.count.get() + 1;
            slot.count.set(index);
            let call = ActionCall {
                name: name.clone(),
                args: args.into(),
                index,
            };
            *slot.last.borrow_mut() = Some(call.clone());
            (slot.f.clone(), call)
        };
        *self.0.last_dispatch.borrow_mut() = Some(call.clone());
        self.run_pass(Some(call), |ac| f(ac, args))
    }

    /// Runs `f` as a mutation pass without dispatching an action.
    ///
    /// If called while another pass of this store is running, the writes join that pass.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut ActionContext) -> Result<T>) -> Result<T> {
        self.run_pass(None, f)
    }

    /// Writes one field in its own mutation pass.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.mutate(|ac| {
            ac.set(field, value);
            Ok(())
        })
    }

    fn run_pass<T>(
        &self,
        call: Option<ActionCall>,
        f: impl FnOnce(&mut ActionContext) -> Result<T>,
    ) -> Result<T> {
        self.check_disposed()?;
        let outermost = {
            let mut pass = self.0.pass.borrow_mut();
            match &mut *pass {
                Some(pass) => {
                    pass.dispatches.extend(call);
                    false
                }
                None => {
                    *pass = Some(Pass {
                        snapshot: self.0.state.borrow().clone(),
                        dispatches: call.into_iter().collect(),
                    });
                    true
                }
            }
        };
        let result = f(&mut ActionContext { store: self });
        if !outermost {
            return result;
        }
        let Some(pass) = self.0.pass.borrow_mut().take() else {
            return result;
        };
        match result {
            Ok(value) => {
                self.flush(pass);
                Ok(value)
            }
            Err(e) => {
                *self.0.state.borrow_mut() = pass.snapshot;
                Err(e)
            }
        }
    }

    fn flush(&self, pass: Pass) {
        let changes = {
            let state = self.0.state.borrow();
            let fields: BTreeSet<&Rc<str>> = pass.snapshot.keys().chain(state.keys()).collect();
            let mut changes = Vec::new();
            for field in fields {
                let prev = field_of(&pass.snapshot, field);
                let next = field_of(&state, field);
                if !self.0.spec.equality(field).eq(&prev, &next) {
                    changes.push(FieldChange {
                        field: field.clone(),
                        next,
                        prev,
                    });
                }
            }
            changes
        };
        for change in changes {
            let key = SubscribeKey::Field(change.field.clone());
            self.emit(&key, &StoreEvent::Field(change));
        }
        for call in pass.dispatches {
            let key = SubscribeKey::Action(call.name.clone());
            let event = StoreEvent::Action(call);
            self.emit(&key, &event);
            self.emit(&SubscribeKey::AnyAction, &event);
        }
    }

    fn emit(&self, key: &SubscribeKey, event: &StoreEvent) {
        let Some(listeners) = self.0.listeners.borrow().get(key).map(|l| l.snapshot()) else {
            return;
        };
        for (id, f) in listeners {
            let alive = self
                .0
                .listeners
                .borrow()
                .get(key)
                .is_some_and(|l| l.contains(id));
            if alive {
                f(event);
            }
        }
    }

    /// Registers `f` on `key`. Listeners on one key are called in subscription order.
    pub fn subscribe(&self, key: SubscribeKey, f: impl Fn(&StoreEvent) + 'static) -> Subscription {
        if self.is_disposed() {
            return Subscription::empty();
        }
        let f: Rc<Listener> = Rc::new(f);
        let id = self
            .0
            .listeners
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .insert(f);
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            let mut listeners = node.listeners.borrow_mut();
            if let Some(l) = listeners.get_mut(&key) {
                l.remove(id);
                if l.is_empty() {
                    listeners.remove(&key);
                }
            }
        })
    }
    pub fn on_change(&self, field: &str, f: impl Fn(&FieldChange) + 'static) -> Subscription {
        self.subscribe(SubscribeKey::field(field), move |e| {
            if let StoreEvent::Field(change) = e {
                f(change)
            }
        })
    }

    /// Listens to dispatches of `action`, or of every action if `None`.
    pub fn on_dispatch(
        &self,
        action: Option<&str>,
        f: impl Fn(&ActionCall) + 'static,
    ) -> Subscription {
        let key = action.map_or(SubscribeKey::AnyAction, SubscribeKey::action);
        self.subscribe(key, move |e| {
            if let StoreEvent::Action(call) = e {
                f(call)
            }
        })
    }

    /// Plain field mapping of the current state, passed through the spec's `normalize`.
    pub fn dehydrate(&self) -> Map {
        let state = self.state();
        match self.0.spec.normalize() {
            Some(normalize) => normalize(state),
            None => state,
        }
    }

    /// Replaces the fields present in `data` (after the spec's `denormalize`) in one mutation pass.
    pub fn hydrate(&self, data: Map) -> Result<()> {
        let data = match self.0.spec.denormalize() {
            Some(denormalize) => denormalize(data),
            None => data,
        };
        self.mutate(|ac| {
            for (field, value) in data {
                ac.set(field, value);
            }
            Ok(())
        })
    }

    /// Returns true if `field` (or any field if `None`) differs from the state right after setup.
    pub fn dirty(&self, field: Option<&str>) -> bool {
        let state = self.0.state.borrow();
        let initial = self.0.initial.borrow();
        let is_dirty = |field: &str| {
            !self
                .0
                .spec
                .equality(field)
                .eq(&field_of(&initial, field), &field_of(&state, field))
        };
        match field {
            Some(field) => is_dirty(field),
            None => initial.keys().chain(state.keys()).any(|f| is_dirty(f)),
        }
    }

    /// Restores `field` (or the whole state if `None`) to the state right after setup.
    pub fn reset(&self, field: Option<&str>) -> Result<()> {
        let initial = self.0.initial.borrow().clone();
        self.mutate(|ac| {
            match field {
                Some(field) => ac.set(field, field_of(&initial, field)),
                None => *ac.store.0.state.borrow_mut() = initial,
            }
            Ok(())
        })
    }

    /// Cached lens over `path` with default options.
    pub fn focus(&self, path: &str) -> Focus {
        focus::lookup(self, path, FocusOptions::default())
    }

    /// Cached lens over `path`.
    ///
    /// If a lens for `path` already exists, it is returned unchanged; differing options are
    /// reported through `tracing` and ignored.
    pub fn focus_with(&self, path: &str, options: FocusOptions) -> Focus {
        focus::lookup(self, path, options)
    }
    pub(crate) fn focuses(&self) -> &Pool<Rc<str>, FocusNode> {
        &self.0.focuses
    }

    /// Registers `f` to run when the store is disposed. Runs `f` now if it already is.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        if self.is_disposed() {
            f()
        } else {
            self.0.teardowns.borrow_mut().push(Box::new(f));
        }
    }

    /// Tears the store down. Returns false if it was already disposed.
    pub(crate) fn dispose(&self) -> bool {
        if self.0.disposed.replace(true) {
            return false;
        }
        debug!(store = %self.name(), id = self.id().get(), "dispose store");
        let teardowns = take(&mut *self.0.teardowns.borrow_mut());
        for f in teardowns.into_iter().rev() {
            f();
        }
        let listeners = take(&mut *self.0.listeners.borrow_mut());
        let actions = take(&mut *self.0.actions.borrow_mut());
        drop(listeners);
        drop(actions);
        self.0.focuses.clear();
        true
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", self.name())
            .field("id", &self.id())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ReadSource for StoreNode {
    fn subscribe_read(self: Rc<Self>, key: &ReadKey, listener: Rc<dyn Fn()>) -> Subscription {
        let key = match key {
            ReadKey::Field(_, field) => SubscribeKey::Field(field.clone()),
            ReadKey::Action(_, action) => SubscribeKey::Action(action.clone()),
            ReadKey::AnyAction(_) => SubscribeKey::AnyAction,
        };
        Store(self).subscribe(key, move |_| listener())
    }
}

fn field_of(map: &Map, field: &str) -> Value {
    map.get(field).cloned().unwrap_or_default()
}

/// Handle to one action of a store.
#[derive(Clone)]
pub struct ActionHandle {
    store: Store,
    name: Rc<str>,
}

impl ActionHandle {
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.store.dispatch(&self.name, args)
    }

    /// Number of times the action has been invoked.
    pub fn count(&self) -> u64 {
        self.with_slot(|slot| slot.count.get()).unwrap_or(0)
    }

    /// Most recent invocation. Does not track.
    pub fn last(&self) -> Option<ActionCall> {
        self.with_slot(|slot| slot.last.borrow().clone()).flatten()
    }

    /// Most recent invocation, recorded as a dependency so the read pass is notified on the next dispatch.
    pub fn last_tracked(&self, rc: &mut ReadContext) -> Option<ActionCall> {
        rc.record(|| {
            self.store
                .read_event(ReadKey::Action(self.store.id(), self.name.clone()))
        });
        self.last()
    }

    fn with_slot<T>(&self, f: impl FnOnce(&ActionSlot) -> T) -> Option<T> {
        self.store.0.actions.borrow().get(&self.name).map(f)
    }
}

impl std::fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}()", self.store.name(), self.name)
    }
}

/// Context for changing the state of one store inside a mutation pass.
pub struct ActionContext<'a> {
    store: &'a Store,
}

impl ActionContext<'_> {
    pub fn store(&self) -> &Store {
        self.store
    }
    pub fn get(&self, field: &str) -> Value {
        self.store.peek(field)
    }
    pub fn state(&self) -> Map {
        self.store.state()
    }
    pub fn set(&mut self, field: impl Into<Rc<str>>, value: impl Into<Value>) {
        self.store
            .0
            .state
            .borrow_mut()
            .insert(field.into(), value.into());
    }

    /// Replaces `field` with the result of `f` applied to its current value.
    pub fn update(&mut self, field: &str, f: impl FnOnce(&Value) -> Value) {
        let next = f(&self.get(field));
        self.set(field, next);
    }

    /// Mutates `field` in place. Parts of the value that `f` does not touch keep their identity.
    pub fn modify(&mut self, field: &str, f: impl FnOnce(&mut Value)) {
        let mut value = self.get(field);
        f(&mut value);
        self.set(field, value);
    }

    /// Dispatches another action of the same store; its writes join the current pass.
    pub fn dispatch(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        self.store.dispatch(name, args)
    }
}
