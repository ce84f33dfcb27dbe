use std::{
    cell::RefCell,
    collections::HashMap,
    mem::{replace, take},
    rc::Rc,
};

use parse_display::Display;
use tracing::trace;

use crate::{
    equality::{stabilize, strict_eq},
    error::DisposedTarget,
    tracking::{Effect, ReadScope, StoreId},
    utils::next_id,
    Container, Equality, Error, Map, ReadContext, ReadError, ReadKey, ReadSet, Result, Runtime,
    Store, StoreSpec, Subscription, TimerHandle, Value,
};


/// Lifecycle state of a [`Binding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(style = "kebab-case")]
pub enum BindingState {
    Fresh,
    Rendered,
    Committed,
    Uncommitted,
    Abandoned,
    Disposed,
}

#[derive(Debug, Clone, Default)]
pub struct BindingOptions {
    /// Equality used to keep the previous output (or the previous value of each output key).
    pub equality: Equality,
}

struct BindingData {
    state: BindingState,
    reads: ReadSet,
    subscriptions: Vec<Subscription>,
    output: Option<Value>,
    effects: Vec<Effect>,
    scoped: Vec<(StoreSpec, Store)>,
    retained: HashMap<StoreId, Store>,
    stale: bool,
    notify_queued: bool,
    timer: Option<TimerHandle>,
    teardowns: Vec<Box<dyn FnOnce()>>,
}

struct BindingNode {
    id: u64,
    container: Container,
    options: BindingOptions,
    on_update: Rc<dyn Fn()>,
    data: RefCell<BindingData>,
}

/// A consumer's attachment to the stores its selector reads.
///
/// The host drives it with [`render`](Self::render) during its render phase,
/// [`commit`](Self::commit) once the output is kept and [`cleanup`](Self::cleanup) when it detaches.
/// `on_update` is called when the host should render again.
#[derive(Clone)]
pub struct Binding(Rc<BindingNode>);

impl Binding {
    pub fn new(container: &Container, on_update: impl Fn() + 'static) -> Self {
        Self::with_options(container, BindingOptions::default(), on_update)
    }
    pub fn with_options(
        container: &Container,
        options: BindingOptions,
        on_update: impl Fn() + 'static,
    ) -> Self {
        Self(Rc::new(BindingNode {
            id: next_id(),
            container: container.clone(),
            options,
            on_update: Rc::new(on_update),
            data: RefCell::new(BindingData {
                state: BindingState::Fresh,
                reads: ReadSet::new(),
                subscriptions: Vec::new(),
                output: None,
                effects: Vec::new(),
                scoped: Vec::new(),
                retained: HashMap::new(),
                stale: false,
                notify_queued: false,
                timer: None,
                teardowns: Vec::new(),
            }),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }
    pub fn container(&self) -> &Container {
        &self.0.container
    }
    fn runtime(&self) -> &Runtime {
        self.0.container.runtime()
    }
    pub fn state(&self) -> BindingState {
        self.0.data.borrow().state
    }
    pub fn is_disposed(&self) -> bool {
        self.state() == BindingState::Disposed
    }

    /// Output of the last completed render.
    pub fn output(&self) -> Option<Value> {
        self.0.data.borrow().output.clone()
    }

    /// Keys read by the last completed render.
    pub fn reads(&self) -> Vec<ReadKey> {
        self.0.data.borrow().reads.keys().cloned().collect()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.0.data.borrow().subscriptions.len()
    }

    /// Returns true if a dependency changed since the last render and the host has not been told yet.
    pub fn is_stale(&self) -> bool {
        self.0.data.borrow().stale
    }

    /// Scoped store of `spec` created by this binding, if any.
    pub fn scoped(&self, spec: &StoreSpec) -> Option<Store> {
        self.0.find_scoped(spec)
    }

    /// Registers `f` to run when the binding is disposed.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        if self.is_disposed() {
            f()
        } else {
            self.0.data.borrow_mut().teardowns.push(Box::new(f));
        }
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::disposed(
                DisposedTarget::Binding,
                &"binding".into(),
                self.id(),
            ))
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: BindingState) {
        let prev = replace(&mut self.0.data.borrow_mut().state, state);
        if prev != state {
            trace!(binding = self.id(), from = %prev, to = %state, "binding state");
        }
    }
    fn cancel_timer(&self) {
        let timer = self.0.data.borrow_mut().timer.take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
    fn schedule(&self, grace: std::time::Duration, f: fn(&Binding)) {
        let this = Rc::downgrade(&self.0);
        let timer = self.runtime().set_timeout(grace, move || {
            if let Some(node) = this.upgrade() {
                f(&Binding(node))
            }
        });
        let old = self.0.data.borrow_mut().timer.replace(timer);
        if let Some(old) = old {
            old.cancel();
        }
    }

    /// Runs `selector` as a tracked read pass and subscribes to exactly what it read.
    ///
    /// A pending dependency returns [`ReadError::Pending`] and leaves the binding alive with no subscriptions.
    /// Any other error disposes the binding.
    pub fn render(
        &self,
        selector: impl FnOnce(&mut ReadContext) -> Result<Value, ReadError>,
    ) -> Result<Value, ReadError> {
        self.check_disposed()?;
        self.cancel_timer();
        let (subscriptions, reads) = {
            let mut d = self.0.data.borrow_mut();
            d.effects.clear();
            d.stale = false;
            (take(&mut d.subscriptions), take(&mut d.reads))
        };
        drop(subscriptions);
        drop(reads);

        let mut reads = ReadSet::new();
        let result = {
            let _render = self.runtime().enter_render();
            let mut rc = ReadContext::with_scope(&mut reads, &*self.0);
            selector(&mut rc)
        };
        let result = result.and_then(|value| match check_output(&value) {
            Ok(()) => Ok(value),
            Err(e) => Err(e.into()),
        });
        let value = match result {
            Ok(value) => value,
            Err(ReadError::Pending(promise)) => {
                trace!(binding = self.id(), promise = promise.id(), "render pending");
                return Err(ReadError::Pending(promise));
            }
            Err(ReadError::Error(e)) => {
                self.dispose();
                return Err(e.into());
            }
        };

        let prev = self.0.data.borrow().output.clone();
        let value = stabilize_output(prev.as_ref(), value, &self.0.options.equality);
        let subscriptions = reads.subscribe(self.listener());
        let effects = reads.take_effects();
        let committed = {
            let mut d = self.0.data.borrow_mut();
            d.reads = reads;
            d.subscriptions = subscriptions;
            d.effects = effects;
            d.output = Some(value.clone());
            d.state == BindingState::Committed
        };
        if !committed {
            self.set_state(BindingState::Rendered);
            self.schedule(self.runtime().config().abandon_grace, Binding::on_abandon);
        }
        Ok(value)
    }

    /// Marks the last render as kept by the host.
    ///
    /// Runs the effects scheduled during that render, and calls `on_update` if a dependency
    /// changed since it.
    pub fn commit(&self) -> Result<()> {
        self.check_disposed()?;
        self.cancel_timer();
        let reattach = {
            let d = self.0.data.borrow();
            d.state == BindingState::Uncommitted && d.subscriptions.is_empty() && !d.reads.is_empty()
        };
        if reattach {
            let listener = self.listener();
            let mut d = self.0.data.borrow_mut();
            d.subscriptions = d.reads.subscribe(listener);
            d.stale = true;
        }
        self.set_state(BindingState::Committed);
        let (stale, effects) = {
            let mut d = self.0.data.borrow_mut();
            (replace(&mut d.stale, false), take(&mut d.effects))
        };
        for effect in effects {
            effect();
        }
        if stale {
            (self.0.on_update)();
        }
        Ok(())
    }

    /// Detaches the binding from the host.
    ///
    /// Unsubscribes everything and disposes the binding after the detach grace period,
    /// unless it is committed again first. Calling it again before then does nothing.
    pub fn cleanup(&self) {
        let subscriptions = {
            let mut d = self.0.data.borrow_mut();
            if matches!(
                d.state,
                BindingState::Uncommitted | BindingState::Abandoned | BindingState::Disposed
            ) {
                return;
            }
            take(&mut d.subscriptions)
        };
        drop(subscriptions);
        self.set_state(BindingState::Uncommitted);
        self.schedule(self.runtime().config().detach_grace, Binding::on_detach);
    }

    fn on_abandon(&self) {
        if self.state() == BindingState::Rendered {
            self.set_state(BindingState::Abandoned);
            self.dispose();
        }
    }
    fn on_detach(&self) {
        if self.state() == BindingState::Uncommitted {
            self.dispose();
        }
    }

    fn listener(&self) -> Rc<dyn Fn()> {
        let this = Rc::downgrade(&self.0);
        Rc::new(move || {
            if let Some(node) = this.upgrade() {
                Binding(node).on_dependency_changed()
            }
        })
    }
    fn on_dependency_changed(&self) {
        let state = self.state();
        match state {
            BindingState::Committed => {
                if self.runtime().is_rendering() {
                    self.queue_update();
                } else {
                    (self.0.on_update)();
                }
            }
            BindingState::Fresh | BindingState::Rendered | BindingState::Uncommitted => {
                self.0.data.borrow_mut().stale = true;
            }
            BindingState::Abandoned | BindingState::Disposed => {}
        }
    }
    fn queue_update(&self) {
        if replace(&mut self.0.data.borrow_mut().notify_queued, true) {
            return;
        }
        let this = Rc::downgrade(&self.0);
        self.runtime().queue_microtask(move || {
            let Some(node) = this.upgrade() else {
                return;
            };
            let committed = {
                let mut d = node.data.borrow_mut();
                d.notify_queued = false;
                d.state == BindingState::Committed
            };
            if committed {
                (node.on_update)();
            } else {
                node.data.borrow_mut().stale = true;
            }
        });
    }

    /// Disposes the binding now: unsubscribes, disposes its scoped stores and notifies its owner.
    ///
    /// Calling it again does nothing.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.cancel_timer();
        self.set_state(BindingState::Disposed);
        let parts = self.0.data.borrow_mut().take_owned();
        parts.release(&self.0.container);
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = self.0.data.borrow();
        f.debug_struct("Binding")
            .field("id", &self.0.id)
            .field("state", &d.state)
            .field("reads", &d.reads)
            .finish()
    }
}

struct Owned {
    subscriptions: Vec<Subscription>,
    reads: ReadSet,
    effects: Vec<Effect>,
    scoped: Vec<(StoreSpec, Store)>,
    retained: HashMap<StoreId, Store>,
    teardowns: Vec<Box<dyn FnOnce()>>,
}

impl BindingData {
    fn take_owned(&mut self) -> Owned {
        self.output = None;
        self.stale = false;
        Owned {
            subscriptions: take(&mut self.subscriptions),
            reads: take(&mut self.reads),
            effects: take(&mut self.effects),
            scoped: take(&mut self.scoped),
            retained: take(&mut self.retained),
            teardowns: take(&mut self.teardowns),
        }
    }
}

impl Owned {
    fn release(self, container: &Container) {
        drop(self.subscriptions);
        drop(self.reads);
        drop(self.effects);
        for (_, store) in self.scoped.into_iter().rev() {
            container.dispose_store(&store);
        }
        for store in self.retained.into_values() {
            container.release(&store);
        }
        for f in self.teardowns {
            f();
        }
    }
}

impl Drop for BindingNode {
    fn drop(&mut self) {
        let data = self.data.get_mut();
        if data.state != BindingState::Disposed {
            data.state = BindingState::Disposed;
            if let Some(timer) = data.timer.take() {
                timer.cancel();
            }
            data.take_owned().release(&self.container);
        }
    }
}

impl BindingNode {
    fn find_scoped(&self, spec: &StoreSpec) -> Option<Store> {
        self.data
            .borrow()
            .scoped
            .iter()
            .find(|(s, _)| s == spec)
            .map(|(_, store)| store.clone())
    }
}

impl ReadScope for BindingNode {
    fn container(&self) -> &Container {
        &self.container
    }
    fn scoped(&self, spec: &StoreSpec) -> Result<Store> {
        if let Some(store) = self.find_scoped(spec) {
            return Ok(store);
        }
        let store = self.container.create(spec)?;
        self.data
            .borrow_mut()
            .scoped
            .push((spec.clone(), store.clone()));
        Ok(store)
    }
    fn retain(&self, store: &Store) {
        let first = {
            let mut d = self.data.borrow_mut();
            if d.retained.contains_key(&store.id()) {
                false
            } else {
                d.retained.insert(store.id(), store.clone());
                true
            }
        };
        if first {
            self.container.retain(store);
        }
    }
}

fn check_output(value: &Value) -> Result<()> {
    if value.is_promise() {
        return Err(Error::AsyncSelectorNotAllowed {
            key: "<output>".into(),
        });
    }
    if let Some(map) = value.as_map() {
        if let Some((key, _)) = map.iter().find(|(_, v)| v.is_promise()) {
            return Err(Error::AsyncSelectorNotAllowed { key: key.clone() });
        }
    }
    Ok(())
}

/// Keeps the previous output where the new one is equal to it.
///
/// Map outputs are compared per key, and the previous map itself is kept if every key was kept.
fn stabilize_output(prev: Option<&Value>, next: Value, equality: &Equality) -> Value {
    let Some(prev) = prev else {
        return next;
    };
    match (prev, &next) {
        (Value::Map(prev_map), Value::Map(next_map)) => {
            let mut kept_all = prev_map.len() == next_map.len();
            let mut out = Map::new();
            for (key, value) in next_map.iter() {
                let value = match prev_map.get(key) {
                    Some(p) => {
                        let value = stabilize(p, value.clone(), equality);
                        kept_all &= strict_eq(p, &value);
                        value
                    }
                    None => {
                        kept_all = false;
                        value.clone()
                    }
                };
                out.insert(key.clone(), value);
            }
            if kept_all {
                prev.clone()
            } else {
                Value::from(out)
            }
        }
        _ => stabilize(prev, next, equality),
    }
}
