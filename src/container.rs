use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::HashMap,
    mem::take,
    rc::Rc,
};

use derive_ex::{derive_ex, Ex};
use parse_display::Display;
use tracing::{debug, warn};

use crate::{
    error::DisposedTarget, tracking::StoreId, utils::next_id, Actions, Dispose, Error, Lifetime,
    MetaId, MetaQuery, MetaType, Metadata, Result, Runtime, Store, StoreSpec, Value,
};


/// What a middleware is wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(style = "lowercase")]
pub enum InstanceKind {
    Store,
    Factory,
}

/// Result of one instantiation, as seen by middleware.
#[derive(Clone)]
pub enum Instance {
    Store(Store),
    Service(Rc<dyn Any>),
}
impl Instance {
    pub fn kind(&self) -> InstanceKind {
        match self {
            Instance::Store(_) => InstanceKind::Store,
            Instance::Service(_) => InstanceKind::Factory,
        }
    }
    pub fn as_store(&self) -> Option<&Store> {
        match self {
            Instance::Store(store) => Some(store),
            Instance::Service(_) => None,
        }
    }
}
impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instance::Store(store) => f.debug_tuple("Store").field(store).finish(),
            Instance::Service(_) => write!(f, "Service"),
        }
    }
}

/// Wraps every instantiation performed by a [`Container`].
pub type Middleware = Rc<dyn Fn(&MiddlewareContext, Next) -> Result<Instance>>;

/// Remainder of the middleware chain, ending in the real instantiation.
pub struct Next<'a> {
    f: Box<dyn FnOnce() -> Result<Instance> + 'a>,
    called: &'a Cell<bool>,
}
impl Next<'_> {
    pub fn run(self) -> Result<Instance> {
        self.called.set(true);
        (self.f)()
    }
}

pub struct MiddlewareContext {
    kind: InstanceKind,
    name: Rc<str>,
    spec: Option<StoreSpec>,
    meta: Metadata,
    container: Container,
}
impl MiddlewareContext {
    pub fn kind(&self) -> InstanceKind {
        self.kind
    }
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    /// Spec being instantiated, for [`InstanceKind::Store`].
    pub fn spec(&self) -> Option<&StoreSpec> {
        self.spec.as_ref()
    }
    pub fn meta<T: Clone + 'static>(&self, ty: &MetaType<T>) -> MetaQuery<T> {
        self.meta.get(ty)
    }
    pub fn meta_any(&self, ids: &[MetaId]) -> bool {
        self.meta.any(ids)
    }
    pub fn container(&self) -> &Container {
        &self.container
    }
}

fn run_chain<'a>(
    chain: &'a [Middleware],
    cx: &'a MiddlewareContext,
    core: Box<dyn FnOnce() -> Result<Instance> + 'a>,
) -> Result<Instance> {
    let Some((m, rest)) = chain.split_first() else {
        return core();
    };
    let called = Cell::new(false);
    let result = m(
        cx,
        Next {
            f: Box::new(move || run_chain(rest, cx, core)),
            called: &called,
        },
    );
    if !called.get() {
        warn!(kind = %cx.kind, name = %cx.name, "middleware returned without calling next");
    }
    result
}

/// Service factory resolved through [`Container::resolve`].
///
/// Services are interned per container by factory identity, like singleton stores.
#[derive_ex(Clone, bound())]
pub struct Factory<T> {
    id: u64,
    name: Rc<str>,
    create: Rc<dyn Fn(&mut SetupContext) -> Result<T>>,
    dispose: Option<fn(&T)>,
    meta: Rc<Metadata>,
}

impl<T: 'static> Factory<T> {
    pub fn new(name: &str, create: impl Fn(&mut SetupContext) -> Result<T> + 'static) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            create: Rc::new(create),
            dispose: None,
            meta: Rc::new(Metadata::new()),
        }
    }

    /// Calls [`Dispose::dispose`] on the service when its container is disposed.
    pub fn with_dispose(mut self) -> Self
    where
        T: Dispose,
    {
        self.dispose = Some(<T as Dispose>::dispose);
        self
    }
    pub fn meta(mut self, entry: crate::MetaEntry) -> Self {
        Rc::make_mut(&mut self.meta).push(entry);
        self
    }
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }
}
impl<T> std::fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Factory({})", self.name)
    }
}

/// Context passed to store setup functions and service factories.
pub struct SetupContext {
    container: Container,
    store: Option<Store>,
    teardowns: Vec<Box<dyn FnOnce()>>,
}

impl SetupContext {
    fn new(container: &Container, store: Option<Store>) -> Self {
        Self {
            container: container.clone(),
            store,
            teardowns: Vec::new(),
        }
    }
    pub fn container(&self) -> &Container {
        &self.container
    }
    pub fn runtime(&self) -> &Runtime {
        self.container.runtime()
    }

    /// Store being set up, or `None` inside a service factory.
    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    /// Singleton of `spec` from the same container.
    pub fn get(&mut self, spec: &StoreSpec) -> Result<Store> {
        self.container.get(spec)
    }

    /// Fresh store of `spec`, disposed together with the instance being set up.
    pub fn create(&mut self, spec: &StoreSpec) -> Result<Store> {
        let store = self.container.create(spec)?;
        let container = Rc::downgrade(&self.container.0);
        let owned = store.clone();
        self.on_dispose(move || {
            if let Some(container) = container.upgrade() {
                Container(container).dispose_store(&owned);
            }
        });
        Ok(store)
    }
    pub fn resolve<T: 'static>(&mut self, factory: &Factory<T>) -> Result<Rc<T>> {
        self.container.resolve(factory)
    }

    /// Overrides the initial value of `field` of the store being set up.
    ///
    /// Values written here count as the state right after setup for `dirty` and `reset`.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        if let Some(store) = &self.store {
            store.write_initial(field, value.into());
        }
    }

    /// Registers `f` to run when the instance being set up is disposed.
    pub fn on_dispose(&mut self, f: impl FnOnce() + 'static) {
        self.teardowns.push(Box::new(f));
    }
}

enum Created {
    Store(Store),
    Service(Box<dyn FnOnce()>),
}

struct ContainerNode {
    id: u64,
    runtime: Runtime,
    middleware: RefCell<Vec<Middleware>>,
    singletons: RefCell<HashMap<StoreSpec, Store>>,
    services: RefCell<HashMap<u64, Rc<dyn Any>>>,
    created: RefCell<Vec<Created>>,
    retains: RefCell<HashMap<StoreId, usize>>,
    stack: RefCell<Vec<(u64, Rc<str>)>>,
    disposed: Cell<bool>,
}

/// Dependency-injection container owning store and service instances.
#[derive(Clone, Ex)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Container(Rc<ContainerNode>);

struct ResolveGuard<'a>(&'a ContainerNode);

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        self.0.stack.borrow_mut().pop();
    }
}

impl Container {
    pub fn new() -> Self {
        Self::with_runtime(Runtime::new())
    }
    pub fn with_runtime(runtime: Runtime) -> Self {
        Self(Rc::new(ContainerNode {
            id: next_id(),
            runtime,
            middleware: RefCell::new(Vec::new()),
            singletons: RefCell::new(HashMap::new()),
            services: RefCell::new(HashMap::new()),
            created: RefCell::new(Vec::new()),
            retains: RefCell::new(HashMap::new()),
            stack: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }))
    }
    pub fn id(&self) -> u64 {
        self.0.id
    }
    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Appends `f` to the middleware chain. Earlier middleware wrap later ones.
    pub fn add_middleware(
        &self,
        f: impl Fn(&MiddlewareContext, Next) -> Result<Instance> + 'static,
    ) {
        self.0.middleware.borrow_mut().push(Rc::new(f));
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::disposed(
                DisposedTarget::Container,
                &"container".into(),
                self.id(),
            ))
        } else {
            Ok(())
        }
    }

    fn enter(&self, id: u64, name: &Rc<str>) -> Result<ResolveGuard<'_>> {
        let mut stack = self.0.stack.borrow_mut();
        if let Some(i) = stack.iter().position(|(x, _)| *x == id) {
            let mut path: Vec<&str> = stack[i..].iter().map(|(_, name)| &**name).collect();
            path.push(&**name);
            return Err(Error::DependencyCycle {
                path: path.join(" -> "),
            });
        }
        stack.push((id, name.clone()));
        Ok(ResolveGuard(&self.0))
    }

    /// Returns the singleton of `spec`, creating it on first use.
    pub fn get(&self, spec: &StoreSpec) -> Result<Store> {
        self.check_disposed()?;
        let found = self.0.singletons.borrow().get(spec).cloned();
        if let Some(store) = found {
            return Ok(store);
        }
        let store = self.instantiate_store(spec)?;
        self.0
            .singletons
            .borrow_mut()
            .insert(spec.clone(), store.clone());
        Ok(store)
    }

    /// Returns the singleton of `spec` if it has already been created.
    pub fn peek(&self, spec: &StoreSpec) -> Option<Store> {
        self.0.singletons.borrow().get(spec).cloned()
    }

    /// Creates a store of `spec` that is not interned.
    pub fn create(&self, spec: &StoreSpec) -> Result<Store> {
        self.check_disposed()?;
        self.instantiate_store(spec)
    }

    fn instantiate_store(&self, spec: &StoreSpec) -> Result<Store> {
        let _guard = self.enter(spec.id(), spec.name())?;
        let cx = MiddlewareContext {
            kind: InstanceKind::Store,
            name: spec.name().clone(),
            spec: Some(spec.clone()),
            meta: spec.metadata().clone(),
            container: self.clone(),
        };
        let chain = self.0.middleware.borrow().clone();
        let instance = run_chain(
            &chain,
            &cx,
            Box::new(|| self.build_store(spec).map(Instance::Store)),
        )?;
        match instance {
            Instance::Store(store) => Ok(store),
            Instance::Service(_) => Err(Error::InvalidInstance {
                name: spec.name().clone(),
            }),
        }
    }

    fn build_store(&self, spec: &StoreSpec) -> Result<Store> {
        let store = Store::new(spec);
        debug!(store = %spec.name(), id = store.id().get(), "instantiate store");
        let mut cx = SetupContext::new(self, Some(store.clone()));
        let actions = match spec.setup() {
            Some(setup) => setup(&mut cx),
            None => Ok(Actions::new()),
        };
        for f in take(&mut cx.teardowns) {
            store.on_dispose(f);
        }
        if let Err(e) = actions.and_then(|actions| store.install(actions)) {
            store.dispose();
            return Err(e);
        }
        self.0
            .created
            .borrow_mut()
            .push(Created::Store(store.clone()));
        Ok(store)
    }

    /// Returns the service of `factory`, creating it on first use.
    pub fn resolve<T: 'static>(&self, factory: &Factory<T>) -> Result<Rc<T>> {
        self.check_disposed()?;
        let invalid = || Error::InvalidInstance {
            name: factory.name.clone(),
        };
        let found = self.0.services.borrow().get(&factory.id).cloned();
        if let Some(service) = found {
            return service.downcast::<T>().map_err(|_| invalid());
        }
        let _guard = self.enter(factory.id, &factory.name)?;
        let cx = MiddlewareContext {
            kind: InstanceKind::Factory,
            name: factory.name.clone(),
            spec: None,
            meta: (*factory.meta).clone(),
            container: self.clone(),
        };
        let chain = self.0.middleware.borrow().clone();
        let instance = run_chain(
            &chain,
            &cx,
            Box::new(|| self.build_service(factory).map(Instance::Service)),
        )?;
        let Instance::Service(service) = instance else {
            return Err(invalid());
        };
        let typed = service.clone().downcast::<T>().map_err(|_| invalid())?;
        self.0.services.borrow_mut().insert(factory.id, service);
        Ok(typed)
    }

    fn build_service<T: 'static>(&self, factory: &Factory<T>) -> Result<Rc<dyn Any>> {
        debug!(factory = %factory.name, "instantiate service");
        let mut cx = SetupContext::new(self, None);
        let value = (factory.create)(&mut cx);
        let teardowns = take(&mut cx.teardowns);
        let value = match value {
            Ok(value) => Rc::new(value),
            Err(e) => {
                teardowns.into_iter().rev().for_each(|f| f());
                return Err(e);
            }
        };
        let dispose = factory.dispose;
        let name = factory.name.clone();
        let service = value.clone();
        self.0
            .created
            .borrow_mut()
            .push(Created::Service(Box::new(move || {
                debug!(factory = %name, "dispose service");
                if let Some(dispose) = dispose {
                    dispose(&service);
                }
                teardowns.into_iter().rev().for_each(|f| f());
            })));
        Ok(value)
    }

    /// Registers one binding's use of `store`. Only affects [`Lifetime::AutoDispose`] stores.
    pub(crate) fn retain(&self, store: &Store) {
        if store.spec().lifetime() == Lifetime::AutoDispose {
            *self.0.retains.borrow_mut().entry(store.id()).or_insert(0) += 1;
        }
    }

    /// Reverses [`retain`](Self::retain); disposes the store when the last user is gone.
    pub(crate) fn release(&self, store: &Store) {
        if store.spec().lifetime() != Lifetime::AutoDispose {
            return;
        }
        let last = {
            let mut retains = self.0.retains.borrow_mut();
            match retains.get_mut(&store.id()) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    retains.remove(&store.id());
                    true
                }
                None => false,
            }
        };
        if last {
            self.dispose_store(store);
        }
    }

    #[cfg(test)]
    pub(crate) fn retain_count(&self, store: &Store) -> usize {
        self.0
            .retains
            .borrow()
            .get(&store.id())
            .copied()
            .unwrap_or(0)
    }

    /// Disposes `store` and forgets it, so that the next `get` of its spec creates a new one.
    pub(crate) fn dispose_store(&self, store: &Store) {
        {
            let mut singletons = self.0.singletons.borrow_mut();
            if singletons.get(store.spec()).is_some_and(|s| s.ptr_eq(store)) {
                singletons.remove(store.spec());
            }
        }
        self.0
            .created
            .borrow_mut()
            .retain(|c| !matches!(c, Created::Store(s) if s.ptr_eq(store)));
        store.dispose();
    }

    /// Disposes every instance created through this container, newest first.
    ///
    /// Calling it again does nothing.
    pub fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        debug!(container = self.id(), "dispose container");
        loop {
            let last = self.0.created.borrow_mut().pop();
            match last {
                Some(Created::Store(store)) => {
                    store.dispose();
                }
                Some(Created::Service(dispose)) => dispose(),
                None => break,
            }
        }
        let singletons = take(&mut *self.0.singletons.borrow_mut());
        let services = take(&mut *self.0.services.borrow_mut());
        self.0.retains.borrow_mut().clear();
        drop(singletons);
        drop(services);
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id())
            .field("singletons", &self.0.singletons.borrow().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
