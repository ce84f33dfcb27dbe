use std::{collections::BTreeMap, rc::Rc};

use parse_display::Display;

use crate::{
    utils::next_id, ActionContext, Equality, Error, Map, MetaAll, MetaEntry, MetaId, MetaQuery,
    MetaType, Metadata, Result, SetupContext, Value,
};

pub type ActionFn = Rc<dyn Fn(&mut ActionContext, &[Value]) -> Result<Value>>;
pub type SetupFn = Rc<dyn Fn(&mut SetupContext) -> Result<Actions>>;
pub type Transform = Rc<dyn Fn(Map) -> Map>;

pub(crate) const ANY_ACTION: &str = "*";

/// How a container manages the instance of a spec obtained through [`Container::get`](crate::Container::get).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[display(style = "kebab-case")]
pub enum Lifetime {
    /// Lives until the container is disposed.
    #[default]
    Singleton,
    /// Disposed as soon as the last binding that read it is disposed.
    AutoDispose,
}

/// Action table returned from a store's setup function.
#[derive(Default, Clone)]
pub struct Actions(Vec<(Rc<str>, ActionFn)>);

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(
        mut self,
        name: &str,
        f: impl Fn(&mut ActionContext, &[Value]) -> Result<Value> + 'static,
    ) -> Self {
        self.0.push((name.into(), Rc::new(f)));
        self
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn validate(self, store: &Rc<str>) -> Result<BTreeMap<Rc<str>, ActionFn>> {
        let mut table = BTreeMap::new();
        for (name, f) in self.0 {
            let reason = if name.is_empty() {
                Some("action names must not be empty")
            } else if &*name == ANY_ACTION {
                Some("`*` is reserved for wildcard listeners")
            } else if table.contains_key(&name) {
                Some("action is declared more than once")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(Error::InvalidActionShape {
                    store: store.clone(),
                    action: name,
                    reason,
                });
            }
            table.insert(name, f);
        }
        Ok(table)
    }
}

/// Immutable blueprint of a store.
///
/// Cloning is cheap; clones share identity, which is the key under which a container interns the instance.
#[derive(Clone)]
pub struct StoreSpec(Rc<SpecNode>);

pub(crate) struct SpecNode {
    id: u64,
    name: Rc<str>,
    initial: Map,
    setup: Option<SetupFn>,
    equality: BTreeMap<Rc<str>, Equality>,
    lifetime: Lifetime,
    meta: Metadata,
    normalize: Option<Transform>,
    denormalize: Option<Transform>,
}

impl StoreSpec {
    pub fn builder(name: &str) -> StoreSpecBuilder {
        StoreSpecBuilder {
            node: SpecNode {
                id: next_id(),
                name: name.into(),
                initial: Map::new(),
                setup: None,
                equality: BTreeMap::new(),
                lifetime: Lifetime::default(),
                meta: Metadata::new(),
                normalize: None,
                denormalize: None,
            },
        }
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }
    pub fn name(&self) -> &Rc<str> {
        &self.0.name
    }
    pub fn initial_state(&self) -> &Map {
        &self.0.initial
    }
    pub fn lifetime(&self) -> Lifetime {
        self.0.lifetime
    }
    pub fn metadata(&self) -> &Metadata {
        &self.0.meta
    }
    pub fn meta<T: Clone + 'static>(&self, ty: &MetaType<T>) -> MetaQuery<T> {
        self.0.meta.get(ty)
    }
    pub fn meta_all<T: Clone + 'static>(&self, ty: &MetaType<T>) -> MetaAll<T> {
        self.0.meta.all(ty)
    }
    pub fn meta_any(&self, ids: &[MetaId]) -> bool {
        self.0.meta.any(ids)
    }

    /// Equality used to decide whether `field` changed during a mutation pass.
    pub fn equality(&self, field: &str) -> Equality {
        self.0.equality.get(field).cloned().unwrap_or_default()
    }

    pub(crate) fn setup(&self) -> Option<&SetupFn> {
        self.0.setup.as_ref()
    }
    pub(crate) fn normalize(&self) -> Option<&Transform> {
        self.0.normalize.as_ref()
    }
    pub(crate) fn denormalize(&self) -> Option<&Transform> {
        self.0.denormalize.as_ref()
    }
}
impl PartialEq for StoreSpec {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for StoreSpec {}
impl std::hash::Hash for StoreSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state)
    }
}
impl std::fmt::Debug for StoreSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSpec")
            .field("name", &self.0.name)
            .field("id", &self.0.id)
            .field("lifetime", &self.0.lifetime)
            .finish()
    }
}

pub struct StoreSpecBuilder {
    node: SpecNode,
}

impl StoreSpecBuilder {
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.node.initial.insert(name.into(), value.into());
        self
    }
    pub fn setup(mut self, f: impl Fn(&mut SetupContext) -> Result<Actions> + 'static) -> Self {
        self.node.setup = Some(Rc::new(f));
        self
    }
    pub fn equality(mut self, field: &str, equality: Equality) -> Self {
        self.node.equality.insert(field.into(), equality);
        self
    }
    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.node.lifetime = lifetime;
        self
    }
    pub fn meta(mut self, entry: MetaEntry) -> Self {
        self.node.meta.push(entry);
        self
    }
    pub fn normalize(mut self, f: impl Fn(Map) -> Map + 'static) -> Self {
        self.node.normalize = Some(Rc::new(f));
        self
    }
    pub fn denormalize(mut self, f: impl Fn(Map) -> Map + 'static) -> Self {
        self.node.denormalize = Some(Rc::new(f));
        self
    }
    pub fn build(self) -> StoreSpec {
        StoreSpec(Rc::new(self.node))
    }
}
