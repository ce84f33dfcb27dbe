use std::rc::Rc;

use tracing::warn;

use crate::{
    value::{get_in, parse_path, set_in},
    Equality, Pool, ReadContext, Result, Store, Subscription, Value,
};

#[cfg(test)]
mod tests;

/// Options of a [`Focus`].
#[derive(Clone, Default)]
pub struct FocusOptions {
    fallback: Option<Rc<dyn Fn() -> Value>>,
    equality: Option<Equality>,
}

impl FocusOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned by `get` (and seeded into `modify`) when the value at the path is `Null`.
    pub fn fallback(mut self, f: impl Fn() -> Value + 'static) -> Self {
        self.fallback = Some(Rc::new(f));
        self
    }

    /// Equality used by [`Focus::on`] to decide whether the value at the path changed.
    pub fn equality(mut self, equality: Equality) -> Self {
        self.equality = Some(equality);
        self
    }

    fn is_empty(&self) -> bool {
        self.fallback.is_none() && self.equality.is_none()
    }
    fn same_as(&self, other: &Self) -> bool {
        let fallback = match (&self.fallback, &other.fallback) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        let equality = match (&self.equality, &other.equality) {
            (None, None) => true,
            (Some(a), Some(b)) => a.is_same_strategy(b),
            _ => false,
        };
        fallback && equality
    }
}

impl std::fmt::Debug for FocusOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusOptions")
            .field("fallback", &self.fallback.is_some())
            .field("equality", &self.equality)
            .finish()
    }
}

pub(crate) struct FocusNode {
    path: Rc<str>,
    segments: Vec<Rc<str>>,
    options: FocusOptions,
}

impl FocusNode {
    fn new(path: Rc<str>, options: FocusOptions) -> Self {
        Self {
            segments: parse_path(&path),
            path,
            options,
        }
    }
    fn at_path(&self, root: &Value) -> Value {
        let rest = self.segments.split_first().map_or(&[][..], |(_, rest)| rest);
        get_in(root, rest).cloned().unwrap_or_default()
    }
}

pub(crate) fn focus_pool() -> Pool<Rc<str>, FocusNode> {
    Pool::new(|path: &Rc<str>| FocusNode::new(path.clone(), FocusOptions::default()))
}

pub(crate) fn lookup(store: &Store, path: &str, options: FocusOptions) -> Focus {
    let key: Rc<str> = parse_path(path).join(".").into();
    let mut created = false;
    let node = store.focuses().get_or_insert_with(&key, || {
        created = true;
        FocusNode::new(key.clone(), options.clone())
    });
    if !created && !options.is_empty() && !node.options.same_as(&options) {
        warn!(
            store = %store.name(),
            path = %key,
            "focus requested with options that differ from the cached focus; keeping the first options"
        );
    }
    Focus {
        store: store.clone(),
        node,
    }
}

/// Read/write view of the value at a dotted path of a store's state.
///
/// Lenses are cached per store and path, so asking for the same path twice returns the same lens.
#[derive(Clone)]
pub struct Focus {
    store: Store,
    node: Rc<FocusNode>,
}

impl Focus {
    pub fn path(&self) -> &str {
        &self.node.path
    }
    pub fn store(&self) -> &Store {
        &self.store
    }
    pub fn ptr_eq(&self, other: &Focus) -> bool {
        Rc::ptr_eq(&self.node, &other.node)
    }

    fn split(&self) -> Option<(&Rc<str>, &[Rc<str>])> {
        self.node.segments.split_first()
    }
    fn at_path(&self, root: &Value) -> Value {
        self.node.at_path(root)
    }
    fn with_fallback(&self, value: Value) -> Value {
        match &self.node.options.fallback {
            Some(fallback) => value.or_else(|| fallback()),
            None => value,
        }
    }

    /// Value at the path, or the fallback if it is `Null`. Tracks the root field of the path.
    pub fn get(&self, rc: &mut ReadContext) -> Value {
        let root = match self.split() {
            Some((field, _)) => self.store.get(field, rc),
            None => Value::from(self.store.read_all(rc)),
        };
        self.with_fallback(self.at_path(&root))
    }

    /// Like [`get`](Self::get), without tracking.
    pub fn peek(&self) -> Value {
        self.get(&mut ReadContext::untracked())
    }

    fn equality(&self, field: &str) -> Equality {
        match &self.node.options.equality {
            Some(equality) => equality.clone(),
            None => self.store.spec().equality(field),
        }
    }

    /// Replaces the value at the path, creating missing intermediate maps.
    ///
    /// Writing a value equal to the current one leaves the state untouched.
    /// On the root lens, a map replaces the fields it names and any other value is ignored.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.store.mutate(|ac| {
            match self.split() {
                Some((field, rest)) => {
                    let mut root = ac.get(field);
                    let equality = self.equality(field);
                    if get_in(&root, rest).is_some_and(|current| equality.eq(current, &value)) {
                        return Ok(());
                    }
                    set_in(&mut root, rest, value);
                    ac.set(field.clone(), root);
                }
                None => match value.as_map() {
                    Some(map) => {
                        for (field, value) in map {
                            ac.set(field.clone(), value.clone());
                        }
                    }
                    None => {
                        warn!(store = %self.store.name(), value = ?value, "root focus ignores a value that is not a map");
                    }
                },
            }
            Ok(())
        })
    }

    /// Replaces the value at the path with `f(current)`.
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let next = f(&self.peek());
        self.set(next)
    }

    /// Mutates a draft of the value at the path and writes it back.
    ///
    /// If the current value is `Null`, the draft starts from the fallback.
    pub fn modify(&self, f: impl FnOnce(&mut Value)) -> Result<()> {
        let mut draft = self.peek();
        f(&mut draft);
        self.set(draft)
    }

    /// Lens at `path` relative to this one.
    pub fn to(&self, path: &str) -> Focus {
        lookup(
            &self.store,
            &format!("{}.{}", self.node.path, path),
            FocusOptions::default(),
        )
    }

    /// Calls `f(next, prev)` when a mutation pass changes the value at the path.
    ///
    /// The root lens has no single field to watch and returns an empty subscription.
    pub fn on(&self, f: impl Fn(&Value, &Value) + 'static) -> Subscription {
        let Some((field, _)) = self.split() else {
            warn!(store = %self.store.name(), "root focus cannot be watched; subscribe to the store instead");
            return Subscription::empty();
        };
        let node = self.node.clone();
        let equality = self.node.options.equality.clone().unwrap_or_default();
        self.store.on_change(field, move |change| {
            let prev = node.at_path(&change.prev);
            let next = node.at_path(&change.next);
            if !equality.eq(&prev, &next) {
                f(&next, &prev)
            }
        })
    }

    /// Returns true if the value at the path differs from the state right after setup.
    pub fn dirty(&self) -> bool {
        match self.split() {
            Some((field, _)) => {
                let initial = self.at_path(&self.store.initial_field(field));
                let current = self.at_path(&self.store.peek(field));
                let equality = self.store.spec().equality(field);
                !equality.eq(&initial, &current)
            }
            None => self.store.dirty(None),
        }
    }

    /// Restores the value at the path to the state right after setup.
    pub fn reset(&self) -> Result<()> {
        match self.split() {
            Some((field, _)) => self.set(self.at_path(&self.store.initial_field(field))),
            None => self.store.reset(None),
        }
    }
}

impl std::fmt::Debug for Focus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Focus({}:{})", self.store.name(), self.node.path)
    }
}
