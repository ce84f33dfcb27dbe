use std::{any::Any, collections::BTreeMap, marker::PhantomData, rc::Rc};

use derive_ex::derive_ex;

use crate::utils::next_id;


/// Identity of a [`MetaType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaId(u64);

/// Opaque token naming one kind of metadata that carries values of type `T`.
///
/// Two tokens are distinct even if they share a name.
#[derive_ex(Clone, bound())]
pub struct MetaType<T> {
    id: MetaId,
    name: Rc<str>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Clone + 'static> MetaType<T> {
    pub fn new(name: &str) -> Self {
        Self {
            id: MetaId(next_id()),
            name: name.into(),
            _phantom: PhantomData,
        }
    }
    pub fn id(&self) -> MetaId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store-level entry.
    pub fn of(&self, value: T) -> MetaEntry {
        MetaEntry {
            id: self.id,
            value: Rc::new(value),
            field: None,
        }
    }

    /// Field-level entry.
    pub fn field(&self, field: &str, value: T) -> MetaEntry {
        MetaEntry {
            id: self.id,
            value: Rc::new(value),
            field: Some(field.into()),
        }
    }
}
impl<T> std::fmt::Debug for MetaType<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetaType({})", self.name)
    }
}

#[derive(Clone)]
pub struct MetaEntry {
    id: MetaId,
    value: Rc<dyn Any>,
    field: Option<Rc<str>>,
}
impl MetaEntry {
    pub fn id(&self) -> MetaId {
        self.id
    }
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
    fn value<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}
impl std::fmt::Debug for MetaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaEntry")
            .field("id", &self.id)
            .field("field", &self.field)
            .finish()
    }
}

/// Result of [`Metadata::get`]: the first store-level value and the first value per field.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaQuery<T> {
    pub store: Option<T>,
    pub fields: BTreeMap<Rc<str>, T>,
}

/// Result of [`Metadata::all`]: every value, in definition order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaAll<T> {
    pub store: Vec<T>,
    pub fields: BTreeMap<Rc<str>, Vec<T>>,
}

/// Ordered list of metadata entries attached to a spec.
#[derive(Debug, Clone, Default)]
pub struct Metadata(Vec<MetaEntry>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, entry: MetaEntry) {
        self.0.push(entry);
    }
    pub fn entries(&self) -> &[MetaEntry] {
        &self.0
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn matching<'a, T: Clone + 'static>(
        &'a self,
        ty: &'a MetaType<T>,
    ) -> impl Iterator<Item = (Option<&'a Rc<str>>, T)> + 'a {
        self.0
            .iter()
            .filter(move |e| e.id == ty.id)
            .filter_map(|e| Some((e.field.as_ref(), e.value::<T>()?)))
    }

    pub fn get<T: Clone + 'static>(&self, ty: &MetaType<T>) -> MetaQuery<T> {
        let mut q = MetaQuery {
            store: None,
            fields: BTreeMap::new(),
        };
        for (field, value) in self.matching(ty) {
            match field {
                None => {
                    q.store.get_or_insert(value);
                }
                Some(field) => {
                    q.fields.entry(field.clone()).or_insert(value);
                }
            }
        }
        q
    }
    pub fn all<T: Clone + 'static>(&self, ty: &MetaType<T>) -> MetaAll<T> {
        let mut q = MetaAll {
            store: Vec::new(),
            fields: BTreeMap::new(),
        };
        for (field, value) in self.matching(ty) {
            match field {
                None => q.store.push(value),
                Some(field) => q.fields.entry(field.clone()).or_default().push(value),
            }
        }
        q
    }

    /// Returns true if any entry has one of `ids`.
    pub fn any(&self, ids: &[MetaId]) -> bool {
        self.0.iter().any(|e| ids.contains(&e.id))
    }

    /// Returns true if any entry has one of `ids` and applies to `field`.
    pub fn any_for_field(&self, field: &str, ids: &[MetaId]) -> bool {
        self.0
            .iter()
            .any(|e| e.field.as_deref() == Some(field) && ids.contains(&e.id))
    }
}
