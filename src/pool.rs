use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap},
    hash::Hash,
    mem::{replace, take},
    rc::Rc,
};

use parse_display::Display;
use slabmap::SlabMap;

use crate::{utils::Listeners, Subscription};


/// Value that holds resources released when it leaves a container or an auto-disposing [`Pool`].
pub trait Dispose {
    fn dispose(&self);
}

/// How a [`Pool`] matches keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "kebab-case")]
pub enum KeyStrategy {
    /// Built-in `Hash + Eq` of the key.
    Direct,
    /// Caller-supplied hash; keys with equal hashes are the same entry.
    Hashed,
    /// Caller-supplied equality, checked against every entry.
    Scan,
}

/// Change reported to [`Pool::on`] listeners.
#[derive(Debug)]
pub enum PoolChange<K, V> {
    Added { key: K, value: Rc<V> },
    Changed { key: K, prev: Rc<V>, value: Rc<V> },
    Removed { key: K, value: Rc<V> },
}

trait KeyIndex<K> {
    fn find(&self, key: &K) -> Option<usize>;
    fn insert(&mut self, key: &K, slot: usize);
    fn remove(&mut self, key: &K) -> Option<usize>;
    fn clear(&mut self);
}

struct DirectIndex<K>(HashMap<K, usize>);

impl<K: Hash + Eq + Clone> KeyIndex<K> for DirectIndex<K> {
    fn find(&self, key: &K) -> Option<usize> {
        self.0.get(key).copied()
    }
    fn insert(&mut self, key: &K, slot: usize) {
        self.0.insert(key.clone(), slot);
    }
    fn remove(&mut self, key: &K) -> Option<usize> {
        self.0.remove(key)
    }
    fn clear(&mut self) {
        self.0.clear()
    }
}

struct HashedIndex<K, H> {
    hash: Box<dyn Fn(&K) -> H>,
    map: HashMap<H, usize>,
}

impl<K, H: Hash + Eq> KeyIndex<K> for HashedIndex<K, H> {
    fn find(&self, key: &K) -> Option<usize> {
        self.map.get(&(self.hash)(key)).copied()
    }
    fn insert(&mut self, key: &K, slot: usize) {
        self.map.insert((self.hash)(key), slot);
    }
    fn remove(&mut self, key: &K) -> Option<usize> {
        self.map.remove(&(self.hash)(key))
    }
    fn clear(&mut self) {
        self.map.clear()
    }
}

struct ScanIndex<K> {
    eq: Box<dyn Fn(&K, &K) -> bool>,
    keys: Vec<(K, usize)>,
}

impl<K: Clone> KeyIndex<K> for ScanIndex<K> {
    fn find(&self, key: &K) -> Option<usize> {
        self.keys
            .iter()
            .find(|(k, _)| (self.eq)(k, key))
            .map(|&(_, slot)| slot)
    }
    fn insert(&mut self, key: &K, slot: usize) {
        self.keys.push((key.clone(), slot));
    }
    fn remove(&mut self, key: &K) -> Option<usize> {
        let i = self.keys.iter().position(|(k, _)| (self.eq)(k, key))?;
        Some(self.keys.remove(i).1)
    }
    fn clear(&mut self) {
        self.keys.clear()
    }
}

struct Entry<K, V> {
    key: K,
    value: Rc<V>,
    seq: u64,
}

struct PoolData<K, V> {
    entries: SlabMap<Entry<K, V>>,
    order: BTreeMap<u64, usize>,
    next_seq: u64,
    index: Box<dyn KeyIndex<K>>,
}

impl<K: Clone, V> PoolData<K, V> {
    fn find(&self, key: &K) -> Option<&Entry<K, V>> {
        self.entries.get(self.index.find(key)?)
    }
    fn insert(&mut self, key: K, value: Rc<V>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = self.entries.insert(Entry {
            key: key.clone(),
            value,
            seq,
        });
        self.order.insert(seq, slot);
        self.index.insert(&key, slot);
    }
    fn remove(&mut self, key: &K) -> Option<Entry<K, V>> {
        let slot = self.index.remove(key)?;
        let entry = self.entries.remove(slot)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }
    fn ordered(&self) -> impl Iterator<Item = &Entry<K, V>> {
        self.order.values().filter_map(|&slot| self.entries.get(slot))
    }
}

type ChangeListener<K, V> = dyn Fn(&PoolChange<K, V>);

struct PoolNode<K, V> {
    strategy: KeyStrategy,
    data: RefCell<PoolData<K, V>>,
    factory: Box<dyn Fn(&K) -> V>,
    dispose: Cell<Option<fn(&V)>>,
    listeners: RefCell<Listeners<ChangeListener<K, V>>>,
}

/// Keyed get-or-create cache.
///
/// Values are shared as `Rc<V>`; [`get`](Self::get) returns the same `Rc` for a key until the entry is replaced or removed.
pub struct Pool<K, V>(Rc<PoolNode<K, V>>);

impl<K, V> Clone for Pool<K, V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K: Hash + Eq + Clone + 'static, V: 'static> Pool<K, V> {
    pub fn new(factory: impl Fn(&K) -> V + 'static) -> Self {
        Self::with_index(
            KeyStrategy::Direct,
            factory,
            Box::new(DirectIndex(HashMap::new())),
        )
    }
}

impl<K: Clone + 'static, V: 'static> Pool<K, V> {
    pub fn with_hash<H: Hash + Eq + 'static>(
        factory: impl Fn(&K) -> V + 'static,
        hash: impl Fn(&K) -> H + 'static,
    ) -> Self {
        let index = HashedIndex {
            hash: Box::new(hash),
            map: HashMap::new(),
        };
        Self::with_index(KeyStrategy::Hashed, factory, Box::new(index))
    }
    pub fn with_eq(
        factory: impl Fn(&K) -> V + 'static,
        eq: impl Fn(&K, &K) -> bool + 'static,
    ) -> Self {
        let index = ScanIndex {
            eq: Box::new(eq),
            keys: Vec::new(),
        };
        Self::with_index(KeyStrategy::Scan, factory, Box::new(index))
    }
    fn with_index(
        strategy: KeyStrategy,
        factory: impl Fn(&K) -> V + 'static,
        index: Box<dyn KeyIndex<K>>,
    ) -> Self {
        Self(Rc::new(PoolNode {
            strategy,
            data: RefCell::new(PoolData {
                entries: SlabMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
                index,
            }),
            factory: Box::new(factory),
            dispose: Cell::new(None),
            listeners: RefCell::new(Listeners::new()),
        }))
    }

    /// Calls [`Dispose::dispose`] on every value that is removed or replaced by a different `Rc`.
    pub fn auto_dispose(self) -> Self
    where
        V: Dispose,
    {
        self.0.dispose.set(Some(<V as Dispose>::dispose));
        self
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.0.strategy
    }

    /// Returns the value for `key`, creating it with the factory if absent.
    pub fn get(&self, key: &K) -> Rc<V> {
        self.get_or_insert_with(key, || (self.0.factory)(key))
    }

    /// Returns the value for `key`, creating it with `f` if absent.
    pub fn get_or_insert_with(&self, key: &K, f: impl FnOnce() -> V) -> Rc<V> {
        if let Some(value) = self.find(key) {
            return value;
        }
        let value = Rc::new(f());
        if let Some(value) = self.find(key) {
            return value;
        }
        self.0
            .data
            .borrow_mut()
            .insert(key.clone(), value.clone());
        self.notify(&PoolChange::Added {
            key: key.clone(),
            value: value.clone(),
        });
        value
    }

    /// Returns the value for `key` without creating it.
    pub fn find(&self, key: &K) -> Option<Rc<V>> {
        self.0.data.borrow().find(key).map(|e| e.value.clone())
    }
    pub fn has(&self, key: &K) -> bool {
        self.0.data.borrow().find(key).is_some()
    }

    /// Runs `f` on the value for `key` if present.
    pub fn tap<T>(&self, key: &K, f: impl FnOnce(&V) -> T) -> Option<T> {
        let value = self.find(key)?;
        Some(f(&value))
    }

    /// Inserts or replaces the value for `key`.
    pub fn set(&self, key: K, value: impl Into<Rc<V>>) {
        let value = value.into();
        let prev = {
            let mut data = self.0.data.borrow_mut();
            let data = &mut *data;
            match data.index.find(&key).and_then(|s| data.entries.get_mut(s)) {
                Some(entry) => Some(replace(&mut entry.value, value.clone())),
                None => {
                    data.insert(key.clone(), value.clone());
                    None
                }
            }
        };
        match prev {
            Some(prev) => {
                if !Rc::ptr_eq(&prev, &value) {
                    self.evict(&prev);
                }
                self.notify(&PoolChange::Changed { key, prev, value });
            }
            None => self.notify(&PoolChange::Added { key, value }),
        }
    }

    /// Removes the entry for `key`. Returns false if there was none.
    pub fn delete(&self, key: &K) -> bool {
        let entry = self.0.data.borrow_mut().remove(key);
        let Some(entry) = entry else {
            return false;
        };
        self.evict(&entry.value);
        self.notify(&PoolChange::Removed {
            key: entry.key,
            value: entry.value,
        });
        true
    }
    pub fn clear(&self) {
        let entries = {
            let mut data = self.0.data.borrow_mut();
            let data = &mut *data;
            data.index.clear();
            let order = take(&mut data.order);
            let mut entries = replace(&mut data.entries, SlabMap::new());
            order
                .into_values()
                .filter_map(|slot| entries.remove(slot))
                .collect::<Vec<_>>()
        };
        for entry in entries {
            self.evict(&entry.value);
            self.notify(&PoolChange::Removed {
                key: entry.key,
                value: entry.value,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.0.data.borrow().entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        self.0.data.borrow().ordered().map(|e| e.key.clone()).collect()
    }
    pub fn values(&self) -> Vec<Rc<V>> {
        self.0
            .data
            .borrow()
            .ordered()
            .map(|e| e.value.clone())
            .collect()
    }
    pub fn entries(&self) -> Vec<(K, Rc<V>)> {
        self.0
            .data
            .borrow()
            .ordered()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    pub fn on(&self, f: impl Fn(&PoolChange<K, V>) + 'static) -> Subscription {
        let f: Rc<ChangeListener<K, V>> = Rc::new(f);
        let id = self.0.listeners.borrow_mut().insert(f);
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.listeners.borrow_mut().remove(id)
        })
    }

    fn evict(&self, value: &V) {
        if let Some(dispose) = self.0.dispose.get() {
            dispose(value)
        }
    }
    fn notify(&self, change: &PoolChange<K, V>) {
        let listeners = self.0.listeners.borrow().snapshot();
        for (id, f) in listeners {
            if self.0.listeners.borrow().contains(id) {
                f(change);
            }
        }
    }
}

impl<K: Clone + 'static, V: 'static> std::fmt::Debug for Pool<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("strategy", &self.0.strategy)
            .field("len", &self.len())
            .finish()
    }
}
