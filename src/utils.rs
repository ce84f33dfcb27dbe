use std::{
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

#[cfg(test)]
pub mod test_helpers;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Returns an id unique within the process.
///
/// Specs, factories, stores, containers and bindings all draw from the same sequence,
/// so an id identifies one object regardless of its kind.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Listener list that preserves subscription order.
pub(crate) struct Listeners<F: ?Sized> {
    next_key: u64,
    items: Vec<(u64, Rc<F>)>,
}
impl<F: ?Sized> Listeners<F> {
    pub fn new() -> Self {
        Self {
            next_key: 0,
            items: Vec::new(),
        }
    }
    pub fn insert(&mut self, f: Rc<F>) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        self.items.push((key, f));
        key
    }
    pub fn remove(&mut self, key: u64) {
        if let Ok(index) = self.items.binary_search_by_key(&key, |x| x.0) {
            self.items.remove(index);
        }
    }
    pub fn contains(&self, key: u64) -> bool {
        self.items.binary_search_by_key(&key, |x| x.0).is_ok()
    }
    pub fn snapshot(&self) -> Vec<(u64, Rc<F>)> {
        self.items.clone()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
impl<F: ?Sized> Default for Listeners<F> {
    fn default() -> Self {
        Self::new()
    }
}
