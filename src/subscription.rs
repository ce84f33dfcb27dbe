use std::{
    any::Any,
    mem::take,
    rc::{Rc, Weak},
};

#[cfg(test)]
mod tests;

/// Handle that cancels a listener registration when dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }

    /// Keeps `rc` alive until the subscription is dropped.
    pub fn from_rc(rc: Rc<dyn Any>) -> Self {
        Subscription(RawSubscription::Rc(rc))
    }

    /// Calls `unsubscribe` on drop, if `this` is still alive.
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, unsubscribe: impl FnOnce(Rc<T>) + 'static) -> Self {
        Self::from_fn(move || {
            if let Some(this) = this.upgrade() {
                unsubscribe(this)
            }
        })
    }
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            RawSubscription::Empty => true,
            RawSubscription::Many(items) => items.iter().all(|s| s.is_empty()),
            _ => false,
        }
    }

    /// Cancels the registration now.
    pub fn unsubscribe(self) {
        drop(self)
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::Rc(_) => {}
            RawSubscription::Many(items) => drop(items),
        }
    }
}
impl FromIterator<Subscription> for Subscription {
    fn from_iter<I: IntoIterator<Item = Subscription>>(iter: I) -> Self {
        Subscription(RawSubscription::Many(iter.into_iter().collect()))
    }
}
impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            RawSubscription::Empty => write!(f, "Subscription(empty)"),
            RawSubscription::Fn(_) | RawSubscription::Rc(_) => write!(f, "Subscription"),
            RawSubscription::Many(items) => write!(f, "Subscription({} items)", items.len()),
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    Rc(#[allow(unused)] Rc<dyn Any>),
    Many(Vec<Subscription>),
}
