//! Reactive state runtime.
//!
//! Stores hold named fields that change only through actions. A [`Binding`] runs a selector as a
//! tracked read pass and is notified only when one of the fields it actually read changes.
//! Stores are instantiated and disposed by a [`Container`].

mod binding;
mod container;
mod equality;
mod error;
mod focus;
mod meta;
mod pool;
mod promise;
mod runtime;
mod store;
mod subscription;
mod tracking;
mod utils;
mod value;

pub use binding::*;
pub use container::*;
pub use equality::*;
pub use error::{DisposedTarget, Error, ReadError, Result};
pub use focus::*;
pub use meta::*;
pub use pool::*;
pub use promise::*;
pub use runtime::*;
pub use store::*;
pub use subscription::*;
pub use tracking::*;
pub use value::*;
