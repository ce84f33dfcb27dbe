use std::rc::Rc;

use parse_display::Display;

use crate::Promise;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Kind of object an operation was attempted on after it was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(style = "lowercase")]
pub enum DisposedTarget {
    Store,
    Container,
    Binding,
}

/// Errors produced by stores, containers and bindings.
#[non_exhaustive]
#[derive(Debug, Clone, Display)]
pub enum Error {
    #[display("{target} `{name}` (#{id}) has been disposed")]
    Disposed {
        target: DisposedTarget,
        name: Rc<str>,
        id: u64,
    },

    #[display("dependency cycle detected: {path}")]
    DependencyCycle { path: String },

    #[display("no container is available for this read pass")]
    ProviderMissing,

    #[display("store `{store}` returned an invalid action `{action}`: {reason}")]
    InvalidActionShape {
        store: Rc<str>,
        action: Rc<str>,
        reason: &'static str,
    },

    #[display("selector output `{key}` is a pending promise; read it with `ReadContext::wait`")]
    AsyncSelectorNotAllowed { key: Rc<str> },

    #[display("scoped stores can only be created while a binding is rendering")]
    ScopedOutsideReadPass,

    #[display("store `{store}` has no action `{action}`")]
    UnknownAction { store: Rc<str>, action: Rc<str> },

    #[display("unknown equality strategy `{name}`")]
    InvalidEquality { name: String },

    #[display("middleware returned an instance of the wrong kind for `{name}`")]
    InvalidInstance { name: Rc<str> },

    #[display("{0}")]
    Custom(Rc<dyn std::error::Error>),
}

impl Error {
    pub fn custom(e: impl std::error::Error + 'static) -> Self {
        Error::Custom(Rc::new(e))
    }
    pub(crate) fn disposed(target: DisposedTarget, name: &Rc<str>, id: u64) -> Self {
        Error::Disposed {
            target,
            name: name.clone(),
            id,
        }
    }
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed { .. })
    }
}

impl std::error::Error for Error {}

/// Outcome of a read pass that did not produce a value.
///
/// `Pending` is not a failure: the pass depends on a [`Promise`] that has not settled yet,
/// and the host is expected to retry once [`Promise::ready`] completes.
#[derive(Debug, Clone)]
pub enum ReadError {
    Pending(Promise),
    Error(Error),
}

impl ReadError {
    pub fn is_pending(&self) -> bool {
        matches!(self, ReadError::Pending(_))
    }
    pub fn into_error(self) -> Option<Error> {
        match self {
            ReadError::Pending(_) => None,
            ReadError::Error(e) => Some(e),
        }
    }
}
impl From<Error> for ReadError {
    fn from(e: Error) -> Self {
        ReadError::Error(e)
    }
}
impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Pending(_) => write!(f, "read pass is waiting for a pending promise"),
            ReadError::Error(e) => e.fmt(f),
        }
    }
}
impl std::error::Error for ReadError {}
