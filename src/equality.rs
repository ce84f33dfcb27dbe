use std::{fmt::Debug, rc::Rc, str::FromStr};

use crate::{Error, Result, Value};

#[cfg(test)]
mod tests;

/// Strategy that decides whether two values are "the same".
///
/// | Name       | Meaning                                                        |
/// | ---------- | -------------------------------------------------------------- |
/// | `default`  | `strict`, except dates compare by timestamp                    |
/// | `strict`   | identity for shared values, bit equality for primitives        |
/// | `shallow`  | same keys (or length), each entry `strict`-equal               |
/// | `shallowN` | `shallow` applied recursively `N` levels deep                  |
/// | `deep`     | full structural equality                                       |
#[derive(Clone, Default)]
pub enum Equality {
    #[default]
    Default,
    Strict,
    Shallow,
    ShallowN(usize),
    Deep,
    Custom(Rc<dyn Fn(&Value, &Value) -> bool>),
}

impl Equality {
    pub fn custom(f: impl Fn(&Value, &Value) -> bool + 'static) -> Self {
        Equality::Custom(Rc::new(f))
    }

    pub fn eq(&self, a: &Value, b: &Value) -> bool {
        match self {
            Equality::Default => default_eq(a, b),
            Equality::Strict => strict_eq(a, b),
            Equality::Shallow => shallow_n_eq(a, b, 1),
            Equality::ShallowN(depth) => shallow_n_eq(a, b, *depth),
            Equality::Deep => deep_eq(a, b),
            Equality::Custom(f) => f(a, b),
        }
    }

    /// Returns true if both strategies are known to behave identically.
    pub(crate) fn is_same_strategy(&self, other: &Self) -> bool {
        match (self, other) {
            (Equality::Custom(a), Equality::Custom(b)) => Rc::ptr_eq(a, b),
            (Equality::ShallowN(a), Equality::ShallowN(b)) => a == b,
            (Equality::Shallow, Equality::ShallowN(1)) | (Equality::ShallowN(1), Equality::Shallow) => {
                true
            }
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Debug for Equality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Equality::Default => write!(f, "default"),
            Equality::Strict => write!(f, "strict"),
            Equality::Shallow => write!(f, "shallow"),
            Equality::ShallowN(n) => write!(f, "shallow{n}"),
            Equality::Deep => write!(f, "deep"),
            Equality::Custom(_) => write!(f, "custom"),
        }
    }
}

impl FromStr for Equality {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "default" => Equality::Default,
            "strict" => Equality::Strict,
            "shallow" => Equality::Shallow,
            "deep" => Equality::Deep,
            _ => match s.strip_prefix("shallow").map(str::parse::<usize>) {
                Some(Ok(depth)) if depth > 0 => Equality::ShallowN(depth),
                _ => {
                    return Err(Error::InvalidEquality {
                        name: s.to_string(),
                    })
                }
            },
        })
    }
}

/// Resolves an equality strategy from its short name.
pub fn resolve_equality(name: &str) -> Result<Equality> {
    name.parse()
}

/// Returns `prev` if it equals `next` under `equality`, otherwise `next`.
pub fn stabilize(prev: &Value, next: Value, equality: &Equality) -> Value {
    if equality.eq(prev, &next) {
        prev.clone()
    } else {
        next
    }
}

pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Date(a), Value::Date(b)) => Rc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
        (Value::Opaque(a), Value::Opaque(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
        _ => false,
    }
}

pub fn default_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Date(a), Value::Date(b)) => a.millis() == b.millis(),
        _ => strict_eq(a, b),
    }
}

pub fn shallow_eq(a: &Value, b: &Value) -> bool {
    shallow_n_eq(a, b, 1)
}

/// Compares containers entry by entry for `depth` levels, then falls back to `strict`.
pub fn shallow_n_eq(a: &Value, b: &Value, depth: usize) -> bool {
    if strict_eq(a, b) {
        return true;
    }
    if depth == 0 {
        return false;
    }
    match (a, b) {
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, va)| match b.get(k) {
                    Some(vb) => shallow_n_eq(va, vb, depth - 1),
                    None => false,
                })
        }
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(va, vb)| shallow_n_eq(va, vb, depth - 1))
        }
        (Value::Date(a), Value::Date(b)) => a.millis() == b.millis(),
        _ => false,
    }
}

pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
        (Value::Date(a), Value::Date(b)) => a.millis() == b.millis(),
        (Value::Map(a), Value::Map(b)) => {
            Rc::ptr_eq(a, b)
                || (a.len() == b.len()
                    && a.iter().all(|(k, va)| match b.get(k) {
                        Some(vb) => deep_eq(va, vb),
                        None => false,
                    }))
        }
        (Value::List(a), Value::List(b)) => {
            Rc::ptr_eq(a, b)
                || (a.len() == b.len() && a.iter().zip(b.iter()).all(|(va, vb)| deep_eq(va, vb)))
        }
        _ => strict_eq(a, b),
    }
}
