use std::{any::Any, collections::BTreeMap, fmt::Debug, rc::Rc};

use serde::{
    de::{MapAccess, SeqAccess, Visitor},
    ser::{SerializeMap, SerializeSeq},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::equality::deep_eq;


/// Field-name keyed mapping used for store state and selector output.
pub type Map = BTreeMap<Rc<str>, Value>;

const DATE_TAG: &str = "$date";

/// Point in time, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    millis: i64,
}
impl Date {
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }
    pub const fn millis(&self) -> i64 {
        self.millis
    }
}

/// Dynamic value held in store fields.
///
/// Reference-typed variants (`Str`, `Date`, `List`, `Map`, `Opaque`) share their payload through `Rc`.
/// Mutation goes through [`Rc::make_mut`], so a modified value always gets a new identity
/// while untouched siblings keep theirs.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Date(Rc<Date>),
    List(Rc<Vec<Value>>),
    Map(Rc<Map>),
    Opaque(Rc<dyn Any>),
}

impl Value {
    pub fn date(millis: i64) -> Self {
        Value::Date(Rc::new(Date::from_millis(millis)))
    }
    pub fn opaque<T: Any>(value: T) -> Self {
        Value::Opaque(Rc::new(value))
    }
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Rc::new(items.into_iter().collect()))
    }
    pub fn map<K: Into<Rc<str>>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }
    pub fn empty_map() -> Self {
        Value::Map(Rc::default())
    }

    /// Returns true for `Null`, the only nullish value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<Date> {
        match self {
            Value::Date(d) => Some(**d),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(Rc::make_mut(items)),
            _ => None,
        }
    }
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(m) => Some(Rc::make_mut(m)),
            _ => None,
        }
    }
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        match self {
            Value::Opaque(v) => v.clone().downcast().ok(),
            _ => None,
        }
    }

    /// Returns the entry at `key` of a map value.
    pub fn key(&self, key: &str) -> Option<&Value> {
        self.as_map()?.get(key)
    }

    /// Inserts `value` at `key`, replacing `self` with an empty map first if it is not a map.
    pub fn insert(&mut self, key: impl Into<Rc<str>>, value: impl Into<Value>) {
        ensure_map(self).insert(key.into(), value.into());
    }

    /// Returns `self`, or the value supplied by `fallback` if `self` is nullish.
    pub fn or_else(self, fallback: impl FnOnce() -> Value) -> Value {
        if self.is_null() {
            fallback()
        } else {
            self
        }
    }

    pub(crate) fn is_promise(&self) -> bool {
        match self {
            Value::Opaque(v) => v.is::<crate::Promise>(),
            _ => false,
        }
    }
}

fn ensure_map(value: &mut Value) -> &mut Map {
    if !matches!(value, Value::Map(_)) {
        *value = Value::empty_map();
    }
    match value {
        Value::Map(m) => Rc::make_mut(m),
        _ => unreachable!(),
    }
}

/// Splits a dotted path into its non-empty segments.
pub(crate) fn parse_path(path: &str) -> Vec<Rc<str>> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(Rc::from)
        .collect()
}

pub(crate) fn get_in<'a>(value: &'a Value, path: &[Rc<str>]) -> Option<&'a Value> {
    let mut value = value;
    for segment in path {
        value = value.key(segment)?;
    }
    Some(value)
}

/// Writes `new` at `path` below `value`, creating every missing or non-map segment as an empty map.
pub(crate) fn set_in(value: &mut Value, path: &[Rc<str>], new: Value) {
    match path.split_first() {
        None => *value = new,
        Some((head, rest)) => {
            let slot = ensure_map(value).entry(head.clone()).or_default();
            set_in(slot, rest, new);
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_eq(self, other)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => b.fmt(f),
            Value::Int(n) => n.fmt(f),
            Value::Float(n) => n.fmt(f),
            Value::Str(s) => Debug::fmt(&**s, f),
            Value::Date(d) => write!(f, "Date({})", d.millis),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Map(m) => f.debug_map().entries(m.iter()).finish(),
            Value::Opaque(v) if v.is::<crate::Promise>() => write!(f, "<promise>"),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value.into())
    }
}
impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::Str(value)
    }
}
impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date(Rc::new(value))
    }
}
impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(Rc::new(value))
    }
}
impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(Rc::new(value))
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Date(d) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry(DATE_TAG, &d.millis)?;
                m.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut m = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    m.serialize_entry(&**k, v)?;
                }
                m.end()
            }
            Value::Opaque(_) => Err(serde::ser::Error::custom(
                "opaque values cannot be serialized",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "a plain value, sequence or mapping")
    }
    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer)
    }
    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }
    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }
    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(match i64::try_from(v) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Float(v as f64),
        })
    }
    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }
    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::from(v))
    }
    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::from(items))
    }
    fn visit_map<A>(self, mut access: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut m = Map::new();
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            m.insert(k.into(), v);
        }
        if m.len() == 1 {
            if let Some(Value::Int(millis)) = m.get(DATE_TAG) {
                return Ok(Value::date(*millis));
            }
        }
        Ok(Value::from(m))
    }
}
