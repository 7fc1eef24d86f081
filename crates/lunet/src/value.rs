//! Host-side dynamic values and conversion traits.
//!
//! `HostValue` is what the marshaller produces from a foreign stack slot and
//! consumes when pushing: the host's view of a script value. The `ToLunet` /
//! `FromLunet` traits layer typed ergonomics over it for primitives and
//! standard containers.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lunet_engine::TypeTag;

use crate::error::Error;
use crate::function::FunctionView;

/// A host object shared with the script environment.
///
/// Objects cross the boundary by handle, never by value; the registry keeps
/// them alive. Types exposed to scripts use interior mutability for fields
/// that trampolines mutate.
pub type HostObject = Arc<dyn Any + Send + Sync>;

/// Hashable key subset for host associative containers.
///
/// Script tables can key on booleans, numbers, and strings; converting a
/// table with a non-scalar key fails with `UnsupportedType`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostKey {
    Bool(bool),
    /// Integral numeric key
    Int(i64),
    /// Non-integral numeric key, stored as raw bits
    Float(u64),
    Str(String),
}

impl HostKey {
    /// Widen back into a value.
    pub fn to_value(&self) -> HostValue {
        match self {
            HostKey::Bool(b) => HostValue::Bool(*b),
            HostKey::Int(i) => HostValue::Number(*i as f64),
            HostKey::Float(bits) => HostValue::Number(f64::from_bits(*bits)),
            HostKey::Str(s) => HostValue::Str(s.clone()),
        }
    }

    /// Normalize a scalar value into a key.
    pub fn from_value(v: &HostValue) -> Option<HostKey> {
        match v {
            HostValue::Bool(b) => Some(HostKey::Bool(*b)),
            HostValue::Number(n) => {
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    Some(HostKey::Int(*n as i64))
                } else if n.is_nan() {
                    None
                } else {
                    Some(HostKey::Float(n.to_bits()))
                }
            }
            HostValue::Str(s) => Some(HostKey::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for HostKey {
    fn from(s: &str) -> Self {
        HostKey::Str(s.to_string())
    }
}

impl From<i64> for HostKey {
    fn from(i: i64) -> Self {
        HostKey::Int(i)
    }
}

/// Host associative container produced by table conversion.
pub type HostMap = HashMap<HostKey, HostValue>;

/// The host's dynamic view of a script value.
#[derive(Clone)]
pub enum HostValue {
    Nil,
    Bool(bool),
    /// All script numbers widen to double
    Number(f64),
    /// Byte-for-byte copy of the script string
    Str(String),
    /// Fresh container built by full table traversal
    Map(HostMap),
    /// Ordered container; pushes as a 1-based array table
    List(Vec<HostValue>),
    /// Borrowed view of a script function at a stack slot
    Function(FunctionView),
    /// A registered host object resolved from a userdata handle
    Object(HostObject),
}

impl HostValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Name of the host-side shape, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::Str(_) => "string",
            HostValue::Map(_) => "map",
            HostValue::List(_) => "list",
            HostValue::Function(_) => "function",
            HostValue::Object(_) => "host object",
        }
    }

    /// The foreign type this value corresponds to.
    pub fn foreign_tag(&self) -> TypeTag {
        match self {
            HostValue::Nil => TypeTag::Nil,
            HostValue::Bool(_) => TypeTag::Boolean,
            HostValue::Number(_) => TypeTag::Number,
            HostValue::Str(_) => TypeTag::String,
            HostValue::Map(_) | HostValue::List(_) => TypeTag::Table,
            HostValue::Function(_) => TypeTag::Function,
            HostValue::Object(_) => TypeTag::UserData,
        }
    }

    /// Downcast a contained host object.
    pub fn as_object<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            HostValue::Object(o) => o.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("Nil"),
            HostValue::Bool(b) => write!(f, "Bool({b})"),
            HostValue::Number(n) => write!(f, "Number({n})"),
            HostValue::Str(s) => write!(f, "Str({s:?})"),
            HostValue::Map(m) => write!(f, "Map({} entries)", m.len()),
            HostValue::List(l) => write!(f, "List({} items)", l.len()),
            HostValue::Function(v) => write!(f, "Function(slot {})", v.index()),
            HostValue::Object(o) => write!(f, "Object({:p})", Arc::as_ptr(o)),
        }
    }
}

/// Structural equality; objects compare by identity, functions by slot.
impl PartialEq for HostValue {
    fn eq(&self, other: &HostValue) -> bool {
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Number(a), HostValue::Number(b)) => a == b,
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::Map(a), HostValue::Map(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => a == b,
            (HostValue::Function(a), HostValue::Function(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ============================================================================
// Conversion traits
// ============================================================================

/// Convert a Rust value into a `HostValue` for pushing to the script side.
pub trait ToLunet {
    fn to_lunet(self) -> HostValue;
}

/// Convert a `HostValue` read from the script side into a Rust value.
pub trait FromLunet: Sized {
    fn from_lunet(value: HostValue) -> Result<Self, Error>;
}

fn wrong_kind(expected: &'static str, value: &HostValue) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        got: value.kind().to_string(),
    }
}

impl ToLunet for HostValue {
    fn to_lunet(self) -> HostValue {
        self
    }
}

impl FromLunet for HostValue {
    fn from_lunet(value: HostValue) -> Result<Self, Error> {
        Ok(value)
    }
}

impl ToLunet for () {
    fn to_lunet(self) -> HostValue {
        HostValue::Nil
    }
}

impl ToLunet for bool {
    fn to_lunet(self) -> HostValue {
        HostValue::Bool(self)
    }
}

impl FromLunet for bool {
    fn from_lunet(value: HostValue) -> Result<Self, Error> {
        match value {
            HostValue::Bool(b) => Ok(b),
            other => Err(wrong_kind("boolean", &other)),
        }
    }
}

macro_rules! numeric_conversions {
    ($($ty:ty),*) => {$(
        impl ToLunet for $ty {
            fn to_lunet(self) -> HostValue {
                HostValue::Number(self as f64)
            }
        }

        impl FromLunet for $ty {
            fn from_lunet(value: HostValue) -> Result<Self, Error> {
                match value {
                    HostValue::Number(n) => Ok(n as $ty),
                    other => Err(wrong_kind("number", &other)),
                }
            }
        }
    )*};
}

numeric_conversions!(f64, f32, i64, i32);

impl ToLunet for String {
    fn to_lunet(self) -> HostValue {
        HostValue::Str(self)
    }
}

impl ToLunet for &str {
    fn to_lunet(self) -> HostValue {
        HostValue::Str(self.to_string())
    }
}

impl FromLunet for String {
    fn from_lunet(value: HostValue) -> Result<Self, Error> {
        match value {
            HostValue::Str(s) => Ok(s),
            other => Err(wrong_kind("string", &other)),
        }
    }
}

impl<T: ToLunet> ToLunet for Vec<T> {
    fn to_lunet(self) -> HostValue {
        HostValue::List(self.into_iter().map(ToLunet::to_lunet).collect())
    }
}

impl<T: FromLunet> FromLunet for Vec<T> {
    fn from_lunet(value: HostValue) -> Result<Self, Error> {
        match value {
            HostValue::List(items) => items.into_iter().map(T::from_lunet).collect(),
            other => Err(wrong_kind("list", &other)),
        }
    }
}

impl<T: ToLunet> ToLunet for HashMap<String, T> {
    fn to_lunet(self) -> HostValue {
        HostValue::Map(
            self.into_iter()
                .map(|(k, v)| (HostKey::Str(k), v.to_lunet()))
                .collect(),
        )
    }
}

impl ToLunet for HostMap {
    fn to_lunet(self) -> HostValue {
        HostValue::Map(self)
    }
}

impl FromLunet for HostMap {
    fn from_lunet(value: HostValue) -> Result<Self, Error> {
        match value {
            HostValue::Map(m) => Ok(m),
            other => Err(wrong_kind("map", &other)),
        }
    }
}

impl<T: ToLunet> ToLunet for Option<T> {
    fn to_lunet(self) -> HostValue {
        match self {
            Some(v) => v.to_lunet(),
            None => HostValue::Nil,
        }
    }
}

impl<T: FromLunet> FromLunet for Option<T> {
    fn from_lunet(value: HostValue) -> Result<Self, Error> {
        match value {
            HostValue::Nil => Ok(None),
            other => T::from_lunet(other).map(Some),
        }
    }
}
