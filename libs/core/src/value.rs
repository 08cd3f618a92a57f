use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Wire-safe message body
///
/// Every value carried by the bus is one of these variants. Containers nest
/// arbitrarily; map keys are always strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Binary(Bytes),
    Array(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    /// Host value with no wire representation, carried by reference.
    ///
    /// Opaque values are delivered verbatim to in-process handlers but can
    /// never be encoded for a transport.
    #[serde(skip)]
    Opaque(OpaqueValue),
}

impl WireValue {
    /// Wrap an arbitrary host value in the opaque passthrough variant
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        WireValue::Opaque(OpaqueValue::new(value))
    }

    /// Short name of the variant, used in errors and logs
    pub fn kind(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Bool(_) => "boolean",
            WireValue::Int(_) => "int",
            WireValue::Long(_) => "long",
            WireValue::Double(_) => "double",
            WireValue::String(_) => "string",
            WireValue::Binary(_) => "binary",
            WireValue::Array(_) => "array",
            WireValue::Map(_) => "map",
            WireValue::Opaque(_) => "opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral value of an `Int` or `Long`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WireValue::Int(i) => Some(i64::from(*i)),
            WireValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WireValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            WireValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, WireValue>> {
        match self {
            WireValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key when this value is a map
    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// First opaque value found in a depth-first walk, if any
    pub fn find_opaque(&self) -> Option<&OpaqueValue> {
        match self {
            WireValue::Opaque(opaque) => Some(opaque),
            WireValue::Array(items) => items.iter().find_map(WireValue::find_opaque),
            WireValue::Map(map) => map.values().find_map(WireValue::find_opaque),
            _ => None,
        }
    }

    /// Whether a NaN or infinite double appears anywhere in the value
    pub fn has_non_finite(&self) -> bool {
        match self {
            WireValue::Double(d) => !d.is_finite(),
            WireValue::Array(items) => items.iter().any(WireValue::has_non_finite),
            WireValue::Map(map) => map.values().any(WireValue::has_non_finite),
            _ => false,
        }
    }
}

/// Shared handle to a host value that has no wire representation
///
/// Equality is identity: two opaque values are equal only when they wrap
/// the same allocation.
#[derive(Clone)]
pub struct OpaqueValue {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Rust type name of the wrapped value
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.value) as *const (),
            Arc::as_ptr(&other.value) as *const (),
        )
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueValue").field(&self.type_name).finish()
    }
}
