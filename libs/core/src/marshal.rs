//! Conversion between host values and [`WireValue`]
//!
//! [`IntoWire`] is the outbound direction and never fails: anything without
//! a native wire shape can still travel as [`WireValue::Opaque`].
//! [`FromWire`] is the inbound direction and reports a [`MarshalError`] when
//! the wire shape does not fit the requested host type.
//!
//! For every value built only from supported leaves and containers,
//! `T::from_wire(v.into_wire()) == v`.
//!
//! Sets, fixed arrays and tuples travel as `Array`. `Vec<u8>` is a sequence
//! of integers like any other `Vec`; wrap byte buffers in [`Bytes`] to send
//! them as `Binary`.
//!
//! Map keys are rendered with `Display` and parsed back with `FromStr`. Keys
//! whose `Display` output is not unique collapse into a single entry.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::{BuildHasher, Hash};
use std::str::FromStr;

use bytes::Bytes;

use crate::error::MarshalError;
use crate::value::{OpaqueValue, WireValue};

/// Host value that can be placed on the bus
pub trait IntoWire {
    fn into_wire(self) -> WireValue;
}

/// Host value that can be rebuilt from a message body
pub trait FromWire: Sized {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError>;
}

/// Shorthand for [`IntoWire::into_wire`]
pub fn to_wire<T: IntoWire>(value: T) -> WireValue {
    value.into_wire()
}

/// Shorthand for [`FromWire::from_wire`]
pub fn from_wire<T: FromWire>(value: WireValue) -> Result<T, MarshalError> {
    T::from_wire(value)
}

fn mismatch(expected: &'static str, found: &WireValue) -> MarshalError {
    MarshalError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

impl IntoWire for WireValue {
    fn into_wire(self) -> WireValue {
        self
    }
}

impl FromWire for WireValue {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        Ok(value)
    }
}

impl IntoWire for OpaqueValue {
    fn into_wire(self) -> WireValue {
        WireValue::Opaque(self)
    }
}

impl FromWire for OpaqueValue {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Opaque(opaque) => Ok(opaque),
            other => Err(mismatch("opaque", &other)),
        }
    }
}

impl IntoWire for bool {
    fn into_wire(self) -> WireValue {
        WireValue::Bool(self)
    }
}

impl FromWire for bool {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Bool(b) => Ok(b),
            other => Err(mismatch("boolean", &other)),
        }
    }
}

impl IntoWire for String {
    fn into_wire(self) -> WireValue {
        WireValue::String(self)
    }
}

impl IntoWire for &str {
    fn into_wire(self) -> WireValue {
        WireValue::String(self.to_owned())
    }
}

impl IntoWire for &String {
    fn into_wire(self) -> WireValue {
        WireValue::String(self.clone())
    }
}

impl FromWire for String {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl IntoWire for Bytes {
    fn into_wire(self) -> WireValue {
        WireValue::Binary(self)
    }
}

impl FromWire for Bytes {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Binary(b) => Ok(b),
            other => Err(mismatch("binary", &other)),
        }
    }
}

/// Narrowest integral tag for a signed value
fn integral(value: i64) -> WireValue {
    match i32::try_from(value) {
        Ok(small) => WireValue::Int(small),
        Err(_) => WireValue::Long(value),
    }
}

fn integral_from_wire<T>(value: WireValue, target: &'static str) -> Result<T, MarshalError>
where
    T: TryFrom<i64>,
{
    let wide = match value {
        WireValue::Int(i) => i64::from(i),
        WireValue::Long(l) => l,
        other => return Err(mismatch(target, &other)),
    };
    T::try_from(wide).map_err(|_| MarshalError::OutOfRange {
        value: wide.to_string(),
        target,
    })
}

macro_rules! signed_wire {
    ($($ty:ty),*) => {$(
        impl IntoWire for $ty {
            fn into_wire(self) -> WireValue {
                integral(self as i64)
            }
        }

        impl FromWire for $ty {
            fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
                integral_from_wire(value, stringify!($ty))
            }
        }
    )*};
}

signed_wire!(i8, i16, i32, i64, isize, u8, u16, u32);

// Values above i64::MAX have no integral tag; they travel opaque rather than
// being truncated.
macro_rules! wide_unsigned_wire {
    ($($ty:ty),*) => {$(
        impl IntoWire for $ty {
            fn into_wire(self) -> WireValue {
                match i64::try_from(self) {
                    Ok(wide) => integral(wide),
                    Err(_) => WireValue::opaque(self),
                }
            }
        }

        impl FromWire for $ty {
            fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
                match value {
                    WireValue::Opaque(opaque) => opaque
                        .downcast_ref::<$ty>()
                        .copied()
                        .ok_or(MarshalError::Opaque { type_name: opaque.type_name() }),
                    other => integral_from_wire(other, stringify!($ty)),
                }
            }
        }
    )*};
}

wide_unsigned_wire!(u64, usize);

impl IntoWire for f64 {
    fn into_wire(self) -> WireValue {
        WireValue::Double(self)
    }
}

// Longs widen only when the double holds them exactly.
impl FromWire for f64 {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Double(d) => Ok(d),
            WireValue::Int(i) => Ok(f64::from(i)),
            WireValue::Long(l) => {
                let d = l as f64;
                if d as i128 == i128::from(l) {
                    Ok(d)
                } else {
                    Err(MarshalError::OutOfRange {
                        value: l.to_string(),
                        target: "double",
                    })
                }
            }
            other => Err(mismatch("double", &other)),
        }
    }
}

impl IntoWire for f32 {
    fn into_wire(self) -> WireValue {
        WireValue::Double(f64::from(self))
    }
}

impl FromWire for f32 {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        f64::from_wire(value).map(|d| d as f32)
    }
}

impl<T: IntoWire> IntoWire for Option<T> {
    fn into_wire(self) -> WireValue {
        match self {
            Some(inner) => inner.into_wire(),
            None => WireValue::Null,
        }
    }
}

impl<T: FromWire> FromWire for Option<T> {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Null => Ok(None),
            other => T::from_wire(other).map(Some),
        }
    }
}

impl<T: IntoWire> IntoWire for Vec<T> {
    fn into_wire(self) -> WireValue {
        WireValue::Array(self.into_iter().map(IntoWire::into_wire).collect())
    }
}

impl<T: IntoWire + Clone> IntoWire for &[T] {
    fn into_wire(self) -> WireValue {
        WireValue::Array(self.iter().cloned().map(IntoWire::into_wire).collect())
    }
}

impl<T: FromWire> FromWire for Vec<T> {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Array(items) => items.into_iter().map(T::from_wire).collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<T: IntoWire> IntoWire for VecDeque<T> {
    fn into_wire(self) -> WireValue {
        WireValue::Array(self.into_iter().map(IntoWire::into_wire).collect())
    }
}

impl<T: FromWire> FromWire for VecDeque<T> {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        Vec::<T>::from_wire(value).map(VecDeque::from)
    }
}

impl<T: IntoWire, S> IntoWire for HashSet<T, S> {
    fn into_wire(self) -> WireValue {
        WireValue::Array(self.into_iter().map(IntoWire::into_wire).collect())
    }
}

impl<T, S> FromWire for HashSet<T, S>
where
    T: FromWire + Eq + Hash,
    S: BuildHasher + Default,
{
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Array(items) => items.into_iter().map(T::from_wire).collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<T: IntoWire> IntoWire for BTreeSet<T> {
    fn into_wire(self) -> WireValue {
        WireValue::Array(self.into_iter().map(IntoWire::into_wire).collect())
    }
}

impl<T: FromWire + Ord> FromWire for BTreeSet<T> {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Array(items) => items.into_iter().map(T::from_wire).collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

fn fixed_items(value: WireValue, len: usize) -> Result<Vec<WireValue>, MarshalError> {
    match value {
        WireValue::Array(items) if items.len() == len => Ok(items),
        WireValue::Array(items) => Err(MarshalError::LengthMismatch {
            expected: len,
            found: items.len(),
        }),
        other => Err(mismatch("array", &other)),
    }
}

impl<T: IntoWire, const N: usize> IntoWire for [T; N] {
    fn into_wire(self) -> WireValue {
        WireValue::Array(self.into_iter().map(IntoWire::into_wire).collect())
    }
}

impl<T: FromWire, const N: usize> FromWire for [T; N] {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        let items = fixed_items(value, N)?
            .into_iter()
            .map(T::from_wire)
            .collect::<Result<Vec<T>, _>>()?;
        items
            .try_into()
            .map_err(|rest: Vec<T>| MarshalError::LengthMismatch {
                expected: N,
                found: rest.len(),
            })
    }
}

macro_rules! tuple_wire {
    ($($len:literal => ($($name:ident),+)),* $(,)?) => {$(
        impl<$($name: IntoWire),+> IntoWire for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_wire(self) -> WireValue {
                let ($($name,)+) = self;
                WireValue::Array(vec![$($name.into_wire()),+])
            }
        }

        impl<$($name: FromWire),+> FromWire for ($($name,)+) {
            fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
                let mut items = fixed_items(value, $len)?.into_iter();
                Ok(($($name::from_wire(items.next().unwrap_or(WireValue::Null))?,)+))
            }
        }
    )*};
}

tuple_wire! {
    1 => (A),
    2 => (A, B),
    3 => (A, B, C),
    4 => (A, B, C, D),
    5 => (A, B, C, D, E),
    6 => (A, B, C, D, E, F),
}

fn parse_key<K: FromStr>(key: String) -> Result<K, MarshalError> {
    key.parse().map_err(|_| MarshalError::InvalidKey { key })
}

impl<K: Display, V: IntoWire> IntoWire for BTreeMap<K, V> {
    fn into_wire(self) -> WireValue {
        WireValue::Map(
            self.into_iter()
                .map(|(k, v)| (k.to_string(), v.into_wire()))
                .collect(),
        )
    }
}

impl<K: FromStr + Ord, V: FromWire> FromWire for BTreeMap<K, V> {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Map(map) => map
                .into_iter()
                .map(|(k, v)| Ok((parse_key(k)?, V::from_wire(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

impl<K: Display, V: IntoWire, S> IntoWire for HashMap<K, V, S> {
    fn into_wire(self) -> WireValue {
        WireValue::Map(
            self.into_iter()
                .map(|(k, v)| (k.to_string(), v.into_wire()))
                .collect(),
        )
    }
}

impl<K, V, S> FromWire for HashMap<K, V, S>
where
    K: FromStr + Eq + Hash,
    V: FromWire,
    S: BuildHasher + Default,
{
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        match value {
            WireValue::Map(map) => map
                .into_iter()
                .map(|(k, v)| Ok((parse_key(k)?, V::from_wire(v)?)))
                .collect(),
            other => Err(mismatch("map", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_take_narrowest_tag() {
        assert_eq!(7i64.into_wire(), WireValue::Int(7));
        assert_eq!((i64::from(i32::MAX) + 1).into_wire(), WireValue::Long(2_147_483_648));
        assert_eq!(200u8.into_wire(), WireValue::Int(200));
        assert_eq!(u32::MAX.into_wire(), WireValue::Long(4_294_967_295));
        assert_eq!(1.25f32.into_wire(), WireValue::Double(1.25));
    }

    #[test]
    fn integral_targets_accept_both_tags() {
        assert_eq!(i64::from_wire(WireValue::Int(3)), Ok(3));
        assert_eq!(i32::from_wire(WireValue::Long(3)), Ok(3));
        assert_eq!(
            i8::from_wire(WireValue::Int(300)),
            Err(MarshalError::OutOfRange {
                value: "300".to_string(),
                target: "i8",
            })
        );
    }

    #[test]
    fn huge_unsigned_travels_opaque() {
        let wire = u64::MAX.into_wire();
        assert_eq!(wire.kind(), "opaque");
        assert_eq!(u64::from_wire(wire), Ok(u64::MAX));
        assert_eq!(u64::from_wire(WireValue::Int(9)), Ok(9));
    }

    #[test]
    fn floats_do_not_decode_as_integers() {
        assert!(matches!(
            i32::from_wire(WireValue::Double(1.0)),
            Err(MarshalError::TypeMismatch { expected: "i32", found: "double" })
        ));
    }

    #[test]
    fn map_keys_are_coerced_and_parsed() {
        let mut map = HashMap::new();
        map.insert(1u32, "one".to_string());
        map.insert(2u32, "two".to_string());

        let wire = map.clone().into_wire();
        assert_eq!(wire.get("1"), Some(&WireValue::String("one".to_string())));

        let back: HashMap<u32, String> = from_wire(wire).unwrap();
        assert_eq!(back, map);

        let mut bad = BTreeMap::new();
        bad.insert("x".to_string(), WireValue::Int(1));
        assert_eq!(
            BTreeMap::<u32, i32>::from_wire(WireValue::Map(bad)),
            Err(MarshalError::InvalidKey { key: "x".to_string() })
        );
    }

    #[test]
    fn containers_stay_distinct() {
        let blob = Bytes::from_static(b"\x00\x01");
        assert!(Vec::<i32>::from_wire(blob.clone().into_wire()).is_err());
        assert!(Bytes::from_wire(vec![0i32, 1].into_wire()).is_err());
        assert!(BTreeMap::<String, i32>::from_wire(vec![1i32].into_wire()).is_err());
    }

    #[test]
    fn doubles_widen_exact_integers() {
        assert_eq!(f64::from_wire(WireValue::Int(3)), Ok(3.0));
        assert_eq!(f64::from_wire(WireValue::Long(1 << 40)), Ok(1_099_511_627_776.0));
        assert_eq!(
            f64::from_wire(WireValue::Long((1 << 53) + 1)),
            Err(MarshalError::OutOfRange {
                value: "9007199254740993".to_string(),
                target: "double",
            })
        );
        assert!(f64::from_wire(WireValue::Long(i64::MAX)).is_err());
    }

    #[test]
    fn fixed_shapes_check_their_length() {
        let wire = WireValue::Array(vec![WireValue::Int(1), WireValue::Int(2)]);
        assert_eq!(
            <[i32; 3]>::from_wire(wire.clone()),
            Err(MarshalError::LengthMismatch { expected: 3, found: 2 })
        );
        assert_eq!(
            <(i32, String)>::from_wire(wire.clone()),
            Err(MarshalError::TypeMismatch { expected: "string", found: "int" })
        );
        assert_eq!(<(i32, i64)>::from_wire(wire), Ok((1, 2)));
        assert!(<(i32,)>::from_wire(WireValue::Int(1)).is_err());
    }

    #[test]
    fn option_maps_to_null() {
        assert_eq!(None::<i32>.into_wire(), WireValue::Null);
        assert_eq!(Option::<i32>::from_wire(WireValue::Null), Ok(None));
        assert_eq!(Option::<i32>::from_wire(WireValue::Int(4)), Ok(Some(4)));
    }
}
