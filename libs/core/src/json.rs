//! `serde_json::Value` interop
//!
//! JSON objects and arrays map onto [`WireValue::Map`] and
//! [`WireValue::Array`]. JSON has no binary type, so binary bodies are
//! rendered as standard base64 text when converted to JSON.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Number, Value};

use crate::error::MarshalError;
use crate::marshal::{FromWire, IntoWire};
use crate::value::WireValue;

impl IntoWire for Value {
    fn into_wire(self) -> WireValue {
        match self {
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(b),
            Value::Number(n) => number_to_wire(&n),
            Value::String(s) => WireValue::String(s),
            Value::Array(items) => {
                WireValue::Array(items.into_iter().map(IntoWire::into_wire).collect())
            }
            Value::Object(map) => WireValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, v.into_wire()))
                    .collect(),
            ),
        }
    }
}

fn number_to_wire(n: &Number) -> WireValue {
    if let Some(i) = n.as_i64() {
        i.into_wire()
    } else if let Some(u) = n.as_u64() {
        u.into_wire()
    } else {
        WireValue::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

impl FromWire for Value {
    fn from_wire(value: WireValue) -> Result<Self, MarshalError> {
        Ok(match value {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::from(i),
            WireValue::Long(l) => Value::from(l),
            WireValue::Double(d) => {
                Number::from_f64(d)
                    .map(Value::Number)
                    .ok_or(MarshalError::Unrepresentable {
                        kind: "non-finite double",
                        target: "json",
                    })?
            }
            WireValue::String(s) => Value::String(s),
            WireValue::Binary(b) => Value::String(STANDARD.encode(&b)),
            WireValue::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::from_wire)
                    .collect::<Result<_, _>>()?,
            ),
            WireValue::Map(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Value::from_wire(v)?)))
                    .collect::<Result<Map<_, _>, MarshalError>>()?,
            ),
            WireValue::Opaque(opaque) => match opaque.downcast_ref::<u64>() {
                Some(u) => Value::from(*u),
                None => {
                    return Err(MarshalError::Opaque {
                        type_name: opaque.type_name(),
                    })
                }
            },
        })
    }
}

/// Convert a JSON document into a message body
pub fn json_to_wire(value: Value) -> WireValue {
    value.into_wire()
}

/// Convert a message body into a JSON document
pub fn wire_to_json(value: WireValue) -> Result<Value, MarshalError> {
    Value::from_wire(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn json_round_trip() {
        let doc = json!({
            "foo": "bar",
            "x": 1234,
            "big": 9_000_000_000i64,
            "y": 3.45355,
            "z": true,
            "a": false,
            "n": null,
            "list": [1, "two", {"three": 3.0}],
            "empty": {}
        });

        let wire = json_to_wire(doc.clone());
        assert_eq!(wire.get("x"), Some(&WireValue::Int(1234)));
        assert_eq!(wire.get("big"), Some(&WireValue::Long(9_000_000_000)));
        assert_eq!(wire.get("y"), Some(&WireValue::Double(3.45355)));
        assert_eq!(wire_to_json(wire).unwrap(), doc);
    }

    #[test]
    fn json_u64_beyond_i64_round_trips() {
        let doc = json!([u64::MAX]);
        assert_eq!(wire_to_json(json_to_wire(doc.clone())).unwrap(), doc);
    }

    #[test]
    fn binary_renders_as_base64() {
        let wire = WireValue::Binary(Bytes::from_static(b"hello"));
        assert_eq!(wire_to_json(wire).unwrap(), json!("aGVsbG8="));
    }

    #[test]
    fn non_finite_and_opaque_are_rejected() {
        assert!(wire_to_json(WireValue::Double(f64::INFINITY)).is_err());
        assert!(matches!(
            wire_to_json(WireValue::opaque(std::time::Duration::from_secs(1))),
            Err(MarshalError::Opaque { .. })
        ));
    }
}
