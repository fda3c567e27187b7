//! Conversion from serde_json::Value to cel_interpreter values

use cel_interpreter::objects::{Key, Map, Value as CelValue};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Convert serde_json::Value to cel_interpreter::Value
pub fn json_to_cel(value: &JsonValue) -> CelValue {
    match value {
        JsonValue::Null => CelValue::Null,
        JsonValue::Bool(b) => CelValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else if let Some(f) = n.as_f64() {
                CelValue::Float(f)
            } else {
                CelValue::Null
            }
        }
        JsonValue::String(s) => CelValue::String(s.clone().into()),
        JsonValue::Array(arr) => {
            let cel_vec: Vec<CelValue> = arr.iter().map(json_to_cel).collect();
            CelValue::List(cel_vec.into())
        }
        JsonValue::Object(obj) => {
            let map_data: HashMap<Key, CelValue> = obj
                .iter()
                .map(|(k, v)| (Key::from(k.clone()), json_to_cel(v)))
                .collect();
            CelValue::Map(Map { map: Arc::new(map_data) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_to_cel_bool() {
        let cel = json_to_cel(&json!(true));
        assert!(matches!(cel, CelValue::Bool(true)));
    }

    #[test]
    fn test_json_to_cel_int() {
        let cel = json_to_cel(&json!(42));
        assert!(matches!(cel, CelValue::Int(42)));
    }

    #[test]
    fn test_json_to_cel_string() {
        let cel = json_to_cel(&json!("hello"));
        if let CelValue::String(s) = cel {
            assert_eq!(s.as_str(), "hello");
        } else {
            panic!("Expected String");
        }
    }

    #[test]
    fn test_json_to_cel_object() {
        let cel = json_to_cel(&json!({"IS_STUDENT": true, "roles": ["a", "b"]}));
        if let CelValue::Map(map) = cel {
            assert_eq!(map.map.len(), 2);
        } else {
            panic!("Expected Map");
        }
    }
}
