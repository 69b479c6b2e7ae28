//! Typed readers for node parameters stored in configuration groups.
//!
//! Factories parse their own parameters from the JSON group; these helpers
//! turn missing or mistyped keys into configuration errors naming the key.

use crate::error::{EngineError, Result};
use serde_json::Value;

fn missing(key: &str) -> EngineError {
    EngineError::Configuration(format!("missing parameter '{key}'"))
}

fn mistyped(key: &str, expected: &str) -> EngineError {
    EngineError::Configuration(format!("parameter '{key}' must be {expected}"))
}

/// A required scalar float.
pub fn scalar_f32(grp: &Value, key: &str) -> Result<f32> {
    grp.get(key)
        .ok_or_else(|| missing(key))?
        .as_f64()
        .map(|v| v as f32)
        .ok_or_else(|| mistyped(key, "a number"))
}

/// An optional scalar float with a default.
pub fn scalar_f32_or(grp: &Value, key: &str, default: f32) -> Result<f32> {
    match grp.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| mistyped(key, "a number")),
    }
}

/// A required array of floats.
pub fn array_f32(grp: &Value, key: &str) -> Result<Vec<f32>> {
    let arr = grp
        .get(key)
        .ok_or_else(|| missing(key))?
        .as_array()
        .ok_or_else(|| mistyped(key, "an array of numbers"))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| mistyped(key, "an array of numbers"))
        })
        .collect()
}

/// A required array of element indices.
pub fn array_index(grp: &Value, key: &str) -> Result<Vec<usize>> {
    let arr = grp
        .get(key)
        .ok_or_else(|| missing(key))?
        .as_array()
        .ok_or_else(|| mistyped(key, "an array of indices"))?;
    arr.iter()
        .map(|v| {
            v.as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| mistyped(key, "an array of indices"))
        })
        .collect()
}

/// A required array of fixed-size index tuples, e.g. `[[0,1],[1,2]]`.
pub fn index_tuples<const N: usize>(grp: &Value, key: &str) -> Result<Vec<[usize; N]>> {
    let arr = grp
        .get(key)
        .ok_or_else(|| missing(key))?
        .as_array()
        .ok_or_else(|| mistyped(key, "an array of index tuples"))?;
    arr.iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| mistyped(key, "an array of index tuples"))?;
            if row.len() != N {
                return Err(EngineError::Shape(format!(
                    "parameter '{key}' holds a tuple of {} indices where {N} are required",
                    row.len()
                )));
            }
            let mut out = [0usize; N];
            for (slot, v) in out.iter_mut().zip(row) {
                *slot = v
                    .as_u64()
                    .ok_or_else(|| mistyped(key, "an array of index tuples"))?
                    as usize;
            }
            Ok(out)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_and_default() {
        let grp = json!({"k": 2.5});
        assert_eq!(scalar_f32(&grp, "k").unwrap(), 2.5);
        assert_eq!(scalar_f32_or(&grp, "absent", 7.0).unwrap(), 7.0);
        assert!(scalar_f32(&grp, "absent").is_err());
    }

    #[test]
    fn test_index_tuples() {
        let grp = json!({"id": [[0, 1], [1, 2]]});
        let id = index_tuples::<2>(&grp, "id").unwrap();
        assert_eq!(id, vec![[0, 1], [1, 2]]);

        let bad = json!({"id": [[0, 1, 2]]});
        assert!(matches!(
            index_tuples::<2>(&bad, "id").unwrap_err(),
            EngineError::Shape(_)
        ));
    }

    #[test]
    fn test_error_names_key() {
        let grp = json!({});
        match array_f32(&grp, "spring_const").unwrap_err() {
            EngineError::Configuration(msg) => assert!(msg.contains("spring_const")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
