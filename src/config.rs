// src/config.rs
//
// VarGroup: the structured key/value store used to construct models,
// policies and algorithms.
//
// - typed get/set through serde
// - nested groups
// - arrays must be homogeneous (mixed-type arrays are rejected)
// - JSON / YAML file round-trip
// - content_hash(): stable sha256 over the canonical JSON encoding

use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};
use crate::io;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarGroup(Map<String, Value>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    Number,
    String,
    Bool,
    Object,
    Array,
}

fn element_kind(v: &Value) -> Option<ElementKind> {
    match v {
        Value::Number(_) => Some(ElementKind::Number),
        Value::String(_) => Some(ElementKind::String),
        Value::Bool(_) => Some(ElementKind::Bool),
        Value::Object(_) => Some(ElementKind::Object),
        Value::Array(_) => Some(ElementKind::Array),
        Value::Null => None,
    }
}

/// Rejects heterogeneous arrays and nulls inside arrays, recursively.
fn check_value(key: &str, v: &Value) -> Result<()> {
    match v {
        Value::Object(map) => {
            for (k, inner) in map {
                check_value(&format!("{key}.{k}"), inner)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            let mut first: Option<ElementKind> = None;
            for (i, item) in items.iter().enumerate() {
                let kind = element_kind(item).ok_or_else(|| {
                    EngineError::config(format!("key '{key}': null at array index {i}"))
                })?;
                match first {
                    None => first = Some(kind),
                    Some(k) if k != kind => {
                        return Err(EngineError::config(format!(
                            "key '{key}': heterogeneous array ({k:?} and {kind:?})"
                        )));
                    }
                    _ => {}
                }
                check_value(&format!("{key}[{i}]"), item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

impl VarGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be an object with homogeneous arrays.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                for (k, v) in &map {
                    check_value(k, v)?;
                }
                Ok(VarGroup(map))
            }
            other => Err(EngineError::config(format!(
                "expected an object to build a VarGroup, got {other}"
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self
            .0
            .get(key)
            .ok_or_else(|| EngineError::config(format!("missing key '{key}'")))?;
        T::deserialize(raw).map_err(|e| EngineError::config(format!("key '{key}': {e}")))
    }

    /// Like `get`, but falls back to `default` when the key is absent.
    /// A present key with the wrong type is still an error.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        if self.contains(key) {
            self.get(key)
        } else {
            Ok(default)
        }
    }

    pub fn get_group(&self, key: &str) -> Result<VarGroup> {
        match self.0.get(key) {
            Some(Value::Object(map)) => Ok(VarGroup(map.clone())),
            Some(other) => Err(EngineError::config(format!(
                "key '{key}': expected a nested group, got {other}"
            ))),
            None => Err(EngineError::config(format!("missing key '{key}'"))),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let v = serde_json::to_value(value)
            .map_err(|e| EngineError::config(format!("key '{key}': {e}")))?;
        check_value(key, &v)?;
        self.0.insert(key.to_string(), v);
        Ok(())
    }

    /// Builder-style `set` for literals in code and tests.
    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Result<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let value = io::read_document(path)?;
        Self::from_value(value).map_err(|e| EngineError::parse(path, e))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        io::write_document(path.as_ref(), &self.to_value())
    }

    /// Lowercase hex sha256 of the canonical (key-sorted, compact) JSON encoding.
    pub fn content_hash(&self) -> String {
        let canonical = self.to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex_encode(&hasher.finalize())
    }
}

impl fmt::Display for VarGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> VarGroup {
        VarGroup::from_value(json!({
            "id": "lost_sales",
            "leadtime": 3,
            "p": 9.0,
            "sizes": [1, 2, 3],
            "inner": {"flag": true, "names": ["a", "b"]}
        }))
        .unwrap()
    }

    #[test]
    fn typed_get_and_defaults() {
        let vg = sample();
        assert_eq!(vg.get::<String>("id").unwrap(), "lost_sales");
        assert_eq!(vg.get::<i64>("leadtime").unwrap(), 3);
        assert_eq!(vg.get::<Vec<u32>>("sizes").unwrap(), vec![1, 2, 3]);
        assert_eq!(vg.get_or("missing", 7_i64).unwrap(), 7);
        // Present but wrong type does not silently fall back.
        assert!(vg.get_or("id", 7_i64).is_err());
        assert!(vg.get::<f64>("nope").is_err());
    }

    #[test]
    fn nested_groups() {
        let vg = sample();
        let inner = vg.get_group("inner").unwrap();
        assert!(inner.get::<bool>("flag").unwrap());
        assert!(vg.get_group("leadtime").is_err());
    }

    #[test]
    fn heterogeneous_arrays_rejected() {
        assert!(VarGroup::from_value(json!({"a": [1, "x"]})).is_err());
        assert!(VarGroup::from_value(json!({"a": {"b": [true, 1]}})).is_err());
        assert!(VarGroup::from_value(json!({"a": [1, null]})).is_err());
        assert!(VarGroup::from_value(json!({"a": [[1, 2], [3]]})).is_ok());

        let mut vg = VarGroup::new();
        assert!(vg.set("mixed", json!([1.5, false])).is_err());
        assert!(vg.set("ok", vec![1.5, 2.0]).is_ok());
    }

    #[test]
    fn non_object_rejected() {
        assert!(VarGroup::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempdir().unwrap();
        let vg = sample();
        for name in ["cfg.json", "cfg.yml"] {
            let path = dir.path().join(name);
            vg.save(&path).unwrap();
            assert_eq!(VarGroup::load(&path).unwrap(), vg);
        }
    }

    #[test]
    fn content_hash_ignores_insertion_order() {
        let a = VarGroup::new().with("x", 1).unwrap().with("y", 2).unwrap();
        let b = VarGroup::new().with("y", 2).unwrap().with("x", 1).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
        let c = a.clone().with("x", 3).unwrap();
        assert_ne!(a.content_hash(), c.content_hash());
    }
}
