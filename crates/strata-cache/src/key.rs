use crate::error::CacheError;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic cache key: `"{namespace}:{sha256-hex}"`.
///
/// The hash covers a canonical JSON rendering of the caller's key parts with object keys
/// sorted at every depth, so `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    rendered: String,
    namespace_len: usize,
}

impl CacheKey {
    pub fn new<T: Serialize + ?Sized>(namespace: &str, parts: &T) -> Result<Self, CacheError> {
        let value = canonicalize(serde_json::to_value(parts)?);
        let canonical = serde_json::to_vec(&value)?;
        Ok(Self::from_digest(namespace, &sha256_hex(&canonical)))
    }

    fn from_digest(namespace: &str, digest: &str) -> Self {
        Self {
            rendered: format!("{namespace}:{digest}"),
            namespace_len: namespace.len(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.rendered[..self.namespace_len]
    }

    /// The 64-character hex digest without the namespace prefix.
    pub fn digest(&self) -> &str {
        &self.rendered[self.namespace_len + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn object_key_order_does_not_change_the_key() {
        let a = json!({"text": "hi", "lang": "en", "opts": {"x": 1, "y": [1, 2]}});
        let b = json!({"opts": {"y": [1, 2], "x": 1}, "lang": "en", "text": "hi"});
        let a = CacheKey::new("nlu", &a).unwrap();
        let b = CacheKey::new("nlu", &b).unwrap();
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert("lang", "en");
        map.insert("text", "hi");
        let c = CacheKey::new("nlu", &map).unwrap();
        let d = CacheKey::new("nlu", &json!({"text": "hi", "lang": "en"})).unwrap();
        assert_eq!(c, d);
    }

    #[test]
    fn array_order_and_namespace_matter() {
        let a = CacheKey::new("nlu", &json!([1, 2])).unwrap();
        let b = CacheKey::new("nlu", &json!([2, 1])).unwrap();
        assert_ne!(a, b);

        let c = CacheKey::new("other", &json!([1, 2])).unwrap();
        assert_ne!(a, c);
        assert_eq!(a.digest(), c.digest());
    }

    #[test]
    fn rendering() {
        let key = CacheKey::new("ns", "plain").unwrap();
        assert_eq!(key.namespace(), "ns");
        assert_eq!(key.digest().len(), 64);
        assert!(key.as_str().starts_with("ns:"));
        assert_eq!(key.to_string(), key.as_str());
    }
}
