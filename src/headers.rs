//! Header codec.
//!
//! Headers are an ordered sequence of `(name, value)` pairs with
//! case-insensitive name equality but preserved casing and insertion
//! order; duplicate names are permitted. The wire form is a JSON object,
//! so multiple values for the same canonical name are comma-joined before
//! serialization and deserialize back as a single value.

use serde_json::{Map, Value};

/// An ordered, case-insensitive-lookup header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    /// An empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, preserving any existing entry with the same
    /// canonical name (duplicates are allowed).
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Number of `(name, value)` pairs, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no headers at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive membership test.
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// The first value stored under `name`, case-insensitively.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to the compact JSON text form used for DB storage.
    ///
    /// On any serialization failure this returns the empty string rather
    /// than propagating.
    pub fn to_json(&self) -> String {
        let mut grouped: Map<String, Value> = Map::new();
        // First occurrence of a canonical name establishes the emitted
        // casing, matching how HTTP header names are conventionally
        // rendered from the first-seen form.
        let mut canonical_order: Vec<String> = Vec::new();
        let mut by_lower: std::collections::HashMap<String, (String, Vec<String>)> =
            std::collections::HashMap::new();
        for (name, value) in &self.entries {
            let lower = name.to_ascii_lowercase();
            match by_lower.get_mut(&lower) {
                Some((_, values)) => values.push(value.clone()),
                None => {
                    canonical_order.push(lower.clone());
                    by_lower.insert(lower, (name.clone(), vec![value.clone()]));
                }
            }
        }
        for lower in canonical_order {
            if let Some((name, values)) = by_lower.remove(&lower) {
                grouped.insert(name, Value::String(values.join(", ")));
            }
        }
        match serde_json::to_string(&Value::Object(grouped)) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to serialize headers to JSON: {e}");
                String::new()
            }
        }
    }

    /// Deserialize from the JSON text form.
    ///
    /// Malformed or non-object JSON yields an empty collection and logs a
    /// diagnostic rather than propagating.
    pub fn from_json(text: &str) -> Self {
        if text.is_empty() {
            return Self::new();
        }
        let parsed: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("malformed header JSON, treating as empty: {e}");
                return Self::new();
            }
        };
        let Value::Object(map) = parsed else {
            log::debug!("header JSON was not an object, treating as empty");
            return Self::new();
        };
        let mut headers = Self::new();
        for (name, value) in map {
            let value_str = match value {
                Value::String(s) => s,
                Value::Null => continue,
                other => other.to_string(),
            };
            headers.push(name, value_str);
        }
        headers
    }
}

impl FromIterator<(String, String)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.push(k, v);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_case_insensitive_lookup() {
        let mut h = HeaderList::new();
        h.push("X-My-Header-Name", "foo");
        h.push("X-My-Header-Name1", "bar");
        h.push("X-My-Header-Name2", "123");

        let json = h.to_json();
        let back = HeaderList::from_json(&json);

        assert!(back.has("x-my-header-name"));
        assert_eq!(back.value("X-MY-HEADER-NAME"), Some("foo"));
        assert_eq!(back.value("x-my-header-name1"), Some("bar"));
        assert_eq!(back.value("x-my-header-name2"), Some("123"));
    }

    #[test]
    fn duplicate_names_are_comma_joined_on_serialize() {
        let mut h = HeaderList::new();
        h.push("Set-Cookie", "a=1");
        h.push("Set-Cookie", "b=2");
        let json = h.to_json();
        let back = HeaderList::from_json(&json);
        assert_eq!(back.value("set-cookie"), Some("a=1, b=2"));
    }

    #[test]
    fn malformed_json_deserializes_to_empty() {
        let back = HeaderList::from_json("not json at all {{{");
        assert!(back.is_empty());
    }

    #[test]
    fn non_object_json_deserializes_to_empty() {
        let back = HeaderList::from_json("[1,2,3]");
        assert!(back.is_empty());
    }

    #[test]
    fn empty_collection_round_trips_to_empty_object() {
        let h = HeaderList::new();
        assert_eq!(h.to_json(), "{}");
        assert!(HeaderList::from_json("{}").is_empty());
    }
}
