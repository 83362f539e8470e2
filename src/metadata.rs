//! Endpoint metadata: an ordered key/value bag.
//!
//! Kept deliberately simple (`Vec<(String, String)>`) rather than a general
//! JSON tree: spec.md's only consumer of metadata is `metadata_match`
//! key/value criteria (spec.md §6). Deserializes straight out of the
//! `lb_endpoints[].metadata` object in the wire model the way
//! `resolver/namerd.rs`'s `NamerdAddr::meta` does for a flatter shape.

use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    pub fn new() -> Metadata {
        Metadata(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|&&(ref k, _)| k == key)
            .map(|&(_, ref v)| v.as_str())
    }

    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|&&mut (ref k, _)| *k == key) {
            Some(&mut (_, ref mut v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    /// True iff every `(key, value)` in `criteria` is present and equal.
    pub fn matches(&self, criteria: &Metadata) -> bool {
        criteria
            .0
            .iter()
            .all(|&(ref k, ref v)| self.get(k) == Some(v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|&(ref k, ref v)| (k.as_str(), v.as_str()))
    }
}

impl From<HashMap<String, String>> for Metadata {
    fn from(map: HashMap<String, String>) -> Metadata {
        let mut pairs: Vec<(String, String)> = map.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Metadata(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::Metadata;

    #[test]
    fn matches_subset_criteria() {
        let mut host = Metadata::new();
        host.insert("az", "us-east-1a");
        host.insert("canary", "true");

        let mut criteria = Metadata::new();
        criteria.insert("canary", "true");
        assert!(host.matches(&criteria));

        criteria.insert("canary", "false");
        assert!(!host.matches(&criteria));
    }
}
